//! Service configuration loader.
//!
//! The configuration is a single YAML file listing the served datasets and
//! the styles (per-variable color mappings) they use. Keys are PascalCase.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use renderer::{ColorMapping, ValueScale};
use serde::{Deserialize, Serialize};
use storage::{DatasetDescriptor, SourceFormat};
use tracing::info;
use wmts_common::DEFAULT_TILE_SIZE;
use wmts_protocol::TileOptions;

/// Color bar used when neither the request nor the style names one.
pub const DEFAULT_COLOR_BAR: &str = "jet";
pub const DEFAULT_VMIN: f64 = 0.0;
pub const DEFAULT_VMAX: f64 = 1.0;

/// Default dataset idle time before closing, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub r#abstract: String,
    #[serde(default)]
    pub service_provider: ServiceProvider,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub styles: Vec<StyleConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceProvider {
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub provider_site: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatasetConfig {
    pub identifier: String,
    #[serde(default)]
    pub title: Option<String>,
    pub path: String,
    #[serde(default)]
    pub format: SourceFormat,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StyleConfig {
    pub identifier: String,
    /// Variable name to color mapping
    #[serde(default)]
    pub color_mappings: BTreeMap<String, ColorMappingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColorMappingConfig {
    pub color_bar: Option<String>,
    pub value_range: Option<[f64; 2]>,
    #[serde(default)]
    pub no_data: Option<f64>,
    /// `linear` (default) or `log`
    #[serde(default)]
    pub scale: Option<ValueScale>,
}

fn default_title() -> String {
    "Gridded data tile server".to_string()
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            r#abstract: String::new(),
            service_provider: ServiceProvider::default(),
            tile_size: DEFAULT_TILE_SIZE,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            datasets: Vec::new(),
            styles: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Load and validate a configuration file.
    ///
    /// Relative dataset paths resolve against the directory of the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.resolve_paths(&base_dir);

        info!(
            path = ?path,
            datasets = config.datasets.len(),
            styles = config.styles.len(),
            "Loaded service configuration"
        );
        Ok(config)
    }

    /// Parse and validate YAML text. Paths are left untouched.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(16..=4096).contains(&self.tile_size) {
            bail!("TileSize must be within [16, 4096], got {}", self.tile_size);
        }

        let mut ids = HashSet::new();
        for dataset in &self.datasets {
            if dataset.identifier.is_empty() {
                bail!("dataset with path '{}' has an empty Identifier", dataset.path);
            }
            // Layer names are "<dataset>.<variable>"
            if dataset.identifier.contains('.') || dataset.identifier.contains('/') {
                bail!("dataset identifier '{}' must not contain '.' or '/'", dataset.identifier);
            }
            if !ids.insert(dataset.identifier.as_str()) {
                bail!("duplicate dataset identifier '{}'", dataset.identifier);
            }
            if let Some(style) = &dataset.style {
                if self.style(style).is_none() {
                    bail!("dataset '{}' references unknown style '{}'", dataset.identifier, style);
                }
            }
        }

        let mut style_ids = HashSet::new();
        for style in &self.styles {
            if !style_ids.insert(style.identifier.as_str()) {
                bail!("duplicate style identifier '{}'", style.identifier);
            }
            for (variable, mapping) in &style.color_mappings {
                if let Some([vmin, vmax]) = mapping.value_range {
                    if !vmin.is_finite() || !vmax.is_finite() || vmin >= vmax {
                        bail!(
                            "style '{}' variable '{}': ValueRange [{}, {}] must be finite with min < max",
                            style.identifier,
                            variable,
                            vmin,
                            vmax
                        );
                    }
                }
                let positive_range = mapping.value_range.is_some_and(|[vmin, _]| vmin > 0.0);
                if mapping.scale == Some(ValueScale::Log) && !positive_range {
                    bail!(
                        "style '{}' variable '{}': log Scale needs a ValueRange with a positive minimum",
                        style.identifier,
                        variable
                    );
                }
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for dataset in &mut self.datasets {
            if dataset.format == SourceFormat::Zarr && Path::new(&dataset.path).is_relative() {
                dataset.path = base_dir.join(&dataset.path).to_string_lossy().into_owned();
            }
        }
    }

    /// Configuration serving the synthetic in-memory dataset `demo`.
    pub fn demo() -> Self {
        Self {
            datasets: vec![DatasetConfig {
                identifier: "demo".to_string(),
                title: Some("Synthetic demo dataset".to_string()),
                path: "memory://demo".to_string(),
                format: SourceFormat::Memory,
                style: None,
            }],
            ..Self::default()
        }
    }

    pub fn style(&self, identifier: &str) -> Option<&StyleConfig> {
        self.styles.iter().find(|s| s.identifier == identifier)
    }

    pub fn dataset(&self, identifier: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.identifier == identifier)
    }

    /// Descriptors of all configured datasets, in configuration order.
    pub fn descriptors(&self) -> Vec<DatasetDescriptor> {
        self.datasets.iter().map(DatasetConfig::descriptor).collect()
    }

    /// Configured color mapping for a dataset variable, if any.
    pub fn color_mapping_config(&self, dataset: &str, variable: &str) -> Option<&ColorMappingConfig> {
        let style = self.dataset(dataset)?.style.as_deref()?;
        self.style(style)?.color_mappings.get(variable)
    }

    /// Effective color mapping: request overrides, then the dataset style,
    /// then the service defaults.
    pub fn resolve_color_mapping(
        &self,
        dataset: &str,
        variable: &str,
        options: &TileOptions,
        fill_value: Option<f64>,
    ) -> ColorMapping {
        let configured = self.color_mapping_config(dataset, variable);
        let range = configured.and_then(|c| c.value_range);

        let color_bar = options
            .cbar
            .clone()
            .or_else(|| configured.and_then(|c| c.color_bar.clone()))
            .unwrap_or_else(|| DEFAULT_COLOR_BAR.to_string());
        let vmin = options.vmin.or(range.map(|r| r[0])).unwrap_or(DEFAULT_VMIN);
        let vmax = options.vmax.or(range.map(|r| r[1])).unwrap_or(DEFAULT_VMAX);
        let no_data = configured.and_then(|c| c.no_data).or(fill_value);
        let scale = configured.and_then(|c| c.scale).unwrap_or_default();

        ColorMapping::new(color_bar, vmin, vmax)
            .with_no_data(no_data)
            .with_scale(scale)
    }
}

impl DatasetConfig {
    pub fn descriptor(&self) -> DatasetDescriptor {
        DatasetDescriptor {
            identifier: self.identifier.clone(),
            title: self.title.clone(),
            path: self.path.clone(),
            format: self.format,
        }
    }
}

/// Resolve the config path from an explicit argument.
pub fn config_path(arg: Option<&str>) -> Option<PathBuf> {
    arg.filter(|s| !s.is_empty()).map(PathBuf::from)
}
