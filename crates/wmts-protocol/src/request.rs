//! WMTS request parsing for the KVP and RESTful bindings.

use std::collections::HashMap;
use std::fmt;

use wmts_common::{LayerId, TileConvention, TimeSelector, WmtsError, WmtsResult};

/// The only protocol version served.
pub const WMTS_VERSION: &str = "1.0.0";

/// WMTS request types.
#[derive(Debug, Clone, PartialEq)]
pub enum WmtsRequest {
    GetCapabilities,
    GetTile(TileRequest),
    /// Recognised but not served.
    GetFeatureInfo,
}

/// Encoded image formats tiles can be delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    Png,
}

impl TileFormat {
    pub fn from_mime(mime: &str) -> WmtsResult<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" | "png" => Ok(TileFormat::Png),
            other => Err(WmtsError::invalid(
                "Format",
                format!("unsupported format '{}', only image/png is served", other),
            )),
        }
    }

    pub fn from_extension(ext: &str) -> WmtsResult<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Ok(TileFormat::Png),
            other => Err(WmtsError::invalid(
                "Format",
                format!("unsupported file extension '.{}'", other),
            )),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            TileFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Png => "png",
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Per-request rendering options shared by every tile route.
#[derive(Debug, Clone, PartialEq)]
pub struct TileOptions {
    pub time: TimeSelector,
    /// Color bar name overriding the configured one
    pub cbar: Option<String>,
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            time: TimeSelector::First,
            cbar: None,
            vmin: None,
            vmax: None,
        }
    }
}

impl TileOptions {
    /// Read `time`, `cbar`, `vmin` and `vmax` from query parameters (keys are case-insensitive).
    pub fn from_query(query: &HashMap<String, String>) -> WmtsResult<Self> {
        let get = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        };

        Ok(Self {
            time: TimeSelector::parse(get("time"))?,
            cbar: get("cbar").filter(|s| !s.is_empty()).map(str::to_string),
            vmin: parse_float("vmin", get("vmin"))?,
            vmax: parse_float("vmax", get("vmax"))?,
        })
    }
}

/// A validated GetTile request, independent of the binding it arrived through.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub layer: LayerId,
    /// Only present when the client named one (KVP)
    pub tile_matrix_set: Option<String>,
    pub tile_matrix: String,
    pub level: u32,
    pub row: u32,
    pub col: u32,
    pub format: TileFormat,
    pub convention: TileConvention,
    pub options: TileOptions,
}

impl TileRequest {
    pub fn new(
        layer: LayerId,
        tile_matrix: &str,
        row: u32,
        col: u32,
        format: TileFormat,
        options: TileOptions,
    ) -> WmtsResult<Self> {
        Ok(Self {
            level: parse_index("TileMatrix", tile_matrix)?,
            layer,
            tile_matrix_set: None,
            tile_matrix: tile_matrix.to_string(),
            row,
            col,
            format,
            convention: TileConvention::Xyz,
            options,
        })
    }
}

/// KVP (Key-Value Pair) query string parameters for WMTS.
///
/// Parameter names are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct WmtsKvpParams {
    pub service: Option<String>,
    pub request: Option<String>,
    pub version: Option<String>,
    pub layer: Option<String>,
    pub style: Option<String>,
    pub format: Option<String>,
    pub tile_matrix_set: Option<String>,
    pub tile_matrix: Option<String>,
    pub tile_row: Option<String>,
    pub tile_col: Option<String>,
    pub query: HashMap<String, String>,
}

impl WmtsKvpParams {
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let query: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into().to_ascii_uppercase(), v.into()))
            .collect();
        let get = |name: &str| query.get(name).cloned();

        Self {
            service: get("SERVICE"),
            request: get("REQUEST"),
            version: get("VERSION"),
            layer: get("LAYER"),
            style: get("STYLE"),
            format: get("FORMAT"),
            tile_matrix_set: get("TILEMATRIXSET"),
            tile_matrix: get("TILEMATRIX"),
            tile_row: get("TILEROW"),
            tile_col: get("TILECOL"),
            query,
        }
    }

    /// Parse into a typed request.
    pub fn into_request(self) -> WmtsResult<WmtsRequest> {
        match self.service.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("WMTS") => {}
            Some(s) => {
                return Err(WmtsError::invalid(
                    "Service",
                    format!("expected WMTS, got '{}'", s),
                ))
            }
            None => return Err(WmtsError::MissingParameter("Service".to_string())),
        }

        if let Some(version) = self.version.as_deref() {
            if version != WMTS_VERSION {
                return Err(WmtsError::invalid(
                    "Version",
                    format!("version '{}' is not supported, use {}", version, WMTS_VERSION),
                ));
            }
        }

        let request = self
            .request
            .as_deref()
            .ok_or_else(|| WmtsError::MissingParameter("Request".to_string()))?;

        if request.eq_ignore_ascii_case("GetCapabilities") {
            Ok(WmtsRequest::GetCapabilities)
        } else if request.eq_ignore_ascii_case("GetTile") {
            self.into_tile_request().map(WmtsRequest::GetTile)
        } else if request.eq_ignore_ascii_case("GetFeatureInfo") {
            Ok(WmtsRequest::GetFeatureInfo)
        } else {
            Err(WmtsError::invalid(
                "Request",
                format!("Unknown request: {}", request),
            ))
        }
    }

    fn into_tile_request(self) -> WmtsResult<TileRequest> {
        let layer = LayerId::parse(&required("Layer", self.layer)?)?;
        let tile_matrix = required("TileMatrix", self.tile_matrix)?;
        let row = parse_index("TileRow", &required("TileRow", self.tile_row)?)?;
        let col = parse_index("TileCol", &required("TileCol", self.tile_col)?)?;
        let format = match self.format.as_deref() {
            Some(mime) => TileFormat::from_mime(mime)?,
            None => TileFormat::Png,
        };
        if let Some(style) = self.style.as_deref() {
            if !style.is_empty() && !style.eq_ignore_ascii_case("default") {
                return Err(WmtsError::invalid(
                    "Style",
                    format!("unknown style '{}', only 'Default' is offered", style),
                ));
            }
        }
        let options = TileOptions::from_query(&self.query)?;

        let mut request = TileRequest::new(layer, &tile_matrix, row, col, format, options)?;
        request.tile_matrix_set = self.tile_matrix_set.filter(|s| !s.is_empty());
        Ok(request)
    }
}

/// RESTful resource paths below `/wmts/`.
#[derive(Debug, Clone, PartialEq)]
pub enum WmtsRestPath {
    /// `{version}/WMTSCapabilities.xml`
    Capabilities,
    /// `{version}/tile/{dataset}/{variable}/{TileMatrix}/{TileCol}/{TileRow}.{ext}`
    Tile {
        layer: LayerId,
        tile_matrix: String,
        col: u32,
        row: u32,
        format: TileFormat,
    },
}

impl WmtsRestPath {
    /// Parse a RESTful WMTS path relative to `/wmts/`.
    pub fn parse(path: &str) -> WmtsResult<Self> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();

        let (version, rest) = match parts.split_first() {
            Some((version, rest)) if !version.is_empty() => (*version, rest),
            _ => return Err(WmtsError::not_found("resource '/wmts/'")),
        };
        if version != WMTS_VERSION {
            return Err(WmtsError::invalid(
                "Version",
                format!("version '{}' is not supported, use {}", version, WMTS_VERSION),
            ));
        }

        match rest {
            ["WMTSCapabilities.xml"] => Ok(WmtsRestPath::Capabilities),
            ["tile", dataset, variable, tile_matrix, col, file] => {
                let col = parse_index("TileCol", col)?;
                let (row, format) = parse_tile_file("TileRow", file)?;
                parse_index("TileMatrix", tile_matrix)?;
                Ok(WmtsRestPath::Tile {
                    layer: LayerId::new(*dataset, *variable),
                    tile_matrix: tile_matrix.to_string(),
                    col,
                    row,
                    format,
                })
            }
            ["tile", ..] => Err(WmtsError::invalid(
                "path",
                "expected tile/{dataset}/{variable}/{TileMatrix}/{TileCol}/{TileRow}.{format}",
            )),
            _ => Err(WmtsError::not_found(format!("resource '/wmts/{}'", path.trim_matches('/')))),
        }
    }

    /// Attach the query options and produce a typed request.
    pub fn into_request(self, options: TileOptions) -> WmtsResult<WmtsRequest> {
        match self {
            WmtsRestPath::Capabilities => Ok(WmtsRequest::GetCapabilities),
            WmtsRestPath::Tile {
                layer,
                tile_matrix,
                col,
                row,
                format,
            } => TileRequest::new(layer, &tile_matrix, row, col, format, options)
                .map(WmtsRequest::GetTile),
        }
    }
}

/// Split the last path segment of a tile URL, e.g. `"15.png"`, into index and format.
pub fn parse_tile_file(param: &str, file: &str) -> WmtsResult<(u32, TileFormat)> {
    let (index, ext) = file
        .rsplit_once('.')
        .ok_or_else(|| WmtsError::invalid(param, "missing format extension"))?;
    Ok((parse_index(param, index)?, TileFormat::from_extension(ext)?))
}

fn required(param: &str, value: Option<String>) -> WmtsResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(WmtsError::MissingParameter(param.to_string())),
    }
}

fn parse_index(param: &str, value: &str) -> WmtsResult<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        WmtsError::invalid(param, format!("'{}' is not a non-negative integer", value))
    })
}

fn parse_float(param: &str, value: Option<&str>) -> WmtsResult<Option<f64>> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(WmtsError::invalid(param, format!("'{}' is not a finite number", s))),
        },
    }
}
