//! WMTS Capabilities document generation.

use std::collections::BTreeMap;

use quick_xml::escape::escape;
use wmts_common::{BoundingBox, LayerId, TileMatrixSet};

use crate::request::{TileFormat, WMTS_VERSION};

/// Service-level metadata.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub title: String,
    pub abstract_text: String,
    pub provider_name: String,
    pub provider_site: String,
    /// Public base URL without trailing slash, e.g. `http://localhost:8080`
    pub base_url: String,
}

/// Layer information for capabilities.
#[derive(Debug, Clone)]
pub struct WmtsLayerInfo {
    pub layer: LayerId,
    pub title: String,
    pub abstract_text: String,
    pub bounding_box: BoundingBox,
    pub formats: Vec<TileFormat>,
    pub tile_matrix_set: String,
    pub dimensions: Vec<WmtsDimensionInfo>,
}

#[derive(Debug, Clone)]
pub struct WmtsDimensionInfo {
    pub identifier: String,
    pub title: String,
    pub uom: String,
    pub default: String,
    pub current: bool,
    pub values: Vec<String>,
}

/// A dataset grouping its layers in the `Themes` section.
#[derive(Debug, Clone)]
pub struct WmtsThemeInfo {
    pub identifier: String,
    pub title: String,
    pub abstract_text: String,
    /// `(layer, title)` pairs
    pub layers: Vec<(LayerId, String)>,
}

/// Generate the WMTS Capabilities XML document.
///
/// Layers and themes are written in the order given; tile matrix sets are
/// deduplicated by identifier and written in identifier order. Output depends
/// only on the inputs.
pub struct WmtsCapabilitiesBuilder {
    pub service: ServiceInfo,
    pub layers: Vec<WmtsLayerInfo>,
    pub tile_matrix_sets: Vec<TileMatrixSet>,
    pub themes: Vec<WmtsThemeInfo>,
}

impl WmtsCapabilitiesBuilder {
    pub fn new(service: ServiceInfo) -> Self {
        Self {
            service,
            layers: Vec::new(),
            tile_matrix_sets: Vec::new(),
            themes: Vec::new(),
        }
    }

    pub fn build(&self) -> String {
        let mut xml = String::new();

        xml.push_str(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Capabilities xmlns="http://www.opengis.net/wmts/1.0"
    xmlns:ows="http://www.opengis.net/ows/1.1"
    xmlns:xlink="http://www.w3.org/1999/xlink"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xsi:schemaLocation="http://www.opengis.net/wmts/1.0 http://schemas.opengis.net/wmts/1.0.0/wmtsGetCapabilities_response.xsd"
    version="1.0.0">
"#,
        );

        self.write_service(&mut xml);
        self.write_operations(&mut xml);

        xml.push_str("  <Contents>\n");
        for layer in &self.layers {
            self.write_layer(&mut xml, layer);
        }
        let sets: BTreeMap<&str, &TileMatrixSet> = self
            .tile_matrix_sets
            .iter()
            .map(|set| (set.identifier.as_str(), set))
            .collect();
        for set in sets.values() {
            write_tile_matrix_set(&mut xml, set);
        }
        xml.push_str("  </Contents>\n");

        self.write_themes(&mut xml);

        xml.push_str(&format!(
            "  <ServiceMetadataURL xlink:href=\"{}\"/>\n",
            escape(&self.capabilities_url())
        ));
        xml.push_str("</Capabilities>\n");

        xml
    }

    /// URL of the RESTful capabilities document.
    pub fn capabilities_url(&self) -> String {
        format!("{}/wmts/{}/WMTSCapabilities.xml", self.service.base_url, WMTS_VERSION)
    }

    /// ResourceURL template for a layer's tiles.
    pub fn tile_url_template(&self, layer: &LayerId, format: TileFormat) -> String {
        format!(
            "{}/wmts/{}/tile/{}/{}/{{TileMatrix}}/{{TileCol}}/{{TileRow}}.{}",
            self.service.base_url,
            WMTS_VERSION,
            layer.dataset,
            layer.variable,
            format.extension()
        )
    }

    fn write_service(&self, xml: &mut String) {
        xml.push_str(&format!(
            r#"  <ows:ServiceIdentification>
    <ows:Title>{}</ows:Title>
    <ows:Abstract>{}</ows:Abstract>
    <ows:ServiceType>OGC WMTS</ows:ServiceType>
    <ows:ServiceTypeVersion>{}</ows:ServiceTypeVersion>
  </ows:ServiceIdentification>
  <ows:ServiceProvider>
    <ows:ProviderName>{}</ows:ProviderName>
    <ows:ProviderSite xlink:href="{}"/>
  </ows:ServiceProvider>
"#,
            escape(&self.service.title),
            escape(&self.service.abstract_text),
            WMTS_VERSION,
            escape(&self.service.provider_name),
            escape(&self.service.provider_site),
        ));
    }

    fn write_operations(&self, xml: &mut String) {
        let rest_url = escape(&self.capabilities_url()).into_owned();
        let tile_url = format!("{}/wmts/{}/tile/", self.service.base_url, WMTS_VERSION);
        let kvp_url = format!("{}/wmts/{}/kvp?", self.service.base_url, WMTS_VERSION);

        xml.push_str("  <ows:OperationsMetadata>\n");
        for (operation, rest) in [("GetCapabilities", rest_url), ("GetTile", escape(&tile_url).into_owned())] {
            xml.push_str(&format!(
                r#"    <ows:Operation name="{0}">
      <ows:DCP>
        <ows:HTTP>
          <ows:Get xlink:href="{1}">
            <ows:Constraint name="GetEncoding">
              <ows:AllowedValues><ows:Value>RESTful</ows:Value></ows:AllowedValues>
            </ows:Constraint>
          </ows:Get>
          <ows:Get xlink:href="{2}">
            <ows:Constraint name="GetEncoding">
              <ows:AllowedValues><ows:Value>KVP</ows:Value></ows:AllowedValues>
            </ows:Constraint>
          </ows:Get>
        </ows:HTTP>
      </ows:DCP>
    </ows:Operation>
"#,
                operation,
                rest,
                escape(&kvp_url)
            ));
        }
        xml.push_str("  </ows:OperationsMetadata>\n");
    }

    fn write_layer(&self, xml: &mut String, layer: &WmtsLayerInfo) {
        let bbox = &layer.bounding_box;
        xml.push_str(&format!(
            r#"    <Layer>
      <ows:Identifier>{}</ows:Identifier>
      <ows:Title>{}</ows:Title>
      <ows:Abstract>{}</ows:Abstract>
      <ows:WGS84BoundingBox>
        <ows:LowerCorner>{} {}</ows:LowerCorner>
        <ows:UpperCorner>{} {}</ows:UpperCorner>
      </ows:WGS84BoundingBox>
      <Style isDefault="true">
        <ows:Identifier>Default</ows:Identifier>
      </Style>
"#,
            escape(&layer.layer.to_string()),
            escape(&layer.title),
            escape(&layer.abstract_text),
            bbox.min_x,
            bbox.min_y,
            bbox.max_x,
            bbox.max_y
        ));

        for format in &layer.formats {
            xml.push_str(&format!("      <Format>{}</Format>\n", format.mime_type()));
        }

        for dim in &layer.dimensions {
            xml.push_str(&format!(
                r#"      <Dimension>
        <ows:Identifier>{}</ows:Identifier>
        <ows:Title>{}</ows:Title>
        <ows:UOM>{}</ows:UOM>
        <Default>{}</Default>
        <Current>{}</Current>
"#,
                escape(&dim.identifier),
                escape(&dim.title),
                escape(&dim.uom),
                escape(&dim.default),
                dim.current
            ));
            for value in &dim.values {
                xml.push_str(&format!("        <Value>{}</Value>\n", escape(value)));
            }
            xml.push_str("      </Dimension>\n");
        }

        xml.push_str(&format!(
            r#"      <TileMatrixSetLink>
        <TileMatrixSet>{}</TileMatrixSet>
      </TileMatrixSetLink>
"#,
            escape(&layer.tile_matrix_set)
        ));

        for format in &layer.formats {
            xml.push_str(&format!(
                "      <ResourceURL format=\"{}\" resourceType=\"tile\" template=\"{}\"/>\n",
                format.mime_type(),
                escape(&self.tile_url_template(&layer.layer, *format))
            ));
        }

        xml.push_str("    </Layer>\n");
    }

    fn write_themes(&self, xml: &mut String) {
        if self.themes.is_empty() {
            return;
        }
        xml.push_str("  <Themes>\n");
        for theme in &self.themes {
            xml.push_str(&format!(
                r#"    <Theme>
      <ows:Title>{}</ows:Title>
      <ows:Abstract>{}</ows:Abstract>
      <ows:Identifier>{}</ows:Identifier>
"#,
                escape(&theme.title),
                escape(&theme.abstract_text),
                escape(&theme.identifier)
            ));
            for (layer, title) in &theme.layers {
                let id = layer.to_string();
                xml.push_str(&format!(
                    r#"      <Theme>
        <ows:Title>{}</ows:Title>
        <ows:Identifier>{}</ows:Identifier>
        <LayerRef>{}</LayerRef>
      </Theme>
"#,
                    escape(title),
                    escape(&id),
                    escape(&id)
                ));
            }
            xml.push_str("    </Theme>\n");
        }
        xml.push_str("  </Themes>\n");
    }
}

fn write_tile_matrix_set(xml: &mut String, set: &TileMatrixSet) {
    let coverage = set.coverage();
    xml.push_str(&format!(
        r#"    <TileMatrixSet>
      <ows:Identifier>{}</ows:Identifier>
      <ows:BoundingBox crs="urn:ogc:def:crs:OGC:1.3:CRS84">
        <ows:LowerCorner>{} {}</ows:LowerCorner>
        <ows:UpperCorner>{} {}</ows:UpperCorner>
      </ows:BoundingBox>
      <ows:SupportedCRS>urn:ogc:def:crs:EPSG::4326</ows:SupportedCRS>
"#,
        escape(&set.identifier),
        coverage.min_x,
        coverage.min_y,
        coverage.max_x,
        coverage.max_y
    ));

    // EPSG:4326 axis order is latitude first
    for matrix in &set.tile_matrices {
        let (left, top) = matrix.top_left_corner();
        xml.push_str(&format!(
            r#"      <TileMatrix>
        <ows:Identifier>{}</ows:Identifier>
        <ScaleDenominator>{}</ScaleDenominator>
        <TopLeftCorner>{} {}</TopLeftCorner>
        <TileWidth>{}</TileWidth>
        <TileHeight>{}</TileHeight>
        <MatrixWidth>{}</MatrixWidth>
        <MatrixHeight>{}</MatrixHeight>
      </TileMatrix>
"#,
            matrix.identifier,
            matrix.scale_denominator(),
            top,
            left,
            matrix.tile_width,
            matrix.tile_height,
            matrix.matrix_width,
            matrix.matrix_height
        ));
    }

    xml.push_str("    </TileMatrixSet>\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::Event;
    use quick_xml::Reader;
    use wmts_common::{TileGrid, TileGridKey};

    fn service() -> ServiceInfo {
        ServiceInfo {
            title: "Ocean & Land tiles".into(),
            abstract_text: String::new(),
            provider_name: "Test".into(),
            provider_site: "https://example.org".into(),
            base_url: "http://localhost:8080".into(),
        }
    }

    fn grid() -> TileGrid {
        TileGrid::new(
            TileGridKey::new("/data/cube.zarr", vec![2, 180, 360], vec![1, 180, 360]),
            BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            256,
        )
        .unwrap()
    }

    fn builder() -> WmtsCapabilitiesBuilder {
        let grid = grid();
        let layer = LayerId::new("local", "conc_chl");
        let mut builder = WmtsCapabilitiesBuilder::new(service());
        builder.layers.push(WmtsLayerInfo {
            layer: layer.clone(),
            title: "Chlorophyll <a>".into(),
            abstract_text: String::new(),
            bounding_box: grid.extent,
            formats: vec![TileFormat::Png],
            tile_matrix_set: grid.identifier().to_string(),
            dimensions: vec![WmtsDimensionInfo {
                identifier: "time".into(),
                title: "time".into(),
                uom: "ISO8601".into(),
                default: "current".into(),
                current: true,
                values: vec!["2017-01-16T00:00:00Z".into(), "2017-01-25T00:00:00Z".into()],
            }],
        });
        // the same grid twice: written once
        builder.tile_matrix_sets.push(grid.xyz.clone());
        builder.tile_matrix_sets.push(grid.xyz.clone());
        builder.themes.push(WmtsThemeInfo {
            identifier: "local".into(),
            title: "Local".into(),
            abstract_text: String::new(),
            layers: vec![(layer, "Chlorophyll".into())],
        });
        builder
    }

    #[test]
    fn test_document_is_well_formed() {
        let xml = builder().build();
        let mut reader = Reader::from_str(&xml);
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => panic!("malformed capabilities at {}: {}", reader.buffer_position(), e),
            }
        }
    }

    #[test]
    fn test_document_contents() {
        let xml = builder().build();
        assert!(xml.contains("<ows:Title>Ocean &amp; Land tiles</ows:Title>"));
        assert!(xml.contains("<ows:Identifier>local.conc_chl</ows:Identifier>"));
        assert!(xml.contains("Chlorophyll &lt;a&gt;"));
        assert!(xml.contains(
            "template=\"http://localhost:8080/wmts/1.0.0/tile/local/conc_chl/{TileMatrix}/{TileCol}/{TileRow}.png\""
        ));
        assert!(xml.contains("<TopLeftCorner>90 -180</TopLeftCorner>"));
        assert!(xml.contains("<MatrixWidth>2</MatrixWidth>"));
        assert!(xml.contains("<Value>2017-01-25T00:00:00Z</Value>"));
        assert!(xml.contains("<LayerRef>local.conc_chl</LayerRef>"));
        assert_eq!(xml.matches("<TileMatrixSet>\n").count(), 1);
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = builder();
        assert_eq!(builder.build(), builder.build());
    }
}
