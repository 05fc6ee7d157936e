//! OWS exception reports.

use quick_xml::escape::escape;
use wmts_common::WmtsError;

/// Render an error as an OWS 1.1 `ExceptionReport`.
pub fn wmts_exception(error: &WmtsError) -> String {
    let locator = match error.locator() {
        Some(locator) => format!(" locator=\"{}\"", escape(locator)),
        None => String::new(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1" version="1.0.0" xml:lang="en">
  <ows:Exception exceptionCode="{}"{}>
    <ows:ExceptionText>{}</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>
"#,
        error.exception_code(),
        locator,
        escape(&error.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_carries_code_and_locator() {
        let xml = wmts_exception(&WmtsError::MissingParameter("TileRow".into()));
        assert!(xml.contains(r#"exceptionCode="MissingParameterValue" locator="TileRow""#));
        assert!(xml.contains("Missing required parameter: TileRow"));
    }

    #[test]
    fn test_exception_text_is_escaped() {
        let xml = wmts_exception(&WmtsError::not_found("layer 'a<b>'"));
        assert!(xml.contains("layer &apos;a&lt;b&gt;&apos; not found"));
        assert!(!xml.contains("locator="));
    }
}
