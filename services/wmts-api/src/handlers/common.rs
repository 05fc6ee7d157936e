//! Response helpers shared by the handlers.

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tracing::error;

use wmts_common::WmtsError;
use wmts_protocol::wmts_exception;

/// Tiles may be cached by clients for a short while.
const TILE_CACHE_CONTROL: &str = "max-age=60";

fn status_of(err: &WmtsError) -> StatusCode {
    StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn log_server_error(err: &WmtsError) {
    if !err.is_client_error() {
        error!(error = %err, "request failed");
    }
}

/// OWS `ExceptionReport` response for the WMTS endpoints.
pub fn wmts_error_response(err: &WmtsError) -> Response {
    log_server_error(err);
    (
        status_of(err),
        [(header::CONTENT_TYPE, "application/xml")],
        wmts_exception(err),
    )
        .into_response()
}

/// JSON error body for the auxiliary API.
pub fn json_error_response(err: &WmtsError) -> Response {
    log_server_error(err);
    let body = json!({
        "error": {
            "code": err.http_status_code(),
            "message": err.to_string(),
        }
    });
    (status_of(err), Json(body)).into_response()
}

/// Error type for JSON handlers.
#[derive(Debug)]
pub struct ApiError(pub WmtsError);

impl From<WmtsError> for ApiError {
    fn from(err: WmtsError) -> Self {
        ApiError(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        json_error_response(&self.0)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn png_response(data: Bytes) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, TILE_CACHE_CONTROL),
        ],
        data,
    )
        .into_response()
}

pub fn xml_response(xml: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

/// Service base URL as seen by the client.
pub fn base_url(headers: &HeaderMap) -> String {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let host = header("x-forwarded-host")
        .or_else(|| header(header::HOST.as_str()))
        .unwrap_or("localhost");
    let scheme = header("x-forwarded-proto").unwrap_or("http");
    format!("{}://{}", scheme, host)
}

/// Run blocking work off the async runtime.
pub async fn blocking<T, F>(f: F) -> Result<T, WmtsError>
where
    F: FnOnce() -> Result<T, WmtsError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WmtsError::Internal(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_base_url_prefers_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("internal:8080"));
        assert_eq!(base_url(&headers), "http://internal:8080");

        headers.insert("x-forwarded-host", HeaderValue::from_static("tiles.example.org"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(base_url(&headers), "https://tiles.example.org");
        assert_eq!(base_url(&HeaderMap::new()), "http://localhost");
    }

    #[test]
    fn test_error_statuses() {
        let res = wmts_error_response(&WmtsError::not_found("dataset 'ghost'"));
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = json_error_response(&WmtsError::unavailable("local", "gone"));
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
