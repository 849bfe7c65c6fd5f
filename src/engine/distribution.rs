//! Firmware Distribution
//!
//! Serves firmware images to devices, including partial downloads so an
//! interrupted OTA transfer can resume where it stopped.

use std::sync::Arc;

use base64::Engine;
use serde_json::{json, Map, Value};
use tracing::error;

use crate::engine::range::RangeRequest;
use crate::engine::storage::{firmware_key, ObjectStore, StorageError};
use crate::engine::version::FirmwareVersion;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const APPLICATION_JSON: &str = "application/json";

/// Why a firmware could not be served
#[derive(Debug)]
pub enum DistributionError {
    /// No firmware for the requested version (404)
    NotFound,
    /// Anything else (500)
    Fault(String),
}

impl From<StorageError> for DistributionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => Self::NotFound,
            other => Self::Fault(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Binary(Vec<u8>),
    Json(Value),
}

/// Transport independent response
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: ResponseBody,
}

impl FirmwareResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn error(err: DistributionError) -> Self {
        let (status, body) = match err {
            DistributionError::NotFound => (404, json!({ "message": "Firmware not found" })),
            DistributionError::Fault(_) => (500, json!({ "error_message": "Internal Server Error" })),
        };
        Self {
            status,
            headers: vec![
                ("Content-Type", APPLICATION_JSON.to_string()),
                ("Accept-Ranges", "bytes".to_string()),
            ],
            body: ResponseBody::Json(body),
        }
    }

    /// Proxy-integration form for text-only transports: binary bodies are base64
    /// encoded and flagged so the gateway decodes them before delivery.
    pub fn to_gateway_payload(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.clone())))
            .collect();

        let (body, is_base64) = match &self.body {
            ResponseBody::Binary(data) => (
                base64::engine::general_purpose::STANDARD.encode(data),
                true,
            ),
            ResponseBody::Json(value) => (value.to_string(), false),
        };

        json!({
            "statusCode": self.status,
            "headers": headers,
            "body": body,
            "isBase64Encoded": is_base64,
        })
    }
}

/// Serves firmware images from the object store. Stateless.
#[derive(Clone)]
pub struct DistributionEndpoint {
    store: Arc<dyn ObjectStore>,
}

impl DistributionEndpoint {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Serve the firmware for `version`, honoring an optional `Range` header.
    pub fn serve(&self, version: &str, range_header: Option<&str>) -> FirmwareResponse {
        match self.fetch(version, range_header) {
            Ok(response) => response,
            Err(err) => {
                if let DistributionError::Fault(cause) = &err {
                    error!(%version, "Error fetching firmware: {}", cause);
                }
                FirmwareResponse::error(err)
            }
        }
    }

    fn fetch(
        &self,
        version: &str,
        range_header: Option<&str>,
    ) -> Result<FirmwareResponse, DistributionError> {
        // A version that cannot exist is not looked up
        if version.parse::<FirmwareVersion>().is_err() {
            return Err(DistributionError::NotFound);
        }

        let range = range_header.and_then(RangeRequest::parse);
        let object = self.store.get(&firmware_key(version), range.as_ref())?;

        let mut headers = vec![
            ("Content-Type", OCTET_STREAM.to_string()),
            ("Accept-Ranges", "bytes".to_string()),
            ("Content-Length", object.data.len().to_string()),
        ];

        let status = match object.content_range {
            Some(content_range) => {
                headers.push(("Content-Range", content_range));
                206
            }
            None => 200,
        };

        Ok(FirmwareResponse {
            status,
            headers,
            body: ResponseBody::Binary(object.data),
        })
    }

    /// Handle an API gateway proxy event and return the proxy response.
    ///
    /// The version comes from `pathParameters.version`, the range from
    /// `headers.range` or `headers.Range`.
    pub fn handle_gateway_event(&self, event: &Value) -> Value {
        let version = event
            .pointer("/pathParameters/version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let range = event.get("headers").and_then(|headers| {
            headers
                .get("range")
                .or_else(|| headers.get("Range"))
                .and_then(Value::as_str)
        });

        self.serve(version, range).to_gateway_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::{FileObjectStore, StoredObject};
    use tempfile::tempdir;

    fn firmware(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn endpoint_with(version: &str, data: &[u8]) -> (tempfile::TempDir, DistributionEndpoint) {
        let dir = tempdir().unwrap();
        let store = FileObjectStore::open(dir.path(), "https://cdn.example.com").unwrap();
        store.put(&firmware_key(version), data).unwrap();
        (dir, DistributionEndpoint::new(Arc::new(store)))
    }

    struct FailingStore;

    impl ObjectStore for FailingStore {
        fn put(&self, _key: &str, _data: &[u8]) -> Result<String, StorageError> {
            unimplemented!()
        }

        fn create(&self, _key: &str, _data: &[u8]) -> Result<String, StorageError> {
            unimplemented!()
        }

        fn get(&self, _key: &str, _range: Option<&RangeRequest>) -> Result<StoredObject, StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "storage backend reset",
            )))
        }

        fn delete(&self, _key: &str) -> Result<(), StorageError> {
            unimplemented!()
        }
    }

    #[test]
    fn test_full_download() {
        let data = firmware(1000);
        let (_dir, endpoint) = endpoint_with("2.0.0", &data);

        let response = endpoint.serve("2.0.0", None);
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some(OCTET_STREAM));
        assert_eq!(response.header("Accept-Ranges"), Some("bytes"));
        assert_eq!(response.header("Content-Length"), Some("1000"));
        assert_eq!(response.header("Content-Range"), None);
        assert_eq!(response.body, ResponseBody::Binary(data));
    }

    #[test]
    fn test_partial_download() {
        let data = firmware(1000);
        let (_dir, endpoint) = endpoint_with("2.0.0", &data);

        let response = endpoint.serve("2.0.0", Some("bytes=0-99"));
        assert_eq!(response.status, 206);
        assert_eq!(response.header("Content-Range"), Some("bytes 0-99/1000"));
        assert_eq!(response.header("Content-Length"), Some("100"));
        assert_eq!(response.header("Accept-Ranges"), Some("bytes"));
        assert_eq!(response.body, ResponseBody::Binary(data[..100].to_vec()));
    }

    #[test]
    fn test_resume_from_offset() {
        let data = firmware(1000);
        let (_dir, endpoint) = endpoint_with("2.0.0", &data);

        let response = endpoint.serve("2.0.0", Some("bytes=600-"));
        assert_eq!(response.status, 206);
        assert_eq!(response.header("Content-Range"), Some("bytes 600-999/1000"));
        assert_eq!(response.header("Content-Length"), Some("400"));
    }

    #[test]
    fn test_unparseable_range_serves_full_object() {
        let data = firmware(64);
        let (_dir, endpoint) = endpoint_with("2.0.0", &data);

        let response = endpoint.serve("2.0.0", Some("pages=1"));
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Length"), Some("64"));
    }

    #[test]
    fn test_missing_firmware_is_404() {
        let (_dir, endpoint) = endpoint_with("2.0.0", b"x");

        let response = endpoint.serve("9.9.9", None);
        assert_eq!(response.status, 404);
        assert_eq!(response.header("Content-Type"), Some(APPLICATION_JSON));
        assert_eq!(
            response.body,
            ResponseBody::Json(json!({ "message": "Firmware not found" }))
        );
    }

    #[test]
    fn test_malformed_version_is_404() {
        let (_dir, endpoint) = endpoint_with("2.0.0", b"x");
        assert_eq!(endpoint.serve("../../etc/passwd", None).status, 404);
        assert_eq!(endpoint.serve("latest", None).status, 404);
    }

    #[test]
    fn test_store_fault_is_500() {
        let endpoint = DistributionEndpoint::new(Arc::new(FailingStore));

        let response = endpoint.serve("2.0.0", None);
        assert_eq!(response.status, 500);
        assert_eq!(
            response.body,
            ResponseBody::Json(json!({ "error_message": "Internal Server Error" }))
        );
    }

    #[test]
    fn test_unsatisfiable_range_is_fault() {
        let (_dir, endpoint) = endpoint_with("2.0.0", &firmware(10));
        assert_eq!(endpoint.serve("2.0.0", Some("bytes=50-60")).status, 500);
    }

    #[test]
    fn test_gateway_event_is_base64_encoded() {
        let data = firmware(300);
        let (_dir, endpoint) = endpoint_with("2.0.0", &data);

        let event = json!({
            "pathParameters": { "version": "2.0.0" },
            "headers": { "Range": "bytes=100-199" }
        });
        let payload = endpoint.handle_gateway_event(&event);

        assert_eq!(payload["statusCode"], 206);
        assert_eq!(payload["isBase64Encoded"], true);
        assert_eq!(payload["headers"]["Content-Range"], "bytes 100-199/300");
        let body = base64::engine::general_purpose::STANDARD
            .decode(payload["body"].as_str().unwrap())
            .unwrap();
        assert_eq!(body, data[100..200].to_vec());
    }

    #[test]
    fn test_gateway_error_payload_is_json_text() {
        let (_dir, endpoint) = endpoint_with("2.0.0", b"x");
        let payload = endpoint.handle_gateway_event(&json!({
            "pathParameters": { "version": "3.0.0" },
        }));

        assert_eq!(payload["statusCode"], 404);
        assert_eq!(payload["isBase64Encoded"], false);
        let body: Value = serde_json::from_str(payload["body"].as_str().unwrap()).unwrap();
        assert_eq!(body["message"], "Firmware not found");
    }
}
