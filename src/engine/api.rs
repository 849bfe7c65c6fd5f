//! OtaDeploy API Module
//! HTTP server for firmware downloads and release metadata

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header::RANGE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::OpenApi;

use crate::engine::database::MetadataStore;
use crate::engine::distribution::{DistributionEndpoint, FirmwareResponse, ResponseBody};
use crate::engine::release::FirmwareRelease;

#[derive(Clone)]
pub struct ApiState {
    pub endpoint: DistributionEndpoint,
    pub db: Arc<dyn MetadataStore>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        download_firmware,
        list_releases,
    ),
    tags(
        (name = "firmware", description = "OTA firmware downloads"),
        (name = "releases", description = "Release metadata"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/firmware/{version}", get(download_firmware))
        .route("/api/releases", get(list_releases))
        .route("/api/health", get(health_check))
        .route("/api/openapi.json", get(openapi_spec))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn into_http_response(response: FirmwareResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(*name, value.as_str());
    }

    let body = match response.body {
        ResponseBody::Binary(data) => Body::from(data),
        ResponseBody::Json(value) => Body::from(value.to_string()),
    };

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[utoipa::path(
    get,
    path = "/firmware/{version}",
    params(
        ("version" = String, Path, description = "Firmware version (major.minor.patch)"),
        ("Range" = Option<String>, Header, description = "Byte range, e.g. bytes=0-1023"),
    ),
    responses(
        (status = 200, description = "Full firmware image"),
        (status = 206, description = "Requested byte range"),
        (status = 404, description = "Firmware not found"),
        (status = 500, description = "Storage failure"),
    ),
    tag = "firmware"
)]
async fn download_firmware(
    State(state): State<ApiState>,
    Path(version): Path<String>,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let endpoint = state.endpoint.clone();
    let served =
        tokio::task::spawn_blocking(move || endpoint.serve(&version, range.as_deref())).await;

    match served {
        Ok(response) => into_http_response(response),
        Err(e) => {
            error!("Firmware download task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct ReleaseQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[utoipa::path(
    get,
    path = "/api/releases",
    params(
        ("limit" = Option<usize>, Query, description = "Maximum number of releases"),
    ),
    responses(
        (status = 200, description = "Most recent releases first", body = serde_json::Value)
    ),
    tag = "releases"
)]
async fn list_releases(
    State(state): State<ApiState>,
    Query(params): Query<ReleaseQuery>,
) -> Result<Json<Vec<FirmwareRelease>>, StatusCode> {
    state.db.list_releases(params.limit).map(Json).map_err(|e| {
        error!("Failed to list releases: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::database::Database;
    use crate::engine::release::NewRelease;
    use crate::engine::storage::{firmware_key, FileObjectStore, ObjectStore};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::open(dir.path(), "https://cdn.example.com").unwrap();
        store.put(&firmware_key("2.0.0"), &vec![7u8; 512]).unwrap();

        let db = Database::in_memory().unwrap();
        db.insert_release(&NewRelease {
            version: "2.0.0".to_string(),
            firmware_blob_ref: "https://cdn.example.com/firmwares/2.0.0.bin".to_string(),
            signature_blob_ref: "https://cdn.example.com/signatures/2.0.0.sig".to_string(),
            checksum: "cd".repeat(32),
            changelog: "Bluetooth pairing fix".to_string(),
            deployed_by: "ci".to_string(),
        })
        .unwrap();

        let state = ApiState {
            endpoint: DistributionEndpoint::new(Arc::new(store)),
            db: Arc::new(db),
        };
        (dir, create_router(state))
    }

    #[tokio::test]
    async fn test_range_request_over_http() {
        let (_dir, app) = app();
        let response = app
            .oneshot(
                Request::get("/firmware/2.0.0")
                    .header("Range", "bytes=0-99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()["content-range"], "bytes 0-99/512");
        assert_eq!(response.headers()["content-length"], "100");
        assert_eq!(response.headers()["accept-ranges"], "bytes");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 100);
    }

    #[tokio::test]
    async fn test_unknown_version_over_http() {
        let (_dir, app) = app();
        let response = app
            .oneshot(Request::get("/firmware/9.9.9").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["message"], "Firmware not found");
    }

    #[tokio::test]
    async fn test_list_releases() {
        let (_dir, app) = app();
        let response = app
            .oneshot(Request::get("/api/releases?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let releases: Vec<FirmwareRelease> = serde_json::from_slice(&body).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].version, "2.0.0");
    }
}
