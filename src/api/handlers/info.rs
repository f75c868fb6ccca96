//! Provider info handler.

use crate::api::types::InfoResponse;
use axum::Json;

/// Provider identity.
#[utoipa::path(
    get,
    path = "/system/info",
    tag = "System",
    responses((status = 200, description = "Provider info", body = InfoResponse))
)]
pub async fn info() -> Json<InfoResponse> {
    Json(InfoResponse {
        provider: "unifaas".to_string(),
        version: crate::VERSION.to_string(),
        orchestration: "unikernel-microvm".to_string(),
    })
}
