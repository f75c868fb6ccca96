//! Console log handler.

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{ApiErrorResponse, LogsQuery};
use axum::extract::{Query, State};
use std::sync::Arc;

/// Name of the console log file inside an instance's state directory.
const CONSOLE_LOG: &str = "console.log";

/// Tail the console log of a service's newest instance.
#[utoipa::path(
    get,
    path = "/system/logs",
    tag = "System",
    params(
        ("name" = String, Query, description = "Service name"),
        ("tail" = Option<usize>, Query, description = "Trailing lines to return")
    ),
    responses(
        (status = 200, description = "Console log tail", content_type = "text/plain"),
        (status = 404, description = "No instance with a console log", body = ApiErrorResponse)
    )
)]
pub async fn logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<String, ApiError> {
    let mut machines = state.machines.get_machines(&query.name);
    machines.sort_by_key(|m| m.created_at);

    // Newest instance with a console log wins.
    let log_path = machines
        .iter()
        .rev()
        .map(|m| m.state_dir.join(CONSOLE_LOG))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ApiError::NotFound(format!("no console log for service: {}", query.name))
        })?;

    let contents = tokio::fs::read_to_string(&log_path)
        .await
        .map_err(|e| ApiError::Internal(format!("log read failed: {}", e)))?;

    match query.tail {
        Some(tail) => {
            let lines: Vec<&str> = contents.lines().collect();
            let skip = lines.len().saturating_sub(tail);
            Ok(lines[skip..].join("\n"))
        }
        None => Ok(contents),
    }
}
