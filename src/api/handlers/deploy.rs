//! Deploy handler: register a function and launch its first instance.

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{ApiErrorResponse, FunctionDeployment};
use crate::api::validation::{request_namespace, validate_secrets};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

/// Deploy a function.
#[utoipa::path(
    post,
    path = "/system/functions",
    tag = "Functions",
    request_body = FunctionDeployment,
    responses(
        (status = 200, description = "Function deployed"),
        (status = 400, description = "Validation, image, or driver failure", body = ApiErrorResponse)
    )
)]
pub async fn deploy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FunctionDeployment>,
) -> Result<StatusCode, ApiError> {
    tracing::info!(service = %req.service, image = %req.image, "deploy requested");

    let namespace = request_namespace(req.namespace.as_deref());
    if !state.functions.validate_namespace(&namespace) {
        return Err(ApiError::BadRequest("namespace not valid".to_string()));
    }
    validate_secrets(
        &state.config.secret_mount_path,
        &namespace,
        req.secrets.as_deref(),
    )?;

    let function = state.functions.add(req).await.map_err(ApiError::deploy)?;

    if let Err(e) = state.machines.new_machine(&function).await {
        // An initial deploy without a machine is useless; unregister so the
        // user can retry cleanly.
        tracing::warn!(service = %function.service(), error = %e, "deploy failed at machine creation");
        state.functions.delete(function.service());
        return Err(ApiError::deploy(e));
    }

    tracing::info!(service = %function.service(), "deployed");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{test_provider, wait_for_ips};
    use super::*;
    use crate::function::testutil::deployment;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn deploy_registers_function_and_launches_instance() {
        let provider = test_provider();

        let status = deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(provider.state.functions.exists("echo"));
        assert_eq!(provider.state.machines.get_replicas("echo"), 1);
        assert!(wait_for_ips(&provider.endpoints, "echo", 1).await);
    }

    #[tokio::test]
    async fn deploy_duplicate_service_is_rejected() {
        let provider = test_provider();
        deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap();

        let err = deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn deploy_unknown_image_is_a_400() {
        let provider = test_provider();
        let err = deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:9.9")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(!provider.state.functions.exists("echo"));
    }

    #[tokio::test]
    async fn deploy_invalid_namespace_is_rejected() {
        let provider = test_provider();
        let mut req = deployment("echo", "echo:1.0");
        req.namespace = Some("kube-system".to_string());

        let err = deploy(State(provider.state.clone()), Json(req))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn deploy_missing_secret_is_rejected() {
        let provider = test_provider();
        let mut req = deployment("echo", "echo:1.0");
        req.secrets = Some(vec!["missing".to_string()]);

        let err = deploy(State(provider.state.clone()), Json(req))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(!provider.state.functions.exists("echo"));
    }

    #[tokio::test]
    async fn failed_machine_creation_unregisters_function() {
        let provider = test_provider();
        provider
            .machine_driver
            .fail_create
            .store(true, Ordering::SeqCst);

        let err = deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(!provider.state.functions.exists("echo"));
        assert!(provider.state.machines.is_empty());
    }
}
