//! Update handler: replace function metadata, rolling instances when the
//! image changed.

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{ApiErrorResponse, FunctionDeployment};
use crate::api::validation::{request_namespace, validate_secrets};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

/// Update a function. An image change stops every existing instance,
/// launches one instance of the new image, then scales back to the replica
/// count observed before the stop.
#[utoipa::path(
    put,
    path = "/system/functions",
    tag = "Functions",
    request_body = FunctionDeployment,
    responses(
        (status = 200, description = "Function updated"),
        (status = 400, description = "Validation, image, or driver failure", body = ApiErrorResponse),
        (status = 404, description = "Function not found", body = ApiErrorResponse)
    )
)]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FunctionDeployment>,
) -> Result<StatusCode, ApiError> {
    let service = req.service.clone();
    tracing::info!(service = %service, image = %req.image, "update requested");

    let namespace = request_namespace(req.namespace.as_deref());
    if !state.functions.validate_namespace(&namespace) {
        return Err(ApiError::BadRequest("namespace not valid".to_string()));
    }
    if !state.functions.exists(&service) {
        return Err(ApiError::NotFound(format!(
            "function not found: {}",
            service
        )));
    }
    validate_secrets(
        &state.config.secret_mount_path,
        &namespace,
        req.secrets.as_deref(),
    )?;

    // Snapshot the replica count before any instance is stopped; after a
    // stop-all it would always read zero.
    let previous_replicas = state.machines.get_replicas(&service);

    let (function, image_changed) = state.functions.update(req).await.map_err(ApiError::deploy)?;

    if image_changed {
        tracing::info!(service = %service, "image changed, replacing instances");
        state
            .machines
            .clone()
            .stop_all_machines(&service)
            .await
            .map_err(ApiError::deploy)?;
        state
            .machines
            .new_machine(&function)
            .await
            .map_err(ApiError::deploy)?;
        state
            .machines
            .clone()
            .scale_machines_to(&service, previous_replicas.max(1))
            .await
            .map_err(ApiError::deploy)?;
    }

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::super::deploy::deploy;
    use super::super::testutil::test_provider;
    use super::*;
    use crate::function::testutil::deployment;

    #[tokio::test]
    async fn update_unknown_function_is_404() {
        let provider = test_provider();
        let err = update(
            State(provider.state.clone()),
            Json(deployment("ghost", "echo:1.0")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn metadata_update_keeps_instances() {
        let provider = test_provider();
        deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap();
        let before: Vec<String> = provider
            .state
            .machines
            .get_machines("echo")
            .into_iter()
            .map(|m| m.id)
            .collect();

        let mut req = deployment("echo", "echo:1.0");
        req.env_process = Some("/new".to_string());
        update(State(provider.state.clone()), Json(req))
            .await
            .unwrap();

        let after: Vec<String> = provider
            .state
            .machines
            .get_machines("echo")
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(before, after, "unchanged image must not restart instances");
        let function = provider.state.functions.get("echo").unwrap();
        assert_eq!(function.deployment.env_process.as_deref(), Some("/new"));
    }

    #[tokio::test]
    async fn image_update_replaces_instances_and_restores_replicas() {
        let provider = test_provider();
        deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap();
        provider
            .state
            .machines
            .clone()
            .scale_machines_to("echo", 2)
            .await
            .unwrap();
        let old_ids: Vec<String> = provider
            .state
            .machines
            .get_machines("echo")
            .into_iter()
            .map(|m| m.id)
            .collect();

        update(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:2.0")),
        )
        .await
        .unwrap();

        // Replica count restored to the pre-update value.
        assert_eq!(provider.state.machines.get_replicas("echo"), 2);

        // Every instance is new and runs the new image.
        let machines = provider.state.machines.get_machines("echo");
        for machine in &machines {
            assert!(!old_ids.contains(&machine.id));
            assert_eq!(machine.image, "echo:2.0");
            assert_eq!(machine.digest, "sha256:def");
        }

        let function = provider.state.functions.get("echo").unwrap();
        assert_eq!(function.image.digest, "sha256:def");
    }

    #[tokio::test]
    async fn image_update_from_zero_replicas_launches_one() {
        let provider = test_provider();
        deploy(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:1.0")),
        )
        .await
        .unwrap();
        provider
            .state
            .machines
            .clone()
            .stop_all_machines("echo")
            .await
            .unwrap();
        assert_eq!(provider.state.machines.get_replicas("echo"), 0);

        update(
            State(provider.state.clone()),
            Json(deployment("echo", "echo:2.0")),
        )
        .await
        .unwrap();
        assert_eq!(provider.state.machines.get_replicas("echo"), 1);
    }
}
