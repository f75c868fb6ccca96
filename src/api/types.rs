//! JSON request and response types for the provider API.
//!
//! Field names follow the OpenFaaS provider wire format (camelCase).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

// ============================================================================
// Deployment
// ============================================================================

/// Resource limits or requests for a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FunctionResources {
    /// Memory quantity, e.g. "128Mi".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// CPU quantity, e.g. "100m".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
}

/// Request to deploy (or update) a function.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeployment {
    /// Service name; the routing key.
    #[schema(example = "echo")]
    pub service: String,
    /// OCI unikernel image reference.
    #[schema(example = "unikraft.org/echo:1.0")]
    pub image: String,
    /// Namespace to deploy into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Process override for the watchdog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_process: Option<String>,
    /// Environment variables passed to the function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<HashMap<String, String>>,
    /// Scheduling constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
    /// Names of secrets to mount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<String>>,
    /// User labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    /// User annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    /// Resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<FunctionResources>,
    /// Resource requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<FunctionResources>,
    /// Mount the root filesystem read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_root_filesystem: Option<bool>,
}

// ============================================================================
// Status
// ============================================================================

/// Status of a deployed function.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    /// Service name.
    pub name: String,
    /// OCI unikernel image reference.
    pub image: String,
    /// Namespace the function is deployed into.
    pub namespace: String,
    /// Process override for the watchdog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_process: Option<String>,
    /// Environment variables passed to the function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<HashMap<String, String>>,
    /// Scheduling constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
    /// Names of secrets to mount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<String>>,
    /// User labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    /// User annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    /// Resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<FunctionResources>,
    /// Resource requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<FunctionResources>,
    /// Whether the root filesystem is mounted read-only.
    pub read_only_root_filesystem: bool,
    /// Number of running instances.
    pub replicas: u64,
    /// Number of instances the endpoint manager considers healthy.
    pub available_replicas: u64,
    /// Creation timestamp, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// ============================================================================
// Scale and delete
// ============================================================================

/// Request to scale a function to a replica count.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaleServiceRequest {
    /// Service name to scale.
    #[schema(example = "echo")]
    pub service_name: String,
    /// Target replica count.
    #[schema(example = 3)]
    pub replicas: u64,
    /// Namespace of the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Request to delete a function.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFunctionRequest {
    /// Service name to delete.
    #[schema(example = "echo")]
    pub function_name: String,
    /// Namespace of the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// ============================================================================
// System
// ============================================================================

/// Provider identity returned by `/system/info`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InfoResponse {
    /// Provider name.
    pub provider: String,
    /// Provider version.
    pub version: String,
    /// Orchestration backend.
    pub orchestration: String,
}

/// Liveness response for `/health`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always "ok" when the process is serving.
    pub status: String,
    /// Provider version.
    pub version: String,
}

/// Query parameters for `/system/logs`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LogsQuery {
    /// Service name to fetch logs for.
    pub name: String,
    /// Maximum number of trailing lines to return.
    #[serde(default)]
    pub tail: Option<usize>,
}

/// Query parameters carrying an optional namespace.
#[derive(Debug, Deserialize, ToSchema)]
pub struct NamespaceQuery {
    /// Namespace to operate in.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Stable machine-readable code.
    pub code: &'static str,
}
