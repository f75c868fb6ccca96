//! Request validation shared by the handlers.

use crate::api::error::ApiError;
use crate::config::DEFAULT_FUNCTION_NAMESPACE;
use std::path::Path;

/// The namespace a request operates in, defaulting when unset or empty.
pub fn request_namespace(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => ns.to_string(),
        _ => DEFAULT_FUNCTION_NAMESPACE.to_string(),
    }
}

/// Every secret named in a deployment must exist as a file under the
/// namespace's secret directory.
pub fn validate_secrets(
    secret_mount_path: &Path,
    namespace: &str,
    secrets: Option<&[String]>,
) -> Result<(), ApiError> {
    let Some(secrets) = secrets else {
        return Ok(());
    };
    let base = secret_mount_path.join(namespace);
    for secret in secrets {
        if !base.join(secret).is_file() {
            return Err(ApiError::BadRequest(format!(
                "unable to find secret: {}",
                secret
            )));
        }
    }
    Ok(())
}
