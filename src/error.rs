//! Error types for unifaas.
//!
//! All error messages follow a consistent format:
//!
//! - **Format**: `"<operation> failed: <reason>"` or `"<entity> not found: <identifier>"`
//! - **Case**: all lowercase
//! - **Context**: include the relevant identifier (service name, digest, interface)
//!
//! Control flow never matches on error messages; handlers map errors to HTTP
//! status codes through [`ErrorKind`].

use thiserror::Error;

/// Classification of errors, used to map to HTTP status codes without
/// fragile string matching on error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Bad request, bad namespace, missing secret (maps to 400).
    Validation,
    /// Function, service, or instance not found (maps to 404).
    NotFound,
    /// Service already exists (maps to 409, 400 on the deploy path).
    Conflict,
    /// Manifest missing, invalid target, or pull failure.
    Image,
    /// Machine or Network driver failure.
    Driver,
    /// No healthy upstream for a service (maps to 500).
    NoHealthyInstance,
    /// Operation was cancelled before completion.
    Cancelled,
    /// Everything else (maps to 500).
    #[default]
    Internal,
}

/// Result type alias using unifaas's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in unifaas operations.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Validation
    // ========================================================================
    /// Request failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Namespace is not the default namespace and carries no provider label.
    #[error("namespace not valid: {namespace}")]
    NamespaceInvalid {
        /// The rejected namespace.
        namespace: String,
    },

    /// A secret named in the deployment has no backing file.
    #[error("secret not found: {name}")]
    SecretNotFound {
        /// Name of the missing secret.
        name: String,
    },

    // ========================================================================
    // Not found
    // ========================================================================
    /// No function registered under this service name.
    #[error("function not found: {service}")]
    FunctionNotFound {
        /// Service name that was looked up.
        service: String,
    },

    /// The endpoint manager has no entry for this service.
    #[error("service not found: {service}")]
    ServiceNotFound {
        /// Service name that was looked up.
        service: String,
    },

    /// No instance matches the given id or service.
    #[error("instance not found: {id}")]
    InstanceNotFound {
        /// Instance id or service name.
        id: String,
    },

    // ========================================================================
    // Conflict
    // ========================================================================
    /// A function with this service name already exists.
    #[error("service already exists: {service}")]
    ServiceExists {
        /// The conflicting service name.
        service: String,
    },

    // ========================================================================
    // Image
    // ========================================================================
    /// No manifest in the local store matches the image reference.
    #[error("manifest not found: {reference}")]
    ManifestNotFound {
        /// The unmatched image reference.
        reference: String,
    },

    /// The matched manifest cannot be interpreted as a launchable unikernel.
    #[error("invalid unikernel target: {reference}: {reason}")]
    InvalidTarget {
        /// The image reference.
        reference: String,
        /// Why the target is unusable.
        reason: String,
    },

    /// Pulling the package failed.
    #[error("image pull failed: {reference}: {reason}")]
    ImagePull {
        /// The image reference or digest being pulled.
        reference: String,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // Drivers
    // ========================================================================
    /// A machine, network, or volume driver operation failed.
    #[error("driver operation failed: {operation}: {reason}")]
    Driver {
        /// The operation that failed (e.g. "create", "bridge update").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The bridge could not allocate another interface.
    #[error("network exhausted: {bridge}")]
    NetworkExhausted {
        /// Name of the exhausted bridge.
        bridge: String,
    },

    // ========================================================================
    // Routing
    // ========================================================================
    /// Every known upstream for the service is unhealthy.
    #[error("no healthy instance for service: {service}")]
    NoHealthyInstance {
        /// The service with no healthy upstream.
        service: String,
    },

    // ========================================================================
    // Cancellation and configuration
    // ========================================================================
    /// The operation was cancelled before completion.
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// The cancelled operation.
        operation: String,
    },

    /// Configuration could not be loaded or parsed.
    #[error("config operation failed: {operation}: {reason}")]
    Config {
        /// The operation that failed (e.g. "load", "parse").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// IO error wrapper.
    #[error("io operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Create a function not found error.
    pub fn function_not_found(service: impl Into<String>) -> Self {
        Self::FunctionNotFound {
            service: service.into(),
        }
    }

    /// Create a service not found error.
    pub fn service_not_found(service: impl Into<String>) -> Self {
        Self::ServiceNotFound {
            service: service.into(),
        }
    }

    /// Create a service conflict error.
    pub fn service_exists(service: impl Into<String>) -> Self {
        Self::ServiceExists {
            service: service.into(),
        }
    }

    /// Create an invalid target error.
    pub fn invalid_target(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create an image pull error.
    pub fn image_pull(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImagePull {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a driver error.
    pub fn driver(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Driver {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a config error.
    pub fn config(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Config {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error for HTTP status mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::NamespaceInvalid { .. } | Self::SecretNotFound { .. } => {
                ErrorKind::Validation
            }
            Self::FunctionNotFound { .. }
            | Self::ServiceNotFound { .. }
            | Self::InstanceNotFound { .. } => ErrorKind::NotFound,
            Self::ServiceExists { .. } => ErrorKind::Conflict,
            Self::ManifestNotFound { .. } | Self::InvalidTarget { .. } | Self::ImagePull { .. } => {
                ErrorKind::Image
            }
            Self::Driver { .. } | Self::NetworkExhausted { .. } => ErrorKind::Driver,
            Self::NoHealthyInstance { .. } => ErrorKind::NoHealthyInstance,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config { .. } | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_errors_include_identifier() {
        let err = Error::function_not_found("echo");
        assert!(err.to_string().contains("echo"));
        assert!(err.to_string().contains("not found"));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::service_not_found("echo");
        assert!(err.to_string().contains("echo"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn image_errors_classify_as_image() {
        let errors = [
            Error::ManifestNotFound {
                reference: "unikraft.org/echo:1.0".into(),
            },
            Error::invalid_target("unikraft.org/echo:1.0", "no kernel in package"),
            Error::image_pull("unikraft.org/echo:1.0", "registry unreachable"),
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Image, "{}", err);
        }
    }

    #[test]
    fn driver_error_includes_operation_and_reason() {
        let err = Error::driver("create", "qemu exited with status 1");
        let msg = err.to_string();
        assert!(msg.contains("create"));
        assert!(msg.contains("qemu exited"));
        assert_eq!(err.kind(), ErrorKind::Driver);
    }

    #[test]
    fn messages_are_lowercase() {
        let errors = [
            Error::validation("bad body"),
            Error::function_not_found("x"),
            Error::service_exists("x"),
            Error::image_pull("x", "y"),
            Error::driver("op", "reason"),
            Error::NetworkExhausted {
                bridge: "openfaas0".into(),
            },
            Error::NoHealthyInstance {
                service: "x".into(),
            },
            Error::config("load", "oops"),
        ];
        for err in errors {
            let msg = err.to_string();
            assert!(
                msg.chars().next().unwrap().is_lowercase(),
                "error message should start lowercase: {}",
                msg
            );
        }
    }
}
