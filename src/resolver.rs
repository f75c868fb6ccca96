//! The invocation resolver: function name → endpoint URL, honoring
//! scale-from-zero.

use crate::config::DEFAULT_FUNCTION_NAMESPACE;
use crate::error::Result;
use crate::function::FunctionStore;
use crate::machine::MachineService;
use crate::network::EndpointManager;
use std::sync::Arc;
use url::Url;

/// Resolves invocation targets for the function proxy.
pub struct InvokeResolver {
    functions: Arc<FunctionStore>,
    machines: Arc<MachineService>,
    endpoints: Arc<dyn EndpointManager>,
}

impl InvokeResolver {
    /// Create a resolver over the registry, supervisor, and endpoint manager.
    pub fn new(
        functions: Arc<FunctionStore>,
        machines: Arc<MachineService>,
        endpoints: Arc<dyn EndpointManager>,
    ) -> Self {
        Self {
            functions,
            machines,
            endpoints,
        }
    }

    /// Resolve a function name (possibly suffixed with the default
    /// namespace) to an endpoint URL, launching one instance first when the
    /// service is scaled to zero.
    pub async fn resolve(&self, function_name: &str) -> Result<Url> {
        let suffix = format!(".{}", DEFAULT_FUNCTION_NAMESPACE);
        let service = function_name.strip_suffix(&suffix).unwrap_or(function_name);

        let function = self.functions.get(service)?;

        if self.machines.get_replicas(service) == 0 {
            tracing::info!(service = %service, "scale from zero");
            self.machines.new_machine(&function).await?;
        }

        let url = self.endpoints.resolve_service_endpoint(service).await?;
        tracing::debug!(service = %service, url = %url, "resolved invocation");
        Ok(url)
    }
}
