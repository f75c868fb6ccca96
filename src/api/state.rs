//! Shared API server state.

use crate::config::ProviderConfig;
use crate::function::FunctionStore;
use crate::machine::MachineService;
use crate::network::EndpointManager;
use crate::resolver::InvokeResolver;
use std::sync::Arc;

/// Everything the handlers share.
pub struct AppState {
    /// Provider configuration.
    pub config: ProviderConfig,
    /// The function registry.
    pub functions: Arc<FunctionStore>,
    /// The machine supervisor.
    pub machines: Arc<MachineService>,
    /// The endpoint manager.
    pub endpoints: Arc<dyn EndpointManager>,
    /// The invocation resolver.
    pub resolver: InvokeResolver,
    /// Client used to forward invocations.
    pub http: reqwest::Client,
}

impl AppState {
    /// Wire up the shared state.
    pub fn new(
        config: ProviderConfig,
        functions: Arc<FunctionStore>,
        machines: Arc<MachineService>,
        endpoints: Arc<dyn EndpointManager>,
    ) -> Self {
        let resolver = InvokeResolver::new(functions.clone(), machines.clone(), endpoints.clone());
        Self {
            config,
            functions,
            machines,
            endpoints,
            resolver,
            http: reqwest::Client::new(),
        }
    }
}
