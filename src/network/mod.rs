//! Endpoint management: per-service IP sets and routing reconciliation.
//!
//! Two interchangeable implementations share the [`EndpointManager`]
//! interface: [`proxy::ProxyEndpointManager`] reconciles an external reverse
//! proxy's routing table, and [`internal::InternalEndpointManager`] load
//! balances in-process. Implementations register constructors by name and
//! are resolved at startup.

pub mod balancer;
pub mod driver;
pub mod internal;
pub mod proxy;

use crate::error::Result;
use crate::plugin::Registry;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use tokio::sync::watch;
use url::Url;

/// Process-wide table of endpoint manager constructors.
pub fn endpoint_managers() -> &'static Registry<dyn EndpointManager> {
    static MANAGERS: LazyLock<Registry<dyn EndpointManager>> =
        LazyLock::new(|| Registry::new("endpoint manager"));
    &MANAGERS
}

/// Register the built-in endpoint managers and balancer strategies.
pub fn register_builtin() {
    balancer::register_builtin();
    endpoint_managers().register("proxy", |config| {
        Ok(Arc::new(proxy::ProxyEndpointManager::new(config)) as Arc<dyn EndpointManager>)
    });
    endpoint_managers().register("internal", |config| {
        Ok(Arc::new(internal::InternalEndpointManager::new(config)) as Arc<dyn EndpointManager>)
    });
}

/// Owner of per-service upstream IP sets.
///
/// Mutations are linearisable per service; reads may proceed in parallel.
#[async_trait]
pub trait EndpointManager: Send + Sync {
    /// Register a ready instance IP for a service.
    async fn add_service_ip(&self, service: &str, ip: IpAddr) -> Result<()>;

    /// Remove one instance IP from a service.
    async fn delete_service_ip(&self, service: &str, ip: IpAddr) -> Result<()>;

    /// Drop a service and all its IPs.
    async fn delete_service(&self, service: &str) -> Result<()>;

    /// A URL the caller can reverse-proxy to for this service. Fails with
    /// `ServiceNotFound` when the service has zero registered IPs.
    async fn resolve_service_endpoint(&self, service: &str) -> Result<Url>;

    /// Number of IPs currently considered healthy for a service.
    async fn available_ips(&self, service: &str) -> Result<u64>;

    /// Long-running health probing; implementations that delegate probing
    /// elsewhere return immediately.
    async fn run_health_checks(&self, shutdown: watch::Receiver<bool>) {
        let _ = shutdown;
    }
}
