//! Proxy-mode endpoint manager.
//!
//! Keeps a per-service upstream table and reconciles it with an external
//! reverse proxy after every mutation: the proxy's routes endpoint is
//! PATCHed with the externally owned permanent routes followed by one
//! synthesised route per service. Health probing is delegated to the proxy's
//! active health checks, so `run_health_checks` is a no-op.

use super::EndpointManager;
use crate::config::{ProviderConfig, GATEWAY_PORT, PROXY_ADMIN_ROUTES_URL, WATCHDOG_PORT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::RwLock;
use url::Url;

/// Expected status for the proxy's active health checks.
const HEALTH_EXPECT_STATUS: u16 = 200;

/// Active health check interval, in nanoseconds (proxy wire unit).
const HEALTH_INTERVAL_NS: u64 = 10_000_000_000;

/// Active health check timeout, in nanoseconds.
const HEALTH_TIMEOUT_NS: u64 = 30_000_000_000;

/// Upstream try duration, in nanoseconds.
const LB_TRY_DURATION_NS: u64 = 1_000_000_000;

/// Selection policy: first available upstream.
const LB_POLICY: &str = "first";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RouteConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    handle: Vec<HandlerConfig>,
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    matchers: Vec<PathExpression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PathExpression {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    path: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HandlerConfig {
    handler: String,
    health_checks: HealthChecks,
    load_balancing: LbConfig,
    upstreams: Vec<DialConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HealthChecks {
    active: ActiveHealthCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActiveHealthCheck {
    expect_status: u16,
    interval: u64,
    timeout: u64,
    uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LbConfig {
    selection_policy: SelectionPolicy,
    try_duration: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SelectionPolicy {
    policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DialConfig {
    dial: String,
}

struct ProxyState {
    /// `service → ["ip:watchdog-port", …]`.
    services: HashMap<String, Vec<String>>,
    /// Externally owned routes, fetched once and re-sent verbatim.
    permanent: Option<Vec<Value>>,
}

/// Endpoint manager that reconciles an external reverse proxy.
pub struct ProxyEndpointManager {
    state: RwLock<ProxyState>,
    admin_url: String,
    gateway_port: u16,
    watchdog_port: u16,
    client: reqwest::Client,
}

/// The gateway path a service is served under.
fn service_path(service: &str) -> String {
    if service.contains('/') {
        service.to_string()
    } else {
        format!("/api/{}", service)
    }
}

/// The permanent routes followed by one synthesised route per service.
fn render_routes(permanent: &[Value], services: &HashMap<String, Vec<String>>) -> Vec<Value> {
    let mut routes: Vec<Value> = permanent.to_vec();
    let mut names: Vec<&String> = services.keys().collect();
    names.sort();

    for service in names {
        let upstreams = services[service]
            .iter()
            .map(|dial| DialConfig { dial: dial.clone() })
            .collect();
        let route = RouteConfig {
            handle: vec![HandlerConfig {
                handler: "reverse_proxy".to_string(),
                health_checks: HealthChecks {
                    active: ActiveHealthCheck {
                        expect_status: HEALTH_EXPECT_STATUS,
                        interval: HEALTH_INTERVAL_NS,
                        timeout: HEALTH_TIMEOUT_NS,
                        uri: "/".to_string(),
                    },
                },
                load_balancing: LbConfig {
                    selection_policy: SelectionPolicy {
                        policy: LB_POLICY.to_string(),
                    },
                    try_duration: LB_TRY_DURATION_NS,
                },
                upstreams,
            }],
            matchers: vec![PathExpression {
                path: vec![service_path(service)],
            }],
        };
        routes.push(serde_json::to_value(route).expect("route serialises"));
    }
    routes
}

impl ProxyEndpointManager {
    /// Create a proxy endpoint manager against the well-known admin API.
    pub fn new(_config: &ProviderConfig) -> Self {
        Self::with_admin_url(PROXY_ADMIN_ROUTES_URL)
    }

    /// Create a proxy endpoint manager against a specific admin URL.
    pub fn with_admin_url(admin_url: &str) -> Self {
        Self {
            state: RwLock::new(ProxyState {
                services: HashMap::new(),
                permanent: None,
            }),
            admin_url: admin_url.to_string(),
            gateway_port: GATEWAY_PORT,
            watchdog_port: WATCHDOG_PORT,
            client: reqwest::Client::new(),
        }
    }

    /// Fetch the externally owned routes on first use.
    async fn ensure_permanent(&self, state: &mut ProxyState) -> Result<()> {
        if state.permanent.is_some() {
            return Ok(());
        }
        let response = self
            .client
            .get(&self.admin_url)
            .send()
            .await
            .map_err(|e| Error::driver("proxy routes fetch", e))?;
        if !response.status().is_success() {
            return Err(Error::driver(
                "proxy routes fetch",
                format!("status {}", response.status()),
            ));
        }
        let routes: Vec<Value> = response
            .json()
            .await
            .map_err(|e| Error::driver("proxy routes parse", e))?;
        state.permanent = Some(routes);
        Ok(())
    }

    /// Push the freshly rendered routing table to the proxy.
    async fn reload(&self, state: &mut ProxyState) -> Result<()> {
        self.ensure_permanent(state).await?;
        let permanent = state.permanent.as_deref().unwrap_or(&[]);
        let routes = render_routes(permanent, &state.services);

        let response = self
            .client
            .patch(&self.admin_url)
            .json(&routes)
            .send()
            .await
            .map_err(|e| Error::driver("proxy reload", e))?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "proxy rejected routes update");
        } else {
            tracing::debug!(routes = routes.len(), "proxy routes reloaded");
        }
        Ok(())
    }
}

#[async_trait]
impl EndpointManager for ProxyEndpointManager {
    async fn add_service_ip(&self, service: &str, ip: IpAddr) -> Result<()> {
        let mut state = self.state.write().await;
        let dial = format!("{}:{}", ip, self.watchdog_port);
        state
            .services
            .entry(service.to_string())
            .or_default()
            .push(dial);
        tracing::info!(service = %service, ip = %ip, "added upstream");
        self.reload(&mut state).await
    }

    async fn delete_service_ip(&self, service: &str, ip: IpAddr) -> Result<()> {
        let mut state = self.state.write().await;
        let remaining = match state.services.get_mut(service) {
            Some(dials) => {
                let needle = ip.to_string();
                dials.retain(|dial| dial.split(':').next() != Some(needle.as_str()));
                dials.len()
            }
            None => return Err(Error::service_not_found(service)),
        };
        if remaining == 0 {
            state.services.remove(service);
        }
        tracing::info!(service = %service, ip = %ip, "deleted upstream");
        self.reload(&mut state).await
    }

    async fn delete_service(&self, service: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.services.remove(service).is_none() {
            return Err(Error::service_not_found(service));
        }
        tracing::info!(service = %service, "deleted service");
        self.reload(&mut state).await
    }

    async fn resolve_service_endpoint(&self, service: &str) -> Result<Url> {
        let state = self.state.read().await;
        if !state.services.contains_key(service) {
            return Err(Error::service_not_found(service));
        }
        Url::parse(&format!(
            "http://localhost:{}{}",
            self.gateway_port,
            service_path(service)
        ))
        .map_err(|e| Error::driver("gateway url", e))
    }

    async fn available_ips(&self, service: &str) -> Result<u64> {
        let state = self.state.read().await;
        state
            .services
            .get(service)
            .map(|dials| dials.len() as u64)
            .ok_or_else(|| Error::service_not_found(service))
    }

    async fn run_health_checks(&self, _shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!("health checks are delegated to the reverse proxy");
    }
}
