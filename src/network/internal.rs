//! In-process endpoint manager with pluggable load balancing.
//!
//! Tracks a per-service [`LoadBalancer`] and a global `ip → healthy?` table.
//! Health is maintained by an in-process probe loop (GET on the watchdog
//! port every 2 seconds); resolution skips addresses currently marked
//! unhealthy.

use super::balancer::{self, LoadBalancer};
use super::EndpointManager;
use crate::config::{ProviderConfig, WATCHDOG_PORT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

/// Interval between probe sweeps.
const HEALTH_INTERVAL: Duration = Duration::from_secs(2);

/// Per-request probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimum number of selection attempts before giving up on a service.
const MIN_RESOLVE_TRIES: u64 = 5;

/// Endpoint manager that load balances in-process.
pub struct InternalEndpointManager {
    services: RwLock<HashMap<String, Box<dyn LoadBalancer>>>,
    health: RwLock<HashMap<IpAddr, bool>>,
    balancer: String,
    watchdog_port: u16,
    client: reqwest::Client,
}

impl InternalEndpointManager {
    /// Create an internal endpoint manager using the configured balancer
    /// strategy.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            balancer: config.balancer.clone(),
            watchdog_port: WATCHDOG_PORT,
            client: reqwest::Client::new(),
        }
    }

    fn upstream_url(&self, ip: IpAddr) -> Url {
        Url::parse(&format!("http://{}:{}/", ip, self.watchdog_port)).expect("literal url")
    }

    async fn probe(&self, ip: IpAddr) -> bool {
        let url = self.upstream_url(ip);
        match self
            .client
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl EndpointManager for InternalEndpointManager {
    async fn add_service_ip(&self, service: &str, ip: IpAddr) -> Result<()> {
        {
            let mut services = self.services.write();
            if !services.contains_key(service) {
                services.insert(service.to_string(), balancer::resolve(&self.balancer)?);
            }
            let lb = services.get_mut(service).expect("just ensured");
            lb.add_instance(ip);
        }
        self.health.write().insert(ip, true);
        tracing::info!(service = %service, ip = %ip, "added ip to service");
        Ok(())
    }

    async fn delete_service_ip(&self, service: &str, ip: IpAddr) -> Result<()> {
        if let Some(lb) = self.services.write().get_mut(service) {
            lb.delete_instance(ip);
        }
        self.health.write().remove(&ip);
        tracing::info!(service = %service, ip = %ip, "deleted ip from service");
        Ok(())
    }

    async fn delete_service(&self, service: &str) -> Result<()> {
        let removed = self.services.write().remove(service);
        match removed {
            Some(lb) => {
                let mut health = self.health.write();
                for ip in lb.ips() {
                    health.remove(&ip);
                }
                tracing::info!(service = %service, "deleted service");
                Ok(())
            }
            None => Err(Error::service_not_found(service)),
        }
    }

    async fn resolve_service_endpoint(&self, service: &str) -> Result<Url> {
        let services = self.services.read();
        let lb = services
            .get(service)
            .ok_or_else(|| Error::service_not_found(service))?;
        if lb.is_empty() {
            return Err(Error::service_not_found(service));
        }

        let tries = (lb.len() as u64).max(MIN_RESOLVE_TRIES);
        let health = self.health.read();
        for _ in 0..tries {
            let ip = lb.next_instance()?;
            if health.get(&ip).copied().unwrap_or(false) {
                return Ok(self.upstream_url(ip));
            }
        }
        Err(Error::NoHealthyInstance {
            service: service.to_string(),
        })
    }

    async fn available_ips(&self, service: &str) -> Result<u64> {
        let services = self.services.read();
        let lb = services
            .get(service)
            .ok_or_else(|| Error::service_not_found(service))?;
        let health = self.health.read();
        Ok(lb
            .ips()
            .iter()
            .filter(|ip| health.get(ip).copied().unwrap_or(false))
            .count() as u64)
    }

    async fn run_health_checks(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!("endpoint health checks started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ips: Vec<IpAddr> = self.health.read().keys().copied().collect();
                    for ip in ips {
                        let healthy = self.probe(ip).await;
                        // The entry may have been deleted while probing.
                        if let Some(entry) = self.health.write().get_mut(&ip) {
                            if *entry != healthy {
                                tracing::info!(ip = %ip, healthy, "upstream health changed");
                            }
                            *entry = healthy;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("endpoint health checks shutting down");
                        break;
                    }
                }
            }
        }
    }
}
