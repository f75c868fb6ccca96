//! Load balancing strategies for the internal endpoint manager.
//!
//! Strategies register themselves by name into a process-wide table at
//! startup; the internal endpoint manager constructs one balancer per
//! service from the configured strategy name.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

/// Selection strategy over a service's instance IPs.
pub trait LoadBalancer: Send + Sync {
    /// Track a new instance address.
    fn add_instance(&mut self, ip: IpAddr);

    /// Stop tracking an instance address.
    fn delete_instance(&mut self, ip: IpAddr);

    /// Select an address, or fail when none is tracked.
    fn next_instance(&self) -> Result<IpAddr>;

    /// Every tracked address.
    fn ips(&self) -> Vec<IpAddr>;

    /// Number of tracked addresses.
    fn len(&self) -> usize;

    /// Whether no addresses are tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Constructor for a load balancer strategy.
pub type BalancerConstructor = fn() -> Box<dyn LoadBalancer>;

static BALANCERS: LazyLock<RwLock<HashMap<String, BalancerConstructor>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a strategy under a name. No unregistration.
pub fn register(name: &str, constructor: BalancerConstructor) {
    BALANCERS.write().insert(name.to_string(), constructor);
}

/// Construct the strategy registered under `name`.
pub fn resolve(name: &str) -> Result<Box<dyn LoadBalancer>> {
    BALANCERS
        .read()
        .get(name)
        .map(|constructor| constructor())
        .ok_or_else(|| {
            Error::config(
                "resolve",
                format!("no load balancer registered under name: {}", name),
            )
        })
}

/// Register the built-in strategies.
pub fn register_builtin() {
    register("random", || Box::new(RandomBalancer::new()));
    register("round-robin", || Box::new(RoundRobinBalancer::new()));
}

/// Uniform random selection.
#[derive(Default)]
pub struct RandomBalancer {
    ips: Vec<IpAddr>,
}

impl RandomBalancer {
    /// Create an empty random balancer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RandomBalancer {
    fn add_instance(&mut self, ip: IpAddr) {
        self.ips.push(ip);
    }

    fn delete_instance(&mut self, ip: IpAddr) {
        self.ips.retain(|candidate| *candidate != ip);
    }

    fn next_instance(&self) -> Result<IpAddr> {
        if self.ips.is_empty() {
            return Err(Error::validation("no instances tracked"));
        }
        let index = rand::thread_rng().gen_range(0..self.ips.len());
        Ok(self.ips[index])
    }

    fn ips(&self) -> Vec<IpAddr> {
        self.ips.clone()
    }

    fn len(&self) -> usize {
        self.ips.len()
    }
}

/// Rotating selection with an atomic cursor; lock-free and safe for
/// concurrent `next_instance` calls.
#[derive(Default)]
pub struct RoundRobinBalancer {
    ips: Vec<IpAddr>,
    cursor: AtomicUsize,
}

impl RoundRobinBalancer {
    /// Create an empty round-robin balancer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn add_instance(&mut self, ip: IpAddr) {
        self.ips.push(ip);
    }

    fn delete_instance(&mut self, ip: IpAddr) {
        self.ips.retain(|candidate| *candidate != ip);
    }

    fn next_instance(&self) -> Result<IpAddr> {
        if self.ips.is_empty() {
            return Err(Error::validation("no instances tracked"));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.ips.len();
        Ok(self.ips[index])
    }

    fn ips(&self) -> Vec<IpAddr> {
        self.ips.clone()
    }

    fn len(&self) -> usize {
        self.ips.len()
    }
}
