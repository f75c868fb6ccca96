//! Network and volume driver contracts.
//!
//! The network driver owns the shared bridge. Interface allocation follows
//! the bridge's get/update protocol: fetch the bridge, append an interface
//! template carrying the instance id, and update; the driver hands back the
//! template with an assigned IP, name, and MAC. `remove_interface` tears
//! down the host-side link.

use crate::error::Result;
use crate::plugin::Registry;
use async_trait::async_trait;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Process-wide table of network driver constructors.
pub fn network_drivers() -> &'static Registry<dyn NetworkDriver> {
    static DRIVERS: LazyLock<Registry<dyn NetworkDriver>> =
        LazyLock::new(|| Registry::new("network driver"));
    &DRIVERS
}

/// Process-wide table of volume service constructors.
pub fn volume_services() -> &'static Registry<dyn VolumeService> {
    static SERVICES: LazyLock<Registry<dyn VolumeService>> =
        LazyLock::new(|| Registry::new("volume service"));
    &SERVICES
}

/// One interface on the bridge, bound to an instance by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    /// Id of the owning instance.
    pub id: String,
    /// Host-side link name.
    pub name: String,
    /// Assigned address; `None` until the driver has allocated one.
    pub ip: Option<IpAddr>,
    /// Assigned MAC address.
    pub mac: Option<String>,
}

impl NetworkInterface {
    /// An unallocated interface template for an instance.
    pub fn template(bridge: &str, instance_id: &str) -> Self {
        Self {
            id: instance_id.to_string(),
            name: format!("{}@if{}", bridge, instance_id),
            ip: None,
            mac: None,
        }
    }
}

/// A bridge network and its interface list.
#[derive(Debug, Clone)]
pub struct Network {
    /// Bridge name.
    pub name: String,
    /// Interfaces currently attached to the bridge.
    pub interfaces: Vec<NetworkInterface>,
}

/// External backend for bridge and interface operations.
#[async_trait]
pub trait NetworkDriver: Send + Sync {
    /// Fetch the bridge by name.
    async fn get(&self, name: &str) -> Result<Network>;

    /// Apply an updated interface list; templates come back with assigned
    /// addresses.
    async fn update(&self, network: Network) -> Result<Network>;

    /// Bring the interface's host-side link down and remove it.
    async fn remove_interface(&self, interface: &NetworkInterface) -> Result<()>;
}

/// Specification of a filesystem-layer volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Volume driver, e.g. `9pfs`.
    pub driver: String,
    /// Host path backing the volume.
    pub source: PathBuf,
    /// Mount the volume read-only.
    pub read_only: bool,
}

/// A created volume, attachable to a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Volume name; by convention the source path.
    pub name: String,
    /// The specification the volume was created from.
    pub spec: VolumeSpec,
}

/// External backend for filesystem-layer volumes.
#[async_trait]
pub trait VolumeService: Send + Sync {
    /// Create a volume from a specification.
    async fn create(&self, spec: VolumeSpec) -> Result<Volume>;
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[tokio::test]
    async fn mock_driver_assigns_distinct_ips() {
        let driver = MockNetworkDriver::new(event_log());
        let mut network = driver.get(crate::config::BRIDGE_NAME).await.unwrap();
        network
            .interfaces
            .push(NetworkInterface::template(&network.name, "a"));
        network
            .interfaces
            .push(NetworkInterface::template(&network.name, "b"));

        let updated = driver.update(network).await.unwrap();
        let ips: Vec<_> = updated.interfaces.iter().map(|i| i.ip.unwrap()).collect();
        assert_eq!(ips.len(), 2);
        assert_ne!(ips[0], ips[1]);
    }

    #[tokio::test]
    async fn exhausted_bridge_reports_network_exhausted() {
        let driver = MockNetworkDriver::new(event_log()).with_capacity(1);
        let mut network = driver.get(crate::config::BRIDGE_NAME).await.unwrap();
        network
            .interfaces
            .push(NetworkInterface::template(&network.name, "a"));
        let network = driver.update(network).await.unwrap();

        let mut second = network.clone();
        second
            .interfaces
            .push(NetworkInterface::template(&second.name, "b"));
        let err = driver.update(second).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::NetworkExhausted { .. }
        ));
    }
}
