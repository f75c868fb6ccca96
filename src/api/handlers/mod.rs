//! HTTP handlers for the provider API.

pub mod delete;
pub mod deploy;
pub mod health;
pub mod info;
pub mod invoke;
pub mod list;
pub mod logs;
pub mod namespaces;
pub mod scale;
pub mod status;
pub mod update;

#[cfg(test)]
pub(crate) mod testutil {
    //! A fully mocked provider for handler tests.

    use crate::api::state::AppState;
    use crate::config::ProviderConfig;
    use crate::function::testutil::echo_store;
    use crate::machine::driver::mock::MockMachineDriver;
    use crate::machine::{MachineService, ReadinessProbe};
    use crate::network::driver::mock::{event_log, MockNetworkDriver, MockVolumeService};
    use crate::network::mock::MockEndpointManager;
    use crate::network::EndpointManager;
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct InstantProbe;

    #[async_trait]
    impl ReadinessProbe for InstantProbe {
        async fn ready(&self, _ip: IpAddr, _port: u16) -> bool {
            true
        }
    }

    pub(crate) struct TestProvider {
        pub state: Arc<AppState>,
        pub endpoints: Arc<MockEndpointManager>,
        pub machine_driver: Arc<MockMachineDriver>,
        pub _root: TempDir,
    }

    pub(crate) fn test_provider() -> TestProvider {
        let root = TempDir::new().unwrap();
        let log = event_log();
        let endpoints = Arc::new(MockEndpointManager::new(log.clone()));
        let machine_driver = Arc::new(MockMachineDriver::new(log.clone()));

        let mut config = ProviderConfig::default();
        config.machine_root = root.path().join("machines");
        config.oci_root = root.path().join("oci");
        config.secret_mount_path = root.path().join("secrets");

        let functions = echo_store(&root.path().join("oci"));
        let machines = Arc::new(
            MachineService::new(
                machine_driver.clone(),
                Arc::new(MockNetworkDriver::new(log)),
                Arc::new(MockVolumeService::new()),
                endpoints.clone(),
                &config,
            )
            .with_prober(Arc::new(InstantProbe)),
        );

        let state = Arc::new(AppState::new(
            config,
            functions,
            machines,
            endpoints.clone() as Arc<dyn EndpointManager>,
        ));
        TestProvider {
            state,
            endpoints,
            machine_driver,
            _root: root,
        }
    }

    /// Wait until a service has `count` registered IPs.
    pub(crate) async fn wait_for_ips(
        endpoints: &MockEndpointManager,
        service: &str,
        count: usize,
    ) -> bool {
        for _ in 0..100 {
            if endpoints.ips(service).len() == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        endpoints.ips(service).len() == count
    }
}
