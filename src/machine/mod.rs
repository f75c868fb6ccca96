//! The machine supervisor: owns the instance set, scales it, reconciles
//! with the network driver and endpoint manager, and reaps failed
//! instances.
//!
//! Teardown ordering is load-bearing: an instance's IP is deregistered
//! before the driver is asked to stop the VM, and interface teardown is
//! best-effort (a VM the driver reports as still live stays in the map for
//! the next health-check pass). Scale operations and the health-check reaper
//! are serialised by one mutex so an instance is never torn down twice.

pub mod driver;

use crate::config::{ProviderConfig, LAYER_VOLUME_DRIVER};
use crate::error::{Error, Result};
use crate::function::Function;
use crate::network::driver::{NetworkDriver, NetworkInterface, VolumeService, VolumeSpec};
use crate::network::EndpointManager;
use self::driver::{Machine, MachineDriver, MachineState};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Interval between health-check passes.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Back-off between readiness probe attempts.
const READINESS_BACKOFF: Duration = Duration::from_millis(500);

/// Per-attempt readiness probe timeout.
const READINESS_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One readiness probe attempt against an instance's watchdog port.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Whether the instance answers on its watchdog port.
    async fn ready(&self, ip: IpAddr, port: u16) -> bool;
}

/// Probes over HTTP; any answer counts as ready.
pub struct HttpReadinessProbe {
    client: reqwest::Client,
}

impl HttpReadinessProbe {
    /// Create an HTTP readiness probe.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpReadinessProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn ready(&self, ip: IpAddr, port: u16) -> bool {
        let url = format!("http://{}:{}/", ip, port);
        self.client
            .get(url)
            .timeout(READINESS_PROBE_TIMEOUT)
            .send()
            .await
            .is_ok()
    }
}

/// Everything needed to create one instance, derived from a function on
/// first launch or from a running reference instance on clone.
#[derive(Debug, Clone)]
pub struct MachineRequest {
    /// Owning service name.
    pub service: String,
    /// Image reference.
    pub image: String,
    /// Namespace of the owning function.
    pub namespace: String,
    /// Manifest config digest.
    pub digest: String,
    /// CPU architecture.
    pub architecture: String,
    /// Machine platform.
    pub platform: String,
    /// Kernel addressed by package format and reference.
    pub kernel: String,
    /// Path of the kernel image on disk.
    pub kernel_path: PathBuf,
    /// Source filesystem layer to copy per instance, when the image has one.
    pub rootfs_layer: Option<PathBuf>,
}

/// Owner of the instance set.
pub struct MachineService {
    driver: Arc<dyn MachineDriver>,
    network: Arc<dyn NetworkDriver>,
    volumes: Arc<dyn VolumeService>,
    endpoints: Arc<dyn EndpointManager>,
    prober: Arc<dyn ReadinessProbe>,
    machine_root: PathBuf,
    bridge: String,
    watchdog_port: u16,
    probe_deadline: Duration,
    instances: Arc<RwLock<HashMap<String, Machine>>>,
    interfaces: Arc<RwLock<HashMap<String, NetworkInterface>>>,
    /// Serialises scale operations against the health-check reaper. Held
    /// across driver calls deliberately, to prevent double-free of
    /// interfaces; driver calls under it must have bounded latency.
    reap_scale_lock: tokio::sync::Mutex<()>,
    /// Ids selected by the most recent scale-downs; the selection order is
    /// unspecified, this only makes it observable.
    #[cfg(test)]
    last_selected: parking_lot::Mutex<Vec<String>>,
}

impl MachineService {
    /// Create a supervisor over the given drivers.
    pub fn new(
        driver: Arc<dyn MachineDriver>,
        network: Arc<dyn NetworkDriver>,
        volumes: Arc<dyn VolumeService>,
        endpoints: Arc<dyn EndpointManager>,
        config: &ProviderConfig,
    ) -> Self {
        Self {
            driver,
            network,
            volumes,
            endpoints,
            prober: Arc::new(HttpReadinessProbe::new()),
            machine_root: config.machine_root.clone(),
            bridge: crate::config::BRIDGE_NAME.to_string(),
            watchdog_port: crate::config::WATCHDOG_PORT,
            probe_deadline: config.probe_deadline,
            instances: Arc::new(RwLock::new(HashMap::new())),
            interfaces: Arc::new(RwLock::new(HashMap::new())),
            reap_scale_lock: tokio::sync::Mutex::new(()),
            #[cfg(test)]
            last_selected: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Replace the readiness probe implementation.
    pub fn with_prober(mut self, prober: Arc<dyn ReadinessProbe>) -> Self {
        self.prober = prober;
        self
    }

    /// The endpoint manager this supervisor registers IPs with.
    pub fn endpoints(&self) -> &Arc<dyn EndpointManager> {
        &self.endpoints
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create the first instance for a function.
    pub async fn new_machine(&self, function: &Function) -> Result<String> {
        let target = &function.image.target;
        let request = MachineRequest {
            service: function.service().to_string(),
            image: function.deployment.image.clone(),
            namespace: function.namespace().to_string(),
            digest: function.image.digest.clone(),
            architecture: target.architecture.clone(),
            platform: target.platform.clone(),
            kernel: format!("{}://{}", target.format, function.deployment.image),
            kernel_path: function.image.kernel_path.clone(),
            rootfs_layer: Some(function.image.rootfs_layer()),
        };
        tracing::info!(service = %request.service, image = %request.image, "creating machine");
        self.create_machine(request).await
    }

    /// Create an additional instance for a service, derived from an
    /// arbitrary running instance.
    pub async fn clone_machine(&self, service: &str) -> Result<String> {
        let reference = self
            .instances
            .read()
            .values()
            .find(|m| m.service == service && m.state == MachineState::Running)
            .cloned()
            .ok_or_else(|| Error::function_not_found(service))?;

        tracing::info!(service = %service, reference = %reference.id, "cloning machine");
        self.create_machine(MachineRequest {
            service: reference.service.clone(),
            image: reference.image.clone(),
            namespace: reference.namespace.clone(),
            digest: reference.digest.clone(),
            architecture: reference.architecture.clone(),
            platform: reference.platform.clone(),
            kernel: reference.kernel.clone(),
            kernel_path: reference.kernel_path.clone(),
            rootfs_layer: reference.rootfs_layer.clone(),
        })
        .await
    }

    async fn create_machine(&self, request: MachineRequest) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let state_dir = self.machine_root.join(&id);
        tokio::fs::create_dir_all(&state_dir).await?;

        let mut guard = CreateGuard::new(self, id.clone(), state_dir.clone());
        match self.provision(&request, &id, &state_dir, &mut guard).await {
            Ok(()) => {
                guard.disarm();
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(service = %request.service, instance = %id, error = %e, "machine creation failed");
                guard.undo().await;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        request: &MachineRequest,
        id: &str,
        state_dir: &Path,
        guard: &mut CreateGuard,
    ) -> Result<()> {
        let mut machine = Machine {
            id: id.to_string(),
            service: request.service.clone(),
            namespace: request.namespace.clone(),
            image: request.image.clone(),
            digest: request.digest.clone(),
            architecture: request.architecture.clone(),
            platform: request.platform.clone(),
            kernel: request.kernel.clone(),
            kernel_path: request.kernel_path.clone(),
            state_dir: state_dir.to_path_buf(),
            rootfs_layer: request.rootfs_layer.clone(),
            volume: None,
            interface: None,
            state: MachineState::Provisioning,
            created_at: SystemTime::now(),
        };
        self.instances.write().insert(machine.id.clone(), machine.clone());

        // Per-instance writable copy of the image's filesystem layer.
        if let Some(layer) = &request.rootfs_layer {
            if layer.exists() {
                tracing::debug!(instance = %id, "setting up volume");
                let volume_path = state_dir.join("unikraft").join("fs0");
                copy_dir(layer, &volume_path).await?;
                let volume = self
                    .volumes
                    .create(VolumeSpec {
                        driver: LAYER_VOLUME_DRIVER.to_string(),
                        source: volume_path,
                        read_only: false,
                    })
                    .await?;
                machine.volume = Some(volume);
            } else {
                tracing::debug!(instance = %id, "no filesystem layer found");
            }
        }

        // Interface allocation through the bridge's get/update protocol.
        let mut bridge = self.network.get(&self.bridge).await?;
        bridge
            .interfaces
            .push(NetworkInterface::template(&self.bridge, id));
        let bridge = self.network.update(bridge).await?;
        let interface = bridge
            .interfaces
            .into_iter()
            .find(|iface| iface.id == id)
            .ok_or_else(|| Error::driver("bridge update", "interface missing from bridge"))?;
        let ip = interface
            .ip
            .ok_or_else(|| Error::driver("bridge update", "no ip assigned to interface"))?;
        tracing::info!(instance = %id, ip = %ip, "interface acquired");

        guard.interface = Some(interface.clone());
        self.interfaces.write().insert(machine.id.clone(), interface.clone());
        machine.interface = Some(interface);

        let created = self.driver.create(&machine).await?;
        machine = created;
        machine.state = MachineState::Created;
        self.instances.write().insert(machine.id.clone(), machine.clone());

        // Register the IP only after the instance answers on the watchdog
        // port. The probe outlives the calling handler; it is bounded by
        // the configured deadline and aborted if provisioning fails.
        guard.probe_task = Some(self.spawn_readiness_probe(&machine.service, ip));

        let started = self.driver.start(&machine).await?;
        machine = started;
        machine.state = MachineState::Running;
        tracing::info!(instance = %machine.id, state = %machine.state, "machine started");
        self.instances.write().insert(machine.id.clone(), machine);
        Ok(())
    }

    fn spawn_readiness_probe(&self, service: &str, ip: IpAddr) -> tokio::task::JoinHandle<()> {
        let service = service.to_string();
        let endpoints = self.endpoints.clone();
        let prober = self.prober.clone();
        let port = self.watchdog_port;
        let deadline = self.probe_deadline;

        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            loop {
                if prober.ready(ip, port).await {
                    if let Err(e) = endpoints.add_service_ip(&service, ip).await {
                        tracing::warn!(service = %service, ip = %ip, error = %e, "failed to register ip");
                    }
                    return;
                }
                if started.elapsed() >= deadline {
                    tracing::warn!(service = %service, ip = %ip, "readiness probe deadline exceeded");
                    return;
                }
                tokio::time::sleep(READINESS_BACKOFF).await;
            }
        })
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Tear down some running instance of a service.
    async fn delete_machine(&self, service: &str) -> Result<()> {
        let selected = {
            let mut instances = self.instances.write();
            let machine = instances
                .values_mut()
                .find(|m| m.service == service && m.state == MachineState::Running);
            match machine {
                // Fence: a concurrent reader must not count this instance
                // as running while teardown is in flight.
                Some(machine) => {
                    machine.state = MachineState::Unknown;
                    machine.clone()
                }
                None => {
                    return Err(Error::InstanceNotFound {
                        id: service.to_string(),
                    })
                }
            }
        };
        #[cfg(test)]
        self.last_selected.lock().push(selected.id.clone());

        tracing::info!(service = %service, instance = %selected.id, "destroying machine");
        self.destroy_machine(selected).await
    }

    /// Drive one instance through `Failing → Terminated`: deregister its IP,
    /// stop and delete the VM, then release the interface and evict it.
    async fn destroy_machine(&self, mut machine: Machine) -> Result<()> {
        let id = machine.id.clone();
        machine.state = MachineState::Failing;
        self.instances.write().insert(id.clone(), machine.clone());

        let interface = self.interfaces.read().get(&id).cloned().ok_or_else(|| {
            Error::driver("teardown", format!("network interface for {} not found", id))
        })?;

        // IP deregistration strictly precedes the driver stop.
        if let Some(ip) = interface.ip {
            self.endpoints.delete_service_ip(&machine.service, ip).await?;
        }

        match self.driver.stop(&machine).await {
            Ok(stopped) => {
                machine = stopped;
                machine.state = MachineState::Failing;
            }
            Err(e) => {
                tracing::warn!(instance = %id, error = %e, "error stopping machine");
            }
        }

        match self.driver.delete(&machine).await {
            Ok(None) => {
                if let Err(e) = self.network.remove_interface(&interface).await {
                    tracing::warn!(instance = %id, error = %e, "could not remove interface link");
                }
                self.instances.write().remove(&id);
                self.interfaces.write().remove(&id);
                tracing::info!(instance = %id, "machine terminated");
                Ok(())
            }
            Ok(Some(live)) => {
                // Still-live VM: retain it for the next health-check pass.
                let mut retained = live;
                retained.state = MachineState::Failing;
                tracing::warn!(instance = %id, "vm still live after delete, retaining");
                self.instances.write().insert(id, retained);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(instance = %id, error = %e, "error deleting machine");
                Err(e)
            }
        }
    }

    // ========================================================================
    // Scaling
    // ========================================================================

    /// Scale a service to a target replica count. Steps run in parallel;
    /// individual failures do not abort siblings, and the first failure is
    /// reported once all steps finish.
    pub async fn scale_machines_to(self: Arc<Self>, service: &str, replicas: u64) -> Result<()> {
        let _serialised = self.reap_scale_lock.lock().await;

        let current = self.get_replicas(service);
        let mut steps: JoinSet<Result<()>> = JoinSet::new();

        if current < replicas {
            for _ in current..replicas {
                tracing::info!(service = %service, "scaling up");
                let supervisor = self.clone();
                let service = service.to_string();
                steps.spawn(async move { supervisor.clone_machine(&service).await.map(|_| ()) });
            }
        } else {
            for _ in replicas..current {
                tracing::info!(service = %service, "scaling down");
                let supervisor = self.clone();
                let service = service.to_string();
                steps.spawn(async move { supervisor.delete_machine(&service).await });
            }
        }

        let mut first_error = None;
        while let Some(joined) = steps.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(service = %service, error = %e, "scale step failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(service = %service, error = %e, "scale task panicked");
                    first_error.get_or_insert(Error::driver("scale", e));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Tear down every instance of a service.
    pub async fn stop_all_machines(self: Arc<Self>, service: &str) -> Result<()> {
        self.scale_machines_to(service, 0).await
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of running instances of a service.
    pub fn get_replicas(&self, service: &str) -> u64 {
        self.instances
            .read()
            .values()
            .filter(|m| m.service == service && m.state == MachineState::Running)
            .count() as u64
    }

    /// Number of IPs the endpoint manager considers healthy for a service.
    pub async fn get_available_replicas(&self, service: &str) -> u64 {
        self.endpoints.available_ips(service).await.unwrap_or(0)
    }

    /// Snapshot of a service's instances.
    pub fn get_machines(&self, service: &str) -> Vec<Machine> {
        self.instances
            .read()
            .values()
            .filter(|m| m.service == service)
            .cloned()
            .collect()
    }

    /// Whether the supervisor holds no instances at all.
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty() && self.interfaces.read().is_empty()
    }

    // ========================================================================
    // Health checks
    // ========================================================================

    /// Long-running reaper: every pass asks the driver for the status of
    /// each running instance and tears down the ones it reports dead.
    pub async fn run_health_checks(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!("machine health checks started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_failed_instances().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("machine health checks shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn reap_failed_instances(&self) {
        let _serialised = self.reap_scale_lock.lock().await;

        let running: Vec<Machine> = self
            .instances
            .read()
            .values()
            .filter(|m| m.state == MachineState::Running)
            .cloned()
            .collect();

        for machine in running {
            match self.driver.get(&machine).await {
                Ok(reported) if reported.state != MachineState::Running => {
                    tracing::warn!(
                        instance = %machine.id,
                        service = %machine.service,
                        state = %reported.state,
                        "instance no longer running, reaping"
                    );
                    if let Err(e) = self.destroy_machine(machine).await {
                        tracing::warn!(error = %e, "teardown failed, retrying next pass");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(instance = %machine.id, error = %e, "status check failed");
                }
            }
        }
    }
}

/// Compensation for an in-flight creation: on failure or cancellation the
/// state directory is removed, the instance is evicted from the maps, the
/// readiness probe is aborted, and the interface is released.
struct CreateGuard {
    instances: Arc<RwLock<HashMap<String, Machine>>>,
    interfaces: Arc<RwLock<HashMap<String, NetworkInterface>>>,
    network: Arc<dyn NetworkDriver>,
    id: String,
    state_dir: PathBuf,
    interface: Option<NetworkInterface>,
    probe_task: Option<tokio::task::JoinHandle<()>>,
    armed: bool,
}

impl CreateGuard {
    fn new(supervisor: &MachineService, id: String, state_dir: PathBuf) -> Self {
        Self {
            instances: supervisor.instances.clone(),
            interfaces: supervisor.interfaces.clone(),
            network: supervisor.network.clone(),
            id,
            state_dir,
            interface: None,
            probe_task: None,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Release everything acquired so far, in reverse order.
    async fn undo(mut self) {
        self.armed = false;
        if let Some(probe) = self.probe_task.take() {
            probe.abort();
        }
        self.instances.write().remove(&self.id);
        self.interfaces.write().remove(&self.id);
        if let Err(e) = tokio::fs::remove_dir_all(&self.state_dir).await {
            tracing::warn!(dir = %self.state_dir.display(), error = %e, "failed to remove state directory");
        }
        if let Some(interface) = self.interface.take() {
            if let Err(e) = self.network.remove_interface(&interface).await {
                tracing::warn!(interface = %interface.name, error = %e, "failed to release interface");
            }
        }
    }
}

impl Drop for CreateGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Cancellation path: the future was dropped mid-provision.
        if let Some(probe) = self.probe_task.take() {
            probe.abort();
        }
        self.instances.write().remove(&self.id);
        self.interfaces.write().remove(&self.id);
        if let Err(e) = std::fs::remove_dir_all(&self.state_dir) {
            tracing::warn!(dir = %self.state_dir.display(), error = %e, "failed to remove state directory");
        }
        if let Some(interface) = self.interface.take() {
            let network = self.network.clone();
            tokio::spawn(async move {
                if let Err(e) = network.remove_interface(&interface).await {
                    tracing::warn!(interface = %interface.name, error = %e, "failed to release interface");
                }
            });
        }
    }
}

/// Recursively copy a directory tree.
async fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_sync(&src, &dst))
        .await
        .map_err(|e| Error::driver("copy layer", e))??;
    Ok(())
}

fn copy_dir_sync(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_sync(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
