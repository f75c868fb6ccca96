//! Machine driver contract and instance record.
//!
//! The machine driver is the external, swappable backend that actually runs
//! VMs. The supervisor owns every [`Machine`] record and its state; the
//! driver reports back updated records from each lifecycle call.

use crate::error::{Error, Result};
use crate::network::driver::{NetworkInterface, Volume};
use crate::plugin::Registry;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::SystemTime;

/// Process-wide table of machine driver constructors.
pub fn machine_drivers() -> &'static Registry<dyn MachineDriver> {
    static DRIVERS: LazyLock<Registry<dyn MachineDriver>> =
        LazyLock::new(|| Registry::new("machine driver"));
    &DRIVERS
}

/// Lifecycle state of an instance.
///
/// Transitions are monotonic within one lifetime:
/// `Provisioning → Created → Running → Failing → Terminated`. `Unknown`
/// fences an instance selected for teardown so concurrent readers stop
/// treating it as running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// Resources are being allocated; the VM does not exist yet.
    Provisioning,
    /// The driver has created the VM but it is not started.
    Created,
    /// The VM is running.
    Running,
    /// The instance is being torn down.
    Failing,
    /// Fence state: selected for teardown, no longer counted as running.
    Unknown,
    /// Terminal: the VM and its resources are gone.
    Terminated,
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Provisioning => "provisioning",
            Self::Created => "created",
            Self::Running => "running",
            Self::Failing => "failing",
            Self::Unknown => "unknown",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// One VM instance owned by the supervisor.
#[derive(Debug, Clone)]
pub struct Machine {
    /// Globally unique instance id.
    pub id: String,
    /// Owning service name.
    pub service: String,
    /// Namespace of the owning function.
    pub namespace: String,
    /// Image reference the instance was launched from.
    pub image: String,
    /// Manifest config digest of the image.
    pub digest: String,
    /// CPU architecture.
    pub architecture: String,
    /// Machine platform.
    pub platform: String,
    /// Kernel addressed by package format and reference.
    pub kernel: String,
    /// Path of the kernel image on disk.
    pub kernel_path: PathBuf,
    /// Per-instance state directory.
    pub state_dir: PathBuf,
    /// Source filesystem layer this instance's volume was copied from.
    pub rootfs_layer: Option<PathBuf>,
    /// The instance's writable volume, when the image carries a layer.
    pub volume: Option<Volume>,
    /// The instance's bridge interface.
    pub interface: Option<NetworkInterface>,
    /// Current lifecycle state.
    pub state: MachineState,
    /// Creation time.
    pub created_at: SystemTime,
}

/// External backend for VM lifecycle operations.
#[async_trait]
pub trait MachineDriver: Send + Sync {
    /// Create the VM for an instance record.
    async fn create(&self, machine: &Machine) -> Result<Machine>;

    /// Start a created VM.
    async fn start(&self, machine: &Machine) -> Result<Machine>;

    /// Stop a running VM.
    async fn stop(&self, machine: &Machine) -> Result<Machine>;

    /// Delete a stopped VM. `Ok(None)` means the VM and its resources are
    /// gone; `Ok(Some(_))` reports a still-live VM the caller must retain
    /// and re-examine later.
    async fn delete(&self, machine: &Machine) -> Result<Option<Machine>>;

    /// Report the instance's current state as the driver sees it.
    async fn get(&self, machine: &Machine) -> Result<Machine>;

    /// Stream instance updates. Optional; drivers without event support
    /// report the operation as unsupported.
    async fn watch(
        &self,
        machine: &Machine,
    ) -> Result<tokio::sync::mpsc::Receiver<Machine>> {
        Err(Error::driver(
            "watch",
            format!("not supported for {}", machine.id),
        ))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! A recording machine driver with injectable failures.

    use super::*;
    use crate::network::driver::mock::EventLog;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) struct MockMachineDriver {
        pub log: EventLog,
        pub fail_create: AtomicBool,
        pub fail_start: AtomicBool,
        pub fail_delete: AtomicBool,
        /// Delete reports a still-live VM instead of `None`.
        pub retain_on_delete: AtomicBool,
        /// Per-instance state reported by `get`; defaults to `Running`.
        pub reported: Mutex<HashMap<String, MachineState>>,
    }

    impl MockMachineDriver {
        pub fn new(log: EventLog) -> Self {
            Self {
                log,
                fail_create: AtomicBool::new(false),
                fail_start: AtomicBool::new(false),
                fail_delete: AtomicBool::new(false),
                retain_on_delete: AtomicBool::new(false),
                reported: Mutex::new(HashMap::new()),
            }
        }

        pub fn report_state(&self, id: &str, state: MachineState) {
            self.reported.lock().insert(id.to_string(), state);
        }
    }

    #[async_trait]
    impl MachineDriver for MockMachineDriver {
        async fn create(&self, machine: &Machine) -> Result<Machine> {
            self.log.lock().push(format!("driver.create {}", machine.id));
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(Error::driver("create", "hypervisor exited"));
            }
            Ok(machine.clone())
        }

        async fn start(&self, machine: &Machine) -> Result<Machine> {
            self.log.lock().push(format!("driver.start {}", machine.id));
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(Error::driver("start", "boot failed"));
            }
            Ok(machine.clone())
        }

        async fn stop(&self, machine: &Machine) -> Result<Machine> {
            self.log.lock().push(format!("driver.stop {}", machine.id));
            Ok(machine.clone())
        }

        async fn delete(&self, machine: &Machine) -> Result<Option<Machine>> {
            self.log.lock().push(format!("driver.delete {}", machine.id));
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(Error::driver("delete", "vm still holds resources"));
            }
            if self.retain_on_delete.load(Ordering::SeqCst) {
                return Ok(Some(machine.clone()));
            }
            Ok(None)
        }

        async fn get(&self, machine: &Machine) -> Result<Machine> {
            let mut reported = machine.clone();
            reported.state = self
                .reported
                .lock()
                .get(&machine.id)
                .copied()
                .unwrap_or(MachineState::Running);
            Ok(reported)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_state_display_is_lowercase() {
        for state in [
            MachineState::Provisioning,
            MachineState::Created,
            MachineState::Running,
            MachineState::Failing,
            MachineState::Unknown,
            MachineState::Terminated,
        ] {
            let rendered = state.to_string();
            assert!(rendered.chars().all(|c| c.is_ascii_lowercase()));
        }
    }
}
