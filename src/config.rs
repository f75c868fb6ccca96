//! Provider configuration and process-wide constants.
//!
//! Configuration is environment-first, following the standard faas provider
//! environment schema (`port`, `read_timeout`, `write_timeout`,
//! `secret_mount_path`), with optional overrides from
//! `~/.config/unifaas/provider.toml`:
//!
//! ```toml
//! port = 8081
//! oci_root = "/var/lib/unifaas/oci"
//! machine_root = "/var/lib/unifaas/machines"
//! endpoint_mode = "internal"
//! balancer = "round-robin"
//! probe_deadline_secs = 60
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default namespace functions are created in.
pub const DEFAULT_FUNCTION_NAMESPACE: &str = "openfaas-fn";

/// Label that marks a namespace as managed by this provider.
pub const NAMESPACE_LABEL: &str = "openfaas";

/// Name of the shared bridge every instance interface attaches to.
pub const BRIDGE_NAME: &str = "openfaas0";

/// Port inside each unikernel where the user's HTTP handler listens.
pub const WATCHDOG_PORT: u16 = 8123;

/// Port of the external reverse proxy gateway.
pub const GATEWAY_PORT: u16 = 80;

/// Routes endpoint of the external reverse proxy's admin API.
pub const PROXY_ADMIN_ROUTES_URL: &str =
    "http://localhost:2019/config/apps/http/servers/srv0/routes/1/handle/0/routes";

/// Default root for content-addressed image unpack directories.
pub const DEFAULT_OCI_ROOT: &str = "/var/lib/unifaas/oci";

/// Default root for per-instance state directories.
pub const DEFAULT_MACHINE_ROOT: &str = "/var/lib/unifaas/machines";

/// Volume driver used for per-instance filesystem layers.
pub const LAYER_VOLUME_DRIVER: &str = "9pfs";

/// Image pull policy.
///
/// Recognised for future use; the image registry currently always behaves as
/// `IfNotPresent` keyed by the manifest config digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    /// Re-pull on every deployment.
    Always,
    /// Use the cached unpack directory when the digest is already present.
    #[default]
    IfNotPresent,
}

impl FromStr for PullPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Always" => Ok(Self::Always),
            "IfNotPresent" => Ok(Self::IfNotPresent),
            other => Err(Error::validation(format!(
                "unknown pull policy: {} (expected Always or IfNotPresent)",
                other
            ))),
        }
    }
}

/// Runtime configuration for the provider process.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// TCP port the HTTP API listens on.
    pub port: u16,
    /// Read timeout applied to incoming requests.
    pub read_timeout: Duration,
    /// Write timeout applied to the `/system` routes.
    pub write_timeout: Duration,
    /// Base directory for per-namespace secret files.
    pub secret_mount_path: PathBuf,
    /// Root for content-addressed image unpack directories.
    pub oci_root: PathBuf,
    /// Root for per-instance state directories.
    pub machine_root: PathBuf,
    /// Endpoint manager implementation to resolve at startup ("proxy" or "internal").
    pub endpoint_mode: String,
    /// Load balancer strategy for the internal endpoint manager.
    pub balancer: String,
    /// Machine driver implementation to resolve at startup.
    pub machine_driver: String,
    /// Network driver implementation to resolve at startup.
    pub network_driver: String,
    /// OCI manifest store implementation to resolve at startup.
    pub oci_store: String,
    /// Upper bound for the per-instance readiness probe.
    pub probe_deadline: Duration,
    /// Image pull policy.
    pub pull_policy: PullPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(60),
            secret_mount_path: PathBuf::from("/run/secrets"),
            oci_root: PathBuf::from(DEFAULT_OCI_ROOT),
            machine_root: PathBuf::from(DEFAULT_MACHINE_ROOT),
            endpoint_mode: "proxy".to_string(),
            balancer: "random".to_string(),
            machine_driver: "qemu".to_string(),
            network_driver: "bridge".to_string(),
            oci_store: "containerd".to_string(),
            probe_deadline: Duration::from_secs(120),
            pull_policy: PullPolicy::IfNotPresent,
        }
    }
}

/// File-level overrides, all optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    read_timeout: Option<String>,
    write_timeout: Option<String>,
    secret_mount_path: Option<PathBuf>,
    oci_root: Option<PathBuf>,
    machine_root: Option<PathBuf>,
    endpoint_mode: Option<String>,
    balancer: Option<String>,
    machine_driver: Option<String>,
    network_driver: Option<String>,
    oci_store: Option<String>,
    probe_deadline_secs: Option<u64>,
}

impl ProviderConfig {
    /// Load configuration from the environment, then apply file overrides.
    ///
    /// A missing config file is not an error; a malformed one is.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_env()?;

        let path = match Self::config_path() {
            Some(p) => p,
            None => return Ok(config),
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using env defaults");
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::config("load", format!("{}: {}", path.display(), e)))?;
        let file: FileConfig = toml::from_str(&contents)
            .map_err(|e| Error::config("parse", format!("{}: {}", path.display(), e)))?;
        config.apply(file)?;

        tracing::debug!(path = %path.display(), "loaded provider configuration");
        Ok(config)
    }

    /// Read configuration from the faas provider environment schema.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("port") {
            config.port = port
                .parse()
                .map_err(|e| Error::config("parse", format!("port: {}", e)))?;
        }
        if let Ok(raw) = std::env::var("read_timeout") {
            config.read_timeout = parse_duration(&raw)?;
        }
        if let Ok(raw) = std::env::var("write_timeout") {
            config.write_timeout = parse_duration(&raw)?;
        }
        if let Ok(path) = std::env::var("secret_mount_path") {
            config.secret_mount_path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Path of the optional TOML override file.
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("unifaas").join("provider.toml"))
    }

    fn apply(&mut self, file: FileConfig) -> Result<()> {
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(raw) = file.read_timeout {
            self.read_timeout = parse_duration(&raw)?;
        }
        if let Some(raw) = file.write_timeout {
            self.write_timeout = parse_duration(&raw)?;
        }
        if let Some(path) = file.secret_mount_path {
            self.secret_mount_path = path;
        }
        if let Some(path) = file.oci_root {
            self.oci_root = path;
        }
        if let Some(path) = file.machine_root {
            self.machine_root = path;
        }
        if let Some(mode) = file.endpoint_mode {
            self.endpoint_mode = mode;
        }
        if let Some(balancer) = file.balancer {
            self.balancer = balancer;
        }
        if let Some(driver) = file.machine_driver {
            self.machine_driver = driver;
        }
        if let Some(driver) = file.network_driver {
            self.network_driver = driver;
        }
        if let Some(store) = file.oci_store {
            self.oci_store = store;
        }
        if let Some(secs) = file.probe_deadline_secs {
            self.probe_deadline = Duration::from_secs(secs);
        }
        Ok(())
    }
}

/// Parse a duration like "60s", "2m", "500ms", or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let parse_num = |s: &str| -> Result<u64> {
        s.parse()
            .map_err(|e| Error::config("parse", format!("duration {}: {}", raw, e)))
    };

    if let Some(ms) = raw.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse_num(ms)?));
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return Ok(Duration::from_secs(parse_num(secs)?));
    }
    if let Some(mins) = raw.strip_suffix('m') {
        return Ok(Duration::from_secs(parse_num(mins)? * 60));
    }
    Ok(Duration::from_secs(parse_num(raw)?))
}
