//! unifaas - function-as-a-service control plane for unikernel microVMs.
//!
//! Users deploy functions packaged as OCI unikernel images; the provider
//! materialises each image once per content digest, launches VM instances
//! through external machine and network drivers, routes invocations to a
//! healthy instance, and scales instance pools on request.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  HTTP API (deploy / scale / delete / status / invoke)     │
//! ├───────────────────────────────────────────────────────────┤
//! │  FunctionStore ── ImageStore (digest-keyed, single pull)  │
//! │  MachineService (instances, scaling, health reaper)       │
//! │  EndpointManager (proxy reconciliation | internal LB)     │
//! │  InvokeResolver (name → URL, scale-from-zero)             │
//! ├───────────────────────────────────────────────────────────┤
//! │  MachineDriver · NetworkDriver · VolumeService · OCI store│
//! │  (external plug-ins, resolved by name at startup)         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! State lives in memory only; restarts start from an empty instance set.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod function;
pub mod image;
pub mod machine;
pub mod network;
pub mod oci;
pub mod plugin;
pub mod resolver;

pub use api::ApiDoc;
pub use config::{ProviderConfig, PullPolicy};
pub use error::{Error, ErrorKind, Result};
pub use function::{Function, FunctionStore};
pub use image::{Image, ImageStore};
pub use machine::MachineService;
pub use network::EndpointManager;
pub use resolver::InvokeResolver;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
