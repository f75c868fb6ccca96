//! OCI store contracts and image reference handling.
//!
//! The provider does not talk to registries or unpack layers itself; it
//! consumes a [`ManifestStore`] that lists locally known OCI manifests and
//! opens [`OciPackage`] handles for them. Concrete implementations (e.g. a
//! containerd-backed store) register themselves in [`manifest_stores`] and
//! are resolved by name at startup.

use crate::error::{Error, Result};
use crate::plugin::Registry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Registry used when an image reference names no host.
pub const DEFAULT_REGISTRY: &str = "unikraft.org";

/// Manifest annotation carrying the unikernel image name.
pub const ANNOTATION_IMAGE_NAME: &str = "org.unikraft.image.name";

/// Manifest annotation carrying the unikernel image version.
pub const ANNOTATION_IMAGE_VERSION: &str = "org.unikraft.image.version";

/// Process-wide table of manifest store constructors.
pub fn manifest_stores() -> &'static Registry<dyn ManifestStore> {
    static STORES: LazyLock<Registry<dyn ManifestStore>> =
        LazyLock::new(|| Registry::new("manifest store"));
    &STORES
}

/// A parsed image reference, qualified with the default registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host (defaults to [`DEFAULT_REGISTRY`]).
    pub registry: String,
    /// Repository path within the registry.
    pub repository: String,
    /// Version tag (defaults to `latest`).
    pub version: String,
}

impl ImageReference {
    /// Parse a reference like `echo`, `echo:1.0`, or `unikraft.org/echo:1.0`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::validation("empty image reference"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(Error::validation(format!(
                "image reference contains whitespace: {}",
                raw
            )));
        }

        // A leading registry host contains a dot or a port before the first
        // slash; `library/echo` has neither and stays on the default registry.
        let (registry, rest) = match raw.split_once('/') {
            Some((head, tail)) if head.contains('.') || head.contains(':') => {
                (head.to_string(), tail)
            }
            _ => (DEFAULT_REGISTRY.to_string(), raw),
        };

        let (repository, version) = match rest.rsplit_once(':') {
            // `localhost:5000/img` puts the colon in the registry, never here.
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
            _ => (rest.to_string(), "latest".to_string()),
        };

        if repository.is_empty() {
            return Err(Error::validation(format!(
                "image reference has no repository: {}",
                raw
            )));
        }

        Ok(Self {
            registry,
            repository,
            version,
        })
    }

    /// Fully qualified `registry/repository:version` form. Manifest
    /// annotations are matched against this.
    pub fn canonical(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.version)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// An OCI content descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Content digest, `sha256:<hex>`.
    pub digest: String,
    /// Size of the referenced content in bytes.
    pub size: u64,
}

/// One manifest known to the local store.
#[derive(Debug, Clone)]
pub struct ManifestSummary {
    /// Manifest annotations.
    pub annotations: HashMap<String, String>,
    /// Descriptor of the manifest's config blob; its digest is the image
    /// identity used throughout the provider.
    pub config: Descriptor,
}

impl ManifestSummary {
    /// `name:version` from the unikernel annotations, if both are present.
    pub fn unikernel_ref(&self) -> Option<String> {
        let name = self.annotations.get(ANNOTATION_IMAGE_NAME)?;
        let version = self.annotations.get(ANNOTATION_IMAGE_VERSION)?;
        Some(format!("{}:{}", name, version))
    }
}

/// The launchable target a package exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// CPU architecture, e.g. `x86_64`.
    pub architecture: String,
    /// Machine platform, e.g. `qemu`.
    pub platform: String,
    /// Package format scheme used to address the kernel, e.g. `oci`.
    pub format: String,
}

/// Local store of OCI manifests.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// List every manifest the store knows about.
    async fn list_manifests(&self) -> Result<Vec<ManifestSummary>>;

    /// Open a package handle for a manifest previously returned by
    /// [`list_manifests`](Self::list_manifests).
    async fn open_package(
        &self,
        reference: &ImageReference,
        manifest: &ManifestSummary,
    ) -> Result<Arc<dyn OciPackage>>;
}

/// A pullable unikernel package.
#[async_trait]
pub trait OciPackage: Send + Sync {
    /// Human-readable package name.
    fn name(&self) -> String;

    /// The launchable target this package exposes, or `InvalidTarget` when
    /// the package is not a unikernel.
    fn target(&self) -> Result<TargetSpec>;

    /// Pull and unpack the package for `platform` into `workdir`.
    async fn pull(&self, workdir: &Path, platform: &str) -> Result<()>;

    /// Path of the kernel image inside a pulled `workdir`.
    fn kernel_path(&self, workdir: &Path) -> PathBuf;
}

/// Strip the algorithm prefix from a digest for use as a directory name.
pub fn digest_dir_name(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_name_uses_defaults() {
        let parsed = ImageReference::parse("echo").unwrap();
        assert_eq!(parsed.registry, DEFAULT_REGISTRY);
        assert_eq!(parsed.repository, "echo");
        assert_eq!(parsed.version, "latest");
        assert_eq!(parsed.canonical(), "unikraft.org/echo:latest");
    }

    #[test]
    fn parse_name_and_version() {
        let parsed = ImageReference::parse("echo:1.0").unwrap();
        assert_eq!(parsed.canonical(), "unikraft.org/echo:1.0");
    }

    #[test]
    fn parse_fully_qualified() {
        let parsed = ImageReference::parse("unikraft.org/echo:1.0").unwrap();
        assert_eq!(parsed.registry, "unikraft.org");
        assert_eq!(parsed.repository, "echo");
        assert_eq!(parsed.version, "1.0");
    }

    #[test]
    fn parse_registry_with_port() {
        let parsed = ImageReference::parse("localhost:5000/echo").unwrap();
        assert_eq!(parsed.registry, "localhost:5000");
        assert_eq!(parsed.repository, "echo");
        assert_eq!(parsed.version, "latest");
    }

    #[test]
    fn parse_nested_repository_without_host() {
        let parsed = ImageReference::parse("library/echo:2.1").unwrap();
        assert_eq!(parsed.registry, DEFAULT_REGISTRY);
        assert_eq!(parsed.repository, "library/echo");
        assert_eq!(parsed.version, "2.1");
    }

    #[test]
    fn parse_rejects_empty_and_whitespace() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("echo latest").is_err());
    }

    #[test]
    fn unikernel_ref_requires_both_annotations() {
        let mut manifest = ManifestSummary {
            annotations: HashMap::new(),
            config: Descriptor {
                media_type: "application/vnd.oci.image.config.v1+json".into(),
                digest: "sha256:abc".into(),
                size: 1,
            },
        };
        assert!(manifest.unikernel_ref().is_none());

        manifest
            .annotations
            .insert(ANNOTATION_IMAGE_NAME.into(), "unikraft.org/echo".into());
        assert!(manifest.unikernel_ref().is_none());

        manifest
            .annotations
            .insert(ANNOTATION_IMAGE_VERSION.into(), "1.0".into());
        assert_eq!(
            manifest.unikernel_ref().unwrap(),
            "unikraft.org/echo:1.0"
        );
    }

    #[test]
    fn digest_dir_name_strips_algorithm() {
        assert_eq!(digest_dir_name("sha256:abcdef"), "abcdef");
        assert_eq!(digest_dir_name("abcdef"), "abcdef");
    }
}
