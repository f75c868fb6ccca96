//! The image registry: content-addressed cache of unpacked unikernels.
//!
//! Images are keyed by the manifest config digest. An image reference is
//! resolved against the local manifest store, then materialised on disk
//! exactly once per digest: concurrent callers for the same digest coalesce
//! onto a single pull and observe the same directory (or the same failure).

use crate::error::{Error, Result};
use crate::oci::{
    digest_dir_name, ImageReference, ManifestStore, ManifestSummary, OciPackage, TargetSpec,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of a pull, shared with coalesced waiters. The error side carries
/// the rendered message so waiters reproduce the puller's failure.
type PullOutcome = std::result::Result<Arc<Image>, String>;

/// A materialised unikernel image, shared by every function and instance
/// that references its digest. Never mutated after creation.
#[derive(Debug)]
pub struct Image {
    /// Manifest config digest, `sha256:<hex>`.
    pub digest: String,
    /// Canonical reference the image was resolved from.
    pub reference: String,
    /// Content-addressed unpack directory.
    pub storage_dir: PathBuf,
    /// The launchable target the package exposes.
    pub target: TargetSpec,
    /// Path of the kernel image inside the unpack directory.
    pub kernel_path: PathBuf,
}

impl Image {
    /// Path of the filesystem layer inside the unpack directory, copied per
    /// instance at machine creation.
    pub fn rootfs_layer(&self) -> PathBuf {
        self.storage_dir.join("unikraft").join("fs0")
    }
}

/// An image reference resolved against the manifest store, ready to be
/// materialised.
pub struct ResolvedImage {
    /// The parsed, registry-qualified reference.
    pub reference: ImageReference,
    /// Manifest config digest.
    pub digest: String,
    /// The matched manifest.
    pub manifest: ManifestSummary,
    /// Package handle for the matched manifest.
    pub package: Arc<dyn OciPackage>,
    /// Validated target metadata.
    pub target: TargetSpec,
}

impl std::fmt::Debug for ResolvedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedImage")
            .field("reference", &self.reference)
            .field("digest", &self.digest)
            .field("manifest", &self.manifest)
            .field("package", &self.package.name())
            .field("target", &self.target)
            .finish()
    }
}

/// Content-addressed image cache with single-flight pulls.
pub struct ImageStore {
    store: Arc<dyn ManifestStore>,
    oci_root: PathBuf,
    host_platform: String,
    images: RwLock<HashMap<String, Arc<Image>>>,
    /// One entry per in-flight pull; waiters clone the receiver.
    pulls: Mutex<HashMap<String, watch::Receiver<Option<PullOutcome>>>>,
}

/// Removes the unpack directory unless the pull completed.
struct UnpackGuard {
    dir: PathBuf,
    armed: bool,
}

impl UnpackGuard {
    fn new(dir: PathBuf) -> Self {
        Self { dir, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for UnpackGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to remove unpack directory");
            }
        }
    }
}

/// Removes the in-flight pull slot when the puller finishes or is cancelled,
/// so a later deploy can retry the digest.
struct SlotGuard<'a> {
    pulls: &'a Mutex<HashMap<String, watch::Receiver<Option<PullOutcome>>>>,
    digest: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pulls.lock().remove(&self.digest);
    }
}

impl ImageStore {
    /// Create an image store over a manifest store, rooted at `oci_root`.
    pub fn new(store: Arc<dyn ManifestStore>, oci_root: PathBuf, host_platform: String) -> Self {
        Self {
            store,
            oci_root,
            host_platform,
            images: RwLock::new(HashMap::new()),
            pulls: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an image reference against the manifest store.
    ///
    /// Selects the manifest whose unikernel name/version annotations match
    /// the qualified reference and verifies it exposes a launchable target.
    pub async fn resolve(&self, raw: &str) -> Result<ResolvedImage> {
        let reference = ImageReference::parse(raw)?;
        let canonical = reference.canonical();

        tracing::debug!(image = %canonical, "listing manifests");
        let manifests = self.store.list_manifests().await?;

        let mut matched: Option<(ManifestSummary, Arc<dyn OciPackage>)> = None;
        for manifest in manifests {
            let Some(unikernel_ref) = manifest.unikernel_ref() else {
                continue;
            };
            if unikernel_ref != canonical {
                continue;
            }
            match self.store.open_package(&reference, &manifest).await {
                Ok(package) => {
                    matched = Some((manifest, package));
                    break;
                }
                Err(e) => {
                    tracing::warn!(image = %canonical, error = %e, "failed to open package for manifest");
                }
            }
        }

        let (manifest, package) = matched.ok_or_else(|| Error::ManifestNotFound {
            reference: canonical.clone(),
        })?;

        let target = package.target()?;
        let digest = manifest.config.digest.clone();

        Ok(ResolvedImage {
            reference,
            digest,
            manifest,
            package,
            target,
        })
    }

    /// Materialise a resolved image on disk, once per digest.
    ///
    /// Returns the cached image when the digest is already present;
    /// otherwise pulls into a fresh content-addressed directory. A failed
    /// pull removes the directory and leaves the digest unregistered.
    pub async fn materialise(&self, resolved: &ResolvedImage) -> Result<Arc<Image>> {
        let digest = &resolved.digest;

        if let Some(image) = self.images.read().get(digest) {
            tracing::debug!(digest = %digest, "image already pulled");
            return Ok(image.clone());
        }

        // Either join an in-flight pull or claim the slot for this digest.
        let (tx, waiter) = {
            let mut pulls = self.pulls.lock();
            if let Some(image) = self.images.read().get(digest) {
                return Ok(image.clone());
            }
            if let Some(rx) = pulls.get(digest) {
                (None, Some(rx.clone()))
            } else {
                let (tx, rx) = watch::channel(None);
                pulls.insert(digest.clone(), rx);
                (Some(tx), None)
            }
        };

        if let Some(mut rx) = waiter {
            let outcome = loop {
                if let Some(outcome) = rx.borrow_and_update().clone() {
                    break outcome;
                }
                rx.changed().await.map_err(|_| {
                    Error::image_pull(resolved.reference.canonical(), "pull was cancelled")
                })?;
            };
            return outcome
                .map_err(|reason| Error::image_pull(resolved.reference.canonical(), reason));
        }

        let tx = tx.expect("slot claimed without sender");
        let _slot = SlotGuard {
            pulls: &self.pulls,
            digest: digest.clone(),
        };

        let result = self.pull(resolved).await;
        if let Ok(image) = &result {
            self.images.write().insert(digest.clone(), image.clone());
        }
        let outcome = match &result {
            Ok(image) => Ok(image.clone()),
            Err(e) => Err(e.to_string()),
        };
        let _ = tx.send(Some(outcome));
        result
    }

    async fn pull(&self, resolved: &ResolvedImage) -> Result<Arc<Image>> {
        let storage_dir = self.storage_dir(&resolved.digest);
        tokio::fs::create_dir_all(&storage_dir).await?;
        let mut guard = UnpackGuard::new(storage_dir.clone());

        tracing::info!(image = %resolved.reference, digest = %resolved.digest, "pulling image");
        resolved
            .package
            .pull(&storage_dir, &self.host_platform)
            .await?;
        tracing::info!(image = %resolved.reference, "pull successful");

        guard.disarm();
        Ok(Arc::new(Image {
            digest: resolved.digest.clone(),
            reference: resolved.reference.canonical(),
            storage_dir: storage_dir.clone(),
            target: resolved.target.clone(),
            kernel_path: resolved.package.kernel_path(&storage_dir),
        }))
    }

    /// Look up a materialised image by digest.
    pub fn get(&self, digest: &str) -> Option<Arc<Image>> {
        self.images.read().get(digest).cloned()
    }

    /// Whether a digest is already materialised.
    pub fn contains(&self, digest: &str) -> bool {
        self.images.read().contains_key(digest)
    }

    /// The content-addressed unpack directory for a digest.
    pub fn storage_dir(&self, digest: &str) -> PathBuf {
        self.oci_root.join(digest_dir_name(digest))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! In-crate fakes for the OCI contracts.

    use super::*;
    use crate::oci::{Descriptor, ANNOTATION_IMAGE_NAME, ANNOTATION_IMAGE_VERSION};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) struct FakePackage {
        pub name: String,
        pub target: Option<TargetSpec>,
        pub fail_pull: AtomicBool,
        pub pull_count: AtomicUsize,
        pub pull_delay: Duration,
        /// Create a `unikraft/fs0` layer inside the workdir on pull.
        pub with_rootfs: bool,
    }

    impl FakePackage {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                target: Some(TargetSpec {
                    architecture: "x86_64".into(),
                    platform: "qemu".into(),
                    format: "oci".into(),
                }),
                fail_pull: AtomicBool::new(false),
                pull_count: AtomicUsize::new(0),
                pull_delay: Duration::from_millis(0),
                with_rootfs: true,
            }
        }

        pub fn without_target(mut self) -> Self {
            self.target = None;
            self
        }

        pub fn failing(self) -> Self {
            self.fail_pull.store(true, Ordering::SeqCst);
            self
        }

        pub fn with_pull_delay(mut self, delay: Duration) -> Self {
            self.pull_delay = delay;
            self
        }
    }

    #[async_trait]
    impl OciPackage for FakePackage {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn target(&self) -> Result<TargetSpec> {
            self.target
                .clone()
                .ok_or_else(|| Error::invalid_target(&self.name, "package is not a unikernel"))
        }

        async fn pull(&self, workdir: &Path, _platform: &str) -> Result<()> {
            if self.pull_delay > Duration::from_millis(0) {
                tokio::time::sleep(self.pull_delay).await;
            }
            self.pull_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_pull.load(Ordering::SeqCst) {
                return Err(Error::image_pull(&self.name, "registry unreachable"));
            }
            std::fs::write(workdir.join("kernel"), b"\x7fELF")?;
            if self.with_rootfs {
                let layer = workdir.join("unikraft").join("fs0");
                std::fs::create_dir_all(&layer)?;
                std::fs::write(layer.join("app"), b"handler")?;
            }
            Ok(())
        }

        fn kernel_path(&self, workdir: &Path) -> PathBuf {
            workdir.join("kernel")
        }
    }

    pub(crate) struct FakeManifestStore {
        entries: Vec<(ManifestSummary, Arc<FakePackage>)>,
    }

    impl FakeManifestStore {
        pub fn new() -> Self {
            Self {
                entries: Vec::new(),
            }
        }

        /// Register a manifest for `reference` (canonical form) whose config
        /// digest is `digest`, backed by `package`.
        pub fn with_entry(mut self, reference: &str, digest: &str, package: FakePackage) -> Self {
            let (name, version) = reference
                .rsplit_once(':')
                .expect("canonical reference has a version");
            let manifest = ManifestSummary {
                annotations: HashMap::from([
                    (ANNOTATION_IMAGE_NAME.to_string(), name.to_string()),
                    (ANNOTATION_IMAGE_VERSION.to_string(), version.to_string()),
                ]),
                config: Descriptor {
                    media_type: "application/vnd.oci.image.config.v1+json".into(),
                    digest: digest.to_string(),
                    size: 1,
                },
            };
            self.entries.push((manifest, Arc::new(package)));
            self
        }

        pub fn package(&self, index: usize) -> Arc<FakePackage> {
            self.entries[index].1.clone()
        }
    }

    #[async_trait]
    impl ManifestStore for FakeManifestStore {
        async fn list_manifests(&self) -> Result<Vec<ManifestSummary>> {
            Ok(self.entries.iter().map(|(m, _)| m.clone()).collect())
        }

        async fn open_package(
            &self,
            _reference: &ImageReference,
            manifest: &ManifestSummary,
        ) -> Result<Arc<dyn OciPackage>> {
            self.entries
                .iter()
                .find(|(m, _)| m.config.digest == manifest.config.digest)
                .map(|(_, p)| p.clone() as Arc<dyn OciPackage>)
                .ok_or_else(|| Error::ManifestNotFound {
                    reference: manifest.config.digest.clone(),
                })
        }
    }

    /// An image store over a single-entry fake manifest store.
    pub(crate) fn store_with(
        reference: &str,
        digest: &str,
        package: FakePackage,
        oci_root: &Path,
    ) -> (ImageStore, Arc<FakePackage>) {
        let fake = FakeManifestStore::new().with_entry(reference, digest, package);
        let package = fake.package(0);
        let store = ImageStore::new(Arc::new(fake), oci_root.to_path_buf(), "x86_64".into());
        (store, package)
    }
}
