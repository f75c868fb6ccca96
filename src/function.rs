//! The function registry: metadata store keyed by service name.
//!
//! A [`Function`] binds a deployment request to a materialised [`Image`].
//! The store owns namespace validation; it never tears down instances, the
//! delete handler drives the machine supervisor before removing the entry.

use crate::api::types::{FunctionDeployment, FunctionStatus};
use crate::config::{DEFAULT_FUNCTION_NAMESPACE, NAMESPACE_LABEL};
use crate::error::{Error, Result};
use crate::image::{Image, ImageStore};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

/// A deployed function and its image binding. Immutable after creation;
/// updates replace the entry.
#[derive(Debug)]
pub struct Function {
    /// The deployment request this function was created from.
    pub deployment: FunctionDeployment,
    /// The materialised image the function runs.
    pub image: Arc<Image>,
    /// Creation time of this entry.
    pub created_at: SystemTime,
}

impl Function {
    /// The function's service name.
    pub fn service(&self) -> &str {
        &self.deployment.service
    }

    /// The namespace the function is deployed into.
    pub fn namespace(&self) -> &str {
        self.deployment
            .namespace
            .as_deref()
            .unwrap_or(DEFAULT_FUNCTION_NAMESPACE)
    }

    /// The content-addressed unpack directory of the function's image.
    pub fn storage_dir(&self) -> &PathBuf {
        &self.image.storage_dir
    }

    /// Project this function into its wire status. Replica counts are
    /// zero here; handlers fill them in from the supervisor.
    pub fn status(&self) -> FunctionStatus {
        let d = &self.deployment;
        FunctionStatus {
            name: d.service.clone(),
            image: d.image.clone(),
            namespace: self.namespace().to_string(),
            env_process: d.env_process.clone(),
            env_vars: d.env_vars.clone(),
            constraints: d.constraints.clone(),
            secrets: d.secrets.clone(),
            labels: d.labels.clone(),
            annotations: d.annotations.clone(),
            limits: d.limits.clone(),
            requests: d.requests.clone(),
            read_only_root_filesystem: d.read_only_root_filesystem.unwrap_or(true),
            replicas: 0,
            available_replicas: 0,
            created_at: epoch_seconds(self.created_at),
        }
    }
}

/// Seconds since the Unix epoch, as a string.
fn epoch_seconds(t: SystemTime) -> Option<String> {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs().to_string())
}

/// CRUD on function metadata, plus the namespace table.
pub struct FunctionStore {
    images: Arc<ImageStore>,
    functions: RwLock<HashMap<String, Arc<Function>>>,
    namespaces: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl FunctionStore {
    /// Create a function store over an image store. The default namespace is
    /// seeded as provider-managed.
    pub fn new(images: Arc<ImageStore>) -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert(
            DEFAULT_FUNCTION_NAMESPACE.to_string(),
            HashMap::from([(NAMESPACE_LABEL.to_string(), "true".to_string())]),
        );
        Self {
            images,
            functions: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(namespaces),
        }
    }

    /// The image store backing this registry.
    pub fn images(&self) -> &Arc<ImageStore> {
        &self.images
    }

    /// Whether a function with this service name exists.
    pub fn exists(&self, service: &str) -> bool {
        self.functions.read().contains_key(service)
    }

    /// Add a function: resolve and materialise its image, then record the
    /// binding. On image failure nothing is recorded and the underlying
    /// error is returned unchanged.
    pub async fn add(&self, req: FunctionDeployment) -> Result<Arc<Function>> {
        if self.exists(&req.service) {
            return Err(Error::service_exists(&req.service));
        }

        tracing::info!(service = %req.service, image = %req.image, "resolving image");
        let resolved = self.images.resolve(&req.image).await?;
        let image = self.images.materialise(&resolved).await?;

        let function = Arc::new(Function {
            deployment: req,
            image,
            created_at: SystemTime::now(),
        });

        // Re-check under the write lock; a racing deploy may have won.
        match self
            .functions
            .write()
            .entry(function.service().to_string())
        {
            Entry::Occupied(_) => Err(Error::service_exists(function.service())),
            Entry::Vacant(slot) => {
                tracing::info!(service = %function.service(), "function registered");
                Ok(slot.insert(function).clone())
            }
        }
    }

    /// Look up a function by service name.
    pub fn get(&self, service: &str) -> Result<Arc<Function>> {
        self.functions
            .read()
            .get(service)
            .cloned()
            .ok_or_else(|| Error::function_not_found(service))
    }

    /// Snapshot every registered function, decoupled from later mutation.
    pub fn list(&self) -> Vec<Arc<Function>> {
        self.functions.read().values().cloned().collect()
    }

    /// Remove a function entry. The caller is responsible for stopping the
    /// function's instances first.
    pub fn delete(&self, service: &str) {
        if self.functions.write().remove(service).is_some() {
            tracing::info!(service = %service, "function removed");
        }
    }

    /// Update a function. An image change re-runs the add path and returns
    /// `true`; otherwise metadata is replaced in place around the existing
    /// image binding and `false` is returned.
    pub async fn update(&self, req: FunctionDeployment) -> Result<(Arc<Function>, bool)> {
        let existing = self.get(&req.service)?;

        if existing.deployment.image != req.image {
            self.delete(&req.service);
            let function = self.add(req).await?;
            return Ok((function, true));
        }

        let updated = Arc::new(Function {
            deployment: req,
            image: existing.image.clone(),
            created_at: existing.created_at,
        });
        self.functions
            .write()
            .insert(updated.service().to_string(), updated.clone());
        Ok((updated, false))
    }

    /// Whether a namespace may hold functions: the default namespace always
    /// can; any other must carry the provider's ownership label.
    pub fn validate_namespace(&self, namespace: &str) -> bool {
        if namespace == DEFAULT_FUNCTION_NAMESPACE {
            return true;
        }
        self.namespaces
            .read()
            .get(namespace)
            .and_then(|labels| labels.get(NAMESPACE_LABEL))
            .map(|value| value == "true")
            .unwrap_or(false)
    }

    /// Register a namespace with its labels.
    pub fn add_namespace(&self, name: &str, labels: HashMap<String, String>) {
        self.namespaces.write().insert(name.to_string(), labels);
    }

    /// Namespaces carrying the provider label, always including the default.
    pub fn list_namespaces(&self) -> Vec<String> {
        let namespaces = self.namespaces.read();
        let mut names: Vec<String> = namespaces
            .iter()
            .filter(|(_, labels)| labels.contains_key(NAMESPACE_LABEL))
            .map(|(name, _)| name.clone())
            .collect();
        if !names.iter().any(|n| n == DEFAULT_FUNCTION_NAMESPACE) {
            names.push(DEFAULT_FUNCTION_NAMESPACE.to_string());
        }
        names.sort();
        names
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::image::testutil::{store_with, FakePackage};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<FunctionStore> {
        let (images, _) = store_with(
            "unikraft.org/echo:1.0",
            "sha256:abc",
            FakePackage::new("echo"),
            dir.path(),
        );
        Arc::new(FunctionStore::new(Arc::new(images)))
    }

    #[tokio::test]
    async fn add_then_get_then_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let function = store.add(deployment("echo", "echo:1.0")).await.unwrap();
        assert_eq!(function.service(), "echo");
        assert!(store.exists("echo"));
        assert_eq!(store.get("echo").unwrap().image.digest, "sha256:abc");

        store.delete("echo");
        assert!(!store.exists("echo"));
        assert!(matches!(
            store.get("echo"),
            Err(Error::FunctionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn add_rejects_duplicate_service() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.add(deployment("echo", "echo:1.0")).await.unwrap();
        let err = store.add(deployment("echo", "echo:1.0")).await.unwrap_err();
        assert!(matches!(err, Error::ServiceExists { .. }));
    }

    #[tokio::test]
    async fn failed_image_records_no_entry() {
        let dir = TempDir::new().unwrap();
        let (images, _) = store_with(
            "unikraft.org/echo:1.0",
            "sha256:abc",
            FakePackage::new("echo").failing(),
            dir.path(),
        );
        let store = FunctionStore::new(Arc::new(images));

        let err = store.add(deployment("echo", "echo:1.0")).await.unwrap_err();
        assert!(matches!(err, Error::ImagePull { .. }));
        assert!(!store.exists("echo"));
    }

    #[tokio::test]
    async fn functions_with_same_digest_share_storage_dir() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let a = store.add(deployment("a", "echo:1.0")).await.unwrap();
        let b = store.add(deployment("b", "echo:1.0")).await.unwrap();
        assert_eq!(a.storage_dir(), b.storage_dir());
    }

    #[tokio::test]
    async fn update_with_same_image_keeps_binding() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let original = store.add(deployment("echo", "echo:1.0")).await.unwrap();

        let mut req = deployment("echo", "echo:1.0");
        req.env_process = Some("/new-handler".to_string());
        let (updated, image_changed) = store.update(req).await.unwrap();

        assert!(!image_changed);
        assert_eq!(updated.deployment.env_process.as_deref(), Some("/new-handler"));
        assert!(Arc::ptr_eq(&updated.image, &original.image));
    }

    #[tokio::test]
    async fn update_with_new_image_rebinds() {
        let dir = TempDir::new().unwrap();
        let store = echo_store(dir.path());

        store.add(deployment("echo", "echo:1.0")).await.unwrap();
        let (updated, image_changed) = store.update(deployment("echo", "echo:2.0")).await.unwrap();

        assert!(image_changed);
        assert_eq!(updated.image.digest, "sha256:def");
    }

    #[tokio::test]
    async fn update_missing_function_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.update(deployment("ghost", "echo:1.0")).await.unwrap_err();
        assert!(matches!(err, Error::FunctionNotFound { .. }));
    }

    #[test]
    fn namespace_validation() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.validate_namespace(DEFAULT_FUNCTION_NAMESPACE));
        assert!(!store.validate_namespace("kube-system"));

        store.add_namespace(
            "team-a",
            HashMap::from([(NAMESPACE_LABEL.to_string(), "true".to_string())]),
        );
        assert!(store.validate_namespace("team-a"));

        store.add_namespace("team-b", HashMap::new());
        assert!(!store.validate_namespace("team-b"));
    }

    #[test]
    fn list_namespaces_includes_default() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add_namespace(
            "team-a",
            HashMap::from([(NAMESPACE_LABEL.to_string(), "true".to_string())]),
        );
        store.add_namespace("unlabelled", HashMap::new());

        let names = store.list_namespaces();
        assert!(names.contains(&DEFAULT_FUNCTION_NAMESPACE.to_string()));
        assert!(names.contains(&"team-a".to_string()));
        assert!(!names.contains(&"unlabelled".to_string()));
    }
}
