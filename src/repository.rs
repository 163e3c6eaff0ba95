use crate::auth::CallerIdentity;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures_util::{future::BoxFuture, FutureExt};
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tracing::{debug, instrument};

pub type RepositoryFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// A credential value, either stored as-is or encrypted with the shared secret.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Secret {
    Encrypted { encrypted: String },
    Plain(String),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum S3Authentication {
    Environment,
    Values { access_key: String, secret_key: Secret },
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Backend {
    S3 {
        /// Custom endpoint for S3 compatible services, AWS when absent.
        #[serde(default)]
        url: Option<String>,
        region: String,
        bucket: String,
        #[serde(default)]
        path_style: bool,
        #[serde(default)]
        ensure_bucket: bool,
        auth: S3Authentication,
    },
    WebDav {
        url: String,
        #[serde(default)]
        base_directory: Option<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<Secret>,
    },
    Mem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    S3,
    WebDav,
    Memory,
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::S3 { .. } => BackendKind::S3,
            Backend::WebDav { .. } => BackendKind::WebDav,
            Backend::Mem => BackendKind::Memory,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Prefix applied to every key stored through this configuration.
    #[serde(default)]
    pub root_folder: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub quota_bytes: Option<u64>,
    pub backend: Backend,
}

impl StorageConfig {
    pub fn root_folder(&self) -> &str {
        self.root_folder.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MountConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub mount_path: String,
    pub storage: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub id: String,
    /// Principal owning the mount, `None` makes it visible to every caller.
    pub owner: Option<String>,
    pub name: String,
    pub mount_path: String,
    pub storage_config_id: String,
    pub active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mount {
    pub fn new(id: &str, mount_path: &str, storage_config_id: &str) -> Self {
        let now = Utc::now();
        Mount {
            id: id.to_owned(),
            owner: None,
            name: id.to_owned(),
            mount_path: normalize_mount_path(mount_path),
            storage_config_id: storage_config_id.to_owned(),
            active: true,
            last_used: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.mount_path == "/"
    }

    pub fn visible_to(&self, caller: &CallerIdentity) -> bool {
        if !self.active {
            return false;
        }
        if caller.is_admin {
            return true;
        }
        match &self.owner {
            None => true,
            Some(owner) => caller.principal.as_deref() == Some(owner.as_str()),
        }
    }
}

/// Leading slash, single separators and no trailing slash except for `/` itself.
pub fn normalize_mount_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

pub trait Repository: Send + Sync {
    fn mounts_visible_to<'a>(&'a self, caller: &'a CallerIdentity)
        -> RepositoryFuture<'a, Vec<Mount>>;

    fn storage_config<'a>(&'a self, id: &'a str) -> RepositoryFuture<'a, Option<StorageConfig>>;

    fn storage_configs(&self) -> RepositoryFuture<'_, Vec<StorageConfig>>;

    fn touch_mount<'a>(&'a self, id: &'a str) -> RepositoryFuture<'a, ()>;
}

#[derive(Clone, Default)]
pub struct MemoryRepository {
    mounts: Arc<Mutex<Vec<Mount>>>,
    storages: Arc<Mutex<HashMap<String, StorageConfig>>>,
}

impl MemoryRepository {
    pub fn new() -> MemoryRepository {
        MemoryRepository::default()
    }

    pub fn from_configuration(
        storages: Vec<StorageConfig>,
        mounts: Vec<MountConfig>,
    ) -> Result<MemoryRepository> {
        let repository = MemoryRepository::new();
        for storage in storages {
            repository.add_storage(storage)?;
        }
        for m in mounts {
            let mount_path = normalize_mount_path(&m.mount_path);
            let id = m.id.unwrap_or_else(|| mount_path.clone());
            let mut mount = Mount::new(&id, &mount_path, &m.storage);
            mount.name = m.name.unwrap_or_else(|| id.clone());
            mount.owner = m.owner;
            mount.active = m.active;
            repository.add_mount(mount)?;
        }
        Ok(repository)
    }

    pub fn add_storage(&self, storage: StorageConfig) -> Result<()> {
        let mut storages = self
            .storages
            .lock()
            .map_err(|_| anyhow!("storage table poisoned"))?;
        if storages.contains_key(&storage.id) {
            return Err(anyhow!("storage already defined: {}", storage.id));
        }
        storages.insert(storage.id.clone(), storage);
        Ok(())
    }

    #[instrument(level = "debug", err, skip(self))]
    pub fn add_mount(&self, mount: Mount) -> Result<()> {
        let mut mounts = self
            .mounts
            .lock()
            .map_err(|_| anyhow!("mount table poisoned"))?;
        let taken: HashSet<(&Option<String>, &str)> = mounts
            .iter()
            .map(|m| (&m.owner, m.mount_path.as_str()))
            .collect();
        if taken.contains(&(&mount.owner, mount.mount_path.as_str())) {
            return Err(anyhow!(
                "repository already contains this mount path: {}",
                mount.mount_path
            ));
        }
        if mounts.iter().any(|m| m.id == mount.id) {
            return Err(anyhow!("duplicate mount id: {}", mount.id));
        }
        mounts.push(mount);
        Ok(())
    }

    pub fn mount(&self, id: &str) -> Option<Mount> {
        self.mounts
            .lock()
            .ok()
            .and_then(|m| m.iter().find(|m| m.id == id).cloned())
    }
}

impl Repository for MemoryRepository {
    fn mounts_visible_to<'a>(
        &'a self,
        caller: &'a CallerIdentity,
    ) -> RepositoryFuture<'a, Vec<Mount>> {
        async move {
            let mounts = self
                .mounts
                .lock()
                .map_err(|_| anyhow!("mount table poisoned"))?;
            Ok(mounts
                .iter()
                .filter(|m| m.visible_to(caller))
                .cloned()
                .collect())
        }
        .boxed()
    }

    fn storage_config<'a>(&'a self, id: &'a str) -> RepositoryFuture<'a, Option<StorageConfig>> {
        async move {
            let storages = self
                .storages
                .lock()
                .map_err(|_| anyhow!("storage table poisoned"))?;
            Ok(storages.get(id).cloned())
        }
        .boxed()
    }

    fn storage_configs(&self) -> RepositoryFuture<'_, Vec<StorageConfig>> {
        async move {
            let storages = self
                .storages
                .lock()
                .map_err(|_| anyhow!("storage table poisoned"))?;
            let mut all: Vec<StorageConfig> = storages.values().cloned().collect();
            all.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(all)
        }
        .boxed()
    }

    fn touch_mount<'a>(&'a self, id: &'a str) -> RepositoryFuture<'a, ()> {
        async move {
            let mut mounts = self
                .mounts
                .lock()
                .map_err(|_| anyhow!("mount table poisoned"))?;
            match mounts.iter_mut().find(|m| m.id == id) {
                Some(m) => {
                    m.last_used = Some(Utc::now());
                    debug!(mount = %id, "mount touched");
                    Ok(())
                }
                None => Err(anyhow!("unknown mount: {}", id)),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_storage(id: &str) -> StorageConfig {
        StorageConfig {
            id: id.into(),
            name: None,
            root_folder: None,
            public: false,
            quota_bytes: None,
            backend: Backend::Mem,
        }
    }

    #[test]
    fn normalizes_mount_paths() {
        assert_eq!(normalize_mount_path("/"), "/");
        assert_eq!(normalize_mount_path(""), "/");
        assert_eq!(normalize_mount_path("files"), "/files");
        assert_eq!(normalize_mount_path("//files/"), "/files");
        assert_eq!(normalize_mount_path("/a//b/"), "/a/b");
    }

    #[test]
    fn rejects_duplicate_mount_paths_per_owner() {
        let repo = MemoryRepository::new();
        repo.add_storage(mem_storage("mem")).unwrap();
        repo.add_mount(Mount::new("one", "/tmp", "mem")).unwrap();
        assert!(repo.add_mount(Mount::new("two", "/tmp/", "mem")).is_err());

        let mut other = Mount::new("three", "/tmp", "mem");
        other.owner = Some("alice".into());
        assert!(repo.add_mount(other).is_ok());
    }

    #[tokio::test]
    async fn filters_by_visibility_and_touches() {
        let repo = MemoryRepository::new();
        let mut private = Mount::new("private", "/alice", "mem");
        private.owner = Some("alice".into());
        let mut inactive = Mount::new("inactive", "/old", "mem");
        inactive.active = false;
        repo.add_mount(Mount::new("shared", "/shared", "mem"))
            .unwrap();
        repo.add_mount(private).unwrap();
        repo.add_mount(inactive).unwrap();

        let bob = CallerIdentity::user("bob");
        let alice = CallerIdentity::user("alice");
        assert_eq!(repo.mounts_visible_to(&bob).await.unwrap().len(), 1);
        assert_eq!(repo.mounts_visible_to(&alice).await.unwrap().len(), 2);
        assert_eq!(
            repo.mounts_visible_to(&CallerIdentity::admin())
                .await
                .unwrap()
                .len(),
            2
        );

        assert!(repo.mount("shared").unwrap().last_used.is_none());
        repo.touch_mount("shared").await.unwrap();
        assert!(repo.mount("shared").unwrap().last_used.is_some());
        assert!(repo.touch_mount("missing").await.is_err());
    }
}
