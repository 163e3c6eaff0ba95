use crate::{
    auth::UserConfig,
    dav::upload::UploadConfig,
    repository::{MountConfig, StorageConfig},
};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Application {
    pub host: String,
    pub port: u16,
    /// Path under which the virtual filesystem is served.
    #[serde(default = "default_dav_prefix")]
    pub dav_prefix: String,
    /// Base64 encoded 32 byte key used to decrypt storage credentials.
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_dav_prefix() -> String {
    "/".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Lifetime of a cached directory listing, 0 disables the cache.
    pub listing_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            listing_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Configuration {
    pub app: Application,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

impl Configuration {
    pub fn new(filename: &str) -> Result<Self, ConfigError> {
        let mut s = Config::default();
        s.merge(File::with_name(filename))?;
        s.merge(Environment::with_prefix("app").separator("__"))?;
        s.try_into()
    }
}

pub fn setup_tracing() {
    use tracing_subscriber::{fmt, prelude::*, registry::Registry, EnvFilter};

    let fmt_subscriber = fmt::layer();

    let env_subscriber = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::default());

    let collector = Registry::default()
        .with(fmt_subscriber)
        .with(env_subscriber);

    // tests call this more than once per process
    let _ = tracing_log::LogTracer::init();
    let _ = tracing::subscriber::set_global_default(collector);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dav::upload::UploadMode;
    use crate::repository::Backend;
    use std::io::Write;

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yml")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"
app:
  host: 127.0.0.1
  port: 8080
  dav_prefix: /dav
upload:
  mode: proxy
storages:
  - id: minio
    root_folder: data
    backend:
      type: S3
      url: http://localhost:9000
      region: us-east-1
      bucket: test
      path_style: true
      auth:
        type: Values
        access_key: minioadmin
        secret_key: minioadmin
  - id: scratch
    backend:
      type: Mem
mounts:
  - mount_path: /files
    storage: minio
  - mount_path: /tmp
    storage: scratch
"#
        )
        .unwrap();

        let config = Configuration::new(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.app.dav_prefix, "/dav");
        assert_eq!(config.upload.mode, UploadMode::Proxy);
        assert_eq!(config.upload.direct_threshold, 10 * 1024 * 1024);
        assert_eq!(config.storages.len(), 2);
        assert!(matches!(
            config.storages[0].backend,
            Backend::S3 {
                path_style: true,
                ..
            }
        ));
        assert_eq!(config.storages[0].root_folder.as_deref(), Some("data"));
        assert_eq!(config.mounts[1].storage, "scratch");
        assert_eq!(config.cache.listing_ttl_secs, 30);
    }
}
