use super::{
    encryption::CredentialCipher, http::HttpClient, memory::MemoryBackend,
    s3_backend::{S3Backend, S3Settings}, webdav_backend::WebDavBackend, BackendClient,
};
use crate::repository::{Backend, S3Authentication, Secret, StorageConfig};
use anyhow::{anyhow, Context, Result};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::{debug, instrument};

/// Builds one backend client per storage configuration and keeps it for the
/// lifetime of the process.
pub struct ClientFactory {
    cipher: Option<CredentialCipher>,
    http: HttpClient,
    clients: Mutex<HashMap<String, Arc<dyn BackendClient>>>,
}

impl ClientFactory {
    pub fn new(cipher: Option<CredentialCipher>) -> Self {
        ClientFactory {
            cipher,
            http: HttpClient::new(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Outbound HTTP client shared by every backend built here.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Installs a ready client for `id`, replacing whatever was built before.
    pub fn register(&self, id: &str, client: Arc<dyn BackendClient>) {
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_owned(), client);
    }

    #[instrument(level = "debug", skip(self, config), fields(storage = %config.id))]
    pub fn client_for(&self, config: &StorageConfig) -> Result<Arc<dyn BackendClient>> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(c) = clients.get(&config.id) {
            return Ok(Arc::clone(c));
        }
        let client = self
            .build(config)
            .with_context(|| format!("can't create client for storage {}", config.id))?;
        debug!(kind = ?client.kind(), "backend client created");
        clients.insert(config.id.clone(), Arc::clone(&client));
        Ok(client)
    }

    fn reveal(&self, secret: &Secret) -> Result<String> {
        match secret {
            Secret::Plain(v) => Ok(v.clone()),
            Secret::Encrypted { encrypted } => {
                let cipher = self
                    .cipher
                    .as_ref()
                    .ok_or_else(|| anyhow!("encrypted credential but no secret configured"))?;
                Ok(cipher.decrypt(encrypted)?)
            }
        }
    }

    fn build(&self, config: &StorageConfig) -> Result<Arc<dyn BackendClient>> {
        let client: Arc<dyn BackendClient> = match &config.backend {
            Backend::S3 {
                url,
                region,
                bucket,
                path_style,
                ensure_bucket,
                auth,
            } => {
                let keys = match auth {
                    S3Authentication::Environment => None,
                    S3Authentication::Values {
                        access_key,
                        secret_key,
                    } => Some((access_key.clone(), self.reveal(secret_key)?)),
                };
                let settings = S3Settings {
                    url: url.clone(),
                    region: region.clone(),
                    bucket: bucket.clone(),
                    path_style: *path_style,
                    ensure_bucket: *ensure_bucket,
                    keys,
                };
                Arc::new(S3Backend::new(settings, self.http.clone())?)
            }
            Backend::WebDav {
                url,
                base_directory,
                username,
                password,
            } => {
                let credentials = match (username, password) {
                    (Some(u), Some(p)) => Some((u.clone(), self.reveal(p)?)),
                    (Some(u), None) => Some((u.clone(), String::new())),
                    _ => None,
                };
                Arc::new(WebDavBackend::new(
                    url,
                    base_directory.as_deref(),
                    credentials,
                    self.http.clone(),
                )?)
            }
            Backend::Mem => Arc::new(MemoryBackend::new()),
        };
        Ok(client)
    }
}
