mod delete;
pub mod error;
mod get;
mod mkcol;
mod propfind;
mod put;
pub mod upload;
mod xml;

pub use error::DavError;

use crate::{
    aggregate::{Aggregate, ResolvedLocation},
    auth::Authenticator,
    backend::{
        factory::ClientFactory,
        listing::{self, DirectoryListing},
        storage_key::{compose_key, mount_root_key},
        BackendClient,
    },
    cache::{ListingCache, MemoryListingCache},
    init::Bootstrap,
    normalized_path::NormalizedPath,
    repository::{MemoryRepository, Mount, Repository, StorageConfig},
};
use hyper::{header, header::HeaderValue, Body, Method, Request, Response, StatusCode};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, instrument, warn};
use upload::UploadConfig;

/// Everything a handler knows about the request path.
pub(crate) struct RequestContext {
    pub path: NormalizedPath,
    pub aggregate: Aggregate,
}

/// A resolved location together with the storage it lives on.
pub(crate) struct Target {
    pub mount: Mount,
    pub config: StorageConfig,
    pub client: Arc<dyn BackendClient>,
    pub sub_path: String,
}

impl Target {
    pub fn file_key(&self) -> Result<String, DavError> {
        Ok(compose_key(
            self.config.root_folder(),
            &self.mount.mount_path,
            &self.sub_path,
            false,
        )?)
    }

    pub fn dir_key(&self) -> String {
        // directory keys always compose
        compose_key(
            self.config.root_folder(),
            &self.mount.mount_path,
            &self.sub_path,
            true,
        )
        .unwrap_or_default()
    }

    pub fn mount_root_key(&self) -> String {
        mount_root_key(self.config.root_folder(), &self.mount.mount_path)
    }

    pub fn is_mount_root(&self) -> bool {
        self.sub_path.trim_matches('/').is_empty()
    }
}

pub(crate) struct DavInner {
    prefix: String,
    repository: Arc<dyn Repository>,
    factory: Arc<ClientFactory>,
    cache: Arc<dyn ListingCache>,
    bootstrap: Bootstrap,
    authenticator: Authenticator,
    upload: UploadConfig,
}

/// The WebDAV engine. Cheap to clone, one instance serves every connection.
#[derive(Clone)]
pub struct DavHandler {
    inner: Arc<DavInner>,
}

#[derive(Default)]
pub struct DavBuilder {
    prefix: Option<String>,
    repository: Option<Arc<dyn Repository>>,
    factory: Option<Arc<ClientFactory>>,
    cache: Option<Arc<dyn ListingCache>>,
    authenticator: Option<Authenticator>,
    upload: Option<UploadConfig>,
}

impl DavBuilder {
    /// Path prefix the virtual filesystem is served under.
    pub fn strip_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_owned());
        self
    }

    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn client_factory(mut self, factory: Arc<ClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn listing_cache(mut self, cache: Arc<dyn ListingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn upload_config(mut self, config: UploadConfig) -> Self {
        self.upload = Some(config);
        self
    }

    pub fn build_handler(self) -> DavHandler {
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(MemoryRepository::new()));
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(ClientFactory::new(None)));
        let prefix = self.prefix.unwrap_or_default();
        DavHandler {
            inner: Arc::new(DavInner {
                prefix: prefix.trim_end_matches('/').to_owned(),
                bootstrap: Bootstrap::new(Arc::clone(&repository), Arc::clone(&factory)),
                repository,
                factory,
                cache: self
                    .cache
                    .unwrap_or_else(|| Arc::new(MemoryListingCache::new(Duration::from_secs(30)))),
                authenticator: self.authenticator.unwrap_or_default(),
                upload: self.upload.unwrap_or_default(),
            }),
        }
    }
}

impl DavHandler {
    pub fn builder() -> DavBuilder {
        DavBuilder::default()
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let mut resp = match self.inner.dispatch(req).await {
            Ok(resp) => resp,
            Err(e) => e.into_response(),
        };
        resp.headers_mut()
            .insert("DAV", HeaderValue::from_static("1"));
        if method == Method::HEAD {
            *resp.body_mut() = Body::empty();
        }
        resp
    }
}

impl DavInner {
    #[instrument(level = "debug", skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    async fn dispatch(&self, req: Request<Body>) -> Result<Response<Body>, DavError> {
        self.bootstrap.ensure_initialized().await?;

        let caller = self
            .authenticator
            .authenticate(req.headers())
            .ok_or(DavError::Unauthorized)?;

        let raw = strip_prefix(&self.prefix, req.uri().path()).ok_or(DavError::NotFound)?;
        let path = NormalizedPath::parse(raw)?;
        let mounts = self.repository.mounts_visible_to(&caller).await?;
        let ctx = RequestContext {
            path,
            aggregate: Aggregate::new(mounts),
        };
        debug!(path = %ctx.path, mounts = ctx.aggregate.mounts().len());

        let method = req.method().clone();
        match &method {
            &Method::GET | &Method::HEAD => self.handle_get(&ctx, req).await,
            &Method::PUT => self.handle_put(&ctx, req).await,
            &Method::DELETE => self.handle_delete(&ctx).await,
            &Method::OPTIONS => Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::ALLOW, error::ALLOW)
                .header("MS-Author-Via", "DAV")
                .header(header::CONTENT_LENGTH, 0)
                .body(Body::empty())?),
            m if m.as_str().eq_ignore_ascii_case("PROPFIND") => {
                self.handle_propfind(&ctx, req).await
            }
            m if m.as_str().eq_ignore_ascii_case("MKCOL") => self.handle_mkcol(&ctx, req).await,
            _ => Err(DavError::MethodNotAllowed),
        }
    }

    /// Looks up the storage behind a resolved mount.
    async fn target(&self, location: ResolvedLocation) -> Result<Target, DavError> {
        let mount = location.mount;
        let config = match self
            .repository
            .storage_config(&mount.storage_config_id)
            .await?
        {
            Some(c) => c,
            None => {
                error!(
                    mount = %mount.id,
                    storage = %mount.storage_config_id,
                    "mount references a missing storage configuration"
                );
                return Err(DavError::NotFound);
            }
        };
        let client = self.factory.client_for(&config)?;
        Ok(Target {
            mount,
            config,
            client,
            sub_path: location.sub_path,
        })
    }

    /// Resolves the request path to a mounted location. Virtual paths give
    /// `virtual_error`, paths outside every mount give 404.
    async fn resolve(&self, ctx: &RequestContext, virtual_error: DavError) -> Result<Target, DavError> {
        match ctx.aggregate.find_route(&ctx.path) {
            Some(location) => self.target(location).await,
            None if ctx.path.is_root() || !ctx.aggregate.find_routes_at_level(&ctx.path).is_empty() => {
                Err(virtual_error)
            }
            None => Err(DavError::NotFound),
        }
    }

    async fn directory_listing(&self, target: &Target, prefix: &str) -> Result<DirectoryListing, DavError> {
        if let Some(cached) = self.cache.get(&target.config.id, prefix) {
            debug!(prefix = %prefix, "listing served from cache");
            return Ok(cached);
        }
        let listing = listing::list_directory(target.client.as_ref(), prefix).await?;
        self.cache.put(&target.config.id, prefix, listing.clone());
        Ok(listing)
    }

    /// Bookkeeping after a successful write, failures are only logged.
    async fn after_write(&self, target: &Target, key: &str, is_directory: bool) {
        self.cache.invalidate(key, &target.config.id, is_directory);
        if let Err(e) = self.repository.touch_mount(&target.mount.id).await {
            warn!(mount = %target.mount.id, err = %e, "can't update mount usage");
        }
    }
}

fn strip_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_dav_prefix() {
        assert_eq!(strip_prefix("", "/a/b"), Some("/a/b"));
        assert_eq!(strip_prefix("/dav", "/dav/a"), Some("/a"));
        assert_eq!(strip_prefix("/dav", "/dav"), Some(""));
        assert_eq!(strip_prefix("/dav", "/davx/a"), None);
        assert_eq!(strip_prefix("/dav", "/other"), None);
    }
}
