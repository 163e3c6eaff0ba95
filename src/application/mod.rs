use super::{
    auth::Authenticator,
    backend::{encryption::CredentialCipher, factory::ClientFactory},
    cache::MemoryListingCache,
    configuration::Configuration,
    dav::DavHandler,
    repository::MemoryRepository,
};
use anyhow::{Context, Result};
use hyper::{
    service::{make_service_fn, service_fn},
    Server,
};
use std::{convert::Infallible, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tracing::{error, info, instrument};

pub struct Application {
    addr: SocketAddr,
    dav_server: DavHandler,
}

impl Application {
    pub fn build(config: Configuration) -> Result<Application> {
        let addr = SocketAddr::from_str(&format!("{}:{}", config.app.host, config.app.port))
            .context("can't parse host and port")?;

        let cipher = match &config.app.secret {
            Some(secret) => Some(
                CredentialCipher::from_secret(secret).context("can't load credential secret")?,
            ),
            None => None,
        };
        let repository = MemoryRepository::from_configuration(config.storages, config.mounts)
            .context("invalid storage or mount configuration")?;

        let dav_server = DavHandler::builder()
            .strip_prefix(&config.app.dav_prefix)
            .repository(Arc::new(repository))
            .client_factory(Arc::new(ClientFactory::new(cipher)))
            .listing_cache(Arc::new(MemoryListingCache::new(Duration::from_secs(
                config.cache.listing_ttl_secs,
            ))))
            .authenticator(Authenticator::new(config.users))
            .upload_config(config.upload)
            .build_handler();

        Ok(Application { addr, dav_server })
    }

    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn run(self) {
        let dav_server = self.dav_server;
        let make_svc = make_service_fn(move |_conn| {
            let dav_server = dav_server.clone();
            async move {
                let func = move |req| {
                    let dav_server = dav_server.clone();
                    async move { Ok::<_, Infallible>(dav_server.handle(req).await) }
                };
                Ok::<_, Infallible>(service_fn(func))
            }
        });

        let server = match Server::try_bind(&self.addr) {
            Ok(b) => b.serve(make_svc),
            Err(e) => {
                error!("can't bind: {}", e);
                return;
            }
        };
        info!("listening");
        let graceful = server.with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
            }
        });
        if let Err(e) = graceful.await {
            error!("error running server: {}", e);
        }
    }
}
