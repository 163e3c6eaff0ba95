use crate::{backend::factory::ClientFactory, repository::Repository};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

/// Lazily prepares every configured backend exactly once.
///
/// Concurrent callers wait for the same attempt. A failed attempt is not
/// remembered, so the next request tries again.
pub struct Bootstrap {
    repository: Arc<dyn Repository>,
    factory: Arc<ClientFactory>,
    done: OnceCell<()>,
}

impl Bootstrap {
    pub fn new(repository: Arc<dyn Repository>, factory: Arc<ClientFactory>) -> Self {
        Bootstrap {
            repository,
            factory,
            done: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.done.initialized()
    }

    pub async fn ensure_initialized(&self) -> Result<()> {
        self.done.get_or_try_init(|| self.initialize()).await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn initialize(&self) -> Result<()> {
        let storages = self.repository.storage_configs().await?;
        for storage in &storages {
            let client = self.factory.client_for(storage)?;
            client
                .prepare()
                .await
                .with_context(|| format!("can't prepare storage {}", storage.id))?;
        }
        info!(storages = storages.len(), "backends prepared");
        Ok(())
    }
}
