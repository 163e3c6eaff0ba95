use super::{DavError, DavInner, RequestContext, Target};
use crate::backend::listing::{list_recursive, prefix_exists};
use hyper::{Body, Response, StatusCode};
use tracing::{debug, info};

impl DavInner {
    /// Removes every key under `prefix`, the marker included.
    async fn delete_directory(&self, target: &Target, prefix: &str) -> Result<usize, DavError> {
        let client = target.client.as_ref();
        let mut keys = list_recursive(client, prefix).await?;
        if !keys.iter().any(|k| k == prefix) {
            keys.push(prefix.to_owned());
        }
        // children before their markers
        keys.sort_unstable_by(|a, b| b.cmp(a));
        keys.dedup();

        let batch = client.max_delete_batch().max(1);
        for chunk in keys.chunks(batch) {
            debug!(count = chunk.len(), "deleting batch");
            client.delete_batch(chunk).await?;
        }
        Ok(keys.len())
    }

    pub(super) async fn handle_delete(&self, ctx: &RequestContext) -> Result<Response<Body>, DavError> {
        let target = self.resolve(ctx, DavError::MethodNotAllowed).await?;
        if target.is_mount_root() {
            return Err(DavError::MethodNotAllowed);
        }

        let client = target.client.as_ref();
        if ctx.path.is_collection() {
            let dir_key = target.dir_key();
            if !prefix_exists(client, &dir_key).await? {
                return Err(DavError::NotFound);
            }
            let removed = self.delete_directory(&target, &dir_key).await?;
            info!(prefix = %dir_key, removed, "directory deleted");
            self.after_write(&target, &dir_key, true).await;
        } else {
            let key = target.file_key()?;
            if client.head(&key).await?.is_none() {
                return Err(DavError::NotFound);
            }
            client.delete(&key).await?;
            info!(key = %key, "object deleted");
            self.after_write(&target, &key, false).await;
        }

        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())?)
    }
}
