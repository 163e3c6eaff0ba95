use super::{DavError, DavInner, RequestContext};
use crate::backend::{
    listing::prefix_exists, storage_key::parent_prefix, BackendError, DIRECTORY_CONTENT_TYPE,
};
use bytes::Bytes;
use hyper::{body::HttpBody, header, Body, Request, Response, StatusCode};
use tracing::{debug, info};

fn created() -> Result<Response<Body>, DavError> {
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())?)
}

/// MKCOL with a request body asks for something we don't support.
async fn reject_body(req: &mut Request<Body>) -> Result<(), DavError> {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if declared > 0 {
        return Err(DavError::UnsupportedMediaType);
    }
    while let Some(chunk) = req.body_mut().data().await {
        let chunk = chunk.map_err(|e| BackendError::Body(e.to_string()))?;
        if !chunk.is_empty() {
            return Err(DavError::UnsupportedMediaType);
        }
    }
    Ok(())
}

impl DavInner {
    pub(super) async fn handle_mkcol(
        &self,
        ctx: &RequestContext,
        mut req: Request<Body>,
    ) -> Result<Response<Body>, DavError> {
        reject_body(&mut req).await?;

        let target = self.resolve(ctx, DavError::MethodNotAllowed).await?;
        let client = target.client.as_ref();
        if target.is_mount_root() {
            client.probe().await?;
            debug!(mount = %target.mount.id, "mount root reachable");
            return created();
        }

        let dir_key = target.dir_key();
        if prefix_exists(client, &dir_key).await? {
            debug!(prefix = %dir_key, "collection already exists");
            return created();
        }

        let parent = parent_prefix(&dir_key);
        if !parent.is_empty() && parent != target.mount_root_key() {
            let exists = prefix_exists(client, &parent)
                .await
                .map_err(|e| DavError::Conflict(format!("can't check parent: {}", e)))?;
            if !exists {
                client
                    .put(&parent, Bytes::new(), DIRECTORY_CONTENT_TYPE)
                    .await
                    .map_err(|e| DavError::Conflict(format!("can't create parent: {}", e)))?;
                self.after_write(&target, &parent, true).await;
            }
        }

        client
            .put(&dir_key, Bytes::new(), DIRECTORY_CONTENT_TYPE)
            .await?;
        info!(prefix = %dir_key, "collection created");
        self.after_write(&target, &dir_key, true).await;
        created()
    }
}
