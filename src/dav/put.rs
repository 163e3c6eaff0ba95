use super::{
    upload::{UploadTarget, Uploader},
    DavError, DavInner, RequestContext, Target,
};
use crate::backend::{
    listing::prefix_exists,
    storage_key::parent_prefix,
    DIRECTORY_CONTENT_TYPE,
};
use bytes::Bytes;
use hyper::{header, Body, HeaderMap, Request, Response, StatusCode};
use tracing::{debug, info, warn};

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Declared body size, `None` for chunked bodies.
fn declared_len(headers: &HeaderMap) -> Result<Option<u64>, DavError> {
    let chunked = header_str(headers, header::TRANSFER_ENCODING)
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    if chunked {
        return Ok(None);
    }
    match header_str(headers, header::CONTENT_LENGTH) {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DavError::BadRequest("invalid Content-Length".into())),
    }
}

fn content_type(headers: &HeaderMap, name: &str) -> String {
    header_str(headers, header::CONTENT_TYPE)
        .filter(|v| !v.trim().is_empty())
        .map(str::to_owned)
        .or_else(|| mime_guess::from_path(name).first_raw().map(str::to_owned))
        .unwrap_or_else(|| "application/octet-stream".to_owned())
}

impl DavInner {
    /// Creates the marker of the immediate parent when nothing lives there.
    /// Returns the marker key when one was written.
    async fn ensure_parent(&self, target: &Target, key: &str) -> Result<Option<String>, DavError> {
        let parent = parent_prefix(key);
        if parent.is_empty() || parent == target.mount_root_key() {
            return Ok(None);
        }
        let exists = prefix_exists(target.client.as_ref(), &parent)
            .await
            .map_err(|e| DavError::Conflict(format!("can't check parent: {}", e)))?;
        if exists {
            return Ok(None);
        }
        debug!(parent = %parent, "creating parent directory marker");
        target
            .client
            .put(&parent, Bytes::new(), DIRECTORY_CONTENT_TYPE)
            .await
            .map_err(|e| {
                warn!(parent = %parent, err = %e, "can't create parent directory");
                DavError::Conflict(format!("can't create parent directory: {}", e))
            })?;
        Ok(Some(parent))
    }

    pub(super) async fn handle_put(
        &self,
        ctx: &RequestContext,
        req: Request<Body>,
    ) -> Result<Response<Body>, DavError> {
        if ctx.path.is_collection() {
            return Err(DavError::MethodNotAllowed);
        }
        let target = self.resolve(ctx, DavError::MethodNotAllowed).await?;
        if target.is_mount_root() {
            return Err(DavError::MethodNotAllowed);
        }
        let key = target.file_key()?;

        let (parts, body) = req.into_parts();
        let content_type = content_type(&parts.headers, ctx.path.name());
        let upload = UploadTarget {
            key: &key,
            content_type: &content_type,
            declared_len: declared_len(&parts.headers)?,
            user_agent: header_str(&parts.headers, header::USER_AGENT),
        };
        let created_parent = self.ensure_parent(&target, &key).await?;

        let result = Uploader::new(target.client.as_ref(), self.factory.http(), &self.upload)
            .upload(&upload, body)
            .await;
        // the parent marker stays even when the body never arrives
        if let Some(parent) = &created_parent {
            self.after_write(&target, parent, true).await;
        }
        let strategy = result?;
        info!(key = %key, ?strategy, "object stored");

        self.after_write(&target, &key, false).await;

        Ok(Response::builder()
            .status(StatusCode::CREATED)
            .header(header::CONTENT_LENGTH, 0)
            .body(Body::empty())?)
    }
}
