mod bucket;
mod metadata;

pub use bucket::S3Settings;

use super::{
    http::{status_error, HttpClient},
    BackendClient, BackendError, BackendFuture, BackendResult, ByteRange, CompletedPart, ListPage,
    ListRequest, ObjectMeta, PresignedRequest, MIB,
};
use crate::repository::BackendKind;
use bytes::Bytes;
use futures_util::{stream, FutureExt, StreamExt, TryStreamExt};
use hyper::{header, Body, Request, StatusCode};
use s3::{serde_types::Part, Bucket};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const MAX_DELETE_BATCH: usize = 1000;
const DELETE_CONCURRENCY: usize = 16;
const READ_URL_EXPIRY_SECS: u32 = 300;

#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct S3Backend {
    settings: S3Settings,
    #[derivative(Debug = "ignore")]
    bucket: Bucket,
    #[derivative(Debug = "ignore")]
    http: HttpClient,
}

impl S3Backend {
    pub fn new(settings: S3Settings, http: HttpClient) -> BackendResult<Self> {
        let bucket = settings.bucket()?;
        Ok(S3Backend {
            settings,
            bucket,
            http,
        })
    }

    fn check(code: u16, key: &str) -> BackendResult<()> {
        match code {
            200..=299 => Ok(()),
            404 => Err(BackendError::NotFound(key.to_owned())),
            code => Err(BackendError::status(code, format!("request for {} failed", key))),
        }
    }
}

impl BackendClient for S3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    #[instrument(level = "debug", skip(self), fields(bucket = %self.settings.bucket))]
    fn list_page<'a>(&'a self, request: &'a ListRequest) -> BackendFuture<'a, ListPage> {
        async move {
            let (result, code) = self
                .bucket
                .list_page(
                    request.prefix.clone(),
                    request.delimiter.clone(),
                    request.continuation.clone(),
                    None,
                    request.max_keys,
                )
                .await?;
            S3Backend::check(code, &request.prefix)?;
            Ok(metadata::from_listing(result))
        }
        .boxed()
    }

    #[instrument(level = "debug", skip(self), fields(bucket = %self.settings.bucket))]
    fn head<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<ObjectMeta>> {
        async move {
            let (head, code) = self.bucket.head_object(key).await?;
            debug!(code);
            match code {
                404 => Ok(None),
                code => {
                    S3Backend::check(code, key)?;
                    Ok(Some(metadata::from_head(key, head)))
                }
            }
        }
        .boxed()
    }

    /// Streams through a short-lived presigned URL so the body never has to
    /// be buffered.
    #[instrument(level = "debug", skip(self), fields(bucket = %self.settings.bucket))]
    fn get<'a>(&'a self, key: &'a str, range: Option<ByteRange>) -> BackendFuture<'a, Body> {
        async move {
            let url = self.bucket.presign_get(key, READ_URL_EXPIRY_SECS, None)?;
            let mut req = Request::get(url);
            if let Some(r) = range {
                req = req.header(header::RANGE, r.header_value());
            }
            let req = req
                .body(Body::empty())
                .map_err(|e| BackendError::Body(e.to_string()))?;
            let resp = self.http.send(req).await?;
            match resp.status() {
                StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(resp.into_body()),
                StatusCode::NOT_FOUND => Err(BackendError::NotFound(key.to_owned())),
                StatusCode::RANGE_NOT_SATISFIABLE => Err(BackendError::InvalidRange),
                _ => Err(status_error(resp).await),
            }
        }
        .boxed()
    }

    #[instrument(level = "debug", skip(self, body), fields(bucket = %self.settings.bucket, len = body.len()))]
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Bytes,
        content_type: &'a str,
    ) -> BackendFuture<'a, ()> {
        async move {
            let resp = self
                .bucket
                .put_object_with_content_type(key, &body, content_type)
                .await?;
            S3Backend::check(resp.status_code(), key)
        }
        .boxed()
    }

    fn presign_put<'a>(
        &'a self,
        key: &'a str,
        expires: Duration,
    ) -> BackendFuture<'a, PresignedRequest> {
        async move {
            let url = self
                .bucket
                .presign_put(key, expires.as_secs() as u32, None)?;
            Ok(PresignedRequest {
                url,
                headers: vec![],
            })
        }
        .boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()> {
        async move {
            let resp = self.bucket.delete_object(key).await?;
            match resp.status_code() {
                404 => Ok(()),
                code => S3Backend::check(code, key),
            }
        }
        .boxed()
    }

    /// rust-s3 has no DeleteObjects call, so a batch is a bounded set of
    /// concurrent single deletes.
    #[instrument(level = "debug", skip(self, keys), fields(bucket = %self.settings.bucket, count = keys.len()))]
    fn delete_batch<'a>(&'a self, keys: &'a [String]) -> BackendFuture<'a, ()> {
        async move {
            if keys.len() > MAX_DELETE_BATCH {
                return Err(BackendError::status(400, "delete batch too large"));
            }
            let deletes: Vec<_> = keys.iter().map(|k| self.delete(k.as_str())).collect();
            stream::iter(deletes)
                .buffer_unordered(DELETE_CONCURRENCY)
                .try_collect::<Vec<_>>()
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn max_delete_batch(&self) -> usize {
        MAX_DELETE_BATCH
    }

    fn recommended_part_size(&self) -> usize {
        8 * MIB
    }

    fn create_multipart<'a>(
        &'a self,
        key: &'a str,
        content_type: &'a str,
    ) -> BackendFuture<'a, String> {
        async move {
            let resp = self
                .bucket
                .initiate_multipart_upload(key, content_type)
                .await?;
            debug!(upload_id = %resp.upload_id, key = %key, "multipart upload created");
            Ok(resp.upload_id)
        }
        .boxed()
    }

    fn upload_part<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Bytes,
    ) -> BackendFuture<'a, CompletedPart> {
        async move {
            let part = self
                .bucket
                .put_multipart_chunk(
                    body.to_vec(),
                    key,
                    part_number,
                    upload_id,
                    "application/octet-stream",
                )
                .await?;
            Ok(CompletedPart {
                part_number: part.part_number,
                etag: part.etag,
            })
        }
        .boxed()
    }

    fn complete_multipart<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        parts: Vec<CompletedPart>,
    ) -> BackendFuture<'a, ()> {
        async move {
            let parts = parts
                .into_iter()
                .map(|p| Part {
                    part_number: p.part_number,
                    etag: p.etag,
                })
                .collect();
            let resp = self
                .bucket
                .complete_multipart_upload(key, upload_id, parts)
                .await?;
            S3Backend::check(resp.status_code(), key)
        }
        .boxed()
    }

    fn abort_multipart<'a>(&'a self, key: &'a str, upload_id: &'a str) -> BackendFuture<'a, ()> {
        async move {
            self.bucket.abort_upload(key, upload_id).await?;
            Ok(())
        }
        .boxed()
    }

    fn prepare(&self) -> BackendFuture<'_, ()> {
        async move {
            if self.settings.ensure_bucket {
                bucket::ensure_bucket(&self.settings).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn probe(&self) -> BackendFuture<'_, ()> {
        async move {
            let request = ListRequest {
                max_keys: Some(1),
                ..ListRequest::new("", None)
            };
            if let Err(e) = self.list_page(&request).await {
                warn!(bucket = %self.settings.bucket, err = %e, "bucket is not reachable");
                return Err(e);
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            url: Some("http://localhost:9000".into()),
            region: "us-east-1".into(),
            bucket: "files".into(),
            path_style: true,
            ensure_bucket: false,
            keys: Some(("minioadmin".into(), "minioadmin".into())),
        }
    }

    #[test]
    fn presigns_uploads_without_network() {
        let backend = S3Backend::new(settings(), HttpClient::new()).unwrap();
        let url = backend
            .bucket
            .presign_put("a/b.txt", 60, None)
            .unwrap();
        assert!(url.starts_with("http://localhost:9000"));
        assert!(url.contains("b.txt"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn debug_hides_keys() {
        let text = format!("{:?}", settings());
        assert!(!text.contains("minioadmin"));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn delete_batch_is_bounded() {
        let backend = S3Backend::new(settings(), HttpClient::new()).unwrap();
        let empty: Vec<String> = vec![];
        let fut = backend.delete_batch(&empty);
        assert_send(&fut);
        fut.await.unwrap();

        let keys: Vec<String> = (0..=MAX_DELETE_BATCH).map(|i| format!("k/{}", i)).collect();
        let err = backend.delete_batch(&keys).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { code: 400, .. }));
    }
}
