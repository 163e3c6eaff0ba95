use super::{
    BackendClient, BackendError, BackendFuture, ByteRange, CompletedPart,
    ListPage, ListRequest, ObjectMeta, PresignedRequest, MIB,
};
use crate::repository::BackendKind;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use hyper::Body;
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, HashMap},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
    etag: String,
}

impl StoredObject {
    fn new(data: Bytes, content_type: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        StoredObject {
            etag: format!("\"{:016x}\"", hasher.finish()),
            data,
            content_type: content_type.to_owned(),
            last_modified: Utc::now(),
        }
    }

    fn meta(&self, key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_owned(),
            size: self.data.len() as u64,
            last_modified: Some(self.last_modified),
            content_type: Some(self.content_type.clone()),
            etag: Some(self.etag.clone()),
        }
    }
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    content_type: String,
    parts: Vec<(u32, Bytes)>,
}

/// Counters describing what happened to a [`MemoryBackend`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStats {
    pub puts: usize,
    pub part_attempts: usize,
    pub created_uploads: Vec<String>,
    pub completed_uploads: Vec<String>,
    pub aborted_uploads: Vec<String>,
    pub delete_batches: usize,
}

/// Object store kept in process memory.
#[derive(Debug)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    stats: Mutex<MemoryStats>,
    failing_part: Mutex<Option<u32>>,
    next_upload: AtomicU64,
    part_size: usize,
    page_size: usize,
    max_delete_batch: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            stats: Mutex::new(MemoryStats::default()),
            failing_part: Mutex::new(None),
            next_upload: AtomicU64::new(1),
            part_size: 8 * MIB,
            page_size: 1000,
            max_delete_batch: 1000,
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_delete_batch(mut self, max: usize) -> Self {
        self.max_delete_batch = max.max(1);
        self
    }

    /// Every upload of `part_number` fails until cleared.
    pub fn fail_part(&self, part_number: Option<u32>) {
        *lock(&self.failing_part) = part_number;
    }

    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        let object = StoredObject::new(data.into(), "application/octet-stream");
        lock(&self.objects).insert(key.to_owned(), object);
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).map(|o| o.data.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        lock(&self.objects).get(key).map(|o| o.content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    pub fn open_uploads(&self) -> usize {
        lock(&self.uploads).len()
    }

    pub fn stats(&self) -> MemoryStats {
        lock(&self.stats).clone()
    }

    fn list_sync(&self, request: &ListRequest) -> ListPage {
        let objects = lock(&self.objects);
        let max = request
            .max_keys
            .unwrap_or(self.page_size)
            .min(self.page_size)
            .max(1);
        let prefix = request.prefix.as_str();
        let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
        // "p:" tokens resume after a rolled up prefix, "k:" after a plain key
        let resume = request.continuation.as_deref().map(|c| c.split_at(2.min(c.len())));

        let mut page = ListPage::default();
        let mut last: Option<(String, bool)> = None;

        for (key, object) in objects.range(prefix.to_owned()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match resume {
                Some(("p:", after)) if key.as_str() <= after || key.starts_with(after) => continue,
                Some((_, after)) if key.as_str() <= after => continue,
                _ => {}
            }

            let rest = &key[prefix.len()..];
            let (entry, rolled_up) = match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
                Some(end) => (format!("{}{}", prefix, &rest[..end]), true),
                None => (key.clone(), false),
            };
            if let Some((previous, true)) = &last {
                if rolled_up && *previous == entry {
                    continue;
                }
            }
            if page.common_prefixes.len() + page.objects.len() == max {
                page.next_continuation = last.map(|(entry, rolled_up)| {
                    format!("{}{}", if rolled_up { "p:" } else { "k:" }, entry)
                });
                break;
            }
            if rolled_up {
                page.common_prefixes.push(entry.clone());
            } else {
                page.objects.push(object.meta(key));
            }
            last = Some((entry, rolled_up));
        }
        page
    }
}

impl BackendClient for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    #[instrument(level = "debug", skip(self))]
    fn list_page<'a>(&'a self, request: &'a ListRequest) -> BackendFuture<'a, ListPage> {
        async move { Ok(self.list_sync(request)) }.boxed()
    }

    fn head<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<ObjectMeta>> {
        async move { Ok(lock(&self.objects).get(key).map(|o| o.meta(key))) }.boxed()
    }

    fn get<'a>(&'a self, key: &'a str, range: Option<ByteRange>) -> BackendFuture<'a, Body> {
        async move {
            let data = self
                .object(key)
                .ok_or_else(|| BackendError::NotFound(key.to_owned()))?;
            let data = match range {
                None => data,
                Some(r) => {
                    let len = data.len() as u64;
                    if r.start >= len || r.start > r.end {
                        return Err(BackendError::InvalidRange);
                    }
                    let end = r.end.min(len - 1);
                    data.slice(r.start as usize..=end as usize)
                }
            };
            Ok(Body::from(data))
        }
        .boxed()
    }

    #[instrument(level = "debug", skip(self, body), fields(len = body.len()))]
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Bytes,
        content_type: &'a str,
    ) -> BackendFuture<'a, ()> {
        async move {
            lock(&self.objects).insert(key.to_owned(), StoredObject::new(body, content_type));
            lock(&self.stats).puts += 1;
            Ok(())
        }
        .boxed()
    }

    fn presign_put<'a>(
        &'a self,
        _key: &'a str,
        _expires: Duration,
    ) -> BackendFuture<'a, PresignedRequest> {
        async move { Err(BackendError::Unsupported("presigned uploads")) }.boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()> {
        async move {
            lock(&self.objects).remove(key);
            Ok(())
        }
        .boxed()
    }

    #[instrument(level = "debug", skip(self, keys), fields(count = keys.len()))]
    fn delete_batch<'a>(&'a self, keys: &'a [String]) -> BackendFuture<'a, ()> {
        async move {
            if keys.len() > self.max_delete_batch {
                return Err(BackendError::status(
                    400,
                    format!("too many keys in one delete: {}", keys.len()),
                ));
            }
            let mut objects = lock(&self.objects);
            for k in keys {
                objects.remove(k);
            }
            lock(&self.stats).delete_batches += 1;
            Ok(())
        }
        .boxed()
    }

    fn max_delete_batch(&self) -> usize {
        self.max_delete_batch
    }

    fn recommended_part_size(&self) -> usize {
        self.part_size
    }

    fn create_multipart<'a>(
        &'a self,
        key: &'a str,
        content_type: &'a str,
    ) -> BackendFuture<'a, String> {
        async move {
            let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
            lock(&self.uploads).insert(
                upload_id.clone(),
                PendingUpload {
                    key: key.to_owned(),
                    content_type: content_type.to_owned(),
                    parts: vec![],
                },
            );
            lock(&self.stats).created_uploads.push(upload_id.clone());
            debug!(upload_id = %upload_id, key = %key, "multipart upload created");
            Ok(upload_id)
        }
        .boxed()
    }

    fn upload_part<'a>(
        &'a self,
        _key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Bytes,
    ) -> BackendFuture<'a, CompletedPart> {
        async move {
            lock(&self.stats).part_attempts += 1;
            if *lock(&self.failing_part) == Some(part_number) {
                return Err(BackendError::status(500, "injected part failure"));
            }
            let mut uploads = lock(&self.uploads);
            let upload = uploads
                .get_mut(upload_id)
                .ok_or_else(|| BackendError::NotFound(upload_id.to_owned()))?;
            upload.parts.retain(|(n, _)| *n != part_number);
            upload.parts.push((part_number, body));
            Ok(CompletedPart {
                part_number,
                etag: format!("\"part-{}\"", part_number),
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
            let upload = lock(&self.uploads)
                .remove(upload_id)
                .ok_or_else(|| BackendError::NotFound(upload_id.to_owned()))?;
            if upload.key != key {
                return Err(BackendError::status(400, "upload key mismatch"));
            }

            let mut data = BytesMut::new();
            let mut previous = 0;
            for part in &parts {
                if part.part_number <= previous {
                    return Err(BackendError::status(400, "parts out of order"));
                }
                previous = part.part_number;
                let (_, body) = upload
                    .parts
                    .iter()
                    .find(|(n, _)| *n == part.part_number)
                    .ok_or_else(|| BackendError::status(400, "unknown part"))?;
                data.extend_from_slice(body);
            }

            lock(&self.objects).insert(
                key.to_owned(),
                StoredObject::new(data.freeze(), &upload.content_type),
            );
            lock(&self.stats)
                .completed_uploads
                .push(upload_id.to_owned());
            Ok(())
        }
        .boxed()
    }

    fn abort_multipart<'a>(&'a self, _key: &'a str, upload_id: &'a str) -> BackendFuture<'a, ()> {
        async move {
            lock(&self.uploads)
                .remove(upload_id)
                .ok_or_else(|| BackendError::NotFound(upload_id.to_owned()))?;
            lock(&self.stats).aborted_uploads.push(upload_id.to_owned());
            Ok(())
        }
        .boxed()
    }

    fn prepare(&self) -> BackendFuture<'_, ()> {
        async move { Ok(()) }.boxed()
    }

    fn probe(&self) -> BackendFuture<'_, ()> {
        async move { Ok(()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        let b = MemoryBackend::new().with_page_size(2);
        for k in &["d/", "d/a.txt", "d/b.txt", "d/sub/", "d/sub/c.txt", "d/z/x/y", "e.txt"] {
            b.insert(k, Bytes::new());
        }
        b
    }

    #[tokio::test]
    async fn lists_with_delimiter_across_pages() {
        let b = backend();
        let mut request = ListRequest::new("d/", Some("/"));
        let mut objects = vec![];
        let mut prefixes = vec![];
        loop {
            let page = b.list_page(&request).await.unwrap();
            objects.extend(page.objects.into_iter().map(|o| o.key));
            prefixes.extend(page.common_prefixes);
            match page.next_continuation {
                Some(c) => request.continuation = Some(c),
                None => break,
            }
        }
        assert_eq!(objects, vec!["d/", "d/a.txt", "d/b.txt"]);
        assert_eq!(prefixes, vec!["d/sub/", "d/z/"]);
    }

    #[tokio::test]
    async fn lists_recursively_without_delimiter() {
        let b = backend();
        let request = ListRequest {
            max_keys: Some(10),
            ..ListRequest::new("d/", None)
        };
        let page = MemoryBackend::new().list_page(&request).await.unwrap();
        assert!(page.objects.is_empty());

        let page = b.list_page(&request).await.unwrap();
        assert_eq!(page.objects.len(), 2);
        assert!(page.next_continuation.is_some());
    }

    #[tokio::test]
    async fn serves_ranges() {
        let b = MemoryBackend::new();
        b.insert("k", Bytes::from_static(b"0123456789"));
        let body = b
            .get("k", Some(ByteRange { start: 2, end: 4 }))
            .await
            .unwrap();
        assert_eq!(hyper::body::to_bytes(body).await.unwrap(), "234");
        assert!(matches!(
            b.get("k", Some(ByteRange { start: 10, end: 12 })).await,
            Err(BackendError::InvalidRange)
        ));
    }
}
