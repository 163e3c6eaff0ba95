mod multistatus;

use super::{
    http::{status_error, HttpClient},
    BackendClient, BackendError, BackendFuture, BackendResult, ByteRange, CompletedPart, ListPage,
    ListRequest, ObjectMeta, PresignedRequest, MIB,
};
use crate::{normalized_path::ENC, repository::BackendKind};
use bytes::Bytes;
use futures_util::{FutureExt, Stream, StreamExt};
use hyper::{body::HttpBody, header, Body, Method, Request, Response, StatusCode, Uri};
use multistatus::DavResource;
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};
use tempfile::TempDir;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?><d:propfind xmlns:d="DAV:"><d:allprop/></d:propfind>"#;
const MAX_DELETE_BATCH: usize = 100;

/// Parts of a multipart upload spooled to disk until completion.
#[derive(Debug)]
struct Spool {
    key: String,
    content_type: String,
    dir: TempDir,
    parts: BTreeMap<u32, (PathBuf, u64)>,
}

/// Object store view over a remote WebDAV server.
///
/// Keys map to paths below `base_path`; directory keys map to collections.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct WebDavBackend {
    /// `scheme://authority` of the server.
    origin: String,
    /// Decoded path of the base collection, always ends with `/`.
    base_path: String,
    #[derivative(Debug = "ignore")]
    authorization: Option<String>,
    #[derivative(Debug = "ignore")]
    http: HttpClient,
    spools: Mutex<HashMap<String, Spool>>,
}

impl WebDavBackend {
    pub fn new(
        url: &str,
        base_directory: Option<&str>,
        credentials: Option<(String, String)>,
        http: HttpClient,
    ) -> BackendResult<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| BackendError::Config(format!("invalid webdav url {}: {}", url, e)))?;
        let (scheme, authority) = match (uri.scheme_str(), uri.authority()) {
            (Some(s), Some(a)) => (s.to_owned(), a.to_string()),
            _ => return Err(BackendError::Config(format!("webdav url {} is not absolute", url))),
        };

        let mut base_path = percent_decode_str(uri.path())
            .decode_utf8_lossy()
            .trim_end_matches('/')
            .to_owned();
        if let Some(dir) = base_directory.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty()) {
            base_path.push('/');
            base_path.push_str(dir);
        }
        base_path.push('/');

        let authorization = credentials.map(|(user, password)| {
            format!("Basic {}", base64::encode(format!("{}:{}", user, password)))
        });

        Ok(WebDavBackend {
            origin: format!("{}://{}", scheme, authority),
            base_path,
            authorization,
            http,
            spools: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, key: &str) -> String {
        let path = format!("{}{}", self.base_path, key);
        format!("{}{}", self.origin, utf8_percent_encode(&path, ENC))
    }

    /// Maps an href from a multistatus response back to a key.
    fn key_for(&self, resource: &DavResource) -> Option<String> {
        let href = resource.href.as_str();
        let path = match href.find("://") {
            Some(i) => href[i + 3..].find('/').map_or("/", |j| &href[i + 3 + j..]),
            None => href,
        };
        let decoded = percent_decode_str(path).decode_utf8_lossy();
        let base = self.base_path.trim_end_matches('/');
        let rest = decoded.strip_prefix(base)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        let mut key = rest.trim_matches('/').to_owned();
        if resource.is_collection && !key.is_empty() {
            key.push('/');
        }
        Some(key)
    }

    fn request(&self, method: Method, key: &str) -> hyper::http::request::Builder {
        let mut req = Request::builder().method(method).uri(self.url(key));
        if let Some(auth) = &self.authorization {
            req = req.header(header::AUTHORIZATION, auth.as_str());
        }
        req
    }

    async fn send(&self, req: hyper::http::request::Builder, body: Body) -> BackendResult<Response<Body>> {
        let req = req
            .body(body)
            .map_err(|e| BackendError::Body(e.to_string()))?;
        self.http.send(req).await
    }

    /// PROPFIND `key`, `None` when the server reports 404.
    async fn propfind(&self, key: &str, depth: &str) -> BackendResult<Option<Vec<DavResource>>> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| BackendError::Body(e.to_string()))?;
        let req = self
            .request(method, key)
            .header("Depth", depth)
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8");
        let resp = self.send(req, Body::from(PROPFIND_BODY)).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            s if s.is_success() => {}
            _ => return Err(status_error(resp).await),
        }
        let body = hyper::body::to_bytes(resp.into_body()).await?;
        let text = String::from_utf8_lossy(&body);
        Ok(Some(multistatus::parse(&text)?))
    }

    fn meta(&self, key: String, resource: &DavResource) -> ObjectMeta {
        ObjectMeta {
            key,
            size: resource.content_length.unwrap_or(0),
            last_modified: resource.last_modified,
            content_type: resource.content_type.clone(),
            etag: resource.etag.clone(),
        }
    }

    async fn list_level(&self, dir: &str, page: &mut ListPage, rolled_up: bool) -> BackendResult<Vec<String>> {
        let mut children = vec![];
        let resources = match self.propfind(dir, "1").await? {
            Some(r) => r,
            None => return Ok(children),
        };
        for r in &resources {
            let key = match self.key_for(r) {
                Some(k) => k,
                None => continue,
            };
            if key == dir {
                if !dir.is_empty() {
                    page.objects.push(ObjectMeta::new(&key, 0));
                }
                continue;
            }
            if r.is_collection {
                if rolled_up {
                    page.common_prefixes.push(key.clone());
                }
                children.push(key);
            } else {
                page.objects.push(self.meta(key, r));
            }
        }
        Ok(children)
    }

    async fn mkcol(&self, key: &str) -> BackendResult<()> {
        let method = Method::from_bytes(b"MKCOL").map_err(|e| BackendError::Body(e.to_string()))?;
        let resp = self.send(self.request(method, key), Body::empty()).await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            // already exists
            StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            StatusCode::CONFLICT => Err(BackendError::NotFound(key.to_owned())),
            _ => Err(status_error(resp).await),
        }
    }

    fn spool_dir(&self, upload_id: &str) -> BackendResult<PathBuf> {
        let spools = self.spools.lock().unwrap_or_else(|e| e.into_inner());
        spools
            .get(upload_id)
            .map(|s| s.dir.path().to_owned())
            .ok_or_else(|| BackendError::NotFound(upload_id.to_owned()))
    }
}

fn spooled_body(dir: TempDir, parts: Vec<PathBuf>) -> impl Stream<Item = std::io::Result<Bytes>> {
    async_stream::try_stream! {
        for path in parts {
            let file = tokio::fs::File::open(&path).await?;
            let mut reader = ReaderStream::new(file);
            while let Some(chunk) = reader.next().await {
                yield chunk?;
            }
        }
        drop(dir);
    }
}

/// Cuts `range` out of a full-object body, for servers that answer a ranged
/// GET with 200.
fn slice_body(mut body: Body, range: ByteRange) -> impl Stream<Item = Result<Bytes, hyper::Error>> {
    async_stream::try_stream! {
        let mut offset = 0u64;
        while let Some(chunk) = body.data().await {
            let chunk = chunk?;
            let from = offset;
            let to = offset + chunk.len() as u64;
            offset = to;
            if to <= range.start {
                continue;
            }
            let lo = range.start.saturating_sub(from) as usize;
            let hi = ((range.end + 1).min(to) - from) as usize;
            yield chunk.slice(lo..hi);
            if to > range.end {
                break;
            }
        }
    }
}

impl BackendClient for WebDavBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WebDav
    }

    #[instrument(level = "debug", skip(self))]
    fn list_page<'a>(&'a self, request: &'a ListRequest) -> BackendFuture<'a, ListPage> {
        async move {
            let mut page = ListPage::default();
            let dir = super::storage_key::parent_prefix(&format!("{}x", request.prefix));

            if request.delimiter.is_some() {
                self.list_level(&dir, &mut page, true).await?;
            } else {
                let mut queue = VecDeque::from(vec![dir]);
                while let Some(next) = queue.pop_front() {
                    let children = self.list_level(&next, &mut page, false).await?;
                    queue.extend(children);
                    // bounded requests stop walking once enough keys are known
                    if let Some(max) = request.max_keys {
                        let found = page
                            .objects
                            .iter()
                            .filter(|o| o.key.starts_with(&request.prefix))
                            .count();
                        if found >= max {
                            break;
                        }
                    }
                }
            }

            page.objects.retain(|o| o.key.starts_with(&request.prefix));
            page.common_prefixes.retain(|p| p.starts_with(&request.prefix));
            page.objects.sort_by(|a, b| a.key.cmp(&b.key));
            if let Some(max) = request.max_keys {
                page.objects.truncate(max);
                page.common_prefixes.truncate(max);
            }
            debug!(objects = page.objects.len(), prefixes = page.common_prefixes.len());
            Ok(page)
        }
        .boxed()
    }

    fn head<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<ObjectMeta>> {
        async move {
            let resources = match self.propfind(key, "0").await? {
                Some(r) => r,
                None => return Ok(None),
            };
            let r = match resources.first() {
                Some(r) => r,
                None => return Ok(None),
            };
            // a file key never names a collection
            if r.is_collection && !key.ends_with('/') {
                return Ok(None);
            }
            let mut meta = self.meta(key.to_owned(), r);
            if r.is_collection {
                meta.size = 0;
            }
            Ok(Some(meta))
        }
        .boxed()
    }

    #[instrument(level = "debug", skip(self))]
    fn get<'a>(&'a self, key: &'a str, range: Option<ByteRange>) -> BackendFuture<'a, Body> {
        async move {
            let mut req = self.request(Method::GET, key);
            if let Some(r) = range {
                req = req.header(header::RANGE, r.header_value());
            }
            let resp = self.send(req, Body::empty()).await?;
            match (resp.status(), range) {
                (StatusCode::OK, Some(r)) => {
                    debug!("server ignored Range, slicing the full body");
                    Ok(Body::wrap_stream(slice_body(resp.into_body(), r)))
                }
                (StatusCode::OK, None) | (StatusCode::PARTIAL_CONTENT, _) => Ok(resp.into_body()),
                (StatusCode::NOT_FOUND, _) => Err(BackendError::NotFound(key.to_owned())),
                (StatusCode::RANGE_NOT_SATISFIABLE, _) => Err(BackendError::InvalidRange),
                _ => Err(status_error(resp).await),
            }
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
            if key.ends_with('/') {
                return self.mkcol(key).await;
            }
            let req = self
                .request(Method::PUT, key)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, body.len());
            let resp = self.send(req, Body::from(body)).await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(status_error(resp).await)
            }
        }
        .boxed()
    }

    /// The server has no presigning, the URL is handed out together with the
    /// credentials the gateway would have used itself.
    fn presign_put<'a>(
        &'a self,
        key: &'a str,
        _expires: Duration,
    ) -> BackendFuture<'a, PresignedRequest> {
        async move {
            let headers = self
                .authorization
                .iter()
                .map(|a| (header::AUTHORIZATION.as_str().to_owned(), a.clone()))
                .collect();
            Ok(PresignedRequest {
                url: self.url(key),
                headers,
            })
        }
        .boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()> {
        async move {
            let resp = self.send(self.request(Method::DELETE, key), Body::empty()).await?;
            match resp.status() {
                StatusCode::NOT_FOUND => Ok(()),
                s if s.is_success() => Ok(()),
                _ => Err(status_error(resp).await),
            }
        }
        .boxed()
    }

    fn delete_batch<'a>(&'a self, keys: &'a [String]) -> BackendFuture<'a, ()> {
        async move {
            if keys.len() > MAX_DELETE_BATCH {
                return Err(BackendError::status(400, "delete batch too large"));
            }
            for key in keys {
                self.delete(key).await?;
            }
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
            let dir = tempfile::Builder::new().prefix("webdav-gw-").tempdir()?;
            let upload_id = format!("{:016x}", rand::random::<u64>());
            self.spools
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(
                    upload_id.clone(),
                    Spool {
                        key: key.to_owned(),
                        content_type: content_type.to_owned(),
                        dir,
                        parts: BTreeMap::new(),
                    },
                );
            debug!(upload_id = %upload_id, key = %key, "spooling multipart upload");
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
            let path = self.spool_dir(upload_id)?.join(format!("part-{:05}", part_number));
            tokio::fs::write(&path, &body).await?;
            let mut spools = self.spools.lock().unwrap_or_else(|e| e.into_inner());
            let spool = spools
                .get_mut(upload_id)
                .ok_or_else(|| BackendError::NotFound(upload_id.to_owned()))?;
            spool.parts.insert(part_number, (path, body.len() as u64));
            Ok(CompletedPart {
                part_number,
                etag: format!("\"{}-{}\"", upload_id, part_number),
            })
        }
        .boxed()
    }

    #[instrument(level = "debug", skip(self, parts), fields(parts = parts.len()))]
    fn complete_multipart<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        parts: Vec<CompletedPart>,
    ) -> BackendFuture<'a, ()> {
        async move {
            let spool = self
                .spools
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(upload_id)
                .ok_or_else(|| BackendError::NotFound(upload_id.to_owned()))?;
            if spool.key != key {
                return Err(BackendError::status(400, "upload key mismatch"));
            }

            let mut files = Vec::with_capacity(parts.len());
            let mut total = 0;
            for p in &parts {
                let (path, len) = spool
                    .parts
                    .get(&p.part_number)
                    .ok_or_else(|| BackendError::status(400, "unknown part"))?;
                files.push(path.clone());
                total += len;
            }

            let req = self
                .request(Method::PUT, key)
                .header(header::CONTENT_TYPE, spool.content_type.as_str())
                .header(header::CONTENT_LENGTH, total);
            let body = Body::wrap_stream(spooled_body(spool.dir, files));
            let resp = self.send(req, body).await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(status_error(resp).await)
            }
        }
        .boxed()
    }

    fn abort_multipart<'a>(&'a self, _key: &'a str, upload_id: &'a str) -> BackendFuture<'a, ()> {
        async move {
            // dropping the spool removes its directory
            self.spools
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(upload_id)
                .ok_or_else(|| BackendError::NotFound(upload_id.to_owned()))?;
            Ok(())
        }
        .boxed()
    }

    fn prepare(&self) -> BackendFuture<'_, ()> {
        async move { Ok(()) }.boxed()
    }

    fn probe(&self) -> BackendFuture<'_, ()> {
        async move {
            match self.propfind("", "0").await? {
                Some(_) => Ok(()),
                None => {
                    warn!(base = %self.base_path, "webdav base collection is missing");
                    Err(BackendError::NotFound(self.base_path.clone()))
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::listing::prefix_exists,
        dav::upload::{UploadConfig, UploadMode, UploadStrategy, UploadTarget, Uploader},
    };
    use hyper::{
        service::{make_service_fn, service_fn},
        Server,
    };
    use std::{convert::Infallible, sync::Arc};

    fn backend() -> WebDavBackend {
        WebDavBackend::new(
            "https://dav.example.com/remote.php/dav/files/u/",
            Some("/base/"),
            Some(("u".into(), "p".into())),
            HttpClient::new(),
        )
        .unwrap()
    }

    fn resource(href: &str, is_collection: bool) -> DavResource {
        DavResource {
            href: href.into(),
            is_collection,
            ..DavResource::default()
        }
    }

    #[test]
    fn builds_urls_below_the_base_directory() {
        let b = backend();
        assert_eq!(
            b.url("a b/c.txt"),
            "https://dav.example.com/remote.php/dav/files/u/base/a%20b/c.txt"
        );
        assert_eq!(b.url(""), "https://dav.example.com/remote.php/dav/files/u/base/");
    }

    #[test]
    fn maps_hrefs_back_to_keys() {
        let b = backend();
        assert_eq!(
            b.key_for(&resource("/remote.php/dav/files/u/base/a%20b/", true)),
            Some("a b/".into())
        );
        assert_eq!(
            b.key_for(&resource(
                "https://dav.example.com/remote.php/dav/files/u/base/x.txt",
                false
            )),
            Some("x.txt".into())
        );
        assert_eq!(
            b.key_for(&resource("/remote.php/dav/files/u/base/", true)),
            Some("".into())
        );
        assert_eq!(b.key_for(&resource("/elsewhere/x.txt", false)), None);
        assert_eq!(
            b.key_for(&resource("/remote.php/dav/files/u/based/x.txt", false)),
            None
        );
    }

    #[tokio::test]
    async fn presigned_put_carries_credentials() {
        let b = backend();
        let p = b.presign_put("x.txt", Duration::from_secs(60)).await.unwrap();
        assert!(p.url.ends_with("/base/x.txt"));
        assert_eq!(p.headers[0].1, format!("Basic {}", base64::encode("u:p")));
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn multistatus_response(entries: &[(&str, Option<u64>)]) -> Response<Body> {
        let mut xml = String::from(r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:">"#);
        for (href, len) in entries {
            let props = match len {
                Some(len) => format!("<d:resourcetype/><d:getcontentlength>{}</d:getcontentlength>", len),
                None => "<d:resourcetype><d:collection/></d:resourcetype>".to_owned(),
            };
            xml.push_str(&format!(
                "<d:response><d:href>{}</d:href><d:propstat><d:prop>{}</d:prop>\
                 <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
                href, props
            ));
        }
        xml.push_str("</d:multistatus>");
        Response::builder().status(207).body(Body::from(xml)).unwrap()
    }

    /// A small server laid out as `d/a.txt`, `d/sub/b.txt` and `r.bin`, whose
    /// GET ignores `Range`.
    async fn canned(req: Request<Body>, log: Log) -> Result<Response<Body>, Infallible> {
        let method = req.method().as_str().to_owned();
        let path = req.uri().path().to_owned();
        log.lock().unwrap().push(format!("{} {}", method, path));
        let resp = match (method.as_str(), path.as_str()) {
            ("PROPFIND", "/dav/d/") => multistatus_response(&[
                ("/dav/d/", None),
                ("/dav/d/a.txt", Some(3)),
                ("/dav/d/sub/", None),
            ]),
            ("PROPFIND", "/dav/d/sub/") => {
                multistatus_response(&[("/dav/d/sub/", None), ("/dav/d/sub/b.txt", Some(5))])
            }
            ("PROPFIND", "/dav/d/a.txt") => multistatus_response(&[("/dav/d/a.txt", Some(3))]),
            ("GET", "/dav/r.bin") => Response::new(Body::from((0..100u8).collect::<Vec<_>>())),
            ("PUT", _) => {
                let len = req
                    .headers()
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_owned();
                let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
                log.lock()
                    .unwrap()
                    .push(format!("stored {} {} {}", path, len, String::from_utf8_lossy(&body)));
                Response::builder().status(201).body(Body::empty()).unwrap()
            }
            _ => Response::builder().status(404).body(Body::empty()).unwrap(),
        };
        Ok(resp)
    }

    async fn serve() -> (WebDavBackend, Log) {
        let log: Log = Arc::default();
        let shared = log.clone();
        let make = make_service_fn(move |_conn| {
            let log = shared.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| canned(req, log.clone()))) }
        });
        let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make);
        let url = format!("http://{}/dav/", server.local_addr());
        tokio::spawn(server);
        let backend = WebDavBackend::new(&url, None, None, HttpClient::new()).unwrap();
        (backend, log)
    }

    fn count(log: &Log, prefix: &str) -> usize {
        log.lock().unwrap().iter().filter(|l| l.starts_with(prefix)).count()
    }

    fn keys(page: &ListPage) -> Vec<&str> {
        page.objects.iter().map(|o| o.key.as_str()).collect()
    }

    #[tokio::test]
    async fn lists_one_level_with_delimiter() {
        let (b, log) = serve().await;
        let page = b.list_page(&ListRequest::new("d/", Some("/"))).await.unwrap();
        assert_eq!(keys(&page), vec!["d/", "d/a.txt"]);
        assert_eq!(page.objects[1].size, 3);
        assert_eq!(page.common_prefixes, vec!["d/sub/".to_owned()]);
        assert_eq!(count(&log, "PROPFIND"), 1);
    }

    #[tokio::test]
    async fn lists_subtree_without_delimiter() {
        let (b, log) = serve().await;
        let page = b.list_page(&ListRequest::new("d/", None)).await.unwrap();
        assert_eq!(keys(&page), vec!["d/", "d/a.txt", "d/sub/", "d/sub/b.txt"]);
        assert!(page.common_prefixes.is_empty());
        assert_eq!(count(&log, "PROPFIND"), 2);
    }

    #[tokio::test]
    async fn bounded_listing_stops_at_the_first_level() {
        let (b, log) = serve().await;
        assert!(prefix_exists(&b, "d/").await.unwrap());
        assert_eq!(count(&log, "PROPFIND"), 1);
        assert!(!prefix_exists(&b, "missing/").await.unwrap());
    }

    #[tokio::test]
    async fn head_tells_files_from_collections() {
        let (b, _) = serve().await;
        let meta = b.head("d/a.txt").await.unwrap().unwrap();
        assert_eq!(meta.size, 3);
        assert!(b.head("nope.txt").await.unwrap().is_none());
        assert!(b.head("d/sub").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_response_to_ranged_get_is_sliced() {
        let (b, _) = serve().await;
        let data: Vec<u8> = (0..100u8).collect();

        let body = b.get("r.bin", Some(ByteRange { start: 10, end: 19 })).await.unwrap();
        let got = hyper::body::to_bytes(body).await.unwrap();
        assert_eq!(&got[..], &data[10..20]);

        let body = b.get("r.bin", Some(ByteRange { start: 95, end: 99 })).await.unwrap();
        assert_eq!(&hyper::body::to_bytes(body).await.unwrap()[..], &data[95..]);

        let body = b.get("r.bin", None).await.unwrap();
        assert_eq!(hyper::body::to_bytes(body).await.unwrap().len(), 100);

        assert!(matches!(
            b.get("gone.bin", None).await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn completed_upload_is_one_put_of_all_parts() {
        let (b, log) = serve().await;
        let id = b.create_multipart("up.bin", "text/plain").await.unwrap();
        let second = b.upload_part("up.bin", &id, 2, Bytes::from_static(b"world")).await.unwrap();
        let first = b.upload_part("up.bin", &id, 1, Bytes::from_static(b"hello ")).await.unwrap();
        b.complete_multipart("up.bin", &id, vec![first, second]).await.unwrap();

        assert!(log
            .lock()
            .unwrap()
            .contains(&"stored /dav/up.bin 11 hello world".to_owned()));
        assert!(b.spool_dir(&id).is_err());
    }

    #[tokio::test]
    async fn proxied_body_of_unknown_length_is_sent_with_a_length() {
        let (b, log) = serve().await;
        let http = HttpClient::new();
        let config = UploadConfig {
            mode: UploadMode::Proxy,
            ..UploadConfig::default()
        };
        let target = UploadTarget {
            key: "c.bin",
            content_type: "application/octet-stream",
            declared_len: None,
            user_agent: None,
        };
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
        let body = Body::wrap_stream(futures_util::stream::iter(chunks));

        let strategy = Uploader::new(&b, &http, &config).upload(&target, body).await.unwrap();
        assert_eq!(strategy, UploadStrategy::Proxy);
        assert!(log
            .lock()
            .unwrap()
            .contains(&"stored /dav/c.bin 11 hello world".to_owned()));
    }

    #[tokio::test]
    async fn aborted_spools_are_forgotten() {
        let b = backend();
        let id = b.create_multipart("x.bin", "application/octet-stream").await.unwrap();
        b.upload_part("x.bin", &id, 1, Bytes::from_static(b"abc")).await.unwrap();
        let dir = b.spool_dir(&id).unwrap();
        assert!(dir.exists());
        b.abort_multipart("x.bin", &id).await.unwrap();
        assert!(!dir.exists());
        assert!(b.spool_dir(&id).is_err());
    }
}
