pub mod encryption;
pub mod factory;
pub mod http;
pub mod listing;
pub mod memory;
pub mod s3_backend;
pub mod storage_key;
pub mod webdav_backend;

use crate::repository::BackendKind;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use hyper::Body;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("requested range not satisfiable")]
    InvalidRange,
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("backend responded with status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("s3 error: {0}")]
    S3(#[from] s3::error::S3Error),
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid backend response: {0}")]
    Xml(String),
    #[error("request body error: {0}")]
    Body(String),
    #[error("backend configuration error: {0}")]
    Config(String),
}

impl BackendError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        BackendError::Status {
            code,
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

pub type BackendFuture<'a, T> = BoxFuture<'a, BackendResult<T>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

impl ObjectMeta {
    pub fn new(key: &str, size: u64) -> Self {
        ObjectMeta {
            key: key.to_owned(),
            size,
            last_modified: None,
            content_type: None,
            etag: None,
        }
    }

    pub fn is_directory_marker(&self) -> bool {
        self.size == 0 && self.key.ends_with('/')
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation: Option<String>,
    pub max_keys: Option<usize>,
}

impl ListRequest {
    pub fn new(prefix: &str, delimiter: Option<&str>) -> Self {
        ListRequest {
            prefix: prefix.to_owned(),
            delimiter: delimiter.map(str::to_owned),
            continuation: None,
            max_keys: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub common_prefixes: Vec<String>,
    pub objects: Vec<ObjectMeta>,
    /// Cursor for the next page, `None` once the listing is exhausted.
    pub next_continuation: Option<String>,
}

/// Inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// A request the gateway can send on behalf of a client without holding
/// backend credentials in the request itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PresignedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Operations the WebDAV engine needs from an object store.
///
/// Keys are relative (no leading `/`); a key ending in `/` names a
/// directory marker.
pub trait BackendClient: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn list_page<'a>(&'a self, request: &'a ListRequest) -> BackendFuture<'a, ListPage>;

    fn head<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<ObjectMeta>>;

    fn get<'a>(&'a self, key: &'a str, range: Option<ByteRange>) -> BackendFuture<'a, Body>;

    fn put<'a>(&'a self, key: &'a str, body: Bytes, content_type: &'a str)
        -> BackendFuture<'a, ()>;

    fn presign_put<'a>(
        &'a self,
        key: &'a str,
        expires: Duration,
    ) -> BackendFuture<'a, PresignedRequest>;

    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()>;

    /// Deletes at most [`BackendClient::max_delete_batch`] keys.
    fn delete_batch<'a>(&'a self, keys: &'a [String]) -> BackendFuture<'a, ()>;

    fn max_delete_batch(&self) -> usize;

    fn recommended_part_size(&self) -> usize;

    fn create_multipart<'a>(
        &'a self,
        key: &'a str,
        content_type: &'a str,
    ) -> BackendFuture<'a, String>;

    fn upload_part<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Bytes,
    ) -> BackendFuture<'a, CompletedPart>;

    fn complete_multipart<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        parts: Vec<CompletedPart>,
    ) -> BackendFuture<'a, ()>;

    fn abort_multipart<'a>(&'a self, key: &'a str, upload_id: &'a str)
        -> BackendFuture<'a, ()>;

    /// One-time preparation run by the bootstrap, e.g. bucket creation.
    fn prepare(&self) -> BackendFuture<'_, ()>;

    /// Cheap reachability check.
    fn probe(&self) -> BackendFuture<'_, ()>;
}

pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

pub const MIB: usize = 1024 * 1024;
