//! Choosing and running the transfer used for a PUT body.
//!
//! Small bodies are buffered and written with one request, very large ones
//! are streamed straight to a presigned backend URL and everything else goes
//! through a multipart session that is always either completed or aborted.

use super::error::DavError;
use crate::backend::{http::HttpClient, BackendClient, BackendError, CompletedPart, MIB};
use bytes::{Bytes, BytesMut};
use hyper::{body::HttpBody, header, Body, Request};
use serde::Deserialize;
use std::{io::SeekFrom, time::Duration};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Auto,
    Direct,
    Proxy,
}

impl Default for UploadMode {
    fn default() -> Self {
        UploadMode::Auto
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub mode: UploadMode,
    /// Largest declared size still written with a single buffered request.
    pub direct_threshold: u64,
    /// Declared sizes above this are streamed to a presigned URL.
    pub proxy_threshold: u64,
    pub problematic_part_size: usize,
    /// Case-insensitive `User-Agent` substrings that get the smaller part size.
    pub problematic_user_agents: Vec<String>,
    pub part_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub presign_expiry_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            mode: UploadMode::Auto,
            direct_threshold: 10 * MIB as u64,
            proxy_threshold: 50 * MIB as u64,
            problematic_part_size: 5 * MIB,
            problematic_user_agents: vec![
                "Microsoft-WebDAV-MiniRedir".into(),
                "WebDAVFS".into(),
                "davfs2".into(),
            ],
            part_retry_attempts: 3,
            retry_base_delay_ms: 200,
            presign_expiry_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UploadStrategy {
    Empty,
    Direct,
    Proxy,
    Multipart,
}

pub fn choose_strategy(declared_len: Option<u64>, config: &UploadConfig) -> UploadStrategy {
    match (config.mode, declared_len) {
        (UploadMode::Proxy, _) => UploadStrategy::Proxy,
        (_, Some(0)) => UploadStrategy::Empty,
        (UploadMode::Direct, _) => UploadStrategy::Direct,
        (UploadMode::Auto, Some(n)) if n <= config.direct_threshold => UploadStrategy::Direct,
        (UploadMode::Auto, Some(n)) if n > config.proxy_threshold => UploadStrategy::Proxy,
        (UploadMode::Auto, _) => UploadStrategy::Multipart,
    }
}

pub fn part_size(recommended: usize, user_agent: Option<&str>, config: &UploadConfig) -> usize {
    let flagged = user_agent.map_or(false, |ua| {
        let ua = ua.to_ascii_lowercase();
        config
            .problematic_user_agents
            .iter()
            .any(|p| !p.is_empty() && ua.contains(&p.to_ascii_lowercase()))
    });
    let size = if flagged {
        recommended.min(config.problematic_part_size)
    } else {
        recommended
    };
    size.max(1)
}

#[derive(Debug, Clone)]
pub struct UploadTarget<'a> {
    pub key: &'a str,
    pub content_type: &'a str,
    pub declared_len: Option<u64>,
    pub user_agent: Option<&'a str>,
}

fn body_error(e: hyper::Error) -> DavError {
    DavError::Backend(BackendError::Body(e.to_string()))
}

/// Copies a body of unknown length to an anonymous temporary file so it can
/// be sent with a `Content-Length`.
async fn spool(mut body: Body) -> Result<(Body, u64), DavError> {
    let file = tempfile::tempfile().map_err(BackendError::from)?;
    let mut file = tokio::fs::File::from_std(file);
    let mut len = 0u64;
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(body_error)?;
        file.write_all(&chunk).await.map_err(BackendError::from)?;
        len += chunk.len() as u64;
    }
    file.flush().await.map_err(BackendError::from)?;
    file.seek(SeekFrom::Start(0))
        .await
        .map_err(BackendError::from)?;
    Ok((Body::wrap_stream(ReaderStream::new(file)), len))
}

/// Reads from `body` until `buffer` holds a full part. `true` once the body
/// is exhausted.
async fn fill(body: &mut Body, buffer: &mut BytesMut, part_size: usize) -> Result<bool, DavError> {
    while buffer.len() < part_size {
        match body.data().await {
            Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
            Some(Err(e)) => return Err(body_error(e)),
            None => return Ok(true),
        }
    }
    Ok(false)
}

pub struct Uploader<'a> {
    client: &'a dyn BackendClient,
    http: &'a HttpClient,
    config: &'a UploadConfig,
}

impl<'a> Uploader<'a> {
    pub fn new(client: &'a dyn BackendClient, http: &'a HttpClient, config: &'a UploadConfig) -> Self {
        Uploader {
            client,
            http,
            config,
        }
    }

    #[instrument(level = "debug", skip(self, target, body), fields(key = %target.key, declared = ?target.declared_len))]
    pub async fn upload(&self, target: &UploadTarget<'_>, body: Body) -> Result<UploadStrategy, DavError> {
        let strategy = choose_strategy(target.declared_len, self.config);
        debug!(?strategy, mode = ?self.config.mode);
        match strategy {
            UploadStrategy::Empty => {
                self.client
                    .put(target.key, Bytes::new(), target.content_type)
                    .await?;
                Ok(UploadStrategy::Empty)
            }
            UploadStrategy::Direct => self.direct(target, body).await,
            UploadStrategy::Proxy => self.proxy(target, body).await,
            UploadStrategy::Multipart => self.multipart(target, body).await,
        }
    }

    async fn direct(&self, target: &UploadTarget<'_>, body: Body) -> Result<UploadStrategy, DavError> {
        let data = hyper::body::to_bytes(body).await.map_err(body_error)?;
        match self.client.put(target.key, data.clone(), target.content_type).await {
            Ok(()) => Ok(UploadStrategy::Direct),
            Err(e) if self.config.mode == UploadMode::Auto => {
                warn!(err = %e, "direct upload failed, falling back to multipart");
                self.multipart(target, Body::from(data)).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn proxy(&self, target: &UploadTarget<'_>, body: Body) -> Result<UploadStrategy, DavError> {
        let expiry = Duration::from_secs(self.config.presign_expiry_secs);
        let presigned = match self.client.presign_put(target.key, expiry).await {
            Ok(p) => p,
            // nothing of the body has been read yet
            Err(e) if self.config.mode == UploadMode::Auto => {
                warn!(err = %e, "can't presign upload, falling back to multipart");
                return self.multipart(target, body).await;
            }
            Err(e) => return Err(e.into()),
        };

        // presigned PUTs are refused without a length
        let (body, len) = match target.declared_len {
            Some(len) => (body, len),
            None => {
                let (body, len) = spool(body).await?;
                debug!(len, "spooled body of unknown length");
                (body, len)
            }
        };
        let mut req = Request::put(presigned.url.as_str())
            .header(header::CONTENT_TYPE, target.content_type)
            .header(header::CONTENT_LENGTH, len);
        for (name, value) in &presigned.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        self.http.send_ok(req.body(body)?).await?;
        Ok(UploadStrategy::Proxy)
    }

    async fn multipart(&self, target: &UploadTarget<'_>, mut body: Body) -> Result<UploadStrategy, DavError> {
        let part_size = part_size(
            self.client.recommended_part_size(),
            target.user_agent,
            self.config,
        );
        let mut buffer = BytesMut::with_capacity(part_size);
        let finished = fill(&mut body, &mut buffer, part_size).await?;

        if finished && target.declared_len.is_none() {
            debug!(len = buffer.len(), "body smaller than one part, writing directly");
            self.client
                .put(target.key, buffer.freeze(), target.content_type)
                .await?;
            return Ok(UploadStrategy::Direct);
        }

        let upload_id = self
            .client
            .create_multipart(target.key, target.content_type)
            .await?;
        debug!(upload_id = %upload_id, part_size);

        match self
            .transfer_parts(target.key, &upload_id, body, buffer, finished, part_size)
            .await
        {
            Ok(parts) => {
                info!(upload_id = %upload_id, parts, "multipart upload completed");
                Ok(UploadStrategy::Multipart)
            }
            Err(e) => {
                match self.client.abort_multipart(target.key, &upload_id).await {
                    Ok(()) => info!(upload_id = %upload_id, "multipart upload aborted"),
                    Err(abort) => {
                        error!(upload_id = %upload_id, err = %abort, "can't abort multipart upload")
                    }
                }
                Err(e)
            }
        }
    }

    async fn transfer_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut body: Body,
        mut buffer: BytesMut,
        mut finished: bool,
        part_size: usize,
    ) -> Result<usize, DavError> {
        let mut parts = vec![];
        let mut part_number = 1;
        loop {
            while buffer.len() >= part_size {
                let chunk = buffer.split_to(part_size).freeze();
                parts.push(self.upload_part(key, upload_id, part_number, chunk).await?);
                part_number += 1;
            }
            if finished {
                break;
            }
            finished = fill(&mut body, &mut buffer, part_size).await?;
        }
        if !buffer.is_empty() || parts.is_empty() {
            parts.push(
                self.upload_part(key, upload_id, part_number, buffer.freeze())
                    .await?,
            );
        }

        let count = parts.len();
        self.client.complete_multipart(key, upload_id, parts).await?;
        Ok(count)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        chunk: Bytes,
    ) -> Result<CompletedPart, DavError> {
        let attempts = self.config.part_retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .client
                .upload_part(key, upload_id, part_number, chunk.clone())
                .await
            {
                Ok(part) => return Ok(part),
                Err(e) if attempt < attempts => {
                    let delay = self
                        .config
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << (attempt - 1).min(16));
                    warn!(part_number, attempt, err = %e, "part upload failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    error!(part_number, attempt, err = %e, "part upload failed");
                    return Err(e.into());
                }
            }
        }
    }
}
