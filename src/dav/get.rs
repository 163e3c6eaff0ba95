use super::{xml::http_date, DavError, DavInner, RequestContext};
use crate::backend::{BackendError, ByteRange};
use hyper::{header, Body, Method, Request, Response, StatusCode};
use tracing::debug;

/// Parses a single `bytes=` range against an object of `total` bytes.
///
/// `Ok(None)` means the header asked for the whole object.
pub(super) fn parse_range(value: &str, total: u64) -> Result<Option<ByteRange>, ()> {
    let ranges = value.trim().strip_prefix("bytes=").ok_or(())?.trim();
    if ranges.contains(',') {
        return Err(());
    }
    let (start, end) = {
        let mut it = ranges.splitn(2, '-');
        (it.next().ok_or(())?.trim(), it.next().ok_or(())?.trim())
    };
    if total == 0 {
        return Err(());
    }

    let range = if start.is_empty() {
        // suffix range, the last `end` bytes
        let n: u64 = end.parse().map_err(|_| ())?;
        if n == 0 {
            return Err(());
        }
        ByteRange {
            start: total.saturating_sub(n),
            end: total - 1,
        }
    } else {
        let start: u64 = start.parse().map_err(|_| ())?;
        let end = if end.is_empty() {
            total - 1
        } else {
            end.parse::<u64>().map_err(|_| ())?.min(total - 1)
        };
        if start >= total || end < start {
            return Err(());
        }
        ByteRange { start, end }
    };

    if range.start == 0 && range.end == total - 1 && start.is_empty() {
        return Ok(None);
    }
    Ok(Some(range))
}

impl DavInner {
    pub(super) async fn handle_get(
        &self,
        ctx: &RequestContext,
        req: Request<Body>,
    ) -> Result<Response<Body>, DavError> {
        let location = ctx
            .aggregate
            .find_route(&ctx.path)
            .ok_or(DavError::NotFound)?;
        if location.is_mount_root() {
            return Err(DavError::NotFound);
        }
        let target = self.target(location).await?;
        let key = target.file_key().map_err(|_| DavError::NotFound)?;

        let meta = target
            .client
            .head(&key)
            .await?
            .ok_or(DavError::NotFound)?;
        let total = meta.size;

        let content_type = meta
            .content_type
            .clone()
            .or_else(|| {
                mime_guess::from_path(ctx.path.name())
                    .first_raw()
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| "application/octet-stream".to_owned());

        let mut resp = Response::builder()
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_TYPE, content_type);
        if let Some(t) = &meta.last_modified {
            resp = resp.header(header::LAST_MODIFIED, http_date(t));
        }
        if let Some(etag) = &meta.etag {
            resp = resp.header(header::ETAG, etag.as_str());
        }

        let range = match req.headers().get(header::RANGE) {
            None => None,
            Some(v) => {
                let v = v
                    .to_str()
                    .map_err(|_| DavError::RangeNotSatisfiable { total })?;
                parse_range(v, total).map_err(|_| DavError::RangeNotSatisfiable { total })?
            }
        };

        if req.method() == Method::HEAD {
            return Ok(resp
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, total)
                .body(Body::empty())?);
        }

        match range {
            Some(r) => {
                debug!(key = %key, start = r.start, end = r.end, "ranged read");
                let body = target
                    .client
                    .get(&key, Some(r))
                    .await
                    .map_err(|e| match e {
                        BackendError::InvalidRange => DavError::RangeNotSatisfiable { total },
                        e => e.into(),
                    })?;
                Ok(resp
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", r.start, r.end, total),
                    )
                    .header(header::CONTENT_LENGTH, r.len())
                    .body(body)?)
            }
            None => {
                let body = target.client.get(&key, None).await?;
                Ok(resp
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, total)
                    .body(body)?)
            }
        }
    }
}
