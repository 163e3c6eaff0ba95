use crate::{
    backend::{storage_key::StorageKeyError, BackendError},
    normalized_path::PathError,
};
use hyper::{header, Body, Response, StatusCode};
use thiserror::Error;
use tracing::{error, warn};

pub(super) const ALLOW: &str = "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, PROPFIND";

#[derive(Debug, Error)]
pub enum DavError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("range not satisfiable, object has {total} bytes")]
    RangeNotSatisfiable { total: u64 },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("can't build response: {0}")]
    Http(#[from] hyper::http::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<PathError> for DavError {
    fn from(e: PathError) -> Self {
        DavError::BadRequest(e.to_string())
    }
}

impl From<StorageKeyError> for DavError {
    fn from(_: StorageKeyError) -> Self {
        DavError::MethodNotAllowed
    }
}

impl DavError {
    pub fn status(&self) -> StatusCode {
        match self {
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::Unauthorized => StatusCode::UNAUTHORIZED,
            DavError::NotFound | DavError::Backend(BackendError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            DavError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Conflict(_) => StatusCode::CONFLICT,
            DavError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::RangeNotSatisfiable { .. } | DavError::Backend(BackendError::InvalidRange) => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            DavError::Backend(_) | DavError::Http(_) | DavError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        let mut builder = Response::builder().status(status);

        let body = if status.is_server_error() {
            let error_id = format!("{:08x}", rand::random::<u32>());
            error!(error_id = %error_id, err = ?self, "request failed");
            format!("internal server error, error id: {}\n", error_id)
        } else {
            warn!(status = status.as_u16(), err = %self);
            format!("{}\n", status.canonical_reason().unwrap_or(""))
        };

        match &self {
            DavError::Unauthorized => {
                builder = builder.header(header::WWW_AUTHENTICATE, "Basic realm=\"webdav_gw\"");
            }
            DavError::MethodNotAllowed => {
                builder = builder.header(header::ALLOW, ALLOW);
            }
            DavError::RangeNotSatisfiable { total } => {
                builder = builder.header(header::CONTENT_RANGE, format!("bytes */{}", total));
            }
            _ => {}
        }

        builder
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(body))
            .unwrap_or_else(|_| {
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = status;
                resp
            })
    }
}
