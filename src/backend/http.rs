use super::{BackendError, BackendResult};
use hyper::{client::HttpConnector, Body, Client, Request, Response};
use hyper_rustls::HttpsConnector;
use tracing::{debug, instrument};

/// Outbound HTTP client shared by the backends that speak plain HTTP.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Body>,
}

impl Default for HttpClient {
    fn default() -> Self {
        HttpClient::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        HttpClient {
            inner: Client::builder().build(https),
        }
    }

    #[instrument(level = "debug", skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn send(&self, req: Request<Body>) -> BackendResult<Response<Body>> {
        let resp = self.inner.request(req).await?;
        debug!(status = resp.status().as_u16());
        Ok(resp)
    }

    /// Sends `req` and turns any non-success status into an error carrying
    /// the start of the response body.
    pub async fn send_ok(&self, req: Request<Body>) -> BackendResult<Response<Body>> {
        let resp = self.send(req).await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        Err(status_error(resp).await)
    }
}

pub async fn status_error(resp: Response<Body>) -> BackendError {
    let code = resp.status().as_u16();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .unwrap_or_default();
    let message: String = String::from_utf8_lossy(&body).chars().take(256).collect();
    BackendError::status(code, message)
}
