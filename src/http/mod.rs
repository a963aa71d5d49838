mod tls;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{ACCEPT_ENCODING, AUTHORIZATION, COOKIE, SET_COOKIE, USER_AGENT};
use http::{HeaderMap, HeaderValue, Request};
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;
use thiserror::Error;

pub use tls::NoCertificateVerification;

/// The session token header defined by Redfish
pub const X_AUTH_TOKEN: &str = "x-auth-token";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to make HTTP(S) request: {0}")]
    CallRequest(#[from] hyper_util::client::legacy::Error),
    #[error("Failed to reading response: {0}")]
    ReadIncoming(#[from] hyper::Error),
    #[error("Failed to build HTTP request: {0}")]
    BuildRequest(#[from] http::Error),
}

/// HTTP(S) client for talking to BMCs.
///
/// BMCs almost always present self-signed certificates, so server
/// certificates are accepted without verification.
#[derive(Clone)]
pub struct HttpClient<B = Full<Bytes>> {
    client: Client<HttpsConnector<HttpConnector>, B>,
    user_agent: HeaderValue,
}

impl<B> HttpClient<B>
where
    B: fmt::Debug + Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    pub fn new() -> Result<HttpClient<B>, HttpError> {
        let tls = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
            .with_no_client_auth();

        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let https = HttpsConnector::from((http, tls));
        let client = Client::builder(TokioExecutor::new()).build(https);

        let user_agent = HeaderValue::from_str(&format!("redfish-exporter/{}", crate::get_version()))
            .unwrap_or_else(|_| HeaderValue::from_static("redfish-exporter"));

        Ok(HttpClient { client, user_agent })
    }

    pub fn send(
        &self,
        mut req: Request<B>,
    ) -> BoxFuture<'static, Result<http::Response<Incoming>, HttpError>> {
        let span = tracing::debug_span!("http", method = %req.method(), uri = %req.uri());

        default_request_headers(&mut req, &self.user_agent);

        let resp = self.client.request(req);

        let fut = async move {
            let before = std::time::Instant::now();
            let resp = resp.await?;
            let roundtrip = before.elapsed();

            debug!(
                message = "HTTP response received",
                status = %resp.status(),
                version = ?resp.version(),
                headers = ?remove_sensitive(resp.headers()),
                elapsed = ?roundtrip,
            );

            Ok(resp)
        };

        Box::pin(tracing::Instrument::instrument(fut, span))
    }
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key(USER_AGENT) {
        request.headers_mut().insert(USER_AGENT, user_agent.clone());
    }

    if !request.headers().contains_key(ACCEPT_ENCODING) {
        request
            .headers_mut()
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
}

fn remove_sensitive(headers: &HeaderMap<HeaderValue>) -> HeaderMap<HeaderValue> {
    let mut headers = headers.clone();
    for name in [AUTHORIZATION, COOKIE, SET_COOKIE] {
        if let Some(value) = headers.get_mut(&name) {
            value.set_sensitive(true);
        }
    }

    if let Some(value) = headers.get_mut(X_AUTH_TOKEN) {
        value.set_sensitive(true);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_headers_are_masked() {
        let mut headers = HeaderMap::new();
        headers.insert(X_AUTH_TOKEN, HeaderValue::from_static("b2c5f2a9e1"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic YWRtaW46YWRtaW4="));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let masked = remove_sensitive(&headers);
        let text = format!("{masked:?}");
        assert!(!text.contains("b2c5f2a9e1"));
        assert!(!text.contains("YWRtaW46YWRtaW4="));
        assert!(text.contains("application/json"));
    }

    #[test]
    fn default_headers_kept_when_set() {
        let mut req = Request::get("http://localhost/redfish/v1")
            .header(USER_AGENT, "custom")
            .body(Full::<Bytes>::default())
            .unwrap();

        default_request_headers(&mut req, &HeaderValue::from_static("redfish-exporter"));
        assert_eq!(req.headers().get(USER_AGENT).unwrap(), "custom");
        assert_eq!(req.headers().get(ACCEPT_ENCODING).unwrap(), "identity");
    }
}
