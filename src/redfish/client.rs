use std::fmt;
use std::time::Duration;

use bytes::{Buf, Bytes};
use headers::{Authorization, HeaderMapExt};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::http::{HttpClient, HttpError, X_AUTH_TOKEN};

/// Credentials attached to a single request.
#[derive(Clone, PartialEq)]
pub enum Auth {
    /// Only the service root may be read without authentication.
    None,

    Basic { user: String, password: String },

    /// A Redfish session token, sent as `X-Auth-Token`.
    Token(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"**REDACTED**")
                .finish(),
            Auth::Token(_) => f.write_str("Token(**REDACTED**)"),
        }
    }
}

impl Auth {
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn apply<B>(&self, req: &mut Request<B>) {
        self.apply_headers_map(req.headers_mut())
    }

    pub fn apply_headers_map(&self, map: &mut HeaderMap) {
        match self {
            Auth::None => {}
            Auth::Basic { user, password } => {
                map.typed_insert(Authorization::basic(user, password));
            }
            Auth::Token(token) => match token.parse::<http::HeaderValue>() {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    map.insert(X_AUTH_TOKEN, value);
                }
                Err(err) => error!(message = "Invalid session token", %err),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("unexpected status code {0}")]
    Status(StatusCode),
    #[error("request is not authorized, status code {0}")]
    Unauthorized(StatusCode),
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("response body is not a JSON object")]
    NotObject,
}

impl FetchError {
    #[inline]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }

    /// The request never produced a response.
    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::Http(_))
    }
}

/// Talks to the Redfish service of one BMC.
#[derive(Clone)]
pub struct Client {
    http: HttpClient,
    base: String,
    timeout: Duration,
}

impl Client {
    /// `target` is a host or `host:port`, which is reached over https. A
    /// target that already carries an `http://` or `https://` scheme is
    /// used as is.
    pub fn new(http: HttpClient, target: &str, timeout: Duration) -> Self {
        let target = target.trim().trim_end_matches('/');
        let base = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("https://{target}")
        };

        Client {
            http,
            base,
            timeout,
        }
    }

    /// The scheme and authority every request is sent to, also the key of
    /// the session cache.
    #[inline]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// GET a resource and return its JSON object.
    pub async fn get(&self, path: &str, auth: &Auth) -> Result<Map<String, Value>, FetchError> {
        let mut req = Request::get(format!("{}{}", self.base, path))
            .header(ACCEPT, "application/json")
            .body(Full::default())
            .map_err(HttpError::from)?;
        auth.apply(&mut req);

        let (status, _headers, body) = self.execute(req).await?;
        check_status(status)?;

        match serde_json::from_reader(body.reader())? {
            Value::Object(object) => Ok(object),
            _ => Err(FetchError::NotObject),
        }
    }

    /// POST a JSON document, returns the response headers and the response
    /// object if the body is one.
    pub async fn post_json(
        &self,
        path: &str,
        payload: &Value,
        auth: &Auth,
    ) -> Result<(HeaderMap, Option<Map<String, Value>>), FetchError> {
        let payload = serde_json::to_vec(payload)?;
        let mut req = Request::post(format!("{}{}", self.base, path))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(HttpError::from)?;
        auth.apply(&mut req);

        let (status, headers, body) = self.execute(req).await?;
        check_status(status)?;

        let object = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(object)) => Some(object),
            _ => None,
        };

        Ok((headers, object))
    }

    pub async fn delete(&self, path: &str, auth: &Auth) -> Result<(), FetchError> {
        let mut req = Request::builder()
            .method(Method::DELETE)
            .uri(format!("{}{}", self.base, path))
            .body(Full::default())
            .map_err(HttpError::from)?;
        auth.apply(&mut req);

        let (status, _headers, _body) = self.execute(req).await?;
        check_status(status)
    }

    async fn execute(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Result<(StatusCode, HeaderMap, Bytes), FetchError> {
        let fut = async {
            let resp = self.http.send(req).await?;
            let (parts, incoming) = resp.into_parts();
            let body = incoming.collect().await.map_err(HttpError::from)?.to_bytes();

            Ok::<_, HttpError>((parts.status, parts.headers, body))
        };

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}

fn check_status(status: StatusCode) -> Result<(), FetchError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FetchError::Unauthorized(status));
    }

    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    Ok(())
}

/// Reduce a link found in a document to the path it names. Absolute URLs
/// lose scheme and authority, fragments and trailing slashes are dropped.
/// Links that are not paths yield `None`.
pub fn normalize_uri(link: &str) -> Option<String> {
    let link = link.trim();
    let path = match link
        .strip_prefix("https://")
        .or_else(|| link.strip_prefix("http://"))
    {
        Some(rest) => &rest[rest.find('/')?..],
        None => link,
    };

    let path = match path.find('#') {
        Some(pos) => &path[..pos],
        None => path,
    };

    if !path.starts_with('/') {
        return None;
    }

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Some("/".to_string());
    }

    Some(trimmed.to_string())
}
