//! A fake Redfish service for tests.
//!
//! The service root is always readable anonymously. When credentials are
//! configured every other resource requires either basic auth or the token
//! of a live session. Sessions are only offered after `sessions` is called.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use headers::authorization::Basic;
use headers::{Authorization, HeaderMapExt};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::http::{not_found, unauthorized};

const SERVICE_ROOT: &str = "/redfish/v1";
const SESSION_SERVICE: &str = "/redfish/v1/SessionService";
const SESSIONS: &str = "/redfish/v1/SessionService/Sessions";

enum Body {
    Json(Value),
    Raw(&'static str),
}

#[derive(Default)]
pub struct Builder {
    credentials: Option<(String, String)>,
    session_timeout: Option<u64>,
    resources: HashMap<String, Body>,
    delays: HashMap<String, Duration>,
}

impl Builder {
    /// Require these credentials for everything but the service root.
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Offer a session service, advertising `timeout` seconds as the
    /// session lifetime.
    pub fn sessions(mut self, timeout: u64) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    pub fn resource(mut self, path: &str, value: Value) -> Self {
        self.resources.insert(path.to_string(), Body::Json(value));
        self
    }

    /// Serve `body` verbatim, even if it is not valid JSON.
    pub fn raw(mut self, path: &str, body: &'static str) -> Self {
        self.resources.insert(path.to_string(), Body::Raw(body));
        self
    }

    /// Hold every request to `path` for `delay` before answering.
    pub fn delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    /// Bind a local port and start serving. Requests are accepted once
    /// this returns.
    pub async fn start(self) -> MockBmc {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock bmc");
        let addr = listener.local_addr().expect("local addr of mock bmc");

        let state = Arc::new(State {
            credentials: self.credentials,
            session_timeout: self.session_timeout,
            resources: self.resources,
            delays: self.delays,
            tokens: Mutex::new(HashMap::new()),
            next_session: AtomicUsize::new(1),
            logins: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            requests: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let shared = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    continue;
                };

                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, Infallible>(state.handle(req).await) }
                    });

                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        MockBmc { addr, state, task }
    }
}

struct State {
    credentials: Option<(String, String)>,
    session_timeout: Option<u64>,
    resources: HashMap<String, Body>,
    delays: HashMap<String, Duration>,

    /// token -> session uri
    tokens: Mutex<HashMap<String, String>>,
    next_session: AtomicUsize,
    logins: AtomicUsize,
    logouts: AtomicUsize,
    requests: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts a request as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = gauge.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        InFlight(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl State {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let path = req.uri().path().to_string();

        *self
            .requests
            .lock()
            .unwrap()
            .entry(path.clone())
            .or_default() += 1;
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak);

        if let Some(delay) = self.delays.get(&path) {
            tokio::time::sleep(*delay).await;
        }

        let method = req.method().clone();
        match (method, path.as_str()) {
            (Method::GET, SERVICE_ROOT) => json_response(StatusCode::OK, &self.root()),
            (Method::GET, SESSION_SERVICE) if self.session_timeout.is_some() => {
                if !self.basic_ok(&req) {
                    return unauthorized();
                }

                json_response(
                    StatusCode::OK,
                    &json!({
                        "@odata.id": SESSION_SERVICE,
                        "@odata.type": "#SessionService.v1_1_8.SessionService",
                        "SessionTimeout": self.session_timeout,
                        "Sessions": {"@odata.id": SESSIONS},
                    }),
                )
            }
            (Method::POST, SESSIONS) if self.session_timeout.is_some() => self.login(req).await,
            (Method::DELETE, path) if path.starts_with(SESSIONS) => self.logout(path),
            (Method::GET, path) => {
                if !self.authorized(&req) {
                    return unauthorized();
                }

                match self.resources.get(path) {
                    Some(Body::Json(value)) => json_response(StatusCode::OK, value),
                    Some(Body::Raw(text)) => {
                        let mut resp = Response::new(Full::new(Bytes::from_static(text.as_bytes())));
                        resp.headers_mut()
                            .insert(CONTENT_TYPE, "application/json".parse().unwrap());
                        resp
                    }
                    None => not_found(),
                }
            }
            _ => not_found(),
        }
    }

    fn root(&self) -> Value {
        let mut root = match self.resources.get(SERVICE_ROOT) {
            Some(Body::Json(value)) => value.clone(),
            _ => json!({
                "@odata.id": SERVICE_ROOT,
                "@odata.type": "#ServiceRoot.v1_5_0.ServiceRoot",
                "RedfishVersion": "1.6.0",
            }),
        };

        if self.session_timeout.is_some() {
            if let Some(object) = root.as_object_mut() {
                object
                    .entry("SessionService")
                    .or_insert_with(|| json!({"@odata.id": SESSION_SERVICE}));
            }
        }

        root
    }

    fn basic_ok<B>(&self, req: &Request<B>) -> bool {
        let Some((username, password)) = &self.credentials else {
            return true;
        };

        match req.headers().typed_get::<Authorization<Basic>>() {
            Some(auth) => auth.username() == username && auth.password() == password,
            None => false,
        }
    }

    fn authorized<B>(&self, req: &Request<B>) -> bool {
        if self.credentials.is_none() || self.basic_ok(req) {
            return true;
        }

        match req
            .headers()
            .get("x-auth-token")
            .and_then(|value| value.to_str().ok())
        {
            Some(token) => self.tokens.lock().unwrap().contains_key(token),
            None => false,
        }
    }

    async fn login(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return json_response(StatusCode::BAD_REQUEST, &json!({})),
        };
        let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
            return json_response(StatusCode::BAD_REQUEST, &json!({}));
        };

        if let Some((username, password)) = &self.credentials {
            if payload["UserName"] != username.as_str() || payload["Password"] != password.as_str() {
                return unauthorized();
            }
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let token = format!("token-{id}");
        let location = format!("{SESSIONS}/{id}");
        self.tokens
            .lock()
            .unwrap()
            .insert(token.clone(), location.clone());
        self.logins.fetch_add(1, Ordering::SeqCst);

        let mut resp = json_response(
            StatusCode::CREATED,
            &json!({
                "@odata.id": location,
                "@odata.type": "#Session.v1_3_0.Session",
                "Id": id.to_string(),
                "UserName": payload["UserName"],
            }),
        );
        resp.headers_mut()
            .insert("x-auth-token", token.parse().unwrap());
        resp.headers_mut()
            .insert(LOCATION, location.parse().unwrap());
        resp
    }

    fn logout(&self, path: &str) -> Response<Full<Bytes>> {
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|_, location| location != path);

        if tokens.len() == before {
            return not_found();
        }

        self.logouts.fetch_add(1, Ordering::SeqCst);

        let mut resp = Response::new(Full::new(Bytes::new()));
        *resp.status_mut() = StatusCode::NO_CONTENT;
        resp
    }
}

fn json_response(status: StatusCode, value: &Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap();
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse().unwrap());
    resp
}

/// A running fake BMC, stopped on drop.
pub struct MockBmc {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl Drop for MockBmc {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockBmc {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base url, e.g. `http://127.0.0.1:34567`
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Sessions created so far.
    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    /// Sessions deleted so far.
    pub fn logouts(&self) -> usize {
        self.state.logouts.load(Ordering::SeqCst)
    }

    /// Forget every live session, their tokens are rejected from now on.
    pub fn revoke_sessions(&self) {
        self.state.tokens.lock().unwrap().clear();
    }

    /// Requests received for `path`, any method.
    pub fn requests(&self, path: &str) -> usize {
        self.state
            .requests
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    /// Most requests handled at the same time since start or the last
    /// `reset_peak`.
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn reset_peak(&self) {
        self.state
            .peak
            .store(self.state.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Paths requested at least once.
    pub fn requested(&self) -> HashSet<String> {
        self.state.requests.lock().unwrap().keys().cloned().collect()
    }
}
