//! Authentication against a BMC and the cache of sessions shared by all
//! scrapes.
//!
//! A session is created with the Redfish handshake: the service root names
//! the `SessionService`, its `Sessions` collection accepts a POST of the
//! credentials and answers with an `X-Auth-Token`. BMCs without a usable
//! session service are talked to with basic auth instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use http::StatusCode;
use http::header::LOCATION;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use super::SERVICE_ROOT;
use super::client::{Auth, Client, FetchError, normalize_uri};
use crate::config::Credentials;
use crate::http::X_AUTH_TOKEN;

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// `response` is how long the anonymous service root request took, when
/// the BMC answered it at all.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials rejected, status code {status}")]
    Rejected {
        status: StatusCode,
        response: Option<Duration>,
    },
    #[error("service root unreachable: {source}")]
    Unreachable {
        source: FetchError,
        response: Option<Duration>,
    },
}

impl AuthError {
    #[inline]
    pub fn response(&self) -> Option<Duration> {
        match self {
            AuthError::Rejected { response, .. } | AuthError::Unreachable { response, .. } => {
                *response
            }
        }
    }
}

/// An authenticated view of one BMC.
#[derive(Debug)]
pub struct Session {
    auth: Auth,

    /// The session resource, `None` when basic auth is used.
    location: Option<String>,

    expires_at: Instant,

    generation: u64,
}

impl Session {
    #[inline]
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    #[inline]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }

    async fn logout(&self, client: &Client) {
        let Some(location) = &self.location else {
            return;
        };

        match tokio::time::timeout(LOGOUT_TIMEOUT, client.delete(location, &self.auth)).await {
            Ok(Ok(())) => debug!(message = "Session closed", target = client.base(), %location),
            Ok(Err(err)) => {
                debug!(message = "Close session failed", target = client.base(), %location, %err)
            }
            Err(_) => debug!(message = "Close session timed out", target = client.base(), %location),
        }
    }
}

#[derive(Default)]
struct Slot {
    client: Option<Client>,
    session: Option<Arc<Session>>,
}

/// Sessions keyed by target. Each target has its own async mutex, held while
/// a session is looked up, created or replaced, so concurrent scrapes of the
/// same target never log in twice or log out a session the other just
/// created.
pub struct SessionCache {
    default_timeout: Duration,
    entries: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<Slot>>>>,
    generation: AtomicU64,
}

impl SessionCache {
    /// `default_timeout` is the session lifetime assumed when the BMC does
    /// not advertise `SessionTimeout`.
    pub fn new(default_timeout: Duration) -> Self {
        SessionCache {
            default_timeout,
            entries: Default::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// Lock the slot of `key`, creating it when missing. A slot evicted
    /// while waiting for its lock is not returned.
    async fn lock(
        &self,
        key: &str,
    ) -> (Arc<tokio::sync::Mutex<Slot>>, OwnedMutexGuard<Slot>) {
        loop {
            let slot = Arc::clone(self.entries.lock().entry(key.to_string()).or_default());
            let guard = Arc::clone(&slot).lock_owned().await;

            let current = self
                .entries
                .lock()
                .get(key)
                .is_some_and(|entry| Arc::ptr_eq(entry, &slot));
            if current {
                return (slot, guard);
            }
        }
    }

    /// Drop the slot of `key` unless it was replaced already.
    fn evict(&self, key: &str, slot: &Arc<tokio::sync::Mutex<Slot>>) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| Arc::ptr_eq(entry, slot)) {
            entries.remove(key);
        }
    }

    /// Log in and store the session in `guard`, the locked `slot`. A failed
    /// login leaves no slot behind for a target without a session.
    async fn replace(
        &self,
        client: &Client,
        credentials: &Credentials,
        slot: &Arc<tokio::sync::Mutex<Slot>>,
        guard: &mut Slot,
    ) -> Result<Arc<Session>, AuthError> {
        match self.login(client, credentials).await {
            Ok(session) => {
                let session = Arc::new(session);
                guard.client = Some(client.clone());
                guard.session = Some(Arc::clone(&session));
                Ok(session)
            }
            Err(err) => {
                if guard.session.is_none() {
                    self.evict(client.base(), slot);
                }
                Err(err)
            }
        }
    }

    /// Return the cached session of the client's target, or log in when
    /// there is none or it expired.
    pub async fn obtain(
        &self,
        client: &Client,
        credentials: &Credentials,
    ) -> Result<Arc<Session>, AuthError> {
        let (entry, mut slot) = self.lock(client.base()).await;

        if let Some(session) = &slot.session {
            if !session.is_expired() {
                return Ok(Arc::clone(session));
            }
        }

        if let Some(expired) = slot.session.take() {
            debug!(message = "Session expired", target = client.base());
            expired.logout(client).await;
        }

        self.replace(client, credentials, &entry, &mut slot).await
    }

    /// Replace `stale`, which the BMC refused. When another scrape already
    /// replaced it, its successor is returned without logging in again.
    pub async fn refresh(
        &self,
        client: &Client,
        credentials: &Credentials,
        stale: &Session,
    ) -> Result<Arc<Session>, AuthError> {
        let (entry, mut slot) = self.lock(client.base()).await;

        if let Some(current) = &slot.session {
            if current.generation != stale.generation && !current.is_expired() {
                return Ok(Arc::clone(current));
            }
        }

        if let Some(old) = slot.session.take() {
            old.logout(client).await;
        }

        self.replace(client, credentials, &entry, &mut slot).await
    }

    /// Close every cached session, called on shutdown.
    pub async fn logout_all(&self) {
        let slots = self.entries.lock().drain().collect::<Vec<_>>();

        for (_target, slot) in slots {
            let mut slot = slot.lock().await;
            if let (Some(client), Some(session)) = (slot.client.take(), slot.session.take()) {
                session.logout(&client).await;
            }
        }
    }

    /// Number of targets holding a session, or being logged in to.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn login(&self, client: &Client, credentials: &Credentials) -> Result<Session, AuthError> {
        let basic = Auth::basic(&credentials.username, &credentials.password);

        // the service root must be readable anonymously, some BMCs still
        // want credentials for it
        let started = Instant::now();
        let root = client.get(SERVICE_ROOT, &Auth::None).await;
        let response = match &root {
            Err(err) if err.is_transport() => None,
            _ => Some(started.elapsed()),
        };
        let root = match root {
            Ok(root) => root,
            Err(err) if err.is_unauthorized() => Map::new(),
            Err(source) => return Err(AuthError::Unreachable { source, response }),
        };

        if let Some(service) = link(&root, &["SessionService"]) {
            match client.get(&service, &basic).await {
                Ok(service) => {
                    let timeout = service
                        .get("SessionTimeout")
                        .and_then(Value::as_u64)
                        .filter(|secs| *secs > 0)
                        .map(Duration::from_secs)
                        .unwrap_or(self.default_timeout);
                    let sessions = link(&service, &["Sessions"])
                        .or_else(|| link(&root, &["Links", "Sessions"]));

                    if let Some(sessions) = sessions {
                        if let Some(session) = self
                            .create(client, credentials, &sessions, timeout, response)
                            .await?
                        {
                            return Ok(session);
                        }
                    }
                }
                Err(FetchError::Unauthorized(status)) => {
                    return Err(AuthError::Rejected { status, response });
                }
                Err(err) => {
                    debug!(message = "Session service unusable", target = client.base(), %err);
                }
            }
        }

        // basic auth fallback, make sure the credentials work at all
        match client.get(SERVICE_ROOT, &basic).await {
            Ok(_) => {
                info!(message = "Using basic authentication", target = client.base());

                Ok(Session {
                    auth: basic,
                    location: None,
                    expires_at: Instant::now() + shorten(self.default_timeout),
                    generation: self.generation.fetch_add(1, Ordering::Relaxed),
                })
            }
            Err(FetchError::Unauthorized(status)) => Err(AuthError::Rejected { status, response }),
            Err(source) => Err(AuthError::Unreachable { source, response }),
        }
    }

    /// POST the credentials to the session collection. `Ok(None)` means the
    /// BMC did not hand out a session and basic auth should be tried.
    async fn create(
        &self,
        client: &Client,
        credentials: &Credentials,
        sessions: &str,
        timeout: Duration,
        response: Option<Duration>,
    ) -> Result<Option<Session>, AuthError> {
        let payload = json!({
            "UserName": credentials.username,
            "Password": credentials.password,
        });

        let mut result = client.post_json(sessions, &payload, &Auth::None).await;
        if matches!(&result, Err(err) if err.is_transport()) {
            debug!(message = "Retrying session creation", target = client.base());
            result = client.post_json(sessions, &payload, &Auth::None).await;
        }

        let (headers, body) = match result {
            Ok(resp) => resp,
            Err(FetchError::Unauthorized(status)) => {
                return Err(AuthError::Rejected { status, response });
            }
            Err(err) => {
                warn!(message = "Create session failed", target = client.base(), %err);
                return Ok(None);
            }
        };

        let Some(token) = headers
            .get(X_AUTH_TOKEN)
            .and_then(|value| value.to_str().ok())
            .filter(|token| !token.is_empty())
        else {
            warn!(message = "Session created without token", target = client.base());
            return Ok(None);
        };

        let location = headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(normalize_uri)
            .or_else(|| body.as_ref().and_then(|body| link(body, &[])));

        debug!(
            message = "Session created",
            target = client.base(),
            location = location.as_deref().unwrap_or("-"),
            timeout = ?timeout,
        );

        Ok(Some(Session {
            auth: Auth::Token(token.to_string()),
            location,
            expires_at: Instant::now() + shorten(timeout),
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
        }))
    }
}

/// Sessions are considered expired a little before the BMC drops them.
#[inline]
fn shorten(timeout: Duration) -> Duration {
    timeout - timeout / 10
}

/// Follow `path` into `object` and return the `@odata.id` found there.
fn link(object: &Map<String, Value>, path: &[&str]) -> Option<String> {
    let mut value = object;
    for key in path {
        value = value.get(*key)?.as_object()?;
    }

    value
        .get("@odata.id")
        .and_then(Value::as_str)
        .and_then(normalize_uri)
}

/// The session of one scrape. Requests that the BMC refuses with 401 or 403
/// renew the session through the cache and are retried, at most once per
/// scrape.
pub struct SessionHandle {
    cache: Arc<SessionCache>,
    client: Client,
    credentials: Credentials,
    current: parking_lot::RwLock<Arc<Session>>,
    refreshed: AtomicBool,
    refreshing: tokio::sync::Mutex<()>,
}

impl SessionHandle {
    pub async fn open(
        cache: Arc<SessionCache>,
        client: Client,
        credentials: Credentials,
    ) -> Result<Self, AuthError> {
        let session = cache.obtain(&client, &credentials).await?;

        Ok(SessionHandle {
            cache,
            client,
            credentials,
            current: parking_lot::RwLock::new(session),
            refreshed: AtomicBool::new(false),
            refreshing: tokio::sync::Mutex::new(()),
        })
    }

    #[inline]
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn current(&self) -> Arc<Session> {
        Arc::clone(&self.current.read())
    }

    pub async fn get(&self, uri: &str) -> Result<Map<String, Value>, FetchError> {
        let session = self.current();

        match self.client.get(uri, session.auth()).await {
            Err(err) if err.is_unauthorized() => match self.renew(&session).await {
                Some(session) => self.client.get(uri, session.auth()).await,
                None => Err(err),
            },
            result => result,
        }
    }

    async fn renew(&self, stale: &Arc<Session>) -> Option<Arc<Session>> {
        let _guard = self.refreshing.lock().await;

        let current = self.current();
        if !Arc::ptr_eq(&current, stale) {
            return Some(current);
        }

        if self.refreshed.swap(true, Ordering::AcqRel) {
            return None;
        }

        info!(message = "Session rejected, logging in again", target = self.client.base());

        match self
            .cache
            .refresh(&self.client, &self.credentials, stale)
            .await
        {
            Ok(session) => {
                *self.current.write() = Arc::clone(&session);
                Some(session)
            }
            Err(err) => {
                warn!(message = "Renew session failed", target = self.client.base(), %err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use testify::bmc::MockBmc;

    use super::*;
    use crate::http::HttpClient;

    fn credentials() -> Credentials {
        Credentials {
            username: "admin".into(),
            password: "secret".into(),
        }
    }

    fn client(bmc: &MockBmc) -> Client {
        let http: HttpClient = HttpClient::new().unwrap();
        Client::new(http, &bmc.url(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn token_session() {
        let bmc = MockBmc::builder()
            .credentials("admin", "secret")
            .sessions(600)
            .start()
            .await;
        let client = client(&bmc);
        let cache = SessionCache::new(Duration::from_secs(300));

        let session = cache.obtain(&client, &credentials()).await.unwrap();
        assert!(matches!(session.auth(), Auth::Token(_)));
        assert!(session.location().unwrap().starts_with("/redfish/v1/SessionService/Sessions/"));
        assert_eq!(bmc.logins(), 1);

        // cached
        let again = cache.obtain(&client, &credentials()).await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(bmc.logins(), 1);

        cache.logout_all().await;
        assert_eq!(bmc.logouts(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn rejected() {
        let bmc = MockBmc::builder()
            .credentials("admin", "other")
            .sessions(600)
            .start()
            .await;
        let cache = SessionCache::new(Duration::from_secs(300));

        let err = cache.obtain(&client(&bmc), &credentials()).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Rejected {
                status: StatusCode::UNAUTHORIZED,
                response: Some(_),
            }
        ));

        // nothing is kept for a target that never had a session
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn basic_auth_fallback() {
        let bmc = MockBmc::builder().credentials("admin", "secret").start().await;
        let cache = SessionCache::new(Duration::from_secs(300));

        let session = cache.obtain(&client(&bmc), &credentials()).await.unwrap();
        assert_eq!(session.auth(), &Auth::basic("admin", "secret"));
        assert_eq!(session.location(), None);
    }

    #[tokio::test]
    async fn unreachable() {
        let addr = testify::next_addr();
        let http: HttpClient = HttpClient::new().unwrap();
        let client = Client::new(http, &format!("http://{addr}"), Duration::from_secs(1));
        let cache = SessionCache::new(Duration::from_secs(300));

        let err = cache.obtain(&client, &credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::Unreachable { response: None, .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn expired_session_is_replaced() {
        let bmc = MockBmc::builder()
            .credentials("admin", "secret")
            .sessions(1)
            .start()
            .await;
        let client = client(&bmc);
        let cache = SessionCache::new(Duration::from_secs(300));

        let first = cache.obtain(&client, &credentials()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = cache.obtain(&client, &credentials()).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(bmc.logins(), 2);
        assert_eq!(bmc.logouts(), 1);
    }

    #[tokio::test]
    async fn concurrent_obtain_logs_in_once() {
        let bmc = MockBmc::builder()
            .credentials("admin", "secret")
            .sessions(600)
            .delay("/redfish/v1/SessionService/Sessions", Duration::from_millis(100))
            .start()
            .await;
        let client = client(&bmc);
        let cache = Arc::new(SessionCache::new(Duration::from_secs(300)));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let client = client.clone();
            tasks.spawn(async move { cache.obtain(&client, &credentials()).await.is_ok() });
        }

        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap());
        }
        assert_eq!(bmc.logins(), 1);
    }

    #[tokio::test]
    async fn handle_renews_once() {
        let bmc = MockBmc::builder()
            .credentials("admin", "secret")
            .sessions(600)
            .resource("/redfish/v1/Systems", json!({"Members": []}))
            .start()
            .await;
        let cache = Arc::new(SessionCache::new(Duration::from_secs(300)));
        let handle = SessionHandle::open(Arc::clone(&cache), client(&bmc), credentials())
            .await
            .unwrap();

        // the BMC forgets every session, the first request renews
        bmc.revoke_sessions();
        handle.get("/redfish/v1/Systems").await.unwrap();
        assert_eq!(bmc.logins(), 2);

        // a second rejection in the same scrape is not retried
        bmc.revoke_sessions();
        let err = handle.get("/redfish/v1/Systems").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(bmc.logins(), 2);
    }
}
