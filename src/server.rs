//! The scrape endpoint. Every route but `/` takes a `target` query
//! parameter and answers with the metrics of that target.

use std::convert::Infallible;
use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::exposition;
use crate::redfish::{Profile, Scraper};

const WELCOME: &str = r#"<html>
<head><title>Redfish Exporter</title></head>
<body>
<h1>Redfish Exporter</h1>
<h2>Prometheus exporter for Redfish based server monitoring</h2>
<ul>
    <li>Use <a href="/health">/health</a> to retrieve health metrics.</li>
    <li>Use <a href="/firmware">/firmware</a> to retrieve firmware version metrics.</li>
    <li>Use <a href="/performance">/performance</a> to retrieve power, temperature and fan metrics.</li>
</ul>
</body>
</html>
"#;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Shared by all requests.
pub struct AppState {
    /// `None` when no credentials are configured, scrapes are refused then.
    pub scraper: Option<Arc<Scraper>>,

    /// Deadline of each scrape.
    pub timeout: Duration,
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serve requests until `shutdown` completes, connections still open then
/// are shut down gracefully.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let (trigger, signal) = watch::channel(());
    tokio::pin!(shutdown);

    loop {
        let (conn, peer) = tokio::select! {
            _ = &mut shutdown => break,
            result = listener.accept() => match result {
                Ok((stream, peer)) => (TokioIo::new(stream), peer),
                Err(err) => {
                    error!(message = "Accept new connection failed", %err);
                    continue;
                }
            }
        };

        let state = Arc::clone(&state);
        let mut signal = signal.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(handle(req, state).await) }
            });

            let builder = Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(conn, service);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(err) = result {
                            trace!(message = "Failed to serve http connection", %peer, %err);
                        }

                        break;
                    }
                    _ = signal.changed(), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        });
    }

    let _ = trigger.send(());
}

async fn handle(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let profile = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => {
            return respond(
                StatusCode::OK,
                "text/html; charset=utf-8",
                Bytes::from_static(WELCOME.as_bytes()),
            );
        }
        (&Method::GET, "/health" | "/redfish" | "/metrics") => Profile::Health,
        (&Method::GET, "/firmware") => Profile::Firmware,
        (&Method::GET, "/performance") => Profile::Performance,
        (&Method::GET, _) => return plain(StatusCode::NOT_FOUND, "Not Found\n"),
        _ => return plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n"),
    };

    let Some(target) = target(req.uri()) else {
        warn!(message = "Scrape request without target", uri = %req.uri());
        return plain(StatusCode::BAD_REQUEST, "Missing parameter \"target\"\n");
    };

    let Some(scraper) = &state.scraper else {
        error!(message = "No credentials configured", %target);
        return plain(
            StatusCode::BAD_REQUEST,
            "No credentials found, USERNAME and PASSWORD must be set in the environment\n",
        );
    };

    info!(message = "Scraping target", %target, profile = profile.as_str());

    let metrics = scraper.scrape(&target, state.timeout, profile).await;
    let body = Bytes::from(exposition::encode(&metrics));

    if should_compress(req.headers()) {
        match gzip(&body) {
            Ok(compressed) => {
                let mut resp = respond(StatusCode::OK, exposition::CONTENT_TYPE, compressed);
                resp.headers_mut()
                    .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                return resp;
            }
            Err(err) => warn!(message = "Compress response failed", %err),
        }
    }

    respond(StatusCode::OK, exposition::CONTENT_TYPE, body)
}

fn target(uri: &Uri) -> Option<String> {
    let query = uri.query()?;

    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "target")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn plain(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    respond(
        status,
        "text/plain; charset=utf-8",
        Bytes::from_static(text.as_bytes()),
    )
}

fn should_compress(headers: &HeaderMap) -> bool {
    match headers.get(ACCEPT_ENCODING) {
        Some(value) => match value.to_str() {
            Ok(value) => value.contains("gzip"),
            Err(_err) => false,
        },
        None => false,
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    encoder.finish().map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn target_param() {
        let uri: Uri = "/health?target=10.0.0.1".parse().unwrap();
        assert_eq!(target(&uri).as_deref(), Some("10.0.0.1"));

        let uri: Uri = "/health?module=x&target=bmc%2Dr01.example.com%3A8443"
            .parse()
            .unwrap();
        assert_eq!(target(&uri).as_deref(), Some("bmc-r01.example.com:8443"));

        let uri: Uri = "/health?target=".parse().unwrap();
        assert_eq!(target(&uri), None);

        let uri: Uri = "/health".parse().unwrap();
        assert_eq!(target(&uri), None);
    }

    #[test]
    fn compress() {
        let mut headers = HeaderMap::new();
        assert!(!should_compress(&headers));

        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        assert!(should_compress(&headers));

        let compressed = gzip(b"redfish_up 1\n").unwrap();
        let mut text = String::new();
        GzDecoder::new(compressed.as_ref())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "redfish_up 1\n");
    }
}
