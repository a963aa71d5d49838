use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use redfish_exporter::config::Credentials;
use redfish_exporter::http::HttpClient;
use redfish_exporter::redfish::{ScrapeOptions, Scraper, SessionCache};
use redfish_exporter::server::{self, AppState};
use serde_json::json;
use testify::bmc::MockBmc;
use testify::wait::wait_for_tcp;
use tokio::sync::oneshot;

struct Exporter {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Exporter {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start(scraper: Option<Scraper>) -> Exporter {
    let addr = testify::next_addr();
    let listener = server::bind(addr).await.unwrap();
    let state = Arc::new(AppState {
        scraper: scraper.map(Arc::new),
        timeout: Duration::from_secs(5),
    });

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server::serve(listener, state, async move {
        let _ = rx.await;
    }));
    wait_for_tcp(addr).await;

    Exporter {
        addr,
        shutdown: Some(tx),
    }
}

fn scraper() -> Scraper {
    let http: HttpClient = HttpClient::new().unwrap();

    Scraper::new(
        http,
        Arc::new(SessionCache::new(Duration::from_secs(300))),
        Credentials {
            username: "admin".into(),
            password: "secret".into(),
        },
        ScrapeOptions::default(),
    )
}

async fn request(
    exporter: &Exporter,
    method: Method,
    path_and_query: &str,
    gzip: bool,
) -> (StatusCode, http::HeaderMap, Bytes) {
    let client: HttpClient = HttpClient::new().unwrap();

    let mut req = Request::new(Full::default());
    *req.method_mut() = method;
    *req.uri_mut() = format!("http://{}{}", exporter.addr, path_and_query)
        .parse()
        .unwrap();
    if gzip {
        req.headers_mut()
            .insert(ACCEPT_ENCODING, "gzip, deflate".parse().unwrap());
    }

    let resp = client.send(req).await.unwrap();
    let (parts, incoming) = resp.into_parts();
    let body = incoming.collect().await.unwrap().to_bytes();

    (parts.status, parts.headers, body)
}

async fn get(exporter: &Exporter, path_and_query: &str) -> (StatusCode, String) {
    let (status, _headers, body) = request(exporter, Method::GET, path_and_query, false).await;
    (status, String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn welcome_page() {
    let exporter = start(None).await;

    let (status, body) = get(&exporter, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Redfish Exporter"));
    assert!(body.contains("href=\"/health\""));
    assert!(body.contains("href=\"/firmware\""));
    assert!(body.contains("href=\"/performance\""));
}

#[tokio::test]
async fn unknown_path() {
    let exporter = start(Some(scraper())).await;

    let (status, _) = get(&exporter, "/nope?target=10.0.0.1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _headers, _body) =
        request(&exporter, Method::POST, "/health?target=10.0.0.1", false).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn missing_target() {
    let exporter = start(Some(scraper())).await;

    for path in ["/health", "/health?target=", "/firmware?target=%20", "/performance?foo=bar"] {
        let (status, body) = get(&exporter, path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "path: {path}");
        assert!(body.contains("target"), "path: {path}");
    }
}

#[tokio::test]
async fn missing_credentials() {
    let exporter = start(None).await;

    let (status, body) = get(&exporter, "/health?target=10.0.0.1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("USERNAME"));
}

#[tokio::test]
async fn scrape_endpoint() {
    let bmc = MockBmc::builder()
        .credentials("admin", "secret")
        .sessions(600)
        .resource(
            "/redfish/v1",
            json!({
                "@odata.type": "#ServiceRoot.v1_11_0.ServiceRoot",
                "RedfishVersion": "1.11.0",
                "Systems": {"@odata.id": "/redfish/v1/Systems"},
            }),
        )
        .resource(
            "/redfish/v1/Systems",
            json!({"Members": [{"@odata.id": "/redfish/v1/Systems/1"}]}),
        )
        .resource(
            "/redfish/v1/Systems/1",
            json!({
                "@odata.type": "#ComputerSystem.v1_13_0.ComputerSystem",
                "Id": "1",
                "PowerState": "Off",
                "Status": {"State": "Enabled", "Health": "OK"},
            }),
        )
        .start()
        .await;
    let exporter = start(Some(scraper())).await;
    let path = format!("/health?target={}", bmc.url());

    let (status, headers, body) = request(&exporter, Method::GET, &path, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(CONTENT_TYPE).unwrap(),
        "text/plain; version=0.0.4; charset=utf-8"
    );

    let text = String::from_utf8_lossy(&body).into_owned();
    let target = bmc.url();
    assert!(text.contains("# TYPE redfish_up gauge"));
    assert!(text.contains(&format!("redfish_up{{target=\"{target}\"}} 1")));
    assert!(text.contains(&format!("redfish_powerstate{{target=\"{target}\"}} 0")));
    assert!(text.contains(&format!(
        "redfish_health{{device_name=\"1\",device_type=\"system\",target=\"{target}\"}} 1"
    )));

    // same body, compressed
    let (status, headers, body) = request(&exporter, Method::GET, &path, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(CONTENT_ENCODING).unwrap(), "gzip");

    let mut decompressed = String::new();
    GzDecoder::new(body.as_ref())
        .read_to_string(&mut decompressed)
        .unwrap();
    assert!(decompressed.contains(&format!("redfish_up{{target=\"{target}\"}} 1")));
}

#[tokio::test]
async fn unreachable_target_still_answers() {
    let exporter = start(Some(scraper())).await;
    let dead = testify::next_addr();

    let (status, body) = get(&exporter, &format!("/health?target=http://{dead}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(&format!("redfish_up{{target=\"http://{dead}\"}} 0")));
}
