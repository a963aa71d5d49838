use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// HTTP status code 401, with the challenge a BMC sends
pub fn unauthorized() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("www-authenticate", "Basic realm=\"Redfish\"")
        .body(Full::new("401 Unauthorized\n".into()))
        .unwrap()
}

/// HTTP status code 404
pub fn not_found() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new("Not Found".into()))
        .unwrap()
}
