//! Middleware for the relay's HTTP surface: common response headers, HTTP
//! metrics, and request tagging. The bearer-token guard for v2 routes
//! lives in [`auth`].

pub mod auth;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

/// Value of the `Server` header on every API response.
pub const SERVER_VERSION: &str = concat!("beacon-relay-v", env!("CARGO_PKG_VERSION"));

/// Header carrying the relay's request tag.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Sets the JSON and CORS headers common to every API response.
///
/// The content type is only defaulted, so handlers serving non-JSON
/// payloads (the route list, the max-int page) keep their own.
pub async fn common_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_VERSION));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    response
}

/// Records the HTTP call counter, latency histogram and in-flight gauge.
/// Installed first so the measured time covers the whole handler chain.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let started = Instant::now();

    relay_core::metrics::http_in_flight(1.0);
    let response = next.run(req).await;
    relay_core::metrics::http_in_flight(-1.0);

    relay_core::metrics::record_http_request(
        method,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

/// Tags requests as `<relay instance>-<sequence>`.
///
/// The prefix is random per process so tags from relay replicas behind
/// the same CDN stay distinguishable in aggregated logs; the sequence
/// number makes tags cheap to sort and to eyeball for request ordering,
/// which a random-per-request id would lose.
#[derive(Clone)]
pub struct RequestTagger {
    prefix: Arc<str>,
    sequence: Arc<AtomicU64>,
}

impl Default for RequestTagger {
    fn default() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self { prefix: Arc::from(&uuid[..8]), sequence: Arc::new(AtomicU64::new(0)) }
    }
}

impl MakeRequestId for RequestTagger {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let tag = format!("{}-{seq:06}", self.prefix);
        Some(RequestId::new(HeaderValue::from_str(&tag).ok()?))
    }
}

/// Request tagging layers: tag when the caller sent none, then echo the
/// tag into the response. Layers apply in reverse order, so the caller
/// adds the propagate layer before the set layer.
#[must_use]
pub fn request_tag_layers() -> (SetRequestIdLayer<RequestTagger>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::new(X_REQUEST_ID.clone(), RequestTagger::default()),
        PropagateRequestIdLayer::new(X_REQUEST_ID.clone()),
    )
}
