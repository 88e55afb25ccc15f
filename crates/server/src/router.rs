//! Route table for the relay.
//!
//! The v1 family keeps the historical layout (`/public/...`); v2 nests
//! everything under `/v2/chains/{chainhash}` and `/v2/beacons/{beaconID}`.
//! `GET /` answers 404 with the plain-text route list so humans poking at
//! the relay can discover the API.

use std::sync::Arc;

use axum::{
    http::{header, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::{
    handlers::{self, AppState, CACHE_IMMUTABLE},
    middleware::{self, auth::AuthVerifier},
};

/// Every advertised route, as shown on the route-list page. The max-int
/// trap is deliberately absent.
const ROUTES: &[&str] = &[
    "GET /chains",
    "GET /info",
    "GET /health",
    "GET /public/latest",
    "GET /public/{round}",
    "GET /{chainhash}/info",
    "GET /{chainhash}/health",
    "GET /{chainhash}/public/latest",
    "GET /{chainhash}/public/{round}",
    "GET /v2/chains",
    "GET /v2/beacons",
    "GET /v2/chains/{chainhash}/info",
    "GET /v2/chains/{chainhash}/health",
    "GET /v2/chains/{chainhash}/rounds/{round}",
    "GET /v2/chains/{chainhash}/rounds/latest",
    "GET /v2/chains/{chainhash}/rounds/next",
    "GET /v2/beacons/{beaconID}/info",
    "GET /v2/beacons/{beaconID}/health",
    "GET /v2/beacons/{beaconID}/rounds/{round}",
    "GET /v2/beacons/{beaconID}/rounds/latest",
    "GET /v2/beacons/{beaconID}/rounds/next",
];

/// Renders the route list, v1 routes sorted before v2.
#[must_use]
pub fn render_route_list() -> String {
    let mut routes: Vec<&str> = ROUTES.to_vec();
    routes.sort_by(|a, b| {
        let a_v2 = a.starts_with("GET /v2");
        let b_v2 = b.starts_with("GET /v2");
        match (a_v2, b_v2) {
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            _ => a.cmp(b),
        }
    });
    routes.join("\n")
}

async fn display_routes(routes: Arc<str>) -> Response {
    (
        StatusCode::NOT_FOUND,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::HeaderName::from_static("x-content-type-options"), "nosniff"),
            (header::CACHE_CONTROL, CACHE_IMMUTABLE),
        ],
        routes.to_string(),
    )
        .into_response()
}

/// Builds the public router.
///
/// `auth` guards the v2 group when present; the caller resolves it from
/// the environment so a missing secret only disables the guard.
#[must_use]
pub fn create_router(state: Arc<AppState>, auth: Option<Arc<AuthVerifier>>) -> Router {
    let v1 = Router::new()
        .route("/chains", get(handlers::get_chains))
        .route("/info", get(handlers::get_info_v1))
        .route("/health", get(handlers::get_health))
        .route("/public/latest", get(handlers::get_latest_v1))
        .route("/public/{round}", get(handlers::get_beacon_v1))
        // answered at the edge; a backend can never serve this round
        .route("/public/18446744073709551615", get(handlers::send_max_int))
        .route("/{chainhash}/info", get(handlers::get_info_v1))
        .route("/{chainhash}/health", get(handlers::get_health))
        .route("/{chainhash}/public/latest", get(handlers::get_latest_v1))
        .route("/{chainhash}/public/{round}", get(handlers::get_beacon_v1))
        .layer(from_fn(middleware::common_headers));

    let mut v2 = Router::new()
        .route("/chains", get(handlers::get_chains))
        .route("/beacons", get(handlers::get_beacon_ids))
        .route("/chains/{chainhash}/info", get(handlers::get_info_v2))
        .route("/chains/{chainhash}/health", get(handlers::get_health))
        .route("/chains/{chainhash}/rounds/{round}", get(handlers::get_beacon_v2))
        .route("/chains/{chainhash}/rounds/latest", get(handlers::get_latest_v2))
        .route("/chains/{chainhash}/rounds/next", get(handlers::get_next_v2))
        .route("/beacons/{beaconID}/info", get(handlers::get_info_v2))
        .route("/beacons/{beaconID}/health", get(handlers::get_health))
        .route("/beacons/{beaconID}/rounds/{round}", get(handlers::get_beacon_v2))
        .route("/beacons/{beaconID}/rounds/latest", get(handlers::get_latest_v2))
        .route("/beacons/{beaconID}/rounds/next", get(handlers::get_next_v2))
        .layer(from_fn(middleware::common_headers));

    if let Some(verifier) = auth {
        v2 = v2.layer(from_fn_with_state(verifier, middleware::auth::require_bearer));
    }

    let routes_text: Arc<str> = Arc::from(render_route_list());
    let display = move || {
        let routes = Arc::clone(&routes_text);
        async move { display_routes(routes).await }
    };

    let (set_request_tag, propagate_request_tag) = middleware::request_tag_layers();

    Router::new()
        .nest("/v2", v2)
        .merge(v1)
        .route("/", get(display))
        .route("/ping", get(handlers::ping))
        .route("/favicon.ico", get(handlers::not_found))
        .layer(propagate_request_tag)
        .layer(set_request_tag)
        // metrics outermost so the measured time covers everything
        .layer(from_fn(middleware::track_metrics))
        .with_state(state)
}
