//! HTTP handlers for the beacon API.
//!
//! Every handler decodes the shared path parameters into backend request
//! metadata, calls the shared [`BeaconClient`], and picks a cache policy
//! from the chain's emission schedule so downstream HTTP caches absorb
//! most of the traffic.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use relay_core::{
    client::default_metadata,
    pool::PickOptions,
    BeaconClient, Clock,
};
use relay_proto::beacon::Metadata;

/// Historical beacons are immutable; let caches hold them for a week.
pub const CACHE_IMMUTABLE: &str = "public, max-age=604800, immutable";
/// Something went wrong; make sure nothing caches the answer.
pub const CACHE_DISABLED: &str = "must-revalidate, no-cache, max-age=0";
/// Health answers are never cached.
pub const CACHE_NO_CACHE: &str = "no-cache";

/// Shared handler state.
pub struct AppState {
    pub client: BeaconClient,
    /// Subtracted from the wait before fetching an imminent round.
    pub frontrun: Duration,
    /// Injected wall clock, pinned by tests.
    pub clock: Clock,
}

/// Which beacon a request is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundSpec {
    /// An explicit round; 0 is the "latest available" sentinel.
    Exact(u64),
    /// The next round to be emitted, resolved against the time model.
    Next,
}

/// Whether the response uses the v1 shape (derived randomness) or the v2
/// shape (randomness stripped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    V1,
    V2,
}

fn with_cache(status: StatusCode, cache: &'static str, body: &'static str) -> Response {
    (status, [(header::CACHE_CONTROL, cache)], body).into_response()
}

fn json_body(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Decodes the `chainhash` / `beaconID` path parameters into backend
/// request metadata. Both empty selects the default beacon; when both are
/// set the chain hash wins and the beacon id is ignored with a warning.
fn request_metadata(params: &HashMap<String, String>) -> Result<Metadata, Response> {
    let chainhash = params.get("chainhash").map(String::as_str).unwrap_or("");
    let beacon_id = params.get("beaconID").map(String::as_str).unwrap_or("");

    if chainhash.is_empty() && beacon_id.is_empty() {
        return Ok(default_metadata());
    }

    if chainhash.len() == 64 && !beacon_id.is_empty() {
        tracing::warn!("got both a chainhash and a beaconID, ignoring the beaconID");
    }

    if !beacon_id.is_empty() && chainhash.is_empty() {
        return Ok(Metadata { chain_hash: Vec::new(), beacon_id: beacon_id.to_string() });
    }

    match hex::decode(chainhash) {
        Ok(hash) if hash.len() == 32 => {
            Ok(Metadata { chain_hash: hash, beacon_id: String::new() })
        }
        _ => {
            tracing::error!(chainhash, "unable to decode chainhash as a 32-byte hex string");
            Err(with_cache(StatusCode::BAD_REQUEST, CACHE_DISABLED, "invalid chain hash"))
        }
    }
}

/// `GET /public/{round}` and `GET /{chainhash}/public/{round}`.
pub async fn get_beacon_v1(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    beacon_by_round(&state, &params, Shape::V1).await
}

/// `GET /v2/.../rounds/{round}`.
pub async fn get_beacon_v2(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    beacon_by_round(&state, &params, Shape::V2).await
}

async fn beacon_by_round(
    state: &AppState,
    params: &HashMap<String, String>,
    shape: Shape,
) -> Response {
    let round_str = params.get("round").map(String::as_str).unwrap_or("");
    let Ok(round) = round_str.parse::<u64>() else {
        // malformed rounds never become valid, caches may hold the 400
        return with_cache(StatusCode::BAD_REQUEST, CACHE_IMMUTABLE, "Failed to parse round");
    };
    fetch_beacon(state, params, RoundSpec::Exact(round), shape).await
}

/// `GET /public/latest` and `GET /{chainhash}/public/latest`.
pub async fn get_latest_v1(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    fetch_beacon(&state, &params, RoundSpec::Exact(0), Shape::V1).await
}

/// `GET /v2/.../rounds/latest`.
pub async fn get_latest_v2(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    fetch_beacon(&state, &params, RoundSpec::Exact(0), Shape::V2).await
}

/// `GET /v2/.../rounds/next`: blocks until the next round is emitted.
pub async fn get_next_v2(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    fetch_beacon(&state, &params, RoundSpec::Next, Shape::V2).await
}

/// The beacon-by-round pipeline: resolve the chain, position the request
/// against the emission schedule, wait for an imminent round, fetch, and
/// derive the cache policy.
async fn fetch_beacon(
    state: &AppState,
    params: &HashMap<String, String>,
    spec: RoundSpec,
    shape: Shape,
) -> Response {
    let meta = match request_metadata(params) {
        Ok(meta) => meta,
        Err(resp) => return resp,
    };

    let info = match state.client.get_chain_info(&meta).await {
        Ok(info) => info,
        Err(e) => {
            tracing::error!(error = %e, "error retrieving chain info");
            return if e.is_deadline() {
                with_cache(StatusCode::GATEWAY_TIMEOUT, CACHE_DISABLED, "timeout")
            } else if e.is_unknown_chain() {
                with_cache(StatusCode::BAD_REQUEST, CACHE_DISABLED, "unknown chain hash")
            } else {
                with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_DISABLED, "Failed to get beacon")
            };
        }
    };

    let now = (state.clock)();
    let (next_time, next_round) = info.expected_next(now);
    let round = match spec {
        RoundSpec::Exact(round) => round,
        RoundSpec::Next => next_round,
    };

    // never taken when fetching latest because round == 0
    if round >= next_round + 1 {
        tracing::error!(requested = round, expected = next_round, "future beacon was requested");
        // 425 is meant to flag replay risks, but it is the perfect name
        return with_cache(StatusCode::TOO_EARLY, CACHE_DISABLED, "Requested future beacon");
    } else if round == next_round {
        // wait until the round is supposed to be emitted, minus frontrun
        // to compensate for network latency
        let until_emission = Duration::from_secs((next_time - (state.clock)()).max(0) as u64);
        tokio::time::sleep(until_emission.saturating_sub(state.frontrun)).await;
    }

    let mut beacon = match state.client.get_beacon(&meta, round).await {
        Ok(beacon) => beacon,
        Err(e) => {
            tracing::error!(error = %e, round, "all backends unable to provide the beacon");
            return with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_DISABLED, "Failed to get beacon");
        }
    };

    match shape {
        // nodes no longer send randomness over the wire, derive it
        Shape::V1 => beacon.set_randomness(),
        // the v2 shape never marshals randomness
        Shape::V2 => beacon.unset_randomness(),
    }

    let body = match serde_json::to_vec(&beacon) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "unable to encode beacon");
            return with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_DISABLED, "Failed to encode beacon");
        }
    };

    let cache = if round != 0 {
        // not fetching latest: these beacons are immutable
        CACHE_IMMUTABLE.to_string()
    } else {
        // stop caching in time for the next round
        let cache_time = (next_time - (state.clock)()).max(0);
        tracing::debug!(cache_time, "serving latest beacon");
        format!("public, must-revalidate, max-age={cache_time}")
    };

    (
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, cache),
            (header::CONTENT_TYPE, "application/json".to_string()),
        ],
        body,
    )
        .into_response()
}

/// `GET /health` family: compares the latest beacon served by the picked
/// backend against the predicted round, forcing one retry past the
/// preferred backend when it looks stuck on an old beacon.
pub async fn get_health(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    // health answers are never cached (rate limiting happens upstream)
    let meta = match request_metadata(&params) {
        Ok(meta) => meta,
        Err(resp) => return resp,
    };

    let mut latest = match state.client.get_beacon(&meta, 0).await {
        Ok(beacon) => beacon,
        Err(e) => {
            tracing::error!(error = %e, "failed to get latest beacon for health");
            return with_cache(
                StatusCode::INTERNAL_SERVER_ERROR,
                CACHE_NO_CACHE,
                "Failed to get latest beacon for health",
            );
        }
    };

    let info = match state.client.get_chain_info(&meta).await {
        Ok(info) => info,
        Err(e) => {
            tracing::error!(error = %e, "failed to get chain info for health");
            return with_cache(
                StatusCode::INTERNAL_SERVER_ERROR,
                CACHE_NO_CACHE,
                "Failed to get chain info for health",
            );
        }
    };

    let (_, next) = info.expected_next((state.clock)());
    if next.saturating_sub(2) > latest.round {
        // the picked backend is two or more rounds behind; force a retry
        // past it in case it is stuck on an old latest beacon
        tracing::debug!(current = latest.round, expected = next, "forcing retry with other subchannel");
        latest = match state
            .client
            .get_beacon_with(&meta, 0, PickOptions { skip_first: true })
            .await
        {
            Ok(beacon) => beacon,
            Err(e) => {
                tracing::error!(error = %e, "failed to get latest beacon for health");
                return with_cache(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    CACHE_NO_CACHE,
                    "Failed to get latest beacon for health",
                );
            }
        };
    }

    let status = if latest.round >= next.saturating_sub(2) {
        StatusCode::OK
    } else {
        tracing::debug!(current = latest.round, expected = next.saturating_sub(1), "backend is stale");
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "current": latest.round,
        "expected": next.saturating_sub(1),
    });
    (
        status,
        [
            (header::CACHE_CONTROL, CACHE_NO_CACHE),
            (header::CONTENT_TYPE, "application/json"),
        ],
        body.to_string(),
    )
        .into_response()
}

/// `GET /chains` and `GET /v2/chains`.
pub async fn get_chains(State(state): State<Arc<AppState>>) -> Response {
    match state.client.get_chains().await {
        Ok(chains) => match serde_json::to_vec(&chains) {
            Ok(body) => json_body(body),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode chains");
                with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_NO_CACHE, "Failed to encode chains")
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to get chains from all backends");
            with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_NO_CACHE, "Failed to get chains")
        }
    }
}

/// `GET /v2/beacons`.
pub async fn get_beacon_ids(State(state): State<Arc<AppState>>) -> Response {
    match state.client.get_beacon_ids().await {
        Ok(ids) => match serde_json::to_vec(&ids) {
            Ok(body) => json_body(body),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode beacon ids");
                with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_NO_CACHE, "Failed to produce beacon ids")
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to get beacon ids");
            with_cache(StatusCode::SERVICE_UNAVAILABLE, CACHE_NO_CACHE, "Failed to get beacon ids")
        }
    }
}

/// `GET /info` and `GET /{chainhash}/info`: the V1 projection.
pub async fn get_info_v1(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    let meta = match request_metadata(&params) {
        Ok(meta) => meta,
        Err(resp) => return resp,
    };
    match state.client.get_chain_info(&meta).await {
        Ok(info) => match serde_json::to_vec(&info.v1()) {
            Ok(body) => json_body(body),
            Err(e) => {
                tracing::error!(error = %e, "unable to encode chain info");
                with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_NO_CACHE, "Failed to encode ChainInfo")
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to get chain info from all backends");
            with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_NO_CACHE, "Failed to get ChainInfo")
        }
    }
}

/// `GET /v2/.../info`: the V2 shape.
pub async fn get_info_v2(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    let meta = match request_metadata(&params) {
        Ok(meta) => meta,
        Err(resp) => return resp,
    };
    match state.client.get_chain_info(&meta).await {
        Ok(info) => match serde_json::to_vec(info.as_ref()) {
            Ok(body) => json_body(body),
            Err(e) => {
                tracing::error!(error = %e, "unable to encode chain info");
                with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_NO_CACHE, "Failed to encode ChainInfo")
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to get chain info");
            with_cache(StatusCode::INTERNAL_SERVER_ERROR, CACHE_NO_CACHE, "Failed to get ChainInfo")
        }
    }
}

/// Static page served for `GET /public/18446744073709551615`.
///
/// Some client libraries treat "latest" as `MaxInt64`-style sentinels and
/// underflow into the largest u64; answering from the edge keeps that bug
/// from ever reaching a backend.
const MAX_INT_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Nice try</title></head>\n<body>\n<h1>Round 18446744073709551615 does not exist</h1>\n<p>Your client asked for the largest round a 64-bit integer can hold.\nThis is the signature of an integer underflow: a client library treating\nthe \"latest\" sentinel as MaxInt64 and subtracting past zero. The beacon\nchain will reach this round long after the heat death of the universe, so\nthis answer is served statically and cached forever. Fix the client to\nrequest <code>/public/latest</code> instead.</p>\n</body>\n</html>\n";

/// `GET /public/18446744073709551615`: never forwarded to a backend.
pub async fn send_max_int() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CACHE_CONTROL, CACHE_IMMUTABLE),
        ],
        MAX_INT_PAGE,
    )
        .into_response()
}

/// `GET /ping`: uptime probe for load balancers.
pub async fn ping() -> &'static str {
    "."
}

/// `GET /favicon.ico`: explicitly not served.
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
