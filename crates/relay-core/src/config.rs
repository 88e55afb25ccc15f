//! Relay configuration.
//!
//! All knobs come from CLI flags (see the `server` crate); this struct is
//! the validated, typed form handed to the client and handler constructors.

use std::time::Duration;

/// Validated relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP listen address for the public API. Defaults to `localhost:8080`.
    pub bind: String,

    /// HTTP listen address for the Prometheus endpoint. Defaults to
    /// `localhost:9999`.
    pub metrics_bind: String,

    /// Ordered, comma-separated backend `host:port` list. The first entry
    /// is the preferred backend. Defaults to `localhost:4444`.
    pub backends: String,

    /// Guard v2 routes with bearer-token verification.
    pub enable_auth: bool,

    /// Duration subtracted from the wait before fetching an imminent
    /// round, to compensate for network latency. Clamped to >= 0.
    pub frontrun: Duration,

    /// Timeout applied to backend health checks. Defaults to 3 s.
    pub check_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "localhost:8080".to_string(),
            metrics_bind: "localhost:9999".to_string(),
            backends: "localhost:4444".to_string(),
            enable_auth: false,
            frontrun: Duration::ZERO,
            check_timeout: Duration::from_secs(3),
        }
    }
}

impl RelayConfig {
    /// Builds a config from raw flag values. `frontrun_ms` below zero is
    /// clamped to zero.
    #[must_use]
    pub fn from_flags(
        bind: String,
        metrics_bind: String,
        backends: String,
        enable_auth: bool,
        frontrun_ms: i64,
    ) -> Self {
        Self {
            bind,
            metrics_bind,
            backends,
            enable_auth,
            frontrun: Duration::from_millis(frontrun_ms.max(0) as u64),
            ..Self::default()
        }
    }
}
