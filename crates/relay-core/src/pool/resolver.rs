//! Static name resolution for the operator-supplied backend list.
//!
//! The list is parsed once at startup and never re-resolved; each entry's
//! position is its priority (index 0 = most preferred).

use crate::error::ClientError;

/// Scheme tag composing the displayed RPC target,
/// `fallback:///host1:p1,host2:p2`.
pub const FALLBACK_SCHEME: &str = "fallback";

/// A resolved backend address with its failover priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddr {
    pub addr: String,
    /// Index in the operator's list; lower is more preferred.
    pub priority: usize,
}

/// Parses a comma-separated `host:port` list into ordered address records.
///
/// Fails fast on an empty list or a malformed entry so a bad flag is
/// caught at process start rather than on the first pick.
pub fn resolve(endpoints: &str) -> Result<Vec<BackendAddr>, ClientError> {
    let mut addrs = Vec::new();
    for (priority, raw) in endpoints.split(',').enumerate() {
        let entry = raw.trim();
        split_host_port(entry)?;
        tracing::info!(host = entry, priority, "adding backend address to pool");
        addrs.push(BackendAddr { addr: entry.to_string(), priority });
    }
    if addrs.is_empty() {
        return Err(ClientError::InvalidEndpoint(endpoints.to_string()));
    }
    Ok(addrs)
}

/// Composes the displayed RPC target for an endpoint list.
#[must_use]
pub fn target(endpoints: &str) -> String {
    format!("{FALLBACK_SCHEME}:///{endpoints}")
}

/// Validates a `host:port` entry, tolerating bracketed IPv6 literals.
fn split_host_port(entry: &str) -> Result<(&str, u16), ClientError> {
    let (host, port) = entry
        .rsplit_once(':')
        .ok_or_else(|| ClientError::InvalidEndpoint(entry.to_string()))?;
    if host.is_empty() {
        return Err(ClientError::InvalidEndpoint(entry.to_string()));
    }
    let port: u16 =
        port.parse().map_err(|_| ClientError::InvalidEndpoint(entry.to_string()))?;
    Ok((host, port))
}
