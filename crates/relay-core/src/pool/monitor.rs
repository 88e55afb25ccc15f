//! Subchannel connectivity monitoring.
//!
//! The transport library does not surface subchannel state transitions,
//! so one monitor task per backend owns the READY lifecycle: connect,
//! register the channel with the pool, probe it with the standard gRPC
//! health check, and on a failed probe remove it and reconnect with
//! exponential backoff. A pool entry therefore exists exactly while the
//! most recent transport report was READY.

use std::{sync::Arc, time::Duration};

use relay_proto::health::{
    health_check_response::ServingStatus, health_client::HealthClient, HealthCheckRequest,
};
use tokio::sync::broadcast;
use tonic::transport::{Channel, Endpoint};

use crate::{
    error::ClientError,
    pool::{BackendAddr, FallbackPool},
};

/// Tuning knobs for the per-backend monitor tasks.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between health probes while a subchannel is READY.
    pub probe_interval: Duration,
    /// Timeout applied to each probe.
    pub probe_timeout: Duration,
    /// Timeout for each connection attempt.
    pub connect_timeout: Duration,
    /// First reconnect delay after a lost subchannel.
    pub initial_backoff: Duration,
    /// Reconnect delay ceiling.
    pub max_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(3),
            probe_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(3),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Handle over the running monitor tasks.
pub struct SubchannelMonitor {
    recheck_tx: broadcast::Sender<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl SubchannelMonitor {
    /// Connects to every backend once, registering the successes with the
    /// pool, then spawns the per-backend watch loops. Returns even when
    /// no backend is reachable; the caller decides whether an empty pool
    /// is fatal (client construction does, via its cache pre-warm).
    pub async fn start(
        pool: Arc<FallbackPool>,
        addrs: &[BackendAddr],
        config: MonitorConfig,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Result<Self, ClientError> {
        let (recheck_tx, _) = broadcast::channel(4);

        let mut endpoints = Vec::with_capacity(addrs.len());
        for addr in addrs {
            endpoints.push((addr.clone(), endpoint_for(addr, &config)?));
        }

        let connected = futures::future::join_all(endpoints.into_iter().map(
            |(addr, endpoint)| async move {
                let conn = endpoint.connect().await;
                (addr, endpoint, conn)
            },
        ))
        .await;

        let mut handles = Vec::with_capacity(connected.len());
        for (addr, endpoint, conn) in connected {
            let ready = match conn {
                Ok(channel) => {
                    let id = pool.register(&addr.addr, addr.priority as i64, channel.clone());
                    Some((channel, id))
                }
                Err(e) => {
                    tracing::warn!(addr = %addr.addr, error = %e, "initial backend connection failed");
                    None
                }
            };
            handles.push(tokio::spawn(run_monitor(
                Arc::clone(&pool),
                addr,
                endpoint,
                ready,
                config.clone(),
                shutdown_tx.subscribe(),
                recheck_tx.subscribe(),
            )));
        }

        Ok(Self { recheck_tx, handles })
    }

    /// Asks every monitor to probe its subchannel now instead of waiting
    /// for the next interval. Used when an RPC fails with a
    /// transport-level status.
    pub fn recheck(&self) {
        let _ = self.recheck_tx.send(());
    }

    /// Aborts any monitor task that has not yet observed the shutdown
    /// broadcast.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn endpoint_for(addr: &BackendAddr, config: &MonitorConfig) -> Result<Endpoint, ClientError> {
    Endpoint::from_shared(format!("http://{}", addr.addr))
        .map_err(|_| ClientError::InvalidEndpoint(addr.addr.clone()))
        .map(|e| e.connect_timeout(config.connect_timeout))
}

async fn run_monitor(
    pool: Arc<FallbackPool>,
    addr: BackendAddr,
    endpoint: Endpoint,
    ready: Option<(Channel, u64)>,
    config: MonitorConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut recheck_rx: broadcast::Receiver<()>,
) {
    let mut backoff = config.initial_backoff;
    let mut ready = ready;

    loop {
        match ready.take() {
            Some((channel, id)) => {
                backoff = config.initial_backoff;
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            pool.remove(id);
                            return;
                        }
                        _ = tokio::time::sleep(config.probe_interval) => {}
                        _ = recheck_rx.recv() => {}
                    }
                    if !probe(&channel, config.probe_timeout).await {
                        pool.remove(id);
                        break;
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                match endpoint.connect().await {
                    Ok(channel) => {
                        let id = pool.register(&addr.addr, addr.priority as i64, channel.clone());
                        ready = Some((channel, id));
                    }
                    Err(e) => {
                        tracing::debug!(
                            addr = %addr.addr,
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "backend reconnect failed, backing off"
                        );
                        backoff = std::cmp::min(backoff * 2, config.max_backoff);
                    }
                }
            }
        }
    }
}

async fn probe(channel: &Channel, timeout: Duration) -> bool {
    let mut client = HealthClient::new(channel.clone());
    let request = HealthCheckRequest { service: String::new() };
    match tokio::time::timeout(timeout, client.check(request)).await {
        Ok(Ok(resp)) => resp.into_inner().status == ServingStatus::Serving as i32,
        Ok(Err(status)) => {
            tracing::debug!(code = ?status.code(), "health probe failed");
            false
        }
        Err(_) => {
            tracing::debug!("health probe timed out");
            false
        }
    }
}
