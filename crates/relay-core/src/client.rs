//! Backend client over the fallback pool.
//!
//! One instance is shared by every HTTP handler. Chain info is cached
//! process-wide under both the hex chain-hash and the beacon id; the
//! cache is pre-warmed at construction and never evicted.

use std::{future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use relay_proto::beacon::{
    public_client::PublicClient, ChainInfoRequest, ListBeaconIdsRequest, Metadata,
    PublicRandRequest,
};
use relay_proto::health::{
    health_check_response::ServingStatus, health_client::HealthClient, HealthCheckRequest,
};
use tokio::sync::{broadcast, mpsc};
use tonic::transport::Channel;

use crate::{
    chain::ChainInfo,
    config::RelayConfig,
    error::ClientError,
    metrics,
    pool::{self, FallbackPool, MonitorConfig, PickOptions, SubchannelMonitor,
        PRIORITY_RESET_INTERVAL},
    HexBeacon,
};

/// Beacon id used when a request names neither a chain hash nor an id.
pub const DEFAULT_BEACON_ID: &str = "default";

/// Per-call timeout for unary RPCs, independent of the caller's deadline.
const UNARY_TIMEOUT_MS: u64 = 500;

/// Returns request metadata selecting the default beacon process.
#[must_use]
pub fn default_metadata() -> Metadata {
    Metadata { chain_hash: Vec::new(), beacon_id: DEFAULT_BEACON_ID.to_string() }
}

/// Client for the backend beacon nodes, load-balanced over the fallback
/// pool. Cloning is done by wrapping in `Arc`; the pool and the cache are
/// shared state.
pub struct BeaconClient {
    pool: Arc<FallbackPool>,
    monitor: SubchannelMonitor,
    target: String,
    known_chains: DashMap<String, Arc<ChainInfo>>,
    check_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl BeaconClient {
    /// Dials every configured backend, starts the connectivity monitors
    /// and the priority reset ticker, then pre-warms the chain-info cache
    /// via [`Self::get_chains`]. Construction fails when the endpoint
    /// list is malformed or no backend can serve the pre-warm call.
    pub async fn new(config: &RelayConfig) -> Result<Self, ClientError> {
        let addrs = pool::resolve(&config.backends)?;
        let target = pool::target(&config.backends);
        tracing::debug!(%target, "building beacon client");

        let pool = Arc::new(FallbackPool::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        let monitor =
            SubchannelMonitor::start(Arc::clone(&pool), &addrs, MonitorConfig::default(), &shutdown_tx)
                .await?;
        pool.start_reset_ticker(PRIORITY_RESET_INTERVAL, shutdown_tx.subscribe());

        let client = Self {
            pool,
            monitor,
            target,
            known_chains: DashMap::new(),
            check_timeout: config.check_timeout,
            shutdown_tx,
        };

        if let Err(e) = client.get_chains().await {
            client.close();
            return Err(e);
        }
        Ok(client)
    }

    /// Fetches the requested beacon. Rounds start at 1; round 0 returns
    /// the latest, and asking for the next unemitted round will most
    /// likely block backend-side until it is produced.
    ///
    /// Retries exactly once on failure; the second attempt naturally hits
    /// another backend on a multi-node pool because the first error
    /// demoted the picked subchannel.
    pub async fn get_beacon(&self, meta: &Metadata, round: u64) -> Result<HexBeacon, ClientError> {
        self.get_beacon_with(meta, round, PickOptions::default()).await
    }

    /// As [`Self::get_beacon`] with explicit pick options, letting callers
    /// force the pool past the preferred backend.
    pub async fn get_beacon_with(
        &self,
        meta: &Metadata,
        round: u64,
        opts: PickOptions,
    ) -> Result<HexBeacon, ClientError> {
        let request = PublicRandRequest { round, metadata: Some(meta.clone()) };

        let first = request.clone();
        let result = self
            .unary("PublicRand", opts, move |ch| async move {
                PublicClient::new(ch).public_rand(first).await
            })
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(first_err) => {
                tracing::warn!(error = %first_err, round, "PublicRand failed, retrying through the pool");
                self.unary("PublicRand", opts, move |ch| async move {
                    PublicClient::new(ch).public_rand(request).await
                })
                .await?
            }
        };
        Ok(resp.into())
    }

    /// Streams beacons as they are emitted. The receiver ends when the
    /// server stream closes, errors, or the client is shut down; dropping
    /// the receiver ends the producer task.
    pub async fn watch(&self, meta: &Metadata) -> Result<mpsc::Receiver<HexBeacon>, ClientError> {
        let pick = self.pool.pick(PickOptions::default())?;
        let request = PublicRandRequest { round: 0, metadata: Some(meta.clone()) };

        let mut stream = match PublicClient::new(pick.channel()).public_rand_stream(request).await {
            Ok(resp) => resp.into_inner(),
            Err(status) => {
                pick.done(false);
                return Err(status.into());
            }
        };

        let (tx, rx) = mpsc::channel(1);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    () = tx.closed() => break,
                    msg = stream.message() => match msg {
                        Ok(Some(resp)) => {
                            if tx.send(HexBeacon::from(resp)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(status) => {
                            tracing::error!(error = %status, "beacon stream error");
                            pick.done(false);
                            break;
                        }
                    },
                }
            }
        });
        Ok(rx)
    }

    /// Returns the chain info selected by `meta`, hitting the in-process
    /// cache first. The metadata should carry either a chain hash or a
    /// beacon id, not both; chain hash wins in the cache key.
    pub async fn get_chain_info(&self, meta: &Metadata) -> Result<Arc<ChainInfo>, ClientError> {
        let key = cache_key(meta);
        if let Some(info) = self.known_chains.get(&key) {
            return Ok(Arc::clone(&info));
        }
        tracing::debug!(cache = "MISS", "chain info lookup");

        let request = ChainInfoRequest { metadata: Some(meta.clone()) };
        let packet = self
            .unary("ChainInfo", PickOptions::default(), move |ch| async move {
                PublicClient::new(ch).chain_info(request).await
            })
            .await?;

        let info = Arc::new(ChainInfo::from_packet(packet));
        self.store_chain(&info);
        Ok(info)
    }

    /// Returns the hex chain-hashes available on the backends, fetching
    /// and caching the chain info of any hash not seen before. One
    /// `ListBeaconIds` plus up to n `ChainInfo` calls, so a relatively
    /// noisy path.
    pub async fn get_chains(&self) -> Result<Vec<String>, ClientError> {
        let resp = self
            .unary("ListBeaconIds", PickOptions::default(), |ch| async move {
                PublicClient::new(ch).list_beacon_ids(ListBeaconIdsRequest {}).await
            })
            .await?;

        if resp.ids.len() != resp.metadatas.len() {
            return Err(ClientError::InvalidResponse(format!(
                "received {} beacon ids but {} metadata packets",
                resp.ids.len(),
                resp.metadatas.len()
            )));
        }

        let mut chains = Vec::with_capacity(resp.metadatas.len());
        for meta in resp.metadatas {
            let chain_hex = hex::encode(&meta.chain_hash);
            chains.push(chain_hex.clone());
            if self.known_chains.contains_key(&chain_hex) {
                continue;
            }

            let request = ChainInfoRequest {
                metadata: Some(Metadata {
                    chain_hash: meta.chain_hash.clone(),
                    beacon_id: String::new(),
                }),
            };
            let packet = self
                .unary("ChainInfo", PickOptions::default(), move |ch| async move {
                    PublicClient::new(ch).chain_info(request).await
                })
                .await?;

            if packet.hash != meta.chain_hash {
                return Err(ClientError::InvalidResponse(format!(
                    "invalid chainhash {:?} for chain {chain_hex:?}",
                    hex::encode(&packet.hash)
                )));
            }

            let info = Arc::new(ChainInfo::from_packet(packet));
            self.store_chain(&info);
        }
        Ok(chains)
    }

    /// Returns the beacon process ids running on the backends.
    pub async fn get_beacon_ids(&self) -> Result<Vec<String>, ClientError> {
        let resp = self
            .unary("ListBeaconIds", PickOptions::default(), |ch| async move {
                PublicClient::new(ch).list_beacon_ids(ListBeaconIdsRequest {}).await
            })
            .await?;
        Ok(resp.ids)
    }

    /// Standard gRPC health check against a pooled backend, with one
    /// retry. Each attempt is bounded by the configured check timeout.
    pub async fn check(&self) -> Result<(), ClientError> {
        if let Err(e) = self.check_once().await {
            tracing::debug!(error = %e, "health check failed, retrying");
            return self.check_once().await;
        }
        Ok(())
    }

    async fn check_once(&self) -> Result<(), ClientError> {
        let pick = self.pool.pick(PickOptions::default())?;
        let request = HealthCheckRequest { service: String::new() };
        match tokio::time::timeout(
            self.check_timeout,
            HealthClient::new(pick.channel()).check(request),
        )
        .await
        {
            Ok(Ok(resp)) => {
                pick.done(true);
                if resp.into_inner().status == ServingStatus::Serving as i32 {
                    Ok(())
                } else {
                    Err(ClientError::NotServing)
                }
            }
            Ok(Err(status)) => {
                pick.done(false);
                Err(status.into())
            }
            Err(_) => {
                pick.done(false);
                Err(ClientError::DeadlineExceeded(self.check_timeout.as_millis() as u64))
            }
        }
    }

    /// Shuts down the monitor tasks and the reset ticker, which in turn
    /// ends any open watch stream.
    pub fn close(&self) {
        tracing::debug!("client closing");
        let _ = self.shutdown_tx.send(());
        self.monitor.abort();
    }

    /// Number of backends currently READY.
    #[must_use]
    pub fn ready_backends(&self) -> usize {
        self.pool.len()
    }

    /// Stores chain info under both its key spaces: the hex chain-hash
    /// and, when present, the beacon id.
    fn store_chain(&self, info: &Arc<ChainInfo>) {
        self.known_chains.insert(info.hash.to_string(), Arc::clone(info));
        if !info.beacon_id.is_empty() {
            self.known_chains.insert(info.beacon_id.clone(), Arc::clone(info));
        }
    }

    /// Runs one unary RPC against a picked subchannel with the per-call
    /// timeout, reporting the outcome to the pool and the metrics. A
    /// transport-level failure nudges the connectivity monitors.
    async fn unary<T, F, Fut>(
        &self,
        method: &'static str,
        opts: PickOptions,
        call: F,
    ) -> Result<T, ClientError>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = Result<tonic::Response<T>, tonic::Status>>,
    {
        let pick = self.pool.pick(opts)?;
        let started = std::time::Instant::now();
        let result =
            tokio::time::timeout(Duration::from_millis(UNARY_TIMEOUT_MS), call(pick.channel()))
                .await;
        match result {
            Ok(Ok(resp)) => {
                pick.done(true);
                metrics::record_rpc(method, "ok", started.elapsed());
                tracing::debug!(method, remote = pick.addr(), "rpc done");
                Ok(resp.into_inner())
            }
            Ok(Err(status)) => {
                pick.done(false);
                metrics::record_rpc(method, "error", started.elapsed());
                tracing::debug!(method, remote = pick.addr(), code = ?status.code(), "rpc failed");
                if status.code() == tonic::Code::Unavailable {
                    self.monitor.recheck();
                }
                Err(status.into())
            }
            Err(_) => {
                pick.done(false);
                metrics::record_rpc(method, "timeout", started.elapsed());
                Err(ClientError::DeadlineExceeded(UNARY_TIMEOUT_MS))
            }
        }
    }
}

impl std::fmt::Display for BeaconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.target)
    }
}

/// Cache key for a metadata selector: hex chain-hash concatenated with
/// the beacon id. Exactly one side is normally set.
fn cache_key(meta: &Metadata) -> String {
    format!("{}{}", hex::encode(&meta.chain_hash), meta.beacon_id)
}
