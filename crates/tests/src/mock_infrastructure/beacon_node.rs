//! A mock beacon node speaking the real wire protocol.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use relay_proto::beacon::{
    public_server::{Public, PublicServer},
    ChainInfoPacket, ChainInfoRequest, ListBeaconIdsRequest, ListBeaconIdsResponse, Metadata,
    PublicRandRequest, PublicRandResponse,
};
use relay_proto::health::{
    health_check_response::ServingStatus,
    health_server::{Health, HealthServer},
    HealthCheckRequest, HealthCheckResponse,
};
use sha2::{Digest, Sha256};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Request, Response, Status};

/// Parameters of one chain served by the mock node.
#[derive(Debug, Clone)]
pub struct MockChain {
    pub beacon_id: String,
    pub chain_hash: Vec<u8>,
    pub period: u32,
    pub genesis_time: i64,
    pub scheme_id: String,
}

impl MockChain {
    /// A chain whose 32-byte hash is derived from the beacon id.
    #[must_use]
    pub fn new(beacon_id: &str, period: u32, genesis_time: i64) -> Self {
        Self {
            beacon_id: beacon_id.to_string(),
            chain_hash: Sha256::digest(beacon_id.as_bytes()).to_vec(),
            period,
            genesis_time,
            scheme_id: "pedersen-bls-chained".to_string(),
        }
    }

    #[must_use]
    pub fn hex_hash(&self) -> String {
        hex::encode(&self.chain_hash)
    }

    fn packet(&self) -> ChainInfoPacket {
        ChainInfoPacket {
            public_key: vec![1, 2, 3, 4],
            period: self.period,
            genesis_time: self.genesis_time,
            group_hash: vec![9, 9, 9],
            hash: self.chain_hash.clone(),
            scheme_id: self.scheme_id.clone(),
            metadata: Some(Metadata {
                chain_hash: self.chain_hash.clone(),
                beacon_id: self.beacon_id.clone(),
            }),
        }
    }
}

/// Deterministic fake signature for a round.
#[must_use]
pub fn signature_for(round: u64) -> Vec<u8> {
    Sha256::digest(round.to_be_bytes()).to_vec()
}

struct NodeState {
    chains: Vec<MockChain>,
    latest_round: AtomicU64,
    serving: AtomicBool,
    fail_public_rand: AtomicUsize,
    public_rand_calls: AtomicUsize,
    chain_info_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl NodeState {
    fn chain_for(&self, metadata: Option<&Metadata>) -> Result<&MockChain, Status> {
        let Some(meta) = metadata else {
            return Ok(&self.chains[0]);
        };
        if meta.chain_hash.is_empty() && meta.beacon_id.is_empty() {
            return Ok(&self.chains[0]);
        }
        self.chains
            .iter()
            .find(|c| {
                (!meta.chain_hash.is_empty() && c.chain_hash == meta.chain_hash)
                    || (!meta.beacon_id.is_empty() && c.beacon_id == meta.beacon_id)
            })
            .ok_or_else(|| Status::invalid_argument("unknown chain hash"))
    }
}

struct MockPublic {
    state: Arc<NodeState>,
}

#[tonic::async_trait]
impl Public for MockPublic {
    async fn public_rand(
        &self,
        request: Request<PublicRandRequest>,
    ) -> Result<Response<PublicRandResponse>, Status> {
        self.state.public_rand_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .state
            .fail_public_rand
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Status::unavailable("injected failure"));
        }

        let req = request.into_inner();
        self.state.chain_for(req.metadata.as_ref())?;

        let round = if req.round == 0 {
            self.state.latest_round.load(Ordering::SeqCst)
        } else {
            req.round
        };
        Ok(Response::new(PublicRandResponse {
            round,
            signature: signature_for(round),
            previous_signature: signature_for(round.saturating_sub(1)),
            randomness: Vec::new(),
            metadata: req.metadata,
        }))
    }

    type PublicRandStreamStream = ReceiverStream<Result<PublicRandResponse, Status>>;

    async fn public_rand_stream(
        &self,
        request: Request<PublicRandRequest>,
    ) -> Result<Response<Self::PublicRandStreamStream>, Status> {
        let req = request.into_inner();
        self.state.chain_for(req.metadata.as_ref())?;

        let start = self.state.latest_round.load(Ordering::SeqCst) + 1;
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            // emit three rounds then end the stream
            for round in start..start + 3 {
                let beacon = PublicRandResponse {
                    round,
                    signature: signature_for(round),
                    previous_signature: signature_for(round - 1),
                    randomness: Vec::new(),
                    metadata: None,
                };
                if tx.send(Ok(beacon)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn chain_info(
        &self,
        request: Request<ChainInfoRequest>,
    ) -> Result<Response<ChainInfoPacket>, Status> {
        self.state.chain_info_calls.fetch_add(1, Ordering::SeqCst);
        let req = request.into_inner();
        let chain = self.state.chain_for(req.metadata.as_ref())?;
        Ok(Response::new(chain.packet()))
    }

    async fn list_beacon_ids(
        &self,
        _request: Request<ListBeaconIdsRequest>,
    ) -> Result<Response<ListBeaconIdsResponse>, Status> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(ListBeaconIdsResponse {
            ids: self.state.chains.iter().map(|c| c.beacon_id.clone()).collect(),
            metadatas: self
                .state
                .chains
                .iter()
                .map(|c| Metadata {
                    chain_hash: c.chain_hash.clone(),
                    beacon_id: c.beacon_id.clone(),
                })
                .collect(),
        }))
    }
}

struct MockHealth {
    state: Arc<NodeState>,
}

#[tonic::async_trait]
impl Health for MockHealth {
    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let status = if self.state.serving.load(Ordering::SeqCst) {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        };
        Ok(Response::new(HealthCheckResponse { status: status as i32 }))
    }
}

/// A running mock beacon node.
pub struct MockBeaconNode {
    addr: String,
    state: Arc<NodeState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBeaconNode {
    /// Spawns a node serving `chains` on an ephemeral loopback port.
    ///
    /// # Panics
    /// Panics when no chain is given or the listener cannot bind.
    pub async fn spawn(chains: Vec<MockChain>) -> Self {
        assert!(!chains.is_empty(), "mock node needs at least one chain");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock node");
        let addr = listener.local_addr().expect("local addr").to_string();

        let state = Arc::new(NodeState {
            chains,
            latest_round: AtomicU64::new(1),
            serving: AtomicBool::new(true),
            fail_public_rand: AtomicUsize::new(0),
            public_rand_calls: AtomicUsize::new(0),
            chain_info_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        });

        let public = PublicServer::new(MockPublic { state: Arc::clone(&state) });
        let health = HealthServer::new(MockHealth { state: Arc::clone(&state) });
        let handle = tokio::spawn(async move {
            if let Err(e) = tonic::transport::Server::builder()
                .add_service(public)
                .add_service(health)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
            {
                tracing::error!(error = %e, "mock node stopped");
            }
        });

        Self { addr, state, handle }
    }

    /// `host:port` of the node.
    #[must_use]
    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    /// Sets the round returned for "latest" (round 0) requests.
    pub fn set_latest(&self, round: u64) {
        self.state.latest_round.store(round, Ordering::SeqCst);
    }

    /// Fails the next `n` `PublicRand` calls with `UNAVAILABLE`.
    pub fn fail_next_public_rand(&self, n: usize) {
        self.state.fail_public_rand.store(n, Ordering::SeqCst);
    }

    /// Flips the health service answer.
    pub fn set_serving(&self, serving: bool) {
        self.state.serving.store(serving, Ordering::SeqCst);
    }

    #[must_use]
    pub fn public_rand_calls(&self) -> usize {
        self.state.public_rand_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chain_info_calls(&self) -> usize {
        self.state.chain_info_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockBeaconNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
