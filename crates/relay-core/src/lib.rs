//! # Relay Core
//!
//! Core library for the beacon HTTP relay.
//!
//! This crate provides the foundational components for:
//!
//! - **[`pool`]**: Ordered failover pool of gRPC channels to the backend
//!   beacon nodes, with a priority-based picker, per-request skip-first
//!   semantics, and connectivity monitoring with reconnect backoff.
//!
//! - **[`client`]**: Backend client exposing beacon fetches, chain info
//!   with an in-process dual-keyed cache, id listing, health checks and a
//!   streaming watch, retrying once through the pool on failure.
//!
//! - **[`chain`]**: Chain parameters and the emission time model that
//!   predicts the next round from `period` and `genesis_time`.
//!
//! - **[`beacon`]**: The hex-encoded JSON beacon envelope, including the
//!   randomness derivation used for v1 output shapes.
//!
//! - **[`metrics`]**: Prometheus metric recorders for picks, subchannel
//!   state, RPC latencies and the HTTP surface.
//!
//! ## Request Flow
//!
//! ```text
//! HTTP handler
//!       │
//!       ▼
//! ┌─────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ BeaconClient│ ──► │ FallbackPool │ ──► │ picked channel │ ──► backend
//! └─────────────┘     └──────────────┘     └────────────────┘
//!       │ retry once on error (pool demoted the failed subchannel)
//!       ▼
//! ┌──────────────────┐
//! │ chain-info cache │  (pre-warmed at construction, never evicted)
//! └──────────────────┘
//! ```

pub mod beacon;
pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;

pub use beacon::HexBeacon;
pub use chain::{ChainInfo, Clock};
pub use client::BeaconClient;
pub use config::RelayConfig;
pub use error::ClientError;
