//! Reusable mock types for testing the relay without real beacon nodes.
//!
//! [`MockBeaconNode`] serves the actual gRPC surface (`Public` plus the
//! standard health service) on a loopback listener, with per-method call
//! counters and failure injection so tests can observe pool behavior.

pub mod beacon_node;

pub use beacon_node::{MockBeaconNode, MockChain};
