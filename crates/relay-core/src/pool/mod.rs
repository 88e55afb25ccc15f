//! Ordered failover pool of backend subchannels.
//!
//! The pool realizes the "pick first, fall back in order" contract: every
//! pick returns the highest-priority READY subchannel, errors demote the
//! picked entry so the next pick prefers another backend, and a background
//! tick restores baseline priorities so a recovered preferred backend is
//! re-promoted.

mod balancer;
mod monitor;
mod resolver;

pub use balancer::{FallbackPool, Pick, PickOptions, Subchannel, PRIORITY_RESET_INTERVAL};
pub use monitor::{MonitorConfig, SubchannelMonitor};
pub use resolver::{resolve, target, BackendAddr, FALLBACK_SCHEME};
