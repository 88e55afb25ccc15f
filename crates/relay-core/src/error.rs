use tonic::Status;

/// Errors surfaced by the backend client and the fallback pool.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The pool holds no READY subchannel to pick from.
    #[error("no subchannel available")]
    NoSubchannelAvailable,

    /// The backend answered with a gRPC status.
    #[error("rpc failed: {0}")]
    Rpc(#[from] Status),

    /// The per-call unary timeout elapsed before the backend answered.
    #[error("rpc deadline exceeded after {0}ms")]
    DeadlineExceeded(u64),

    /// The backend answered, but the payload violates protocol invariants.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// The operator-supplied endpoint list could not be parsed.
    #[error("invalid backend endpoint {0:?}")]
    InvalidEndpoint(String),

    /// Backend health check reported a non-serving status.
    #[error("backend not serving")]
    NotServing,
}

impl ClientError {
    /// Whether the error indicates the caller's deadline ran out rather
    /// than a backend-side failure. Handlers map this to 504.
    #[must_use]
    pub fn is_deadline(&self) -> bool {
        match self {
            Self::DeadlineExceeded(_) => true,
            Self::Rpc(status) => {
                matches!(status.code(), tonic::Code::DeadlineExceeded | tonic::Code::Cancelled)
            }
            _ => false,
        }
    }

    /// Whether the backend rejected the request because the chain hash or
    /// beacon id is unknown to it. Handlers map this to 400.
    #[must_use]
    pub fn is_unknown_chain(&self) -> bool {
        match self {
            Self::Rpc(status) => {
                status.message().contains("unknown chain hash")
                    || status.message().contains("unknown beacon")
            }
            _ => false,
        }
    }
}
