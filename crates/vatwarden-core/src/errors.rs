/// Failures talking to a registry, resolver or other remote party.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("request rejected by peer: {0}")]
    Rejected(String),

    #[error("malformed peer response: {0}")]
    Protocol(String),

    #[error("peer entry misconfigured: {0}")]
    Misconfigured(String),
}

/// Errors returned from a capability call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("call failed: {0}")]
    Failed(String),
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidParams(err.to_string())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("vat state store error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RestorerError {
    #[error("failed to export capability: {0}")]
    Export(String),

    #[error("failed to produce identity proof: {0}")]
    Proof(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("transport is not listening")]
    NotListening,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Startup failures of the service bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Restorer(#[from] RestorerError),

    #[error("invalid service setup: {0}")]
    Config(String),
}
