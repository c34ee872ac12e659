use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::PeerError;

/// What a vat tells a name resolver about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatRegistration {
    pub host: String,
    pub port: u16,
    pub base64_vat_id: String,
    pub identity_proof: String,
    pub alias: Option<String>,
}

/// Name service mapping a vat identity to host and port.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn register(&self, registration: VatRegistration) -> Result<ResolverBinding, PeerError>;
}

/// Keeps a resolver binding valid.
#[async_trait]
pub trait RemoteHeartbeat: Send + Sync {
    async fn beat(&self) -> Result<(), PeerError>;
}

/// Successful resolver response.
#[derive(Clone)]
pub struct ResolverBinding {
    pub heartbeat: Arc<dyn RemoteHeartbeat>,
    pub interval: Duration,
}
