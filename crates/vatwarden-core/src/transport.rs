use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::TransportError;
use crate::restorer::Restorer;

/// Inbound side of the RPC transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Binds the listener and returns the bound port (`0` picks one).
    async fn listen(&self, host: Option<&str>, port: u16) -> Result<u16, TransportError>;

    /// Accepts connections forever, resolving request targets via `restorer`.
    async fn serve(&self, restorer: Arc<dyn Restorer>) -> Result<(), TransportError>;
}
