use async_trait::async_trait;
use std::sync::Arc;

use crate::registry::Registrar;
use crate::resolver::Resolver;
use crate::restorer::VatStateStore;

/// Reaches remote parties by opaque reachability token.
///
/// Every method returns `None` when the party cannot be reached; adapters
/// log the underlying cause themselves.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn reach_registrar(&self, token: &str) -> Option<Arc<dyn Registrar>>;

    async fn reach_resolver(&self, token: &str) -> Option<Arc<dyn Resolver>>;

    async fn reach_store(&self, token: &str) -> Option<Arc<dyn VatStateStore>>;
}
