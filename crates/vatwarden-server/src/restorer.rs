//! In-process restorer: hands out `jrpc://` sturdy refs for exported
//! capabilities and describes the vat to resolvers.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use vatwarden_core::restorer::{PORT_KEY, VAT_ID_KEY};
use vatwarden_core::{
    Capability, Restorer, RestorerError, SturdyRef, VatDescription, VatStateStore,
};
use vatwarden_wire::Endpoint;

/// Lifetime of an identity proof.
pub const PROOF_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Claims signed into the identity proof presented to resolvers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatClaims {
    /// Base64 vat id.
    pub sub: String,
    pub host: String,
    pub port: u16,
    pub exp: usize,
}

pub struct LocalRestorer {
    host: String,
    port: RwLock<u16>,
    vat_id: RwLock<Uuid>,
    exports: RwLock<HashMap<String, Arc<dyn Capability>>>,
    store: RwLock<Option<Arc<dyn VatStateStore>>>,
    proof_secret: String,
}

impl LocalRestorer {
    /// `host` is the address peers use to reach this vat.
    pub fn new(host: impl Into<String>, proof_secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: RwLock::new(0),
            vat_id: RwLock::new(Uuid::new_v4()),
            exports: RwLock::new(HashMap::new()),
            store: RwLock::new(None),
            proof_secret: proof_secret.into(),
        }
    }

    pub fn vat_id(&self) -> Uuid {
        *self.vat_id.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn base64_vat_id(&self) -> String {
        STANDARD.encode(self.vat_id().as_bytes())
    }

    pub fn exported_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<_> = self
            .exports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tokens.sort();
        tokens
    }

    fn sturdy_ref(&self, token: &str) -> SturdyRef {
        SturdyRef::new(Endpoint::new(&self.host, self.port(), token).to_string())
    }

    fn identity_proof(&self, base64_vat_id: &str) -> Result<String, RestorerError> {
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            + PROOF_TTL;
        let claims = VatClaims {
            sub: base64_vat_id.to_string(),
            host: self.host.clone(),
            port: self.port(),
            exp: expires.as_secs() as usize,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.proof_secret.as_bytes()),
        )
        .map_err(|err| RestorerError::Proof(err.to_string()))
    }

    async fn adopt_vat_id(&self, store: &dyn VatStateStore) -> Result<(), RestorerError> {
        match store.load(VAT_ID_KEY).await? {
            Some(stored) => match Uuid::parse_str(&stored) {
                Ok(id) => {
                    *self.vat_id.write().unwrap_or_else(PoisonError::into_inner) = id;
                    info!(vat_id = %id, "vat id restored from container");
                }
                Err(err) => {
                    warn!(stored, error = %err, "stored vat id is invalid, replacing it");
                    store.save(VAT_ID_KEY, &self.vat_id().to_string()).await?;
                }
            },
            None => store.save(VAT_ID_KEY, &self.vat_id().to_string()).await?,
        }
        Ok(())
    }
}

/// Host to put into sturdy refs for a vat listening on `listen_host`.
/// Wildcard and absent hosts fall back to loopback.
pub fn advertised_host(listen_host: Option<&str>) -> String {
    match listen_host {
        Some(host) if !host.is_empty() && !is_unspecified(host) => host.to_string(),
        _ => "127.0.0.1".to_string(),
    }
}

/// Returns the configured proof secret, or a random one for this process.
/// Proofs signed with a generated secret cannot be verified by anyone else.
pub fn proof_secret_or_generated(configured: Option<String>) -> String {
    match configured {
        Some(secret) if !secret.is_empty() => secret,
        _ => {
            warn!("no proof secret configured, identity proofs use a per-process random secret");
            format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
        }
    }
}

fn is_unspecified(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
}

/// Checks a proof produced by a vat sharing `secret` and returns its claims.
pub fn verify_identity_proof(proof: &str, secret: &str) -> Result<VatClaims, RestorerError> {
    decode::<VatClaims>(
        proof,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|err| RestorerError::Proof(err.to_string()))
}

#[async_trait]
impl Restorer for LocalRestorer {
    async fn export(
        &self,
        capability: Arc<dyn Capability>,
        fixed_token: Option<&str>,
    ) -> Result<SturdyRef, RestorerError> {
        let token = match fixed_token {
            Some("") => return Err(RestorerError::Export("empty fixed token".into())),
            Some(token) => token.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let replaced = self
            .exports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), capability);
        if replaced.is_some() {
            warn!(token, "sturdy ref token re-exported");
        }
        Ok(self.sturdy_ref(&token))
    }

    fn restore(&self, token: &str) -> Option<Arc<dyn Capability>> {
        self.exports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    fn self_description(&self) -> Result<VatDescription, RestorerError> {
        let base64_vat_id = self.base64_vat_id();
        let identity_proof = self.identity_proof(&base64_vat_id)?;
        Ok(VatDescription {
            host: self.host.clone(),
            port: self.port(),
            base64_vat_id,
            identity_proof,
        })
    }

    fn port(&self) -> u16 {
        *self.port.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the port and, with a container attached, persists it.
    fn set_port(&self, port: u16) {
        *self.port.write().unwrap_or_else(PoisonError::into_inner) = port;
        let store = self
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let (Some(store), Ok(runtime)) = (store, tokio::runtime::Handle::try_current()) {
            runtime.spawn(async move {
                if let Err(err) = store.save(PORT_KEY, &port.to_string()).await {
                    warn!(error = %err, "failed to persist port");
                }
            });
        }
    }

    async fn attach_store(
        &self,
        store: Arc<dyn VatStateStore>,
        restore_port: bool,
    ) -> Result<(), RestorerError> {
        self.adopt_vat_id(store.as_ref()).await?;
        if restore_port {
            if let Some(stored) = store.load(PORT_KEY).await? {
                match stored.parse::<u16>() {
                    Ok(port) => {
                        *self.port.write().unwrap_or_else(PoisonError::into_inner) = port;
                        info!(port, "port restored from container");
                    }
                    Err(_) => warn!(stored, "stored port is invalid, ignoring it"),
                }
            }
        }
        *self.store.write().unwrap_or_else(PoisonError::into_inner) = Some(store);
        Ok(())
    }
}
