//! Advertising capabilities to registries and binding the vat identity with
//! resolvers.
//!
//! Every (service, registry) pair and every resolver is an independent unit
//! of failure: errors are logged and counted, never propagated, and there is
//! no retry.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::admin::Admin;
use crate::config::{RegistryEntry, ResolverEntry};
use crate::errors::PeerError;
use crate::peer::PeerLink;
use crate::registry::{ExportedService, UnregistrationKey};
use crate::resolver::VatRegistration;
use crate::restorer::Restorer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvertiseReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindReport {
    pub bound: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct RegistrationCoordinator {
    peers: Arc<dyn PeerLink>,
    restorer: Arc<dyn Restorer>,
    admin: Arc<Admin>,
}

impl RegistrationCoordinator {
    pub fn new(peers: Arc<dyn PeerLink>, restorer: Arc<dyn Restorer>, admin: Arc<Admin>) -> Self {
        Self {
            peers,
            restorer,
            admin,
        }
    }

    /// Advertises every service to every registry, in configured order.
    /// Successful advertisements are recorded with the admin.
    pub async fn advertise(
        &self,
        services: &[ExportedService],
        registries: &[RegistryEntry],
    ) -> AdvertiseReport {
        let mut report = AdvertiseReport::default();
        for service in services {
            for registry in registries {
                if registry.is_empty() {
                    report.skipped += 1;
                    continue;
                }
                match self.advertise_one(service, registry).await {
                    Ok(key) => {
                        report.succeeded += 1;
                        metrics::counter!("vatwarden_registry_advertisements_total", "outcome" => "ok")
                            .increment(1);
                        info!(%key, "service advertised");
                    }
                    Err(err) => {
                        report.failed += 1;
                        metrics::counter!("vatwarden_registry_advertisements_total", "outcome" => "failed")
                            .increment(1);
                        warn!(service = %service.name, ?registry, error = %err, "error registering service");
                    }
                }
            }
        }
        report
    }

    async fn advertise_one(
        &self,
        service: &ExportedService,
        registry: &RegistryEntry,
    ) -> Result<UnregistrationKey, PeerError> {
        let token = required_token(registry.sturdy_ref.as_deref())?;
        let reg_name = registry.name.as_deref().unwrap_or_default();
        let category_id = registry.category_id.as_deref().unwrap_or_default();
        info!(service = %service.name, reg_name, category_id, "trying to register service");

        let registrar = self
            .peers
            .reach_registrar(token)
            .await
            .ok_or_else(|| PeerError::Unreachable(token.to_string()))?;
        let registration = registrar.register(service, reg_name, category_id).await?;

        let key = UnregistrationKey::new(&service.name, token);
        if self
            .admin
            .store_unregistration(key.clone(), registration)
            .is_some()
        {
            info!(%key, "replaced earlier registration record");
        }
        Ok(key)
    }

    /// Binds the vat identity with every resolver, in configured order, and
    /// spawns one heartbeat task per accepted binding. Heartbeat tasks are
    /// not awaited.
    pub async fn bind(&self, resolvers: &[ResolverEntry]) -> BindReport {
        let (candidates, empty): (Vec<&ResolverEntry>, Vec<&ResolverEntry>) =
            resolvers.iter().partition(|resolver| !resolver.is_empty());
        let mut report = BindReport {
            skipped: empty.len(),
            ..BindReport::default()
        };
        if candidates.is_empty() {
            return report;
        }

        let description = match self.restorer.self_description() {
            Ok(description) => description,
            Err(err) => {
                error!(error = %err, "cannot describe vat, skipping resolver binding");
                report.failed = candidates.len();
                return report;
            }
        };

        for resolver in candidates {
            let registration = VatRegistration {
                host: description.host.clone(),
                port: description.port,
                base64_vat_id: description.base64_vat_id.clone(),
                identity_proof: description.identity_proof.clone(),
                alias: resolver.alias.clone(),
            };
            match self.bind_one(resolver, registration).await {
                Ok(()) => {
                    report.bound += 1;
                    metrics::counter!("vatwarden_resolver_bindings_total", "outcome" => "ok")
                        .increment(1);
                    info!(
                        vat_id = %description.base64_vat_id,
                        alias = resolver.alias.as_deref().unwrap_or_default(),
                        "registered vat at resolver"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    metrics::counter!("vatwarden_resolver_bindings_total", "outcome" => "failed")
                        .increment(1);
                    warn!(?resolver, error = %err, "error registering vat");
                }
            }
        }
        report
    }

    async fn bind_one(
        &self,
        resolver: &ResolverEntry,
        registration: VatRegistration,
    ) -> Result<(), PeerError> {
        let token = required_token(resolver.sturdy_ref.as_deref())?;
        info!(sturdy_ref = token, "trying to register vat at resolver");

        let remote = self
            .peers
            .reach_resolver(token)
            .await
            .ok_or_else(|| PeerError::Unreachable(token.to_string()))?;
        let binding = remote.register(registration).await?;
        self.admin.tasks().spawn(resolver.label(), binding);
        Ok(())
    }
}

fn required_token(token: Option<&str>) -> Result<&str, PeerError> {
    token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| PeerError::Misconfigured("entry has no sturdy_ref".to_string()))
}
