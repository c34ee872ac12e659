//! Sequences the admin, exports and both registration workflows into a
//! serving vat.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::admin::{ADMIN_SERVICE_NAME, Admin, Terminator};
use crate::capability::Capability;
use crate::config::ServiceConfig;
use crate::errors::BootstrapError;
use crate::peer::PeerLink;
use crate::registration::{AdvertiseReport, BindReport, RegistrationCoordinator};
use crate::registry::ExportedService;
use crate::restorer::{Restorer, SturdyRef};
use crate::transport::Transport;

/// Name of the main service when a vat is built from configuration.
pub const MAIN_SERVICE_NAME: &str = "service";

/// Runs right before the vat starts serving.
pub type PreServeHook = Box<dyn FnOnce(&RunningService) + Send>;

pub struct ServiceBootstrap {
    config: ServiceConfig,
    services: Vec<(String, Arc<dyn Capability>)>,
    fixed_tokens: HashMap<String, String>,
    restorer: Arc<dyn Restorer>,
    peers: Arc<dyn PeerLink>,
    transport: Arc<dyn Transport>,
    terminator: Arc<dyn Terminator>,
    pre_serve: Option<PreServeHook>,
}

impl ServiceBootstrap {
    pub fn new(
        config: ServiceConfig,
        restorer: Arc<dyn Restorer>,
        peers: Arc<dyn PeerLink>,
        transport: Arc<dyn Transport>,
        terminator: Arc<dyn Terminator>,
    ) -> Self {
        Self {
            config,
            services: Vec::new(),
            fixed_tokens: HashMap::new(),
            restorer,
            peers,
            transport,
            terminator,
            pre_serve: None,
        }
    }

    /// Adds a service, replacing an earlier one of the same name.
    pub fn with_service(mut self, name: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        let name = name.into();
        match self.services.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = capability,
            None => self.services.push((name, capability)),
        }
        self
    }

    /// Adds the main service, exported under the configured fixed token.
    pub fn with_main_service(self, capability: Arc<dyn Capability>) -> Self {
        let fixed = self.config.service.fixed_sturdy_ref_token.clone();
        let bootstrap = self.with_service(MAIN_SERVICE_NAME, capability);
        match fixed {
            Some(token) => bootstrap.with_fixed_token(MAIN_SERVICE_NAME, token),
            None => bootstrap,
        }
    }

    pub fn with_fixed_token(mut self, name: impl Into<String>, token: impl Into<String>) -> Self {
        self.fixed_tokens.insert(name.into(), token.into());
        self
    }

    pub fn with_pre_serve(mut self, hook: PreServeHook) -> Self {
        self.pre_serve = Some(hook);
        self
    }

    /// Everything up to, but excluding, serving.
    ///
    /// # Errors
    ///
    /// Fails when the persisted vat state cannot be adopted, the listener
    /// cannot be bound or a capability cannot be exported. Registry and
    /// resolver failures never fail startup.
    pub async fn start(self) -> Result<RunningService, BootstrapError> {
        let Self {
            config,
            mut services,
            fixed_tokens,
            restorer,
            peers,
            transport,
            terminator,
            pre_serve,
        } = self;

        check_fixed_tokens(&fixed_tokens)?;

        let mut port = config.vat.port;
        if let Some(token) = config.vat.restorer_container_sr.as_deref() {
            match peers.reach_store(token).await {
                Some(store) => {
                    restorer.attach_store(store, port.is_none()).await?;
                    if port.is_none() {
                        port = Some(restorer.port()).filter(|restored| *restored != 0);
                    }
                }
                None => warn!(sturdy_ref = token, "couldn't connect to restorer container"),
            }
        }

        let capabilities: Vec<Arc<dyn Capability>> =
            services.iter().map(|(_, capability)| capability.clone()).collect();
        let admin = Admin::new(&capabilities, config.admin_settings(), terminator);
        for (name, capability) in &services {
            if let Some(administrable) = capability.as_administrable() {
                administrable.attach_admin(Arc::downgrade(&admin));
                info!(service = %name, "admin attached");
            }
        }
        if !services.iter().any(|(name, _)| name == ADMIN_SERVICE_NAME) {
            let admin_capability: Arc<dyn Capability> = admin.clone();
            services.push((ADMIN_SERVICE_NAME.to_string(), admin_capability));
        }

        let mut exported: Vec<ExportedService> = services
            .into_iter()
            .map(|(name, capability)| ExportedService::new(name, capability))
            .collect();

        let serve_bootstrap = config.vat.serve_bootstrap;
        if serve_bootstrap {
            let bound = transport
                .listen(config.vat.host.as_deref(), port.unwrap_or(0))
                .await?;
            restorer.set_port(bound);
            info!(port = bound, "listening");

            for service in &mut exported {
                let fixed = fixed_tokens.get(&service.name).map(String::as_str);
                let sturdy_ref = restorer.export(service.capability.clone(), fixed).await?;
                info!(service = %service.name, %sturdy_ref, "service exported");
                service.sturdy_ref = Some(sturdy_ref);
            }
        }

        let coordinator = RegistrationCoordinator::new(peers, restorer.clone(), admin.clone());
        let (advertise_report, bind_report) = tokio::join!(
            coordinator.advertise(&exported, &config.service.registries),
            coordinator.bind(&config.vat.resolvers),
        );
        info!(?advertise_report, ?bind_report, "registration finished");

        Ok(RunningService {
            admin,
            services: exported,
            advertise_report,
            bind_report,
            transport,
            restorer,
            serve_bootstrap,
            pre_serve,
        })
    }

    /// Starts and then serves until the process is terminated.
    ///
    /// # Errors
    ///
    /// See [`ServiceBootstrap::start`] and [`RunningService::serve`].
    pub async fn run(self) -> Result<(), BootstrapError> {
        self.start().await?.serve().await
    }
}

fn check_fixed_tokens(fixed_tokens: &HashMap<String, String>) -> Result<(), BootstrapError> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    for (service, token) in fixed_tokens {
        if token.is_empty() {
            return Err(BootstrapError::Config(format!(
                "empty fixed sturdy ref token for '{service}'"
            )));
        }
        if let Some(other) = owners.insert(token.as_str(), service.as_str()) {
            return Err(BootstrapError::Config(format!(
                "fixed sturdy ref token '{token}' used by both '{other}' and '{service}'"
            )));
        }
    }
    Ok(())
}

/// A started vat that has not yet entered its serve loop.
pub struct RunningService {
    admin: Arc<Admin>,
    services: Vec<ExportedService>,
    advertise_report: AdvertiseReport,
    bind_report: BindReport,
    transport: Arc<dyn Transport>,
    restorer: Arc<dyn Restorer>,
    serve_bootstrap: bool,
    pre_serve: Option<PreServeHook>,
}

impl RunningService {
    pub fn admin(&self) -> &Arc<Admin> {
        &self.admin
    }

    pub fn services(&self) -> &[ExportedService] {
        &self.services
    }

    pub fn sturdy_ref(&self, name: &str) -> Option<&SturdyRef> {
        self.services
            .iter()
            .find(|service| service.name == name)
            .and_then(|service| service.sturdy_ref.as_ref())
    }

    pub fn advertise_report(&self) -> AdvertiseReport {
        self.advertise_report
    }

    pub fn bind_report(&self) -> BindReport {
        self.bind_report
    }

    /// Runs the pre-serve hook, then serves inbound connections. Without a
    /// listener the vat idles until it is terminated.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the accept loop.
    pub async fn serve(mut self) -> Result<(), BootstrapError> {
        if let Some(hook) = self.pre_serve.take() {
            hook(&self);
        }
        if self.serve_bootstrap {
            self.transport.serve(self.restorer.clone()).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
