//! Port fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use vatwarden_core::{
    Admin, AdminLink, Administrable, CallError, Capability, ExitReason, ExportedService,
    Identifiable, IdentityCell, IdentityRecord, PeerError, PeerLink, Registrar, Registration,
    RemoteHeartbeat, Resolver, ResolverBinding, Restorer, RestorerError, SturdyRef, Terminator,
    Transport, TransportError, UnregisterAction, VatDescription, VatRegistration, VatStateStore,
};

#[derive(Default)]
pub struct RecordingTerminator {
    pub exits: Mutex<Vec<ExitReason>>,
}

impl RecordingTerminator {
    pub fn reasons(&self) -> Vec<ExitReason> {
        self.exits.lock().unwrap().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, reason: ExitReason) {
        self.exits.lock().unwrap().push(reason);
    }
}

/// Administrable service that refreshes the admin timeout on every call.
pub struct EchoService {
    identity: IdentityCell,
    pub link: AdminLink,
}

impl EchoService {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: IdentityCell::new(IdentityRecord::new(id, format!("{id} service"), "echo")),
            link: AdminLink::default(),
        })
    }
}

impl Identifiable for EchoService {
    fn identity(&self) -> IdentityRecord {
        self.identity.get()
    }

    fn set_identity(&self, record: IdentityRecord) {
        self.identity.replace(record);
    }
}

impl Administrable for EchoService {
    fn attach_admin(&self, admin: Weak<Admin>) {
        self.link.attach(admin);
    }
}

#[async_trait]
impl Capability for EchoService {
    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        self.link.refresh_timeout();
        match method {
            "echo" => Ok(params),
            other => Err(CallError::UnknownMethod(other.to_string())),
        }
    }

    fn as_administrable(&self) -> Option<&dyn Administrable> {
        Some(self)
    }
}

/// Plain service without admin pass-through.
pub struct PlainService(IdentityCell);

impl PlainService {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self(IdentityCell::new(IdentityRecord::new(id, id, ""))))
    }
}

impl Identifiable for PlainService {
    fn identity(&self) -> IdentityRecord {
        self.0.get()
    }

    fn set_identity(&self, record: IdentityRecord) {
        self.0.replace(record);
    }
}

#[async_trait]
impl Capability for PlainService {
    async fn call(&self, method: &str, _params: Value) -> Result<Value, CallError> {
        Err(CallError::UnknownMethod(method.to_string()))
    }
}

#[derive(Default)]
pub struct CountingUnregister {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl UnregisterAction for CountingUnregister {
    async fn unregister(&self) -> Result<(), PeerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(PeerError::Unreachable("registry gone".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct FakeRegistrar {
    pub reject: bool,
    /// (service name, reg name, category id) per register call.
    pub calls: Mutex<Vec<(String, String, String)>>,
    pub unregister: Arc<CountingUnregister>,
}

impl FakeRegistrar {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl Registrar for FakeRegistrar {
    async fn register(
        &self,
        service: &ExportedService,
        reg_name: &str,
        category_id: &str,
    ) -> Result<Registration, PeerError> {
        self.calls.lock().unwrap().push((
            service.name.clone(),
            reg_name.to_string(),
            category_id.to_string(),
        ));
        if self.reject {
            return Err(PeerError::Rejected("category unknown".into()));
        }
        Ok(Registration {
            unregister: self.unregister.clone(),
            reregistration: SturdyRef::new(format!("rereg/{}", service.name)),
        })
    }
}

#[derive(Default)]
pub struct CountingHeartbeat {
    pub beats: AtomicUsize,
}

#[async_trait]
impl RemoteHeartbeat for CountingHeartbeat {
    async fn beat(&self) -> Result<(), PeerError> {
        self.beats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeResolver {
    pub reject: bool,
    pub interval: Duration,
    pub registrations: Mutex<Vec<VatRegistration>>,
    pub heartbeat: Arc<CountingHeartbeat>,
}

impl FakeResolver {
    pub fn accepting(interval_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            reject: false,
            interval: Duration::from_secs(interval_secs),
            registrations: Mutex::new(Vec::new()),
            heartbeat: Arc::new(CountingHeartbeat::default()),
        })
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject: true,
            interval: Duration::from_secs(1),
            registrations: Mutex::new(Vec::new()),
            heartbeat: Arc::new(CountingHeartbeat::default()),
        })
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn register(&self, registration: VatRegistration) -> Result<ResolverBinding, PeerError> {
        self.registrations.lock().unwrap().push(registration);
        if self.reject {
            return Err(PeerError::Rejected("identity proof invalid".into()));
        }
        Ok(ResolverBinding {
            heartbeat: self.heartbeat.clone(),
            interval: self.interval,
        })
    }
}

/// Token-addressed fake network. Unknown tokens are unreachable.
#[derive(Default)]
pub struct FakePeerLink {
    pub registrars: HashMap<String, Arc<FakeRegistrar>>,
    pub resolvers: HashMap<String, Arc<FakeResolver>>,
    pub stores: HashMap<String, Arc<dyn VatStateStore>>,
    pub reached: Mutex<Vec<String>>,
}

impl FakePeerLink {
    pub fn with_registrar(mut self, token: &str, registrar: Arc<FakeRegistrar>) -> Self {
        self.registrars.insert(token.to_string(), registrar);
        self
    }

    pub fn with_resolver(mut self, token: &str, resolver: Arc<FakeResolver>) -> Self {
        self.resolvers.insert(token.to_string(), resolver);
        self
    }

    pub fn with_store(mut self, token: &str, store: Arc<dyn VatStateStore>) -> Self {
        self.stores.insert(token.to_string(), store);
        self
    }

    pub fn reached(&self) -> Vec<String> {
        self.reached.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerLink for FakePeerLink {
    async fn reach_registrar(&self, token: &str) -> Option<Arc<dyn Registrar>> {
        self.reached.lock().unwrap().push(token.to_string());
        self.registrars
            .get(token)
            .map(|registrar| registrar.clone() as Arc<dyn Registrar>)
    }

    async fn reach_resolver(&self, token: &str) -> Option<Arc<dyn Resolver>> {
        self.reached.lock().unwrap().push(token.to_string());
        self.resolvers
            .get(token)
            .map(|resolver| resolver.clone() as Arc<dyn Resolver>)
    }

    async fn reach_store(&self, token: &str) -> Option<Arc<dyn VatStateStore>> {
        self.stores.get(token).cloned()
    }
}

/// Restorer handing out `fake://<token>` refs.
#[derive(Default)]
pub struct FakeRestorer {
    pub port: Mutex<u16>,
    pub exported: Mutex<Vec<(String, Arc<dyn Capability>)>>,
    pub attached: Mutex<Option<Arc<dyn VatStateStore>>>,
}

#[async_trait]
impl Restorer for FakeRestorer {
    async fn export(
        &self,
        capability: Arc<dyn Capability>,
        fixed_token: Option<&str>,
    ) -> Result<SturdyRef, RestorerError> {
        let token = fixed_token
            .map(str::to_string)
            .unwrap_or_else(|| capability.identity().id);
        self.exported
            .lock()
            .unwrap()
            .push((token.clone(), capability));
        Ok(SturdyRef::new(format!("fake://{token}")))
    }

    fn restore(&self, token: &str) -> Option<Arc<dyn Capability>> {
        self.exported
            .lock()
            .unwrap()
            .iter()
            .find(|(exported, _)| exported == token)
            .map(|(_, capability)| capability.clone())
    }

    fn self_description(&self) -> Result<VatDescription, RestorerError> {
        Ok(VatDescription {
            host: "10.0.0.7".into(),
            port: self.port(),
            base64_vat_id: "dmF0LWlk".into(),
            identity_proof: "signed".into(),
        })
    }

    fn port(&self) -> u16 {
        *self.port.lock().unwrap()
    }

    fn set_port(&self, port: u16) {
        *self.port.lock().unwrap() = port;
    }

    async fn attach_store(
        &self,
        store: Arc<dyn VatStateStore>,
        restore_port: bool,
    ) -> Result<(), RestorerError> {
        if restore_port {
            if let Some(port) = store.load("port").await? {
                self.set_port(port.parse().unwrap_or(0));
            }
        }
        *self.attached.lock().unwrap() = Some(store);
        Ok(())
    }
}

/// Transport whose listener binds to the requested port (or 4000 for 0)
/// and whose serve loop returns immediately.
#[derive(Default)]
pub struct FakeTransport {
    pub listened: Mutex<Option<(Option<String>, u16)>>,
    pub served: AtomicBool,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn listen(&self, host: Option<&str>, port: u16) -> Result<u16, TransportError> {
        *self.listened.lock().unwrap() = Some((host.map(str::to_string), port));
        Ok(if port == 0 { 4000 } else { port })
    }

    async fn serve(&self, _restorer: Arc<dyn Restorer>) -> Result<(), TransportError> {
        self.served.store(true, Ordering::SeqCst);
        Ok(())
    }
}
