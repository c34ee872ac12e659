//! The admin capability: liveness watchdog, remote stop and identity
//! directory of the vat.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capability::{Capability, decode_params};
use crate::errors::CallError;
use crate::heartbeat::HeartbeatTasks;
use crate::identity::{IdentityCell, IdentityRecord, Identifiable};
use crate::registry::{Registration, UnregistrationKey};
use crate::restorer::SturdyRef;

/// Delay between a remote stop request and process exit.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Name the admin is served under unless a service already uses it.
pub const ADMIN_SERVICE_NAME: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// No heartbeat arrived within the configured timeout.
    TimeoutExpired,
    /// The grace period after a stop request elapsed.
    StopRequested,
    /// The host asked for an immediate exit, e.g. a repeated interrupt.
    Signal,
}

/// Ends the process. Production implementations exit; test doubles record.
pub trait Terminator: Send + Sync {
    fn terminate(&self, reason: ExitReason);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopState {
    Running,
    StopRequested,
    Terminating,
}

pub type StopActionError = Box<dyn std::error::Error + Send + Sync>;
pub type StopAction = Arc<dyn Fn() -> BoxFuture<'static, Result<(), StopActionError>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSettings {
    /// Seconds without heartbeat before the process exits; `0` disables.
    pub timeout_secs: u64,
    pub grace_period: Duration,
    /// Run [`Admin::unregister_all`] as part of the stop sequence.
    pub unregister_on_stop: bool,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            grace_period: DEFAULT_GRACE_PERIOD,
            unregister_on_stop: false,
        }
    }
}

struct TimeoutState {
    timeout_secs: u64,
    pending: Option<JoinHandle<()>>,
}

pub struct Admin {
    me: Weak<Admin>,
    identity: IdentityCell,
    services: Vec<Weak<dyn Capability>>,
    timeout: Mutex<TimeoutState>,
    stop_state: Mutex<StopState>,
    stop_action: Mutex<Option<StopAction>>,
    unregistrations: Mutex<BTreeMap<UnregistrationKey, Registration>>,
    tasks: HeartbeatTasks,
    terminator: Arc<dyn Terminator>,
    grace_period: Duration,
    unregister_on_stop: bool,
}

impl Admin {
    /// Creates the admin over `services` and arms the first deadline.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime with a non-zero timeout.
    pub fn new(
        services: &[Arc<dyn Capability>],
        settings: AdminSettings,
        terminator: Arc<dyn Terminator>,
    ) -> Arc<Self> {
        let admin = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            identity: IdentityCell::new(IdentityRecord::generated(
                ADMIN_SERVICE_NAME,
                "Administrative interface of this vat",
            )),
            services: services.iter().map(Arc::downgrade).collect(),
            timeout: Mutex::new(TimeoutState {
                timeout_secs: settings.timeout_secs,
                pending: None,
            }),
            stop_state: Mutex::new(StopState::Running),
            stop_action: Mutex::new(None),
            unregistrations: Mutex::new(BTreeMap::new()),
            tasks: HeartbeatTasks::new(),
            terminator,
            grace_period: settings.grace_period,
            unregister_on_stop: settings.unregister_on_stop,
        });
        admin.rearm(&mut lock(&admin.timeout));
        admin
    }

    /// Resets the liveness deadline.
    pub fn heartbeat(&self) {
        self.rearm(&mut lock(&self.timeout));
    }

    /// Replaces the timeout, clamping negative values to zero, and re-arms.
    pub fn set_timeout(&self, seconds: i64) {
        let mut state = lock(&self.timeout);
        state.timeout_secs = u64::try_from(seconds).unwrap_or(0);
        info!(timeout_secs = state.timeout_secs, "timeout changed");
        self.rearm(&mut state);
    }

    pub fn timeout_secs(&self) -> u64 {
        lock(&self.timeout).timeout_secs
    }

    pub fn has_pending_deadline(&self) -> bool {
        lock(&self.timeout)
            .pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Requests a graceful exit and returns immediately.
    ///
    /// The registered stop action runs first, bounded by the grace period;
    /// whatever its outcome, the process terminates one grace period later.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.stop_state);
            if *state != StopState::Running {
                info!(state = ?*state, "stop already in progress");
                return;
            }
            *state = StopState::StopRequested;
        }
        // the watchdog must not cut the grace period short
        if let Some(pending) = lock(&self.timeout).pending.take() {
            pending.abort();
        }

        let Some(admin) = self.me.upgrade() else {
            return;
        };
        let action = lock(&self.stop_action).clone();
        info!(with_action = action.is_some(), "stop requested");
        tokio::spawn(admin.run_stop_sequence(action));
    }

    pub fn stop_state(&self) -> StopState {
        *lock(&self.stop_state)
    }

    pub fn set_stop_action<F, Fut>(&self, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StopActionError>> + Send + 'static,
    {
        let action: StopAction = Arc::new(move || Box::pin(action()));
        *lock(&self.stop_action) = Some(action);
    }

    /// Snapshot of the identities of every managed capability, in order.
    pub fn identities(&self) -> Vec<IdentityRecord> {
        self.services
            .iter()
            .filter_map(Weak::upgrade)
            .map(|service| service.identity())
            .collect()
    }

    /// Overwrites the identity whose id is `old_id`. Returns whether a
    /// capability matched.
    pub fn update_identity(&self, old_id: &str, new_info: IdentityRecord) -> bool {
        let target = self
            .services
            .iter()
            .filter_map(Weak::upgrade)
            .find(|service| service.identity().id == old_id);
        match target {
            Some(service) => {
                info!(old_id, new_id = %new_info.id, "identity updated");
                service.set_identity(new_info);
                true
            }
            None => false,
        }
    }

    /// Records the outcome of one advertisement, returning any record it
    /// replaced.
    pub fn store_unregistration(
        &self,
        key: UnregistrationKey,
        registration: Registration,
    ) -> Option<Registration> {
        lock(&self.unregistrations).insert(key, registration)
    }

    pub fn unregistration_keys(&self) -> Vec<UnregistrationKey> {
        lock(&self.unregistrations).keys().cloned().collect()
    }

    pub fn reregistration_token(&self, key: &UnregistrationKey) -> Option<SturdyRef> {
        lock(&self.unregistrations)
            .get(key)
            .map(|registration| registration.reregistration.clone())
    }

    /// Invokes and discards every stored unregister action. Failures are
    /// logged; returns the number that succeeded.
    pub async fn unregister_all(&self) -> usize {
        let records = std::mem::take(&mut *lock(&self.unregistrations));
        let mut unregistered = 0;
        for (key, registration) in records {
            match registration.unregister.unregister().await {
                Ok(()) => {
                    unregistered += 1;
                    info!(%key, "unregistered");
                }
                Err(err) => warn!(%key, error = %err, "unregister failed"),
            }
        }
        unregistered
    }

    pub fn tasks(&self) -> &HeartbeatTasks {
        &self.tasks
    }

    /// Skips any remaining grace period and terminates right away.
    pub fn terminate_now(&self, reason: ExitReason) {
        *lock(&self.stop_state) = StopState::Terminating;
        if let Some(pending) = lock(&self.timeout).pending.take() {
            pending.abort();
        }
        warn!(?reason, "terminating immediately");
        self.tasks.cancel_all();
        self.terminator.terminate(reason);
    }

    fn rearm(&self, state: &mut TimeoutState) {
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        if state.timeout_secs == 0 || self.stop_state() != StopState::Running {
            return;
        }

        let timeout_secs = state.timeout_secs;
        let terminator = self.terminator.clone();
        let tasks = self.tasks.cancellation_token();
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            warn!(timeout_secs, "no heartbeat within timeout, terminating");
            tasks.cancel();
            terminator.terminate(ExitReason::TimeoutExpired);
        }));
    }

    async fn run_stop_sequence(self: Arc<Self>, action: Option<StopAction>) {
        if let Some(action) = action {
            // own task, so a panicking action still reaches termination
            let running = tokio::spawn(action());
            let abort = running.abort_handle();
            match tokio::time::timeout(self.grace_period, running).await {
                Ok(Ok(Ok(()))) => info!("stop action completed"),
                Ok(Ok(Err(err))) => warn!(error = %err, "stop action failed"),
                Ok(Err(err)) => warn!(error = %err, "stop action aborted"),
                Err(_) => {
                    abort.abort();
                    warn!(grace_secs = self.grace_period.as_secs(), "stop action timed out");
                }
            }
        }
        if self.unregister_on_stop
            && tokio::time::timeout(self.grace_period, self.unregister_all())
                .await
                .is_err()
        {
            warn!("unregistering timed out");
        }

        *lock(&self.stop_state) = StopState::Terminating;
        info!(grace_secs = self.grace_period.as_secs(), "terminating after grace period");
        let terminated = self.tasks.cancellation_token();
        tokio::select! {
            _ = tokio::time::sleep(self.grace_period) => {}
            _ = terminated.cancelled() => return,
        }
        self.tasks.cancel_all();
        self.terminator.terminate(ExitReason::StopRequested);
    }
}

impl Identifiable for Admin {
    fn identity(&self) -> IdentityRecord {
        self.identity.get()
    }

    fn set_identity(&self, record: IdentityRecord) {
        self.identity.replace(record);
    }
}

#[derive(Deserialize)]
struct SetTimeoutParams {
    seconds: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateIdentityParams {
    old_id: String,
    new_info: IdentityRecord,
}

#[async_trait]
impl Capability for Admin {
    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        match method {
            "heartbeat" => {
                self.heartbeat();
                Ok(Value::Null)
            }
            "setTimeout" => {
                let SetTimeoutParams { seconds } = decode_params(params)?;
                self.set_timeout(seconds);
                Ok(Value::Null)
            }
            "stop" => {
                self.stop();
                Ok(Value::Null)
            }
            "identities" => Ok(json!({ "infos": self.identities() })),
            "updateIdentity" => {
                let UpdateIdentityParams { old_id, new_info } = decode_params(params)?;
                self.update_identity(&old_id, new_info);
                Ok(Value::Null)
            }
            other => Err(CallError::UnknownMethod(other.to_string())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
