use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resolver::{RemoteHeartbeat, ResolverBinding};
use crate::time::{Clock, SystemClock};

/// Shortest interval a heartbeat loop will wait between beats.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Point-in-time view of one heartbeat task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatStatus {
    pub resolver: String,
    pub interval: Duration,
    pub beats: u64,
    pub failures: u64,
    pub last_beat_millis: Option<u64>,
    pub finished: bool,
}

#[derive(Debug, Default)]
struct BeatStats {
    beats: AtomicU64,
    failures: AtomicU64,
    last_beat_millis: AtomicU64,
}

struct HeartbeatTask {
    resolver: String,
    interval: Duration,
    stats: Arc<BeatStats>,
    handle: JoinHandle<()>,
}

/// Process-wide list of heartbeat tasks, one per bound resolver.
///
/// Every task runs under a child of one root cancellation token; cancelling
/// the list (or dropping it) stops all of them.
pub struct HeartbeatTasks {
    root: CancellationToken,
    tasks: Mutex<Vec<HeartbeatTask>>,
    clock: Arc<dyn Clock>,
}

impl HeartbeatTasks {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Spawns a loop re-asserting `binding` every interval. Does not wait
    /// for the first beat.
    pub fn spawn(&self, resolver: impl Into<String>, binding: ResolverBinding) {
        let resolver = resolver.into();
        if binding.interval < MIN_HEARTBEAT_INTERVAL {
            warn!(
                %resolver,
                requested_ms = binding.interval.as_millis() as u64,
                "heartbeat interval raised to the minimum"
            );
        }
        let interval = binding.interval.max(MIN_HEARTBEAT_INTERVAL);
        let stats = Arc::new(BeatStats::default());

        let handle = tokio::spawn(run_heartbeat(
            resolver.clone(),
            binding.heartbeat,
            interval,
            self.root.child_token(),
            stats.clone(),
            self.clock.clone(),
        ));

        self.lock().push(HeartbeatTask {
            resolver,
            interval,
            stats,
            handle,
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn statuses(&self) -> Vec<HeartbeatStatus> {
        self.lock()
            .iter()
            .map(|task| {
                let last = task.stats.last_beat_millis.load(Ordering::Relaxed);
                HeartbeatStatus {
                    resolver: task.resolver.clone(),
                    interval: task.interval,
                    beats: task.stats.beats.load(Ordering::Relaxed),
                    failures: task.stats.failures.load(Ordering::Relaxed),
                    last_beat_millis: (last > 0).then_some(last),
                    finished: task.handle.is_finished(),
                }
            })
            .collect()
    }

    /// Stops every running task and any task spawned afterwards.
    pub fn cancel_all(&self) {
        if !self.root.is_cancelled() {
            info!(tasks = self.len(), "cancelling heartbeat tasks");
        }
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Token that cancels every task when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<HeartbeatTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HeartbeatTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HeartbeatTasks {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run_heartbeat(
    resolver: String,
    heartbeat: Arc<dyn RemoteHeartbeat>,
    interval: Duration,
    cancel: CancellationToken,
    stats: Arc<BeatStats>,
    clock: Arc<dyn Clock>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = heartbeat.beat() => outcome,
        };

        match outcome {
            Ok(()) => {
                stats.beats.fetch_add(1, Ordering::Relaxed);
                stats
                    .last_beat_millis
                    .store(clock.now_millis(), Ordering::Relaxed);
                metrics::counter!("vatwarden_heartbeats_total", "outcome" => "ok").increment(1);
                debug!(%resolver, "beat");
            }
            Err(err) => {
                // the binding may recover on the resolver side; keep beating
                stats.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("vatwarden_heartbeats_total", "outcome" => "failed").increment(1);
                warn!(%resolver, error = %err, "heartbeat failed");
            }
        }
    }
    debug!(%resolver, "heartbeat task stopped");
}
