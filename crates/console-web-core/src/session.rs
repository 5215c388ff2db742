//! Session driver: owns the reconstructed model and the update subscription.
//!
//! [`SessionState`] is the model. [`SessionState::apply_update`] runs one
//! reconciliation pass over a single update message, in a fixed order:
//!
//! 1. advance the server clock (if the message carries a timestamp),
//! 2. register new metadata,
//! 3. reconcile tasks, then resources, then async ops (async ops resolve
//!    task and resource ids allocated earlier in the same pass),
//! 4. sweep all three stores,
//! 5. lint touched and pending tasks.
//!
//! [`Session`] is the shareable handle. It runs at most one subscription
//! loop, applies each message under a single write guard so readers never
//! observe a half-linked pass, publishes a [`SessionStatus`] on a watch
//! channel and reconnects with backoff forever:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> (Backoff -> Connecting)* -> Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::async_op::AsyncOp;
use crate::config::Config;
use crate::error::{Error, Result, TransportError, is_retryable};
use crate::lint::{LintEngine, LintReport};
use crate::metadata::MetadataRegistry;
use crate::reconcile::{self, ReconcileReport};
use crate::resource::Resource;
use crate::retention::{self, DEFAULT_RETAIN_FOR};
use crate::retry::RetryPolicy;
use crate::store::Store;
use crate::task::{Task, TaskState};
use crate::time::{Duration, ServerClock, Timestamp};
use crate::transport::{Connector, UpdateStream};
use crate::wire::Update;

// =============================================================================
// Model
// =============================================================================

/// Where the subscription loop is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    /// Waiting before the next reconnect.
    Backoff,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Backoff => "backoff",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Evictions from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Evicted {
    pub tasks: usize,
    pub resources: usize,
    pub async_ops: usize,
}

/// Everything one [`SessionState::apply_update`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// 1-based pass number.
    pub pass: u64,
    pub clock_advanced: bool,
    pub metadata_added: usize,
    pub tasks: ReconcileReport,
    pub resources: ReconcileReport,
    pub async_ops: ReconcileReport,
    pub evicted: Evicted,
    pub lint: LintReport,
}

impl PassReport {
    /// Records skipped across all entity classes.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.tasks.skipped.len() + self.resources.skipped.len() + self.async_ops.skipped.len()
    }
}

/// One entry of the flat warnings list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarningItem {
    /// Rule name.
    pub title: String,
    /// Rule summary.
    pub description: String,
}

/// Point-in-time counts for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub now: Option<Timestamp>,
    pub connection: ConnectionState,
    pub pending: bool,
    pub passes: u64,
    pub tasks: usize,
    pub running: usize,
    pub scheduled: usize,
    pub idle: usize,
    pub completed: usize,
    pub resources: usize,
    pub async_ops: usize,
    pub warnings: usize,
}

/// The reconstructed model of the remote process.
#[derive(Debug)]
pub struct SessionState {
    metas: MetadataRegistry,
    tasks: Store<Task>,
    resources: Store<Resource>,
    async_ops: Store<AsyncOp>,
    clock: ServerClock,
    lints: LintEngine,
    retain_for: Duration,
    pending: bool,
    connection: ConnectionState,
    passes: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(LintEngine::from_config(&crate::config::LintConfig::default()), DEFAULT_RETAIN_FOR)
    }
}

impl SessionState {
    #[must_use]
    pub fn new(lints: LintEngine, retain_for: Duration) -> Self {
        Self {
            metas: MetadataRegistry::new(),
            tasks: Store::new(),
            resources: Store::new(),
            async_ops: Store::new(),
            clock: ServerClock::new(),
            lints,
            retain_for,
            pending: true,
            connection: ConnectionState::Idle,
            passes: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(LintEngine::from_config(&config.lints), config.retain_for())
    }

    /// Run one reconciliation pass.
    pub fn apply_update(&mut self, update: Update) -> PassReport {
        self.passes += 1;
        self.pending = false;
        let mut report = PassReport {
            pass: self.passes,
            ..PassReport::default()
        };

        if let Some(now) = update.now {
            report.clock_advanced = self.clock.observe(now);
        }
        if let Some(batch) = &update.new_metadata {
            report.metadata_added = self.metas.register(batch);
        }
        if let Some(batch) = update.task_update {
            report.tasks = reconcile::reconcile_tasks(batch, &self.metas, &mut self.tasks);
        }
        if let Some(batch) = update.resource_update {
            report.resources = reconcile::reconcile_resources(batch, &self.metas, &mut self.resources);
        }
        if let Some(batch) = update.async_op_update {
            report.async_ops = reconcile::reconcile_async_ops(
                batch,
                &self.metas,
                &mut self.async_ops,
                &mut self.tasks,
                &mut self.resources,
            );
        }

        let now = self.clock.now();
        report.evicted = Evicted {
            tasks: retention::sweep(&mut self.tasks, self.retain_for, now),
            resources: retention::sweep(&mut self.resources, self.retain_for, now),
            async_ops: retention::sweep(&mut self.async_ops, self.retain_for, now),
        };
        report.lint = self.lints.run(&mut self.tasks, &report.tasks.touched, now);

        debug!(
            pass = report.pass,
            tasks_added = report.tasks.added,
            tasks_updated = report.tasks.updated,
            resources_added = report.resources.added,
            async_ops_added = report.async_ops.added,
            skipped = report.skipped(),
            evicted_tasks = report.evicted.tasks,
            "update applied"
        );
        report
    }

    /// Every live task warning as `(rule name, rule summary)`. Empty until
    /// the server clock is known.
    #[must_use]
    pub fn warnings(&self) -> Vec<WarningItem> {
        if self.clock.now().is_none() {
            return Vec::new();
        }
        self.tasks
            .values()
            .flat_map(|task| &task.warnings)
            .map(|warning| WarningItem {
                title: warning.lint.clone(),
                description: warning.summary.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let mut summary = SessionSummary {
            now: self.clock.now(),
            connection: self.connection,
            pending: self.pending,
            passes: self.passes,
            tasks: self.tasks.len(),
            resources: self.resources.len(),
            async_ops: self.async_ops.len(),
            warnings: self.warnings().len(),
            ..SessionSummary::default()
        };
        for task in self.tasks.values() {
            match task.state() {
                TaskState::Running => summary.running += 1,
                TaskState::Scheduled => summary.scheduled += 1,
                TaskState::Idle => summary.idle += 1,
                TaskState::Completed => summary.completed += 1,
            }
        }
        summary
    }

    #[must_use]
    pub fn metas(&self) -> &MetadataRegistry {
        &self.metas
    }

    #[must_use]
    pub fn tasks(&self) -> &Store<Task> {
        &self.tasks
    }

    #[must_use]
    pub fn resources(&self) -> &Store<Resource> {
        &self.resources
    }

    #[must_use]
    pub fn async_ops(&self) -> &Store<AsyncOp> {
        &self.async_ops
    }

    #[must_use]
    pub fn lints(&self) -> &LintEngine {
        &self.lints
    }

    /// Last server time, the "now" for every live duration.
    #[must_use]
    pub fn now(&self) -> Option<Timestamp> {
        self.clock.now()
    }

    /// `true` until the first message arrives and again while reconnecting.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.pending
    }

    #[must_use]
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes
    }

    #[must_use]
    pub fn retain_for(&self) -> Duration {
        self.retain_for
    }

    /// Takes effect on the next sweep.
    pub fn set_retain_for(&mut self, retain_for: Duration) {
        self.retain_for = retain_for;
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Published after every pass and every connection transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    pub pending: bool,
    pub passes: u64,
    pub last_updated_at: Option<Timestamp>,
}

/// A transport failure, for a user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportNotice {
    pub name: String,
    pub message: String,
}

impl From<&Error> for TransportNotice {
    fn from(error: &Error) -> Self {
        Self {
            name: error.notice_name().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A subscription is already running; its state is shared.
    AlreadyRunning,
    /// The session was shut down and cannot be restarted.
    Closed,
}

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug)]
struct Inner {
    state: RwLock<SessionState>,
    status: watch::Sender<SessionStatus>,
    notices: broadcast::Sender<TransportNotice>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
    policy: RetryPolicy,
}

/// Shareable handle to one session.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    #[must_use]
    pub fn new(state: SessionState, policy: RetryPolicy) -> Self {
        let status = SessionStatus {
            connection: state.connection,
            pending: state.pending,
            passes: state.passes,
            last_updated_at: state.now(),
        };
        let (status, _) = watch::channel(status);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                status,
                notices,
                shutdown,
                started: AtomicBool::new(false),
                driver: Mutex::new(None),
                policy,
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(SessionState::from_config(config), config.retry_policy())
    }

    /// Read the model. Do not hold the closure open across an await.
    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let guard = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut guard = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<TransportNotice> {
        self.inner.notices.subscribe()
    }

    /// Start the subscription loop on the current tokio runtime.
    ///
    /// Only the first call starts a loop; later calls share its state. Once
    /// the loop has stopped, whether by [`Session::shutdown`], a
    /// non-retryable error or an exhausted retry policy, the session is
    /// closed for good.
    pub fn start<C: Connector>(&self, connector: C) -> StartOutcome {
        if *self.inner.shutdown.borrow() {
            return StartOutcome::Closed;
        }
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("subscription already running");
            return StartOutcome::AlreadyRunning;
        }

        let session = self.clone();
        let handle = tokio::spawn(async move { session.drive(connector).await });
        *self.inner.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        StartOutcome::Started
    }

    /// Stop the subscription loop and wait for it to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let handle = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "session driver ended abnormally");
            }
        }
        self.set_connection(ConnectionState::Closed);
    }

    async fn drive<C: Connector>(self, connector: C) {
        let target = connector.target();
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            self.set_connection(ConnectionState::Connecting);

            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.stream_updates(&connector, &mut failures) => outcome,
            };
            let error = match outcome {
                Ok(()) => Error::Transport(TransportError::Closed),
                Err(e) => e,
            };

            failures = failures.saturating_add(1);
            warn!(target_addr = %target, attempt = failures, error = %error, "update stream failed");
            let _ = self.inner.notices.send(TransportNotice::from(&error));
            self.write(|state| state.pending = true);

            if !is_retryable(&error) {
                warn!(target_addr = %target, error = %error, "update stream error is not retryable");
                break;
            }
            if !self.inner.policy.allows(failures) {
                warn!(target_addr = %target, attempts = failures, "giving up on update stream");
                break;
            }

            let delay = self.inner.policy.delay_for_attempt(failures - 1);
            self.set_connection(ConnectionState::Backoff);
            debug!(attempt = failures, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::select! {
                _ = shutdown.changed() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        // a driver that stopped on its own leaves the session closed too
        self.inner.shutdown.send_replace(true);
        self.set_connection(ConnectionState::Closed);
    }

    /// Stream until the remote ends the stream or fails. `failures` is reset
    /// after every message applied.
    async fn stream_updates<C: Connector>(&self, connector: &C, failures: &mut u32) -> Result<()> {
        let mut stream = connector.connect_updates().await?;
        self.set_connection(ConnectionState::Streaming);

        while let Some(message) = stream.next_update().await {
            let update = message?;
            self.write(|state| state.apply_update(update));
            *failures = 0;
            self.publish_status();
        }
        Ok(())
    }

    fn set_connection(&self, connection: ConnectionState) {
        let previous = self.write(|state| std::mem::replace(&mut state.connection, connection));
        if previous != connection {
            info!(from = %previous, to = %connection, "connection state changed");
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = self.read(|state| SessionStatus {
            connection: state.connection,
            pending: state.pending,
            passes: state.passes,
            last_updated_at: state.now(),
        });
        self.inner.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
