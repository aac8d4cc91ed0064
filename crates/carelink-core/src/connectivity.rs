//! Connectivity monitor
//!
//! Periodically probes the remote service's health resource and tracks
//! whether the service is reachable. Phase changes are reported to
//! registered listeners, persisted as the offline-mode flag and, when the
//! service comes back, trigger a background reconciliation pass.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::reconcile::{Reconciler, SyncSummary};
use crate::remote::{RemoteError, RemoteService};
use crate::store::CacheStore;

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
// Shorter settings are raised to these floors.
const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(10);
const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(10);
const NOTICE_CAPACITY: usize = 16;

const OFFLINE_MESSAGE: &str =
    "You are offline. Changes you make will be synced when the connection returns.";

/// Probe cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl MonitorConfig {
    /// Same cadence with zero or tiny durations raised to a usable minimum
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            probe_interval: self.probe_interval.max(MIN_PROBE_INTERVAL),
            probe_timeout: self.probe_timeout.max(MIN_PROBE_TIMEOUT),
        }
    }
}

/// What the last probe learned about the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    /// No probe has completed yet
    Unknown,
    None,
    Network,
}

/// Snapshot of connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    /// Some answer came back from the network
    pub is_connected: bool,
    /// The service answered its health resource with a 2xx
    pub is_reachable: bool,
    pub kind: NetworkKind,
}

impl ConnectivityState {
    pub const UNKNOWN: Self = Self {
        is_connected: false,
        is_reachable: false,
        kind: NetworkKind::Unknown,
    };

    const ONLINE: Self = Self {
        is_connected: true,
        is_reachable: true,
        kind: NetworkKind::Network,
    };

    const DEGRADED: Self = Self {
        is_connected: true,
        is_reachable: false,
        kind: NetworkKind::Network,
    };

    const OFFLINE: Self = Self {
        is_connected: false,
        is_reachable: false,
        kind: NetworkKind::None,
    };

    pub const fn is_online(&self) -> bool {
        self.is_connected && self.is_reachable
    }

    pub const fn phase(&self) -> ConnectivityPhase {
        match self.kind {
            NetworkKind::Unknown => ConnectivityPhase::Unknown,
            _ if self.is_online() => ConnectivityPhase::Online,
            _ => ConnectivityPhase::Offline,
        }
    }

    fn from_probe(result: Result<(), RemoteError>) -> Self {
        match result {
            Ok(()) => Self::ONLINE,
            Err(RemoteError::Status(_)) => Self::DEGRADED,
            Err(_) => Self::OFFLINE,
        }
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityPhase {
    Unknown,
    Online,
    Offline,
}

impl fmt::Display for ConnectivityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

/// User-visible notification published on the notice channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Offline { message: String },
    BackOnline,
    Synced(SyncSummary),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline { message } => f.write_str(message),
            Self::BackOnline => f.write_str("Back online. Syncing pending changes."),
            Self::Synced(summary) => write!(f, "Sync complete: {summary}"),
        }
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

struct Shared<R> {
    remote: Arc<R>,
    store: CacheStore,
    config: MonitorConfig,
    reconciler: OnceLock<Reconciler<R>>,
    state: Mutex<ConnectivityState>,
    // Serializes probes so transitions are observed in order.
    probe_lock: tokio::sync::Mutex<()>,
    listeners: Mutex<BTreeMap<SubscriptionId, Listener>>,
    next_subscription: AtomicU64,
    notices: broadcast::Sender<Notice>,
    probe_task: Mutex<Option<JoinHandle<()>>>,
    sync_task: tokio::sync::Mutex<Option<JoinHandle<SyncSummary>>>,
}

impl<R> Drop for Shared<R> {
    fn drop(&mut self) {
        let probe_task = self
            .probe_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = probe_task.take() {
            task.abort();
        }
        if let Some(task) = self.sync_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Tracks reachability of the remote service
pub struct ConnectivityMonitor<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for ConnectivityMonitor<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R: RemoteService> ConnectivityMonitor<R> {
    pub fn new(remote: Arc<R>, store: CacheStore, config: MonitorConfig) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                remote,
                store,
                config: config.clamped(),
                reconciler: OnceLock::new(),
                state: Mutex::new(ConnectivityState::UNKNOWN),
                probe_lock: tokio::sync::Mutex::new(()),
                listeners: Mutex::new(BTreeMap::new()),
                next_subscription: AtomicU64::new(1),
                notices,
                probe_task: Mutex::new(None),
                sync_task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Run `reconciler` whenever the service becomes reachable
    #[must_use]
    pub fn with_reconciler(self, reconciler: Reconciler<R>) -> Self {
        if self.shared.reconciler.set(reconciler).is_err() {
            tracing::warn!("Connectivity monitor already has a reconciler; keeping the first");
        }
        self
    }

    /// Start periodic probing; the first probe runs immediately
    pub fn start(&self) {
        let mut task = lock(&self.shared.probe_task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let interval = self.shared.config.probe_interval;
        let weak: Weak<Shared<R>> = Arc::downgrade(&self.shared);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                Self { shared }.probe().await;
            }
        }));
        tracing::debug!("Connectivity monitor started ({:?} interval)", interval);
    }

    /// Whether the periodic probe task is running
    pub fn is_running(&self) -> bool {
        lock(&self.shared.probe_task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop probing and drop every listener
    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.shared.probe_task).take() {
            task.abort();
            tracing::debug!("Connectivity monitor stopped");
        }
        lock(&self.shared.listeners).clear();
    }

    /// Run one probe and handle any phase change
    pub async fn probe(&self) {
        self.force_check().await;
    }

    /// Run one probe now and return the resulting state
    pub async fn force_check(&self) -> ConnectivityState {
        let _serial = self.shared.probe_lock.lock().await;

        let result = tokio::time::timeout(
            self.shared.config.probe_timeout,
            self.shared.remote.health_check(),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout));
        if let Err(error) = &result {
            tracing::debug!("Health probe failed: {}", error);
        }

        let next = ConnectivityState::from_probe(result);
        let previous = std::mem::replace(&mut *lock(&self.shared.state), next);
        if previous.phase() != next.phase() {
            self.on_transition(previous.phase(), next).await;
        }
        next
    }

    async fn on_transition(&self, from: ConnectivityPhase, state: ConnectivityState) {
        let listeners: Vec<Listener> = lock(&self.shared.listeners).values().cloned().collect();
        for listener in listeners {
            listener(state);
        }

        match state.phase() {
            ConnectivityPhase::Online => {
                tracing::info!("Remote service reachable ({} -> online)", from);
                if let Err(error) = self.shared.store.set_offline_mode(false).await {
                    tracing::warn!("Failed to clear offline mode flag: {}", error);
                }
                if from == ConnectivityPhase::Offline {
                    let _ = self.shared.notices.send(Notice::BackOnline);
                }
                self.spawn_sync().await;
            }
            ConnectivityPhase::Offline => {
                tracing::warn!("Remote service unreachable ({} -> offline)", from);
                if let Err(error) = self.shared.store.set_offline_mode(true).await {
                    tracing::warn!("Failed to persist offline mode flag: {}", error);
                }
                let _ = self.shared.notices.send(Notice::Offline {
                    message: OFFLINE_MESSAGE.to_string(),
                });
            }
            ConnectivityPhase::Unknown => {}
        }
    }

    async fn spawn_sync(&self) {
        let Some(reconciler) = self.shared.reconciler.get().cloned() else {
            return;
        };

        let mut task = self.shared.sync_task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Background sync still running; not starting another");
            return;
        }

        let notices = self.shared.notices.clone();
        *task = Some(tokio::spawn(async move {
            let summary = reconciler.sync_with_remote().await;
            if !summary.in_progress {
                let _ = notices.send(Notice::Synced(summary.clone()));
            }
            summary
        }));
    }

    /// Await the most recent background sync, if one was started
    pub async fn wait_for_background_sync(&self) -> Option<SyncSummary> {
        let task = self.shared.sync_task.lock().await.take()?;
        match task.await {
            Ok(summary) => Some(summary),
            Err(error) => {
                tracing::warn!("Background sync did not complete: {}", error);
                None
            }
        }
    }

    /// Register a callback invoked on every phase change
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.listeners).insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener; returns false when it was already removed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.shared.listeners).remove(&id).is_some()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    pub fn state(&self) -> ConnectivityState {
        *lock(&self.shared.state)
    }

    pub fn phase(&self) -> ConnectivityPhase {
        self.state().phase()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }
}
