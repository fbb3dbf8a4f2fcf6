//! Keeps the prediction cache in step with uploads made in this process or
//! by another process sharing the persisted store.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::cache::PredictionCache;
use crate::error::StoreError;
use crate::models::{StudentView, UploadMarker};
use crate::store::{PersistedPredictionStore, PREDICTIONS_KEY, UPLOAD_FLAG_KEY};

/// Wait after an upload before re-querying the remote summary, which may lag
/// behind the upload. This narrows the race; it does not close it.
pub const DEFAULT_GRACE_DELAY_MS: u64 = 1_000;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    /// A new file's predictions were persisted in this process
    UploadCompleted,
    /// Another process changed a key of the shared persisted store
    StorageChanged { key: String },
}

impl ChangeSignal {
    pub fn storage(key: &str) -> Self {
        ChangeSignal::StorageChanged {
            key: key.to_string(),
        }
    }
}

pub type SignalHandler = Arc<dyn Fn(&ChangeSignal) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event source provided by the hosting environment.
pub trait ChangeSignalSource: Send + Sync {
    fn subscribe(&self, handler: SignalHandler) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process signal source. Handlers run synchronously on the emitting thread.
#[derive(Default)]
pub struct SignalBus {
    handlers: Mutex<Vec<(SubscriptionId, SignalHandler)>>,
    next_id: AtomicU64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, signal: &ChangeSignal) {
        let handlers: Vec<SignalHandler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(signal);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl ChangeSignalSource for SignalBus {
    fn subscribe(&self, handler: SignalHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Bridges a persisted store to a [`SignalBus`] by polling its marker keys.
///
/// The first poll records the current marker without emitting. Afterwards a
/// raised upload flag emits `csv_uploaded`; otherwise a changed timestamp
/// marker emits `latest_predictions`.
pub struct StoreMarkerPoller {
    store: Arc<dyn PersistedPredictionStore>,
    bus: Arc<SignalBus>,
    last_marker: Option<UploadMarker>,
    primed: bool,
}

impl StoreMarkerPoller {
    pub fn new(store: Arc<dyn PersistedPredictionStore>, bus: Arc<SignalBus>) -> Self {
        Self {
            store,
            bus,
            last_marker: None,
            primed: false,
        }
    }

    /// Returns the signal emitted by this poll, if any.
    pub async fn poll_once(&mut self) -> Result<Option<ChangeSignal>, StoreError> {
        let marker = self.store.marker().await?;
        let marker_changed = self.primed && marker != self.last_marker;
        self.last_marker = marker;
        self.primed = true;

        let signal = if self.store.upload_flag_raised().await? {
            Some(ChangeSignal::storage(UPLOAD_FLAG_KEY))
        } else if marker_changed {
            Some(ChangeSignal::storage(PREDICTIONS_KEY))
        } else {
            None
        };

        if let Some(signal) = &signal {
            tracing::debug!(?signal, "persisted store changed");
            self.bus.emit(signal);
        }
        Ok(signal)
    }
}

/// Polls the persisted store and reads the cache every `interval` until
/// `shutdown` resolves. `on_refresh` is called whenever the snapshot served
/// carries a new fetch time.
///
/// `shutdown` is checked while a read is pending, so a hung remote call does
/// not keep the loop alive.
pub async fn watch<S, F>(
    cache: &PredictionCache,
    poller: &mut StoreMarkerPoller,
    interval: Duration,
    shutdown: S,
    mut on_refresh: F,
) where
    S: Future,
    F: FnMut(&[StudentView]),
{
    let mut ticker = tokio::time::interval(interval);
    let mut last_fetched = None;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let served = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            served = async {
                if let Err(err) = poller.poll_once().await {
                    tracing::warn!(error = %err, "polling persisted store failed");
                }
                cache.get_best_effort().await
            } => served,
        };

        match served {
            Ok(students) => {
                let fetched = cache.snapshot().fetched_at;
                if fetched != last_fetched {
                    last_fetched = fetched;
                    on_refresh(&students);
                }
            }
            Err(err) => tracing::warn!(error = %err, "no student risk data yet"),
        }
    }

    tracing::info!("watch stopped");
}

/// Maps change signals to cache invalidation and refresh.
pub struct SyncController {
    cache: PredictionCache,
    store: Arc<dyn PersistedPredictionStore>,
    runtime: Handle,
    grace_delay: Duration,
    subscription: Mutex<Option<(Arc<dyn ChangeSignalSource>, SubscriptionId)>>,
}

impl SyncController {
    pub fn new(
        cache: PredictionCache,
        store: Arc<dyn PersistedPredictionStore>,
        runtime: Handle,
    ) -> Self {
        Self {
            cache,
            store,
            runtime,
            grace_delay: Duration::from_millis(DEFAULT_GRACE_DELAY_MS),
            subscription: Mutex::new(None),
        }
    }

    pub fn with_grace_delay(mut self, grace_delay: Duration) -> Self {
        self.grace_delay = grace_delay;
        self
    }

    /// Starts handling signals from `source`, replacing any previous subscription.
    pub fn subscribe(self: &Arc<Self>, source: Arc<dyn ChangeSignalSource>) {
        self.unsubscribe();

        let this: Weak<Self> = Arc::downgrade(self);
        let id = source.subscribe(Arc::new(move |signal: &ChangeSignal| {
            if let Some(controller) = this.upgrade() {
                controller.handle(signal);
            }
        }));

        *self.subscription.lock() = Some((source, id));
    }

    pub fn unsubscribe(&self) {
        if let Some((source, id)) = self.subscription.lock().take() {
            source.unsubscribe(id);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Invalidates synchronously and schedules the refresh. Returns the
    /// refresh task, or `None` when the signal is unrelated to predictions.
    pub fn handle(&self, signal: &ChangeSignal) -> Option<JoinHandle<()>> {
        match signal {
            ChangeSignal::UploadCompleted => {
                tracing::info!(
                    grace_ms = self.grace_delay.as_millis() as u64,
                    "upload completed; refreshing student risk"
                );
                self.cache.invalidate();
                Some(self.schedule_refresh(self.grace_delay, false))
            }
            ChangeSignal::StorageChanged { key } if key == PREDICTIONS_KEY || key == UPLOAD_FLAG_KEY => {
                tracing::info!(%key, "shared prediction store changed; refreshing student risk");
                self.cache.invalidate();
                Some(self.schedule_refresh(Duration::ZERO, key == UPLOAD_FLAG_KEY))
            }
            ChangeSignal::StorageChanged { key } => {
                tracing::debug!(%key, "ignoring unrelated storage change");
                None
            }
        }
    }

    fn schedule_refresh(&self, delay: Duration, clear_flag: bool) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let store = Arc::clone(&self.store);

        self.runtime.spawn(async move {
            if clear_flag {
                if let Err(err) = store.clear_upload_flag().await {
                    tracing::warn!(error = %err, "could not clear upload flag");
                }
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match cache.get(true).await {
                Ok(records) => tracing::info!(count = records.len(), "student risk refreshed after change"),
                Err(err) => tracing::warn!(error = %err, "refresh after change failed"),
            }
        })
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
