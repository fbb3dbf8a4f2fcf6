//! Single-snapshot prediction cache with coalesced refreshes.
//!
//! Every view asks the same [`PredictionCache`] for the current student risk
//! list. A fresh snapshot is returned without suspending; otherwise one fetch
//! of the remote summary is started (or joined, when one is already running),
//! reconciled against the persisted prediction set, and stored.
//!
//! ```text
//! Empty --get--> Loading --ok--> Fresh --ttl--> Stale --get--> Loading
//!   ^                                                            |
//!   +------------------------- invalidate ----------------------+
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::CacheError;
use crate::models::{CacheSnapshot, PersistedPredictionRecord, SnapshotState, StudentView};
use crate::reconcile::reconcile;
use crate::service::RiskSummaryService;
use crate::store::PersistedPredictionStore;

/// Snapshot time-to-live. The dashboard's lists tolerate 30 seconds of lag.
pub const DEFAULT_TTL_SECS: i64 = 30;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

type FetchResult = Result<Arc<Vec<StudentView>>, CacheError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheState {
    records: Option<Arc<Vec<StudentView>>>,
    fetched_at: Option<DateTime<Utc>>,
    /// Set when the stored records come from a fetch that began before the
    /// latest invalidation.
    expired: bool,
    /// Id of the fetch whose result is stored. Older fetches never overwrite it.
    stored_by: u64,
    generation: u64,
    next_fetch_id: u64,
    in_flight: Option<InFlight>,
}

impl CacheState {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (&self.records, self.fetched_at) {
            (Some(_), Some(at)) => !self.expired && now - at < ttl,
            _ => false,
        }
    }

    fn fresh_records(&self, now: DateTime<Utc>, ttl: Duration) -> Option<Arc<Vec<StudentView>>> {
        if self.is_fresh(now, ttl) {
            self.records.clone()
        } else {
            None
        }
    }
}

struct CacheInner {
    service: Arc<dyn RiskSummaryService>,
    store: Arc<dyn PersistedPredictionStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

/// Shared handle; clones refer to the same snapshot.
#[derive(Clone)]
pub struct PredictionCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for PredictionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("PredictionCache")
            .field("ttl", &self.inner.ttl)
            .field("state", &snapshot.state)
            .field("records", &snapshot.records.len())
            .finish()
    }
}

impl PredictionCache {
    pub fn new(
        service: Arc<dyn RiskSummaryService>,
        store: Arc<dyn PersistedPredictionStore>,
    ) -> Self {
        Self::with_clock(
            service,
            store,
            Arc::new(SystemClock),
            Duration::seconds(DEFAULT_TTL_SECS),
        )
    }

    pub fn with_clock(
        service: Arc<dyn RiskSummaryService>,
        store: Arc<dyn PersistedPredictionStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                service,
                store,
                clock,
                ttl,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Returns the current student list.
    ///
    /// A fresh snapshot is returned immediately unless `force_refresh` is set.
    /// Otherwise the caller awaits the in-flight fetch if there is one, or
    /// starts a new one. Concurrent callers always observe the same result.
    ///
    /// A failed refresh falls back to the previous snapshot, stale or not;
    /// [`CacheError::NoData`] is returned only when there is nothing to serve.
    pub async fn get(&self, force_refresh: bool) -> FetchResult {
        let fetch = {
            let mut state = self.inner.state.lock();
            if !force_refresh {
                if let Some(records) = state.fresh_records(self.inner.clock.now(), self.inner.ttl)
                {
                    tracing::debug!(count = records.len(), "serving cached student risk snapshot");
                    return Ok(records);
                }
            }
            CacheInner::join_or_start(&self.inner, &mut state)
        };

        fetch.await
    }

    pub async fn force_refresh(&self) -> FetchResult {
        self.get(true).await
    }

    /// Read for list views that prefer showing something over waiting.
    ///
    /// Stale records are returned immediately while a refresh runs in the
    /// background on the tokio runtime. With no records at all this behaves
    /// like `get(false)`.
    pub async fn get_best_effort(&self) -> FetchResult {
        let stale = {
            let mut state = self.inner.state.lock();
            if let Some(records) = state.fresh_records(self.inner.clock.now(), self.inner.ttl) {
                return Ok(records);
            }
            match state.records.clone() {
                Some(records) => Some((records, CacheInner::join_or_start(&self.inner, &mut state))),
                None => None,
            }
        };

        match stale {
            Some((records, refresh)) => {
                tracing::debug!(count = records.len(), "serving stale snapshot while refreshing");
                tokio::spawn(async move {
                    // Outcome is recorded and logged by the fetch itself.
                    let _ = refresh.await;
                });
                Ok(records)
            }
            None => self.get(false).await,
        }
    }

    /// Drops the snapshot so the next read goes to the network.
    ///
    /// A fetch already running is not cancelled. It may still store its
    /// result, but that result is treated as stale.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        state.records = None;
        state.fetched_at = None;
        state.expired = false;
        state.generation += 1;
        let detached = state.in_flight.take().is_some();
        tracing::info!(
            generation = state.generation,
            detached_fetch = detached,
            "student risk cache invalidated"
        );
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.inner.state.lock();
        let now = self.inner.clock.now();

        let phase = if state.in_flight.is_some() {
            SnapshotState::Loading
        } else if state.records.is_none() {
            SnapshotState::Empty
        } else if state.is_fresh(now, self.inner.ttl) {
            SnapshotState::Fresh
        } else {
            SnapshotState::Stale
        };

        CacheSnapshot {
            records: state.records.clone().unwrap_or_default(),
            fetched_at: state.fetched_at,
            state: phase,
        }
    }
}

impl CacheInner {
    fn join_or_start(inner: &Arc<Self>, state: &mut CacheState) -> SharedFetch {
        if let Some(in_flight) = &state.in_flight {
            tracing::debug!(fetch = in_flight.id, "joining in-flight student risk fetch");
            return in_flight.fetch.clone();
        }

        state.next_fetch_id += 1;
        let id = state.next_fetch_id;
        let generation = state.generation;
        let task = Arc::clone(inner);
        let fetch = async move { task.run_fetch(id, generation).await }
            .boxed()
            .shared();

        state.in_flight = Some(InFlight {
            id,
            fetch: fetch.clone(),
        });
        fetch
    }

    async fn run_fetch(&self, id: u64, generation: u64) -> FetchResult {
        let outcome = self.load().await;
        self.complete(id, generation, outcome)
    }

    async fn load(&self) -> Result<Vec<StudentView>, CacheError> {
        let remote = self.service.fetch_summary().await?;
        let persisted = self.load_persisted().await;
        Ok(reconcile(&remote, &persisted))
    }

    async fn load_persisted(&self) -> Vec<PersistedPredictionRecord> {
        match self.store.read().await {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "persisted predictions unreadable; using remote summary only");
                Vec::new()
            }
        }
    }

    fn complete(
        &self,
        id: u64,
        generation: u64,
        outcome: Result<Vec<StudentView>, CacheError>,
    ) -> FetchResult {
        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
            state.in_flight = None;
        }

        match outcome {
            Ok(records) => {
                let records = Arc::new(records);
                if id > state.stored_by {
                    state.records = Some(Arc::clone(&records));
                    state.fetched_at = Some(self.clock.now());
                    state.stored_by = id;
                    state.expired = generation != state.generation;
                    tracing::info!(
                        fetch = id,
                        count = records.len(),
                        stale = state.expired,
                        "student risk snapshot stored"
                    );
                } else {
                    tracing::debug!(fetch = id, "discarding result superseded by a newer fetch");
                }
                Ok(records)
            }
            Err(err) => match &state.records {
                Some(previous) => {
                    tracing::warn!(error = %err, count = previous.len(), "refresh failed; serving previous snapshot");
                    Ok(Arc::clone(previous))
                }
                None => {
                    tracing::warn!(error = %err, "refresh failed and no snapshot is available");
                    Err(CacheError::no_data(err))
                }
            },
        }
    }
}
