//! In-memory collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{CacheError, StoreError};
use crate::models::{PersistedPredictionRecord, RiskLevel, RiskSummaryRecord, UploadMarker};
use crate::service::RiskSummaryService;
use crate::store::{PersistedPredictionStore, PREDICTIONS_KEY};

pub(crate) fn summary(id: &str, name: &str, risk: RiskLevel) -> RiskSummaryRecord {
    RiskSummaryRecord {
        student_id: id.to_string(),
        name: name.to_string(),
        risk_level: Some(risk),
    }
}

struct Scripted {
    delay: Duration,
    outcome: Result<Vec<RiskSummaryRecord>, CacheError>,
}

/// Serves scripted responses in order, then falls back to `records`.
pub(crate) struct FakeService {
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    records: Mutex<Vec<RiskSummaryRecord>>,
    script: Mutex<VecDeque<Scripted>>,
}

impl FakeService {
    pub(crate) fn new(records: Vec<RiskSummaryRecord>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            records: Mutex::new(records),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_records(&self, records: Vec<RiskSummaryRecord>) {
        *self.records.lock() = records;
    }

    pub(crate) fn fail_next(&self, err: CacheError) {
        self.script.lock().push_back(Scripted {
            delay: Duration::ZERO,
            outcome: Err(err),
        });
    }

    pub(crate) fn respond_next(&self, delay: Duration, records: Vec<RiskSummaryRecord>) {
        self.script.lock().push_back(Scripted {
            delay,
            outcome: Ok(records),
        });
    }
}

#[async_trait]
impl RiskSummaryService for FakeService {
    async fn fetch_summary(&self) -> Result<Vec<RiskSummaryRecord>, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().pop_front();
        let (delay, outcome) = match scripted {
            Some(next) => (next.delay, next.outcome),
            None => (*self.delay.lock(), Ok(self.records.lock().clone())),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    records: Mutex<Option<Vec<PersistedPredictionRecord>>>,
    corrupt: Mutex<bool>,
    marker: Mutex<Option<UploadMarker>>,
    flag: Mutex<bool>,
    flag_clears: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn with_records(records: Vec<PersistedPredictionRecord>) -> Self {
        let store = Self::default();
        *store.records.lock() = Some(records);
        store
    }

    pub(crate) fn set_corrupt(&self, corrupt: bool) {
        *self.corrupt.lock() = corrupt;
    }

    pub(crate) fn set_marker(&self, marker: &str) {
        *self.marker.lock() = Some(UploadMarker(marker.to_string()));
    }

    pub(crate) fn raise_flag(&self) {
        *self.flag.lock() = true;
    }

    pub(crate) fn flag_raised(&self) -> bool {
        *self.flag.lock()
    }

    pub(crate) fn flag_clears(&self) -> usize {
        self.flag_clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistedPredictionStore for MemoryStore {
    async fn read(&self) -> Result<Option<Vec<PersistedPredictionRecord>>, StoreError> {
        if *self.corrupt.lock() {
            return Err(StoreError::corrupt(PREDICTIONS_KEY, "unexpected end of input"));
        }
        Ok(self.records.lock().clone())
    }

    async fn marker(&self) -> Result<Option<UploadMarker>, StoreError> {
        Ok(self.marker.lock().clone())
    }

    async fn upload_flag_raised(&self) -> Result<bool, StoreError> {
        Ok(*self.flag.lock())
    }

    async fn clear_upload_flag(&self) -> Result<(), StoreError> {
        *self.flag.lock() = false;
        self.flag_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
