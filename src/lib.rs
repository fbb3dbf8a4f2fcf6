//! Client-side cache of student dropout-risk predictions.
//!
//! Dashboard views read through one [`PredictionCache`], which coalesces
//! fetches of the remote risk summary and reconciles them with the
//! prediction set persisted by the last upload. A [`SyncController`]
//! invalidates and refreshes the cache when an upload lands, here or in
//! another process sharing the store. [`views`] holds the pure queries the
//! views apply to a snapshot.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod service;
pub mod store;
pub mod sync;
pub mod views;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Clock, ManualClock, PredictionCache, SystemClock};
pub use error::{CacheError, StoreError};
pub use models::{
    CacheSnapshot, PersistedPredictionRecord, RiskLevel, RiskSummaryRecord, SnapshotState,
    StudentView,
};
pub use service::{HttpRiskSummaryService, RiskSummaryService};
pub use store::{JsonFileStore, PersistedPredictionStore};
pub use sync::{ChangeSignal, ChangeSignalSource, SignalBus, StoreMarkerPoller, SyncController};
