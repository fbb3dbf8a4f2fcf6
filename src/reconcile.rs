use std::collections::{HashMap, HashSet};

use crate::models::{
    PersistedPredictionRecord, RiskLevel, RiskSummaryRecord, StudentView, DEFAULT_CONDUCT,
};

/// Lookup over persisted records: by id first, then by exact name.
/// The first record wins on either key.
struct PersistedIndex<'a> {
    by_id: HashMap<&'a str, &'a PersistedPredictionRecord>,
    by_name: HashMap<&'a str, &'a PersistedPredictionRecord>,
}

impl<'a> PersistedIndex<'a> {
    fn build(persisted: &'a [PersistedPredictionRecord]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();

        for record in persisted {
            if let Some(id) = record.student_id.as_deref() {
                by_id.entry(id).or_insert(record);
            }
            if let Some(name) = record.name.as_deref() {
                by_name.entry(name).or_insert(record);
            }
        }

        Self { by_id, by_name }
    }

    fn lookup(&self, student_id: &str, name: &str) -> Option<&'a PersistedPredictionRecord> {
        self.by_id
            .get(student_id)
            .or_else(|| self.by_name.get(name))
            .copied()
    }
}

/// Merges the remote summary with the persisted prediction set.
///
/// The remote summary defines the output rows; persisted records only enrich
/// matching rows, so a persisted record with no remote counterpart is dropped.
/// The remote risk level wins over the persisted one.
///
/// Ids are trimmed; blank ids are dropped and a repeated id keeps its first
/// occurrence, so every row in the result has a unique non-empty id.
pub fn reconcile(
    remote: &[RiskSummaryRecord],
    persisted: &[PersistedPredictionRecord],
) -> Vec<StudentView> {
    let index = PersistedIndex::build(persisted);
    let mut seen = HashSet::new();
    let mut views = Vec::with_capacity(remote.len());

    for record in remote {
        let student_id = record.student_id.trim();
        if student_id.is_empty() {
            tracing::warn!(name = %record.name, "skipping remote record with blank student id");
            continue;
        }
        if !seen.insert(student_id) {
            tracing::debug!(%student_id, "skipping duplicate remote record");
            continue;
        }

        views.push(match index.lookup(student_id, &record.name) {
            Some(full) => merge(student_id, record, full),
            None => remote_only(student_id, record),
        });
    }

    views
}

fn merge(
    student_id: &str,
    remote: &RiskSummaryRecord,
    full: &PersistedPredictionRecord,
) -> StudentView {
    StudentView {
        student_id: student_id.to_string(),
        name: full.name.clone().unwrap_or_else(|| remote.name.clone()),
        grade: full.grade.unwrap_or(0.0),
        attendance_percent: full.attendance_percent.unwrap_or(0.0),
        conduct: full
            .conduct
            .clone()
            .unwrap_or_else(|| DEFAULT_CONDUCT.to_string()),
        risk_level: remote
            .risk_level
            .or(full.risk_level)
            .unwrap_or(RiskLevel::Low),
        dropout_probability: full.dropout_probability,
    }
}

fn remote_only(student_id: &str, remote: &RiskSummaryRecord) -> StudentView {
    StudentView {
        student_id: student_id.to_string(),
        name: remote.name.clone(),
        grade: 0.0,
        attendance_percent: 0.0,
        conduct: DEFAULT_CONDUCT.to_string(),
        risk_level: remote.risk_level.unwrap_or(RiskLevel::Low),
        dropout_probability: None,
    }
}
