use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dropout-risk tier. Serialized with the labels the dashboard displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Alto")]
    High,
    #[serde(rename = "Medio")]
    Medium,
    #[serde(rename = "Bajo")]
    Low,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low];

    /// Normalizes a tier label. Accepts the Spanish labels and their English
    /// equivalents, ignoring case and surrounding whitespace.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "alto" | "high" => Some(RiskLevel::High),
            "medio" | "medium" => Some(RiskLevel::Medium),
            "bajo" | "low" => Some(RiskLevel::Low),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::High => "Alto",
            RiskLevel::Medium => "Medio",
            RiskLevel::Low => "Bajo",
        }
    }

    /// Sort key, highest risk first.
    pub fn rank(self) -> u8 {
        match self {
            RiskLevel::High => 0,
            RiskLevel::Medium => 1,
            RiskLevel::Low => 2,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub const DEFAULT_CONDUCT: &str = "Regular";

/// The reconciled record every view renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub student_id: String,
    pub name: String,
    pub grade: f64,
    pub attendance_percent: f64,
    pub conduct: String,
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropout_probability: Option<f64>,
}

/// Partial record served by the remote risk summary endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSummaryRecord {
    pub student_id: String,
    pub name: String,
    pub risk_level: Option<RiskLevel>,
}

/// Full record written by the upload pipeline. Every field is optional
/// because the persisted payload is loosely typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedPredictionRecord {
    pub student_id: Option<String>,
    pub name: Option<String>,
    pub grade: Option<f64>,
    pub attendance_percent: Option<f64>,
    pub conduct: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub dropout_probability: Option<f64>,
}

/// Opaque value of the store's "last upload" marker. Only equality matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMarker(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Empty,
    Loading,
    Fresh,
    Stale,
}

#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub records: Arc<Vec<StudentView>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub state: SnapshotState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels_in_both_languages() {
        assert_eq!(RiskLevel::parse("Alto"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse(" medio "), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse("LOW"), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::parse("critico"), None);
        assert_eq!(RiskLevel::parse(""), None);
    }

    #[test]
    fn student_view_serializes_with_dashboard_labels() {
        let view = StudentView {
            student_id: "7".to_string(),
            name: "Ana".to_string(),
            grade: 15.0,
            attendance_percent: 90.0,
            conduct: DEFAULT_CONDUCT.to_string(),
            risk_level: RiskLevel::High,
            dropout_probability: None,
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["riskLevel"], "Alto");
        assert_eq!(json["studentId"], "7");
        assert_eq!(json["attendancePercent"], 90.0);
        assert!(json.get("dropoutProbability").is_none());
    }
}
