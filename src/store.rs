//! Locally persisted prediction set from the most recent upload.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::StoreError;
use crate::models::{PersistedPredictionRecord, RiskLevel, UploadMarker};
use crate::service::id_to_string;

pub const PREDICTIONS_KEY: &str = "latest_predictions";
pub const TIMESTAMP_KEY: &str = "csv_upload_timestamp";
pub const UPLOAD_FLAG_KEY: &str = "csv_uploaded";

/// Read side of the persisted store. The only write the cache side performs
/// is clearing the one-shot upload flag after consuming it.
#[async_trait]
pub trait PersistedPredictionStore: Send + Sync {
    /// `Ok(None)` when no upload has been persisted yet.
    async fn read(&self) -> Result<Option<Vec<PersistedPredictionRecord>>, StoreError>;

    async fn marker(&self) -> Result<Option<UploadMarker>, StoreError>;

    async fn upload_flag_raised(&self) -> Result<bool, StoreError>;

    async fn clear_upload_flag(&self) -> Result<(), StoreError>;
}

/// Key/value directory: one file per key.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn read_key(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn write_key(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path(key);
        tokio::fs::write(&path, value)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    /// Upload-pipeline side: persist a prediction payload, stamp the marker
    /// and raise the one-shot flag.
    pub async fn record_upload(
        &self,
        predictions_json: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;
        self.write_key(PREDICTIONS_KEY, predictions_json).await?;
        self.write_key(TIMESTAMP_KEY, &at.timestamp_millis().to_string())
            .await?;
        self.write_key(UPLOAD_FLAG_KEY, "true").await
    }
}

#[async_trait]
impl PersistedPredictionStore for JsonFileStore {
    async fn read(&self) -> Result<Option<Vec<PersistedPredictionRecord>>, StoreError> {
        match self.read_key(PREDICTIONS_KEY).await? {
            Some(raw) => parse_persisted_predictions(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn marker(&self) -> Result<Option<UploadMarker>, StoreError> {
        Ok(self
            .read_key(TIMESTAMP_KEY)
            .await?
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(UploadMarker))
    }

    async fn upload_flag_raised(&self) -> Result<bool, StoreError> {
        Ok(self.read_key(UPLOAD_FLAG_KEY).await?.is_some())
    }

    async fn clear_upload_flag(&self) -> Result<(), StoreError> {
        let path = self.path(UPLOAD_FLAG_KEY);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[derive(Deserialize)]
struct WirePersistedPrediction {
    #[serde(
        default,
        rename = "id_estudiante",
        alias = "studentId",
        alias = "student_id",
        alias = "estudiante_id",
        deserialize_with = "lenient_id"
    )]
    student_id: Option<String>,
    #[serde(default, rename = "nombre", alias = "name", deserialize_with = "lenient_text")]
    name: Option<String>,
    #[serde(default, rename = "nota_final", alias = "grade", deserialize_with = "lenient_number")]
    final_grade: Option<f64>,
    #[serde(default, rename = "nota", deserialize_with = "lenient_number")]
    raw_grade: Option<f64>,
    #[serde(
        default,
        rename = "asistencia",
        alias = "attendancePercent",
        alias = "attendance_percent",
        deserialize_with = "lenient_number"
    )]
    attendance_percent: Option<f64>,
    #[serde(default, rename = "conducta", alias = "conduct", deserialize_with = "lenient_text")]
    conduct: Option<String>,
    #[serde(
        default,
        rename = "riesgo_desercion",
        alias = "riskLevel",
        alias = "risk_level",
        deserialize_with = "lenient_text"
    )]
    risk_level: Option<String>,
    #[serde(
        default,
        rename = "probabilidad_desercion",
        alias = "dropoutProbability",
        alias = "dropout_probability",
        deserialize_with = "lenient_number"
    )]
    dropout_probability: Option<f64>,
}

impl From<WirePersistedPrediction> for PersistedPredictionRecord {
    fn from(wire: WirePersistedPrediction) -> Self {
        Self {
            student_id: wire.student_id,
            name: wire.name,
            grade: wire.final_grade.or(wire.raw_grade),
            attendance_percent: wire.attendance_percent,
            conduct: wire.conduct,
            risk_level: wire.risk_level.as_deref().and_then(RiskLevel::parse),
            dropout_probability: wire.dropout_probability,
        }
    }
}

/// Decodes the persisted payload. Field names are accepted in the upload
/// pipeline's form and in camelCase; numbers may be numeric strings.
/// Anything that is not a JSON array is corrupt; entries that are not
/// records are skipped.
pub fn parse_persisted_predictions(
    raw: &str,
) -> Result<Vec<PersistedPredictionRecord>, StoreError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| StoreError::corrupt(PREDICTIONS_KEY, e.to_string()))?;

    let Value::Array(entries) = value else {
        return Err(StoreError::corrupt(PREDICTIONS_KEY, "expected a JSON array"));
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<WirePersistedPrediction>(entry) {
            Ok(wire) => Some(wire.into()),
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable persisted prediction entry");
                None
            }
        })
        .collect())
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(id_to_string))
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let parsed = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(parsed.filter(|n| n.is_finite()))
}
