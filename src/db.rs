use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::models::{PersistedPredictionRecord, RiskLevel, UploadMarker};
use crate::store::PersistedPredictionStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Demo upload: (student id, name, final grade, attendance, conduct, risk, probability).
const SEED_PREDICTIONS: [(&str, &str, f64, f64, &str, &str, f64); 4] = [
    ("1", "Ana Torres", 15.0, 90.0, "Buena", "Bajo", 0.12),
    ("2", "Luis Ramos", 9.5, 68.0, "Regular", "Alto", 0.81),
    ("3", "Eva Quispe", 11.0, 79.0, "Regular", "Medio", 0.46),
    ("4", "Ivan Soto", 7.0, 55.0, "Mala", "Alto", 0.93),
];

const SEED_SOURCE_KEY: &str = "seed-upload-001";

/// Inserts the demo upload and its predictions in one transaction.
/// Returns 0 when the demo upload is already present.
pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;

    let upload_id: Option<i64> = sqlx::query(
        r#"
        INSERT INTO risk_dashboard.upload_history
        (original_filename, status, total_students, source_key)
        VALUES ($1, 'success', $2, $3)
        ON CONFLICT (source_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind("estudiantes_2026_t1.csv")
    .bind(SEED_PREDICTIONS.len() as i32)
    .bind(SEED_SOURCE_KEY)
    .fetch_optional(&mut *tx)
    .await?
    .map(|row| row.get("id"));

    let Some(upload_id) = upload_id else {
        return Ok(0);
    };

    for (student_id, name, grade, attendance, conduct, risk, probability) in SEED_PREDICTIONS {
        sqlx::query(
            r#"
            INSERT INTO risk_dashboard.upload_predictions
            (upload_history_id, estudiante_id, nombre, nota_final, asistencia,
             conducta, riesgo_desercion, probabilidad_desercion)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(upload_id)
        .bind(student_id)
        .bind(name)
        .bind(grade)
        .bind(attendance)
        .bind(conduct)
        .bind(risk)
        .bind(probability)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(SEED_PREDICTIONS.len())
}

/// Persisted store backed by the upload history tables. Serves the
/// predictions of the most recent successful upload.
#[derive(Debug, Clone)]
pub struct PgPredictionStore {
    pool: PgPool,
}

impl PgPredictionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn latest_upload(&self) -> Result<Option<(i64, DateTime<Utc>)>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, upload_date
            FROM risk_dashboard.upload_history
            WHERE status = 'success'
            ORDER BY upload_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| (row.get("id"), row.get("upload_date"))))
    }
}

#[async_trait]
impl PersistedPredictionStore for PgPredictionStore {
    async fn read(&self) -> Result<Option<Vec<PersistedPredictionRecord>>, StoreError> {
        let Some((upload_id, _)) = self.latest_upload().await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT estudiante_id, nombre, nota_final, asistencia, conducta, \
             riesgo_desercion, probabilidad_desercion \
             FROM risk_dashboard.upload_predictions \
             WHERE upload_history_id = $1 \
             ORDER BY id",
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let risk: Option<String> = row.get("riesgo_desercion");
            records.push(PersistedPredictionRecord {
                student_id: row.get("estudiante_id"),
                name: row.get("nombre"),
                grade: row.get("nota_final"),
                attendance_percent: row.get("asistencia"),
                conduct: row.get("conducta"),
                risk_level: risk.as_deref().and_then(RiskLevel::parse),
                dropout_probability: row.get("probabilidad_desercion"),
            });
        }

        Ok(Some(records))
    }

    async fn marker(&self) -> Result<Option<UploadMarker>, StoreError> {
        Ok(self
            .latest_upload()
            .await?
            .map(|(id, at)| UploadMarker(format!("{id}@{}", at.timestamp_millis()))))
    }

    /// Uploads land in the database already committed; there is no one-shot flag.
    async fn upload_flag_raised(&self) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn clear_upload_flag(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
