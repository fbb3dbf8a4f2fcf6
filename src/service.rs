//! Remote risk summary endpoint.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CacheError;
use crate::models::{RiskLevel, RiskSummaryRecord};

#[async_trait]
pub trait RiskSummaryService: Send + Sync {
    async fn fetch_summary(&self) -> Result<Vec<RiskSummaryRecord>, CacheError>;
}

#[derive(Debug, Clone)]
pub struct HttpRiskSummaryService {
    client: reqwest::Client,
    url: String,
}

impl HttpRiskSummaryService {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RiskSummaryService for HttpRiskSummaryService {
    async fn fetch_summary(&self) -> Result<Vec<RiskSummaryRecord>, CacheError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CacheError::Fetch(format!("GET {}: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Fetch(format!("GET {} returned {status}", self.url)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CacheError::Fetch(format!("reading body from {}: {e}", self.url)))?;

        parse_risk_summary(&body)
    }
}

#[derive(Deserialize)]
struct WireRiskSummary {
    #[serde(default, alias = "studentId")]
    student_id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "riskLevel")]
    risk_level: Option<String>,
}

/// Decodes the summary body. Records without a usable id are dropped and
/// duplicate ids keep their first occurrence.
pub fn parse_risk_summary(body: &str) -> Result<Vec<RiskSummaryRecord>, CacheError> {
    let wire: Vec<WireRiskSummary> =
        serde_json::from_str(body).map_err(|e| CacheError::Parse(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(wire.len());

    for entry in wire {
        let Some(student_id) = id_to_string(&entry.student_id) else {
            tracing::warn!(name = ?entry.name, "dropping risk summary record without student id");
            continue;
        };
        if !seen.insert(student_id.clone()) {
            tracing::debug!(%student_id, "dropping duplicate risk summary record");
            continue;
        }

        records.push(RiskSummaryRecord {
            name: entry.name.unwrap_or_default(),
            risk_level: entry.risk_level.as_deref().and_then(RiskLevel::parse),
            student_id,
        });
    }

    Ok(records)
}

/// Stringifies a JSON id that may arrive as a number or a string.
pub(crate) fn id_to_string(value: &Value) -> Option<String> {
    let id = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_string_ids() {
        let body = r#"[
            {"student_id": 12, "name": "Ana", "grade": "Primaria", "risk_level": "Alto"},
            {"studentId": "A-7", "name": "Luis", "riskLevel": "bajo"}
        ]"#;

        let records = parse_risk_summary(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].student_id, "12");
        assert_eq!(records[0].risk_level, Some(RiskLevel::High));
        assert_eq!(records[1].student_id, "A-7");
        assert_eq!(records[1].risk_level, Some(RiskLevel::Low));
    }

    #[test]
    fn unknown_risk_label_is_absent() {
        let body = r#"[{"student_id": 3, "name": "Eva", "risk_level": "Critico"}]"#;
        let records = parse_risk_summary(body).unwrap();
        assert_eq!(records[0].risk_level, None);
    }

    #[test]
    fn drops_missing_ids_and_duplicates() {
        let body = r#"[
            {"name": "Sin Id", "risk_level": "Alto"},
            {"student_id": "", "name": "Vacio"},
            {"student_id": 5, "name": "Primero", "risk_level": "Medio"},
            {"student_id": "5", "name": "Segundo", "risk_level": "Bajo"}
        ]"#;

        let records = parse_risk_summary(body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Primero");
    }

    #[test]
    fn malformed_body_is_parse_error() {
        assert!(matches!(parse_risk_summary("not json"), Err(CacheError::Parse(_))));
        assert!(matches!(
            parse_risk_summary(r#"{"students": []}"#),
            Err(CacheError::Parse(_))
        ));
    }
}
