use std::str::FromStr;

use serde::Serialize;

use crate::models::{RiskLevel, StudentView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskFilter {
    All,
    Level(RiskLevel),
}

impl FromStr for RiskFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("todos") || trimmed.eq_ignore_ascii_case("all") {
            return Ok(RiskFilter::All);
        }
        RiskLevel::parse(trimmed)
            .map(RiskFilter::Level)
            .ok_or_else(|| format!("unknown risk filter '{s}' (expected Todos, Alto, Medio or Bajo)"))
    }
}

pub fn filter_by_risk(records: &[StudentView], filter: RiskFilter) -> Vec<StudentView> {
    match filter {
        RiskFilter::All => records.to_vec(),
        RiskFilter::Level(level) => records
            .iter()
            .filter(|record| record.risk_level == level)
            .cloned()
            .collect(),
    }
}

/// Case-insensitive substring match on name or student id.
pub fn search(records: &[StudentView], query: &str) -> Vec<StudentView> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records.to_vec();
    }

    records
        .iter()
        .filter(|record| {
            record.name.to_lowercase().contains(&needle)
                || record.student_id.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

pub fn find_student<'a>(records: &'a [StudentView], student_id: &str) -> Option<&'a StudentView> {
    let wanted = student_id.trim();
    records.iter().find(|record| record.student_id == wanted)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskAggregate {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub high_percent: f64,
    pub medium_percent: f64,
    pub low_percent: f64,
}

impl RiskAggregate {
    pub fn count(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::High => self.high,
            RiskLevel::Medium => self.medium,
            RiskLevel::Low => self.low,
        }
    }

    pub fn percent(&self, level: RiskLevel) -> f64 {
        match level {
            RiskLevel::High => self.high_percent,
            RiskLevel::Medium => self.medium_percent,
            RiskLevel::Low => self.low_percent,
        }
    }
}

pub fn aggregate(records: &[StudentView]) -> RiskAggregate {
    let total = records.len();
    let tally = |level: RiskLevel| records.iter().filter(|r| r.risk_level == level).count();
    let (high, medium, low) = (
        tally(RiskLevel::High),
        tally(RiskLevel::Medium),
        tally(RiskLevel::Low),
    );

    RiskAggregate {
        total,
        high,
        medium,
        low,
        high_percent: percent(high, total),
        medium_percent: percent(medium, total),
        low_percent: percent(low, total),
    }
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_CONDUCT;

    fn student(id: &str, name: &str, risk: RiskLevel) -> StudentView {
        StudentView {
            student_id: id.to_string(),
            name: name.to_string(),
            grade: 0.0,
            attendance_percent: 0.0,
            conduct: DEFAULT_CONDUCT.to_string(),
            risk_level: risk,
            dropout_probability: None,
        }
    }

    fn roster() -> Vec<StudentView> {
        vec![
            student("1", "Ana", RiskLevel::High),
            student("1an2", "Pedro", RiskLevel::Low),
            student("3", "Luis", RiskLevel::Medium),
            student("4", "Eva", RiskLevel::High),
        ]
    }

    #[test]
    fn parses_filters() {
        assert_eq!("Todos".parse::<RiskFilter>(), Ok(RiskFilter::All));
        assert_eq!("all".parse::<RiskFilter>(), Ok(RiskFilter::All));
        assert_eq!(
            "Medio".parse::<RiskFilter>(),
            Ok(RiskFilter::Level(RiskLevel::Medium))
        );
        assert!("nadie".parse::<RiskFilter>().is_err());
    }

    #[test]
    fn filter_all_passes_everything_through() {
        let records = roster();
        assert_eq!(filter_by_risk(&records, RiskFilter::All), records);

        let high = filter_by_risk(&records, RiskFilter::Level(RiskLevel::High));
        let ids: Vec<_> = high.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
    }

    #[test]
    fn search_matches_name_and_id_substrings() {
        let records = roster();
        let hits = search(&records, "an");
        let ids: Vec<_> = hits.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1an2"]);

        assert_eq!(search(&records, "EVA").len(), 1);
        assert_eq!(search(&records, "").len(), records.len());
        assert!(search(&records, "zzz").is_empty());
    }

    #[test]
    fn aggregate_counts_tiers() {
        let summary = aggregate(&roster());
        assert_eq!(summary.total, 4);
        assert_eq!(summary.high, 2);
        assert_eq!(summary.medium, 1);
        assert_eq!(summary.low, 1);
        assert!((summary.high_percent - 50.0).abs() < 1e-9);
        assert!((summary.medium_percent - 25.0).abs() < 1e-9);
        assert_eq!(summary.count(RiskLevel::Low), 1);
    }

    #[test]
    fn aggregate_of_nothing_is_all_zero() {
        assert_eq!(
            aggregate(&[]),
            RiskAggregate {
                total: 0,
                high: 0,
                medium: 0,
                low: 0,
                high_percent: 0.0,
                medium_percent: 0.0,
                low_percent: 0.0,
            }
        );
    }

    #[test]
    fn finds_student_by_exact_id() {
        let records = roster();
        assert_eq!(find_student(&records, "3").map(|r| r.name.as_str()), Some("Luis"));
        assert!(find_student(&records, "1a").is_none());
    }
}
