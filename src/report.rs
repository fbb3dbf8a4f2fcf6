use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{RiskLevel, StudentView};
use crate::views;

#[derive(Debug, Clone, PartialEq)]
pub struct ConductSummary {
    pub conduct: String,
    pub count: usize,
    pub high_risk: usize,
}

pub fn summarize_by_conduct(records: &[StudentView]) -> Vec<ConductSummary> {
    let mut map: HashMap<&str, (usize, usize)> = HashMap::new();

    for record in records {
        let entry = map.entry(record.conduct.as_str()).or_insert((0, 0));
        entry.0 += 1;
        if record.risk_level == RiskLevel::High {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<ConductSummary> = map
        .into_iter()
        .map(|(conduct, (count, high_risk))| ConductSummary {
            conduct: conduct.to_string(),
            count,
            high_risk,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.conduct.cmp(&b.conduct)));
    summaries
}

/// Highest tier first, then by dropout probability (unknown last).
pub fn rank_by_risk(records: &[StudentView]) -> Vec<StudentView> {
    let mut ranked = records.to_vec();
    ranked.sort_by(|a, b| {
        a.risk_level
            .rank()
            .cmp(&b.risk_level.rank())
            .then_with(|| match (a.dropout_probability, b.dropout_probability) {
                (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    ranked
}

pub fn build_report(
    scope: Option<&str>,
    fetched_at: Option<DateTime<Utc>>,
    records: &[StudentView],
) -> String {
    let totals = views::aggregate(records);
    let conducts = summarize_by_conduct(records);
    let ranked = rank_by_risk(records);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");
    let fetched_label = fetched_at
        .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    let _ = writeln!(output, "# Dropout Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} (data fetched {})",
        scope_label, fetched_label
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if totals.total == 0 {
        let _ = writeln!(output, "No students in the current snapshot.");
    } else {
        for level in RiskLevel::ALL {
            let _ = writeln!(
                output,
                "- {}: {} students ({:.1}%)",
                level,
                totals.count(level),
                totals.percent(level)
            );
        }
        let _ = writeln!(output, "- Total: {}", totals.total);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Conduct Mix");

    if conducts.is_empty() {
        let _ = writeln!(output, "No conduct records.");
    } else {
        for summary in conducts.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students ({} high risk)",
                summary.conduct, summary.count, summary.high_risk
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    let at_risk: Vec<&StudentView> = ranked
        .iter()
        .filter(|student| student.risk_level != RiskLevel::Low)
        .take(10)
        .collect();

    if at_risk.is_empty() {
        let _ = writeln!(output, "No students at medium or high risk.");
    } else {
        for student in at_risk {
            let probability = student
                .dropout_probability
                .map(|p| format!("{:.0}%", p * 100.0))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "- {} ({}) {} risk, grade {:.1}, attendance {:.0}%, dropout probability {}",
                student.name,
                student.student_id,
                student.risk_level,
                student.grade,
                student.attendance_percent,
                probability
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_CONDUCT;

    fn student(id: &str, risk: RiskLevel, conduct: &str, probability: Option<f64>) -> StudentView {
        StudentView {
            student_id: id.to_string(),
            name: format!("Estudiante {id}"),
            grade: 10.0,
            attendance_percent: 80.0,
            conduct: conduct.to_string(),
            risk_level: risk,
            dropout_probability: probability,
        }
    }

    #[test]
    fn ranks_by_tier_then_probability() {
        let records = vec![
            student("1", RiskLevel::Low, DEFAULT_CONDUCT, Some(0.1)),
            student("2", RiskLevel::High, DEFAULT_CONDUCT, Some(0.6)),
            student("3", RiskLevel::High, DEFAULT_CONDUCT, Some(0.9)),
            student("4", RiskLevel::Medium, DEFAULT_CONDUCT, None),
            student("5", RiskLevel::High, DEFAULT_CONDUCT, None),
        ];

        let ids: Vec<_> = rank_by_risk(&records)
            .into_iter()
            .map(|s| s.student_id)
            .collect();
        assert_eq!(ids, vec!["3", "2", "5", "4", "1"]);
    }

    #[test]
    fn conduct_summary_counts_high_risk() {
        let records = vec![
            student("1", RiskLevel::High, "Mala", None),
            student("2", RiskLevel::Low, "Mala", None),
            student("3", RiskLevel::High, "Buena", None),
        ];

        let summaries = summarize_by_conduct(&records);
        assert_eq!(
            summaries[0],
            ConductSummary {
                conduct: "Mala".to_string(),
                count: 2,
                high_risk: 1
            }
        );
        assert_eq!(summaries[1].conduct, "Buena");
    }

    #[test]
    fn report_lists_sections() {
        let records = vec![
            student("1", RiskLevel::High, "Mala", Some(0.82)),
            student("2", RiskLevel::Low, DEFAULT_CONDUCT, None),
        ];
        let at = DateTime::from_timestamp(1_760_000_000, 0).unwrap();

        let report = build_report(Some("Alto"), Some(at), &records);
        assert!(report.contains("# Dropout Risk Report"));
        assert!(report.contains("Generated for Alto"));
        assert!(report.contains("- Alto: 1 students (50.0%)"));
        assert!(report.contains("- Mala: 1 students (1 high risk)"));
        assert!(report.contains("Estudiante 1 (1) Alto risk"));
        assert!(report.contains("dropout probability 82%"));
        assert!(!report.contains("Estudiante 2 (2)"));
    }

    #[test]
    fn empty_report_has_placeholders() {
        let report = build_report(None, None, &[]);
        assert!(report.contains("data fetched never"));
        assert!(report.contains("No students in the current snapshot."));
        assert!(report.contains("No students at medium or high risk."));
    }
}
