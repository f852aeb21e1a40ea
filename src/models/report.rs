use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::date_util::date_key;
use crate::metrics::Aggregate;

/// Version tag of the insight wording, read by the notification stage.
pub const INSIGHTS_VERSION: &str = "template-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Weekly,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weekly" => Some(ReportType::Weekly),
            _ => None,
        }
    }
}

/// Sort key of a report: `{period_end}#{report_type}`.
pub fn report_key(period_end: NaiveDate, report_type: ReportType) -> String {
    format!("{}#{}", date_key(period_end), report_type.as_str())
}

/// One point of the glucose trace shown alongside a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPoint {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// One user's summary for one reporting period. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub user_id: String,
    pub report_key: String,
    pub report_type: ReportType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub days_included: u32,
    pub aggregates: Aggregate,
    pub graph_data: Vec<GraphPoint>,
    pub insights: Vec<String>,
    pub insights_version: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_key() {
        let end = NaiveDate::from_ymd_opt(2025, 1, 12).unwrap();
        assert_eq!(report_key(end, ReportType::Weekly), "2025-01-12#weekly");
    }

    #[test]
    fn test_report_type_parse() {
        assert_eq!(ReportType::parse("weekly"), Some(ReportType::Weekly));
        assert_eq!(ReportType::parse("monthly"), None);
    }
}
