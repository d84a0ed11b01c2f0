//! Report formats for suite results.

use crate::runner::{SuiteSummary, TestCaseResult, TestStatus};
use serde::Serialize;

/// Output format of a suite report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown format: {s}. Valid formats: table, json")),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a SuiteSummary,
    results: &'a [TestCaseResult],
}

/// Generate a JSON report for suite results.
#[must_use]
pub fn format_results_json(results: &[TestCaseResult], summary: &SuiteSummary) -> String {
    serde_json::to_string_pretty(&JsonReport { summary, results })
        .unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// One-line summary of a test case, e.g. `order-flow: FAILED at actions[1] receive (12ms)`.
#[must_use]
pub fn format_test_summary(result: &TestCaseResult) -> String {
    let status = match result.status {
        TestStatus::Passed => "ok".to_string(),
        TestStatus::Skipped => "ignored".to_string(),
        TestStatus::Failed => result
            .failed_action
            .as_ref()
            .map_or_else(|| "FAILED".to_string(), |path| format!("FAILED at {path}")),
    };
    format!("{}: {status} ({}ms)", result.name, result.duration_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use time::OffsetDateTime;

    fn result(name: &str, status: TestStatus) -> TestCaseResult {
        TestCaseResult {
            name: name.to_string(),
            description: None,
            status,
            error: None,
            error_kind: None,
            failed_action: None,
            background_failures: Vec::new(),
            duration_ms: 12,
            started_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_report_format_from_str() -> Result<(), String> {
        assert_eq!("table".parse::<ReportFormat>()?, ReportFormat::Table);
        assert_eq!("JSON".parse::<ReportFormat>()?, ReportFormat::Json);
        let err = "csv".parse::<ReportFormat>();
        assert!(matches!(err, Err(e) if e.contains("unknown format")));
        Ok(())
    }

    #[test]
    fn test_format_results_json() -> Result<(), serde_json::Error> {
        let mut failed = result("order-flow", TestStatus::Failed);
        failed.error = Some("boom".to_string());
        failed.error_kind = Some(ErrorKind::Timeout);
        let results = vec![result("ping", TestStatus::Passed), failed];
        let summary = SuiteSummary::from_results(&results, 30);

        let json: serde_json::Value =
            serde_json::from_str(&format_results_json(&results, &summary))?;
        assert_eq!(json["summary"]["failed"], 1);
        assert_eq!(json["results"][0]["status"], "passed");
        assert_eq!(json["results"][1]["error_kind"], "timeout");
        assert!(json["results"][0].get("error").is_none());
        assert_eq!(json["results"][0]["started_at"], "1970-01-01T00:00:00Z");
        Ok(())
    }

    #[test]
    fn test_format_test_summary() {
        let mut failed = result("order-flow", TestStatus::Failed);
        failed.failed_action = Some("actions[1] receive".to_string());
        assert_eq!(
            format_test_summary(&failed),
            "order-flow: FAILED at actions[1] receive (12ms)"
        );
        assert_eq!(format_test_summary(&result("ping", TestStatus::Passed)), "ping: ok (12ms)");
    }
}
