//! Suite runs driven by a config file

use flowtest_core::config::CONFIG_FILE_NAME;
use flowtest_core::{
    ConfigOverrides, CreateVariablesAction, FailAction, ReportFormat, Reporter, ReporterConfig,
    RunnerConfig, SleepAction, TestCase, apply_overrides, format_results_json, load_config,
    run_suite,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn test_suite_from_config_file_reports_json() -> TestResult {
    let dir = TempDir::new()?;
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "parallel: 3\nreceive-timeout-ms: 250\n",
    )?;
    let engine = load_config(dir.path())?;
    let engine = apply_overrides(
        engine,
        &ConfigOverrides {
            join_timeout_ms: Some(1_000),
            ..ConfigOverrides::default()
        },
    )?;
    assert_eq!(engine.parallel, 3);

    let tests = vec![
        TestCase::new("slow").action(SleepAction::new(Duration::from_millis(30))),
        TestCase::new("variables")
            .variable("base", "order")
            .action(CreateVariablesAction::new().variable("id", "${base}-fn:upperCase('x')")),
        TestCase::new("broken")
            .description("reports its failing action")
            .action(FailAction::new("expected failure")),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (results, summary) = run_suite(&tests, &RunnerConfig::new(engine), Some(tx)).await;

    let reporter = Reporter::new(ReporterConfig {
        verbose: true,
        color: false,
    });
    while let Ok(event) = rx.try_recv() {
        reporter.on_event(&event);
    }
    reporter.failures(&results);
    reporter.summary(&summary, Duration::from_millis(summary.duration_ms));
    assert!(
        reporter
            .format_summary(&summary, Duration::from_millis(summary.duration_ms))
            .starts_with("test result: FAILED. 2 passed; 1 failed; 0 ignored")
    );

    assert_eq!(summary.total, 3);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.failed, 1);

    assert_eq!("json".parse::<ReportFormat>()?, ReportFormat::Json);
    let json: serde_json::Value = serde_json::from_str(&format_results_json(&results, &summary))?;
    assert_eq!(json["results"][2]["name"], "broken");
    assert_eq!(json["results"][2]["failed_action"], "actions[0] fail");
    assert_eq!(json["results"][2]["error"], "expected failure");
    Ok(())
}
