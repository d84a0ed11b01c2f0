//! Console reporter with cargo test-like formatting.

use crate::runner::{ProgressEvent, SuiteSummary, TestCaseResult, TestStatus};
use std::io::{self, Write};
use std::time::Duration;

/// Reporter configuration.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Show test starts and background failures.
    pub verbose: bool,
    /// Use colors in output.
    pub color: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            color: true,
        }
    }
}

/// Test reporter with cargo test-like output.
#[derive(Debug, Clone)]
pub struct Reporter {
    config: ReporterConfig,
}

impl Reporter {
    #[must_use]
    pub const fn new(config: ReporterConfig) -> Self {
        Self { config }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.config.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    /// Status word of a result line.
    #[must_use]
    pub fn status_label(&self, status: TestStatus) -> String {
        match status {
            TestStatus::Passed => self.paint("ok", "32"),
            TestStatus::Failed => self.paint("FAILED", "31"),
            TestStatus::Skipped => self.paint("ignored", "33"),
        }
    }

    /// Result line of one test case.
    #[must_use]
    pub fn format_result(&self, result: &TestCaseResult) -> String {
        let name = result.description.as_deref().unwrap_or(&result.name);
        format!("test {name} ... {}", self.status_label(result.status))
    }

    /// Print the start of a suite run.
    pub fn suite_start(&self, total: usize) {
        println!();
        println!("running {total} tests");
    }

    /// Print a test result line.
    pub fn test_result(&self, result: &TestCaseResult) {
        println!("{}", self.format_result(result));
        if self.config.verbose {
            for failure in &result.background_failures {
                println!("     (background) {failure}");
            }
        }
    }

    /// Print the failures section.
    pub fn failures(&self, results: &[TestCaseResult]) {
        let failed: Vec<&TestCaseResult> =
            results.iter().filter(|r| r.status == TestStatus::Failed).collect();
        if failed.is_empty() {
            return;
        }

        println!();
        println!("failures:");
        println!();
        for result in failed {
            println!("---- {} ----", result.name);
            if let Some(path) = &result.failed_action {
                println!("    at {path}");
            }
            if let Some(error) = &result.error {
                for line in error.lines() {
                    println!("    {line}");
                }
            }
            println!();
        }
    }

    /// Final summary line in cargo test format.
    #[must_use]
    pub fn format_summary(&self, summary: &SuiteSummary, duration: Duration) -> String {
        let status = if summary.success() {
            self.paint("ok", "32")
        } else {
            self.paint("FAILED", "31")
        };
        format!(
            "test result: {}. {} passed; {} failed; {} ignored; finished in {:.1}s",
            status,
            summary.passed,
            summary.failed,
            summary.skipped,
            duration.as_secs_f64()
        )
    }

    /// Print the final summary.
    pub fn summary(&self, summary: &SuiteSummary, duration: Duration) {
        println!();
        println!("{}", self.format_summary(summary, duration));
    }

    /// Print the line belonging to a progress event.
    pub fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::SuiteStarted { total } => self.suite_start(*total),
            ProgressEvent::TestStarted { name } => {
                if self.config.verbose {
                    println!("  starting: {name}");
                }
            }
            ProgressEvent::TestCompleted { result } => self.test_result(result),
        }
        self.flush();
    }

    /// Flush stdout.
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
