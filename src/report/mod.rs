//! Console reporting
//!
//! The reporting collaborator shipped with the engine. It consumes the
//! engine purely through the event bus and the read-only counters: one
//! formatted line per finalized or skipped test, failing-assertion detail
//! according to the configured policy, and a final run summary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::assert::InfoLabel;
use crate::bus::{Event, EventKind};
use crate::config::ShowDetail;
use crate::model::{TestRecord, TestStatus};
use crate::runner::TestRunner;

/// Summary of one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration_ms: u64,
    pub records: Vec<TestRecord>,
}

impl RunSummary {
    pub fn new(records: Vec<TestRecord>) -> Self {
        let total = records.len();
        let passed = records
            .iter()
            .filter(|r| r.status == TestStatus::Pass)
            .count();
        let failed = records
            .iter()
            .filter(|r| r.status == TestStatus::Fail)
            .count();
        let skipped = records
            .iter()
            .filter(|r| r.status == TestStatus::Skip)
            .count();
        let total_duration_ms = records.iter().map(|r| r.duration_ms).sum();

        Self {
            total,
            passed,
            failed,
            skipped,
            total_duration_ms,
            records,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Hashes of the failing tests, for feeding back as hash filters.
    pub fn failed_hashes(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.status == TestStatus::Fail)
            .map(|r| r.info.hash.clone())
            .collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {}",
            self.total, self.passed, self.failed, self.skipped
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

/// Bus-driven console reporter.
pub struct ConsoleReporter {
    colorize: bool,
    show_detail: ShowDetail,
    records: Arc<Mutex<Vec<TestRecord>>>,
    detail_shown: Arc<AtomicBool>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            colorize: true,
            show_detail: ShowDetail::FirstFail,
            records: Arc::new(Mutex::new(Vec::new())),
            detail_shown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Subscribe to the runner's bus. The detail policy is taken from the
    /// runner's configuration at attach time.
    pub fn attach(mut self, runner: &TestRunner) -> Self {
        self.show_detail = runner.config().show_detail;

        let colorize = self.colorize;
        let show_detail = self.show_detail;

        {
            let records = self.records.clone();
            let detail_shown = self.detail_shown.clone();
            runner.on(EventKind::AfterTest, move |event| {
                if let Event::AfterTest(record) = event {
                    println!("{}", format_line(record, colorize));
                    if record.status == TestStatus::Fail
                        && should_show_detail(show_detail, &detail_shown)
                    {
                        print!("{}", format_detail(record, colorize));
                    }
                    records.lock().unwrap().push(record.clone());
                }
            });
        }

        {
            let records = self.records.clone();
            runner.on(EventKind::SkippedTest, move |event| {
                if let Event::SkippedTest(info) = event {
                    let record = TestRecord::skip(info.clone());
                    println!("{}", format_line(&record, colorize));
                    records.lock().unwrap().push(record);
                }
            });
        }

        {
            let records = self.records.clone();
            runner.on(EventKind::AfterAll, move |_| {
                let summary = RunSummary::new(records.lock().unwrap().clone());
                print!("{summary}");
            });
        }

        self
    }

    /// The records collected so far, aggregated.
    pub fn summary(&self) -> RunSummary {
        RunSummary::new(self.records.lock().unwrap().clone())
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn should_show_detail(policy: ShowDetail, detail_shown: &AtomicBool) -> bool {
    match policy {
        ShowDetail::Never => false,
        ShowDetail::Failed => true,
        ShowDetail::FirstFail => !detail_shown.swap(true, Ordering::SeqCst),
    }
}

fn paint(text: &str, code: &str, colorize: bool) -> String {
    if colorize {
        format!("\x1b[{code}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}

/// One progress line per test.
pub fn format_line(record: &TestRecord, colorize: bool) -> String {
    let status = match record.status {
        TestStatus::Pass => paint("✓ PASS", "32", colorize),
        TestStatus::Fail => paint("✗ FAIL", "31", colorize),
        TestStatus::Skip => paint("○ SKIP", "33", colorize),
    };

    let mut line = format!(
        "{} {} [{:>4}ms]",
        status, record.info.full_description, record.duration_ms
    );
    if let Some(error) = &record.error {
        line.push_str(&format!(" - {error}"));
    }
    line
}

/// Expanded assertion detail for a failing test: one block per failing
/// assertion with its expected/received pairs and captured stack.
pub fn format_detail(record: &TestRecord, colorize: bool) -> String {
    let mut out = String::new();
    for assertion in record.assertions.iter().filter(|a| !a.pass) {
        out.push_str(&format!("  ✗ {}\n", assertion.message));
        for entry in &assertion.info {
            let label = match entry.label {
                InfoLabel::Expected => paint("Expected:", "32", colorize),
                InfoLabel::Received => paint("Received:", "31", colorize),
            };
            out.push_str(&format!("    {label} {}\n", entry.value));
        }
        if let Some(stack) = &assertion.stack {
            for line in stack.lines().take(8) {
                out.push_str(&format!("    {line}\n"));
            }
        }
    }
    out
}
