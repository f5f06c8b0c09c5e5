//! Test output summary.
//!
//! A secondary diagnostic only: the test command's exit code decides the
//! stage outcome, never these counts.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static COUNTS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+) (passed|failed|errors?|skipped)\b").ok());

/// Counts scraped from test runner output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    /// Tests that passed.
    pub passed: u32,
    /// Tests that failed.
    pub failed: u32,
    /// Collection or setup errors.
    pub errors: u32,
    /// Tests that were skipped.
    pub skipped: u32,
}

impl TestSummary {
    /// Scrapes counts from runner output.
    ///
    /// Returns `None` when the output carries no recognizable summary. When
    /// a count appears more than once the last occurrence wins.
    #[must_use]
    pub fn parse(output: &str) -> Option<Self> {
        let re = COUNTS.as_ref()?;
        let mut summary = Self::default();
        let mut found = false;
        for caps in re.captures_iter(output) {
            let Ok(n) = caps[1].parse::<u32>() else {
                continue;
            };
            found = true;
            match caps[2].to_ascii_lowercase().as_str() {
                "passed" => summary.passed = n,
                "failed" => summary.failed = n,
                "skipped" => summary.skipped = n,
                _ => summary.errors = n,
            }
        }
        found.then_some(summary)
    }

    /// Returns true if nothing failed or errored.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    /// Returns true if the counts contradict the exit code.
    #[must_use]
    pub fn disagrees_with(&self, exit_code: i32) -> bool {
        self.is_clean() != (exit_code == 0)
    }
}
