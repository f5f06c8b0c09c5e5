//! Assertions over [`PipelineReport`]s.
//!
//! Each helper panics with the full stage table on mismatch.

use crate::core::{LifecycleCategory, StageOutcome, StageState};
use crate::pipeline::PipelineReport;

fn table(report: &PipelineReport) -> String {
    report
        .final_attempt()
        .map(|attempt| {
            attempt
                .stages
                .iter()
                .map(|r| format!("  {} -> {:?} (attempts: {})", r.name, r.state, r.attempts))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| "  <no attempts>".to_string())
}

/// Asserts the dispatched lifecycle category.
#[track_caller]
pub fn assert_category(report: &PipelineReport, expected: LifecycleCategory) {
    assert_eq!(
        report.category,
        expected,
        "unexpected category for pipeline '{}'\n{}",
        report.pipeline,
        table(report)
    );
}

/// Asserts which stages were entered in the final pass, in order.
#[track_caller]
pub fn assert_executed(report: &PipelineReport, expected: &[&str]) {
    assert_eq!(
        report.executed(),
        expected,
        "unexpected executed stages\n{}",
        table(report)
    );
}

/// Asserts the outcomes of the stages that ran in the final pass.
#[track_caller]
pub fn assert_outcomes(report: &PipelineReport, expected: &[StageOutcome]) {
    assert_eq!(
        report.outcomes(),
        expected,
        "unexpected stage outcomes\n{}",
        table(report)
    );
}

/// Asserts that the named stages were skipped in the final pass.
#[track_caller]
pub fn assert_skipped(report: &PipelineReport, names: &[&str]) {
    for name in names {
        let state = report.stage(name).map(|r| r.state);
        assert_eq!(
            state,
            Some(StageState::Skipped),
            "stage '{name}' was not skipped\n{}",
            table(report)
        );
    }
}
