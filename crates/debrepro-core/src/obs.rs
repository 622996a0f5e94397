//! Structured lifecycle events for verification runs.
//!
//! - `PackageSpan` tags everything logged while one package is processed
//! - `emit_*` functions record the start, failures and end of packages and batches
//!
//! Events are emitted at `info!` (failures at `warn!`) and carry an `event`
//! field so JSON output can be filtered by kind.

use tracing::{info, warn};

use crate::domain::{BuildOutcome, BuildTiming, Stage};
use crate::sink::BatchSummary;

/// RAII guard that enters a package-scoped span.
///
/// ```ignore
/// let _span = PackageSpan::enter("sed", 3, 21);
/// // every log line now carries package = "sed"
/// ```
pub struct PackageSpan {
    _span: tracing::span::EnteredSpan,
}

impl PackageSpan {
    pub fn enter(package: &str, index: usize, total: usize) -> Self {
        let span = tracing::info_span!("debrepro.package", package = %package, index, total);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_package_started(package: &str, index: usize, total: usize) {
    info!(event = "package.started", package = %package, index, total);
}

/// A stage stopped the package; it will be recorded as `Fail`.
pub fn emit_stage_failed(package: &str, stage: Stage, error: &dyn std::fmt::Display) {
    warn!(event = "stage.failed", package = %package, stage = %stage, error = %error);
}

pub fn emit_package_finished(outcome: &BuildOutcome) {
    let BuildTiming {
        wall_secs,
        user_secs,
        system_secs,
    } = outcome.timing;
    info!(
        event = "package.finished",
        package = %outcome.package,
        outcome = %outcome.classification,
        computed_hash = outcome.computed_hash.as_ref().map(|h| h.as_str()).unwrap_or(""),
        wall_secs,
        user_secs,
        system_secs,
    );
}

/// Container teardown failed (never affects the outcome).
pub fn emit_teardown_failed(package: &str, container: &str, error: &dyn std::fmt::Display) {
    warn!(event = "container.teardown_failed", package = %package, container = %container, error = %error);
}

pub fn emit_batch_finished(summary: &BatchSummary, skipped: usize, duration_ms: u64) {
    info!(
        event = "batch.finished",
        total = summary.total,
        matched = summary.matched,
        differed = summary.differed,
        failed = summary.failed,
        skipped,
        duration_ms,
    );
}
