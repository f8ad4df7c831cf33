//! The "emit sync result" interface.
//!
//! The orchestrator hands every per-item outcome, and the finished batch
//! report, to a [`SyncReporter`]. [`TracingReporter`] turns them into
//! structured log events tagged with an `event_kind`:
//!
//! | Event Kind | Level | Description |
//! |------------|-------|-------------|
//! | `sync.item.created` | INFO | New record stored |
//! | `sync.item.updated` | INFO | Existing record re-synced |
//! | `sync.item.failed` | WARN | Item failed at some stage |
//! | `sync.item.partial` | WARN | Stored, but some GitHub sub-fetches failed |
//! | `sync.batch.completed` | INFO | Batch finished with counts |
//! | `sync.batch.cancelled` | WARN | Batch stopped early |

use crate::models::{BatchReport, SyncOutcome};
use crate::utils::truncate_for_log;
use tracing::{info, warn};

pub trait SyncReporter {
    fn emit(&self, outcome: &SyncOutcome);

    fn batch_finished(&self, report: &BatchReport);
}

impl<T: SyncReporter> SyncReporter for &T {
    fn emit(&self, outcome: &SyncOutcome) {
        (**self).emit(outcome)
    }

    fn batch_finished(&self, report: &BatchReport) {
        (**self).batch_finished(report)
    }
}

/// Reports through `tracing`, under a fixed `service` field.
#[derive(Debug, Clone, Copy)]
pub struct TracingReporter {
    service: &'static str,
}

impl TracingReporter {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

impl SyncReporter for TracingReporter {
    fn emit(&self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Created { id, record, warnings }
            | SyncOutcome::Updated { id, record, warnings } => {
                info!(
                    service = self.service,
                    event_kind = %format!("sync.item.{}", outcome.status_label()),
                    %id,
                    collection = %record.collection(),
                    natural_key = record.natural_key(),
                    title = record.title(),
                    "Synced item"
                );
                for w in warnings {
                    warn!(
                        service = self.service,
                        event_kind = "sync.item.partial",
                        natural_key = record.natural_key(),
                        sub_fetch = %w.sub_fetch,
                        reason = %w.reason,
                        "Item stored with missing data"
                    );
                }
            }
            SyncOutcome::Failed { natural_key, stage, reason } => {
                warn!(
                    service = self.service,
                    event_kind = "sync.item.failed",
                    natural_key = %natural_key,
                    %stage,
                    reason = %truncate_for_log(reason, 300),
                    "Item failed"
                );
            }
        }
    }

    fn batch_finished(&self, report: &BatchReport) {
        let elapsed_ms = (report.finished_at - report.started_at).num_milliseconds();
        if report.cancelled {
            warn!(
                service = self.service,
                event_kind = "sync.batch.cancelled",
                total = report.total,
                skipped = report.skipped_count,
                "Batch cancelled before every item was dispatched"
            );
        }
        info!(
            service = self.service,
            event_kind = "sync.batch.completed",
            total = report.total,
            created = report.created_count,
            updated = report.updated_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            elapsed_ms,
            "Batch finished"
        );
    }
}

/// Keeps everything it is given, for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub outcomes: std::sync::Mutex<Vec<SyncOutcome>>,
    pub reports: std::sync::Mutex<Vec<BatchReport>>,
}

#[cfg(test)]
impl SyncReporter for RecordingReporter {
    fn emit(&self, outcome: &SyncOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }

    fn batch_finished(&self, report: &BatchReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}
