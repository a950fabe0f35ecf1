//! Text and JSON rendering of command results.

use std::fmt::Write as _;

use anyhow::Result;
use offsync_core::{CycleReport, ReconcileReport, ResyncReport};
use offsync_domain::{FailedEntitySummary, OperationRecord, OperationStatus, StatusSummary};
use serde::Serialize;

/// Where command results are printed and in which form.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `value` as JSON, or the text built by `human`.
    pub fn emit<T>(&self, value: &T, human: impl FnOnce() -> String) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", human());
        }
        Ok(())
    }
}

pub fn status_summary(summary: &StatusSummary) -> String {
    let mut out = format!("{} operation(s)", summary.total);
    for &status in OperationStatus::ALL {
        let _ = write!(out, "\n  {:<10} {}", status.as_str(), summary.count(status));
    }
    if !summary.by_entity.is_empty() {
        out.push_str("\nby entity:");
        for (entity, counts) in &summary.by_entity {
            let counts: Vec<String> =
                counts.iter().map(|(status, n)| format!("{status}={n}")).collect();
            let _ = write!(out, "\n  {entity:<14} {}", counts.join(" "));
        }
    }
    out
}

pub fn failed_summary(summary: &[FailedEntitySummary]) -> String {
    if summary.is_empty() {
        return "no failed operations".to_owned();
    }
    let mut out = String::from("failed operations by entity:");
    for entry in summary {
        let _ = write!(
            out,
            "\n  {:<14} {:>5}  max retries {}",
            entry.entity_type, entry.count, entry.max_retry_count
        );
        if let Some(error) = &entry.last_error {
            let _ = write!(out, "\n    last error: {error}");
        }
    }
    out
}

pub fn records(records: &[OperationRecord]) -> String {
    if records.is_empty() {
        return "queue is empty".to_owned();
    }
    let mut out = String::new();
    for record in records {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(
            out,
            "#{:<6} p{} {:<7} {}/{}  retries={} {}",
            record.seq,
            record.priority,
            record.kind.as_str(),
            record.entity_type,
            record.entity_id,
            record.retry_count,
            record.id
        );
        if let Some(error) = &record.last_error {
            let _ = write!(out, "\n        {error}");
        }
    }
    out
}

pub fn cycle(report: &CycleReport) -> String {
    let mut out = format!(
        "attempted {}, completed {}, failed {}, deferred {}, skipped {}, retried {}",
        report.attempted,
        report.completed,
        report.failed,
        report.deferred,
        report.skipped,
        report.retried
    );
    if report.conflicts_resolved > 0 {
        let _ = write!(
            out,
            "\n{} conflict(s) resolved to existing remote entities",
            report.conflicts_resolved
        );
    }
    for missing in &report.missing_parents {
        let _ = write!(
            out,
            "\nmissing parent {}/{} referenced by {}/{} via {}",
            missing.parent_type,
            missing.parent_id,
            missing.entity_type,
            missing.entity_id,
            missing.field
        );
    }
    if report.halted {
        out.push_str("\ndispatch halted: the remote rejected our credentials");
    }
    out
}

pub fn reconcile(report: &ReconcileReport) -> String {
    if report.is_clean() && report.purged == 0 {
        return "queue is consistent".to_owned();
    }
    let mut out = format!(
        "orphans requeued {}, mappings backfilled {}, mappings requeued {}, parents enqueued {}\n\
         failed reset {}, reprioritized {}, purged {}",
        report.orphans_requeued,
        report.mappings_backfilled,
        report.mappings_requeued,
        report.parents_enqueued,
        report.failed_reset,
        report.reprioritized,
        report.purged
    );
    for escalation in &report.escalations {
        let _ = write!(
            out,
            "\nneeds attention: {} {}/{}: {}",
            escalation.kind, escalation.entity_type, escalation.entity_id, escalation.detail
        );
    }
    out
}

pub fn resync(report: &ResyncReport) -> String {
    format!(
        "{} create(s) queued; skipped {} already mapped, {} already queued, {} without a local row",
        report.enqueued, report.skipped_mapped, report.skipped_active, report.missing_snapshot
    )
}

#[cfg(test)]
mod tests {
    use offsync_core::MissingParentReport;
    use offsync_domain::EntityType;

    use super::*;

    fn t(name: &str) -> EntityType {
        EntityType::new(name).unwrap()
    }

    #[test]
    fn status_summary_lists_every_status_and_entity() {
        let mut summary = StatusSummary::default();
        summary.add("sale", OperationStatus::Pending, 3);
        summary.add("sale", OperationStatus::Failed, 1);
        summary.add("customer", OperationStatus::Completed, 2);

        let text = status_summary(&summary);
        assert!(text.starts_with("6 operation(s)"));
        assert!(text.contains("pending"));
        assert!(text.contains("in_flight"));
        assert!(text.contains("customer"));
        assert!(text.contains("failed=1"));
    }

    #[test]
    fn cycle_mentions_missing_parents_and_halts() {
        let report = CycleReport {
            attempted: 1,
            failed: 1,
            deferred: 1,
            missing_parents: vec![MissingParentReport {
                operation_id: "op-1".into(),
                entity_type: t("sale"),
                entity_id: "s-1".into(),
                field: "customerId".into(),
                parent_type: t("customer"),
                parent_id: "c-1".into(),
            }],
            halted: true,
            ..CycleReport::default()
        };

        let text = cycle(&report);
        assert!(text.contains("missing parent customer/c-1 referenced by sale/s-1 via customerId"));
        assert!(text.contains("halted"));
    }

    #[test]
    fn empty_results_have_short_messages() {
        assert_eq!(records(&[]), "queue is empty");
        assert_eq!(failed_summary(&[]), "no failed operations");
        assert_eq!(reconcile(&ReconcileReport::default()), "queue is consistent");
    }
}
