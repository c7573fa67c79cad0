//! Run reports
//!
//! Two renderings of the same run: a JSON document for machines and a
//! plain-text summary for terminals. Both are built from the plan and the
//! executor's outcomes, so a dry run and an apply report through the same
//! path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::error::Result;
use crate::executor::{OutcomeStatus, SkipReason, SyncResult};
use crate::plan::{Diagnostic, PlanResult};

/// A plan report: what would change, before anything runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub plan: PlanResult,
}

impl PlanReport {
    pub fn new(plan: PlanResult) -> Self {
        PlanReport {
            generated_at: Utc::now(),
            plan,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "plan for {} ({} create, {} update, {} delete)",
            self.plan.provider, self.plan.counts.creates, self.plan.counts.updates,
            self.plan.counts.deletes
        );
        if self.plan.is_empty() {
            out.push_str("  nothing to do; remote matches desired state\n");
        }
        for op in &self.plan.operations {
            let _ = writeln!(out, "  {}", op.describe());
        }
        render_diagnostics(&mut out, &self.plan.diagnostics);
        out
    }
}

/// A sync report: what actually happened (or would have, for dry runs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: SyncResult,
}

impl SyncReport {
    pub fn new(result: SyncResult) -> Self {
        SyncReport {
            generated_at: Utc::now(),
            result,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "sync on {} finished: {:?}",
            self.result.provider, self.result.status
        );
        for outcome in &self.result.outcomes {
            let line = match &outcome.status {
                OutcomeStatus::Applied { healed: true, .. } => {
                    format!("healed  {}", outcome.operation.describe())
                }
                OutcomeStatus::Applied { .. } => {
                    format!("applied {}", outcome.operation.describe())
                }
                OutcomeStatus::Failed { error, attempts } => format!(
                    "FAILED  {} after {attempts} attempt(s): {error}",
                    outcome.operation.describe()
                ),
                OutcomeStatus::Skipped {
                    reason: SkipReason::DryRun,
                } => format!("would   {}", outcome.operation.describe()),
                OutcomeStatus::Skipped {
                    reason: SkipReason::StopOnError,
                } => format!("skipped {} (earlier failure)", outcome.operation.describe()),
            };
            let _ = writeln!(out, "  {line}");
        }
        render_diagnostics(&mut out, &self.result.diagnostics);
        out
    }
}

fn render_diagnostics(out: &mut String, diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    out.push_str("diagnostics:\n");
    for diag in diagnostics {
        let line = match diag {
            Diagnostic::AmbiguousMatch {
                identity,
                kept_id,
                duplicate_ids,
                ..
            } => format!(
                "ambiguous match for {identity}: kept {kept_id}, duplicates {}",
                duplicate_ids.join(", ")
            ),
            Diagnostic::CapabilityGap { identity, dropped } => {
                format!("{identity}: dropped unsupported {dropped}")
            }
            Diagnostic::ProtectedEntitySkipped { identity, op, .. } => {
                format!("skipped {op:?} of protected entity {identity}")
            }
            Diagnostic::DeferredLabelDelete {
                path,
                referenced_by,
            } => format!("kept label {path}: still referenced by filter {referenced_by}"),
        };
        let _ = writeln!(out, "  {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{OpKind, Operation, OperationPayload, PlanCounts};
    use crate::provider::ProviderKind;
    use crate::spec::LabelSpec;

    fn sample_plan() -> PlanResult {
        PlanResult {
            provider: ProviderKind::Gmail,
            operations: vec![Operation {
                kind: OpKind::Create,
                payload: OperationPayload::Label(LabelSpec::new("Finance/Receipts")),
                target_id: None,
                provider: ProviderKind::Gmail,
            }],
            diagnostics: vec![Diagnostic::CapabilityGap {
                identity: "Newsletters".into(),
                dropped: "color".into(),
            }],
            counts: PlanCounts {
                creates: 1,
                updates: 0,
                deletes: 0,
            },
        }
    }

    #[test]
    fn test_plan_report_text_lists_operations_and_diagnostics() {
        let report = PlanReport::new(sample_plan());
        let text = report.render_text();
        assert!(text.contains("plan for gmail (1 create, 0 update, 0 delete)"));
        assert!(text.contains("create label Finance/Receipts"));
        assert!(text.contains("dropped unsupported color"));
    }

    #[test]
    fn test_plan_report_json_round_trips() {
        let report = PlanReport::new(sample_plan());
        let json = report.to_json().unwrap();
        let back: PlanReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.plan.provider, ProviderKind::Gmail);
        assert_eq!(back.plan.operations.len(), 1);
    }

    #[test]
    fn test_empty_plan_renders_converged_notice() {
        let plan = PlanResult {
            provider: ProviderKind::Outlook,
            operations: vec![],
            diagnostics: vec![],
            counts: PlanCounts::default(),
        };
        let text = PlanReport::new(plan).render_text();
        assert!(text.contains("nothing to do"));
    }
}
