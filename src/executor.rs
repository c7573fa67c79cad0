//! Plan execution
//!
//! Runs (or simulates) a plan against one provider adapter. Dry-run mode
//! logs every operation and performs zero remote calls. Apply mode executes
//! sequentially in plan order, isolating each operation's outcome: one
//! failure does not stop the run unless stop-on-error is requested.
//!
//! Transient provider errors are retried with bounded exponential backoff.
//! A create that fails because the entity already exists is healed by
//! re-listing the remote and converging against the discovered entity.
//! Operations are paced in fixed-size batches with an inter-batch delay to
//! stay under backend rate limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::plan::{Diagnostic, OpKind, Operation, OperationPayload, PlanResult};
use crate::provider::{ProviderAdapter, ProviderKind};
use crate::signature::filter_signature;

/// Pacing and retry knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Attempt cap per operation, including the first try.
    pub max_attempts: u32,
    /// First backoff delay; doubles per retry.
    pub base_backoff: Duration,
    /// Operations per pacing batch.
    pub batch_size: usize,
    /// Delay inserted between batches.
    pub batch_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            batch_size: 10,
            batch_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DryRun,
    StopOnError,
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Applied {
        remote_id: Option<String>,
        /// The operation succeeded via the already-exists recovery path.
        healed: bool,
    },
    Failed {
        error: SyncError,
        attempts: u32,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub operation: Operation,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Worst-first aggregate of a run. Exit status follows this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Clean,
    Warnings,
    TransientFailures,
    PermanentFailures,
}

/// Per-operation outcomes plus the aggregate status for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub provider: ProviderKind,
    pub mode: ExecutionMode,
    pub outcomes: Vec<OperationOutcome>,
    pub diagnostics: Vec<Diagnostic>,
    pub status: AggregateStatus,
}

impl SyncResult {
    fn aggregate(outcomes: &[OperationOutcome], diagnostics: &[Diagnostic]) -> AggregateStatus {
        let mut status = if diagnostics.is_empty() {
            AggregateStatus::Clean
        } else {
            AggregateStatus::Warnings
        };
        for outcome in outcomes {
            if let OutcomeStatus::Failed { error, .. } = &outcome.status {
                let severity = if error.is_transient() {
                    AggregateStatus::TransientFailures
                } else {
                    AggregateStatus::PermanentFailures
                };
                status = status.max(severity);
            }
        }
        status
    }
}

/// Execute (or simulate) a plan.
pub async fn execute(
    plan: &PlanResult,
    adapter: &mut dyn ProviderAdapter,
    mode: ExecutionMode,
    stop_on_error: bool,
    config: &ExecutorConfig,
) -> SyncResult {
    let mut outcomes = Vec::with_capacity(plan.operations.len());

    if mode == ExecutionMode::DryRun {
        for op in &plan.operations {
            info!("[dry-run] would {}", op.describe());
            outcomes.push(OperationOutcome {
                operation: op.clone(),
                status: OutcomeStatus::Skipped {
                    reason: SkipReason::DryRun,
                },
            });
        }
        let status = SyncResult::aggregate(&outcomes, &plan.diagnostics);
        return SyncResult {
            provider: plan.provider,
            mode,
            outcomes,
            diagnostics: plan.diagnostics.clone(),
            status,
        };
    }

    let mut stopped = false;
    for (index, op) in plan.operations.iter().enumerate() {
        if stopped {
            outcomes.push(OperationOutcome {
                operation: op.clone(),
                status: OutcomeStatus::Skipped {
                    reason: SkipReason::StopOnError,
                },
            });
            continue;
        }

        // Inter-batch pacing delay.
        if index > 0 && index % config.batch_size == 0 {
            debug!(delay_ms = config.batch_delay.as_millis() as u64, "batch pause");
            sleep(config.batch_delay).await;
        }

        let status = apply_one(op, adapter, config).await;
        match &status {
            OutcomeStatus::Applied { healed, .. } => {
                if *healed {
                    info!("healed: {}", op.describe());
                } else {
                    info!("applied: {}", op.describe());
                }
            }
            OutcomeStatus::Failed { error, attempts } => {
                warn!(attempts, %error, "failed: {}", op.describe());
                if stop_on_error {
                    stopped = true;
                }
            }
            OutcomeStatus::Skipped { .. } => {}
        }
        outcomes.push(OperationOutcome {
            operation: op.clone(),
            status,
        });
    }

    let status = SyncResult::aggregate(&outcomes, &plan.diagnostics);
    SyncResult {
        provider: plan.provider,
        mode,
        outcomes,
        diagnostics: plan.diagnostics.clone(),
        status,
    }
}

/// Run one operation with retry, backoff, and already-exists recovery.
async fn apply_one(
    op: &Operation,
    adapter: &mut dyn ProviderAdapter,
    config: &ExecutorConfig,
) -> OutcomeStatus {
    let mut attempts = 0;
    let mut backoff = config.base_backoff;
    loop {
        attempts += 1;
        match dispatch(op, adapter).await {
            Ok(remote_id) => {
                return OutcomeStatus::Applied {
                    remote_id,
                    healed: false,
                }
            }
            Err(SyncError::AlreadyExists(detail)) if op.kind == OpKind::Create => {
                debug!(%detail, "create hit existing entity, converging against it");
                return heal_existing(op, adapter, detail, attempts).await;
            }
            Err(err) if err.is_transient() && attempts < config.max_attempts => {
                warn!(attempts, %err, "transient failure, backing off");
                sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => {
                return OutcomeStatus::Failed {
                    error: err,
                    attempts,
                }
            }
        }
    }
}

async fn dispatch(op: &Operation, adapter: &mut dyn ProviderAdapter) -> Result<Option<String>> {
    match (&op.payload, op.kind) {
        (OperationPayload::Label(spec), OpKind::Create) => {
            adapter.create_label(spec).await.map(Some)
        }
        (OperationPayload::Label(spec), OpKind::Update) => {
            let id = require_target(op)?;
            adapter.update_label(id, spec).await.map(|_| None)
        }
        (OperationPayload::Label(_), OpKind::Delete) => {
            let id = require_target(op)?;
            adapter.delete_label(id).await.map(|_| None)
        }
        (OperationPayload::Filter(spec), OpKind::Create) => {
            adapter.create_filter(spec).await.map(Some)
        }
        (OperationPayload::Filter(spec), OpKind::Update) => {
            let id = require_target(op)?;
            adapter.update_filter(id, spec).await.map(|_| None)
        }
        (OperationPayload::Filter(_), OpKind::Delete) => {
            let id = require_target(op)?;
            adapter.delete_filter(id).await.map(|_| None)
        }
    }
}

fn require_target(op: &Operation) -> Result<&str> {
    op.target_id
        .as_deref()
        .ok_or_else(|| SyncError::Permanent(format!("missing remote id for {}", op.describe())))
}

/// Converge a failed create against the entity that already exists.
///
/// The remote is re-listed and the existing entity located by identity. A
/// label create becomes an update with the desired spec; a filter create is
/// already converged, since identical signature plus identical content is
/// what the remote reported by rejecting the duplicate.
async fn heal_existing(
    op: &Operation,
    adapter: &mut dyn ProviderAdapter,
    detail: String,
    attempts: u32,
) -> OutcomeStatus {
    let snapshot = match adapter.list().await {
        Ok(s) => s,
        Err(err) => {
            return OutcomeStatus::Failed {
                error: err,
                attempts,
            }
        }
    };

    match &op.payload {
        OperationPayload::Label(spec) => {
            let Some(existing) = snapshot.labels.iter().find(|l| l.spec.path == spec.path) else {
                return OutcomeStatus::Failed {
                    error: SyncError::AlreadyExists(detail),
                    attempts,
                };
            };
            if existing.protected {
                return OutcomeStatus::Failed {
                    error: SyncError::Permanent(format!(
                        "create collided with protected label {}",
                        spec.path
                    )),
                    attempts,
                };
            }
            match adapter.update_label(&existing.id, spec).await {
                Ok(()) => OutcomeStatus::Applied {
                    remote_id: Some(existing.id.clone()),
                    healed: true,
                },
                Err(error) => OutcomeStatus::Failed { error, attempts },
            }
        }
        OperationPayload::Filter(spec) => {
            let desired_sig = match filter_signature(spec) {
                Ok(sig) => sig,
                Err(error) => return OutcomeStatus::Failed { error, attempts },
            };
            let existing = snapshot.filters.iter().find(|f| {
                filter_signature(&f.spec).map(|sig| sig == desired_sig).unwrap_or(false)
            });
            match existing {
                Some(remote) => OutcomeStatus::Applied {
                    remote_id: Some(remote.id.clone()),
                    healed: true,
                },
                None => OutcomeStatus::Failed {
                    error: SyncError::AlreadyExists(detail),
                    attempts,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::plan::PlanCounts;
    use crate::provider::InMemoryAdapter;
    use crate::spec::LabelSpec;

    fn plan_of(operations: Vec<Operation>) -> PlanResult {
        PlanResult {
            provider: ProviderKind::Gmail,
            operations,
            diagnostics: vec![],
            counts: PlanCounts::default(),
        }
    }

    fn create_label_op(path: &str) -> Operation {
        Operation {
            kind: OpKind::Create,
            payload: OperationPayload::Label(LabelSpec::new(path)),
            target_id: None,
            provider: ProviderKind::Gmail,
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            batch_size: 10,
            batch_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_remote_calls() {
        let mut adapter =
            InMemoryAdapter::new(ProviderKind::Gmail, CapabilitySet::full());
        let plan = plan_of(vec![create_label_op("Finance")]);
        let result = execute(
            &plan,
            &mut adapter,
            ExecutionMode::DryRun,
            false,
            &fast_config(),
        )
        .await;
        assert_eq!(result.outcomes.len(), 1);
        assert!(matches!(
            result.outcomes[0].status,
            OutcomeStatus::Skipped {
                reason: SkipReason::DryRun
            }
        ));
        assert_eq!(adapter.call_count(), 0);
        assert_eq!(result.status, AggregateStatus::Clean);
    }

    #[tokio::test]
    async fn test_transient_failures_retried_until_success() {
        let mut adapter =
            InMemoryAdapter::new(ProviderKind::Gmail, CapabilitySet::full());
        adapter.fail_next(SyncError::Transient("429".into()));
        adapter.fail_next(SyncError::Transient("503".into()));

        let plan = plan_of(vec![create_label_op("Finance")]);
        let result = execute(
            &plan,
            &mut adapter,
            ExecutionMode::Apply,
            false,
            &fast_config(),
        )
        .await;
        assert!(matches!(
            result.outcomes[0].status,
            OutcomeStatus::Applied { healed: false, .. }
        ));
        assert_eq!(adapter.labels().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_operation_only() {
        let mut adapter =
            InMemoryAdapter::new(ProviderKind::Gmail, CapabilitySet::full());
        for _ in 0..3 {
            adapter.fail_next(SyncError::Transient("429".into()));
        }
        let plan = plan_of(vec![create_label_op("Finance"), create_label_op("Travel")]);
        let result = execute(
            &plan,
            &mut adapter,
            ExecutionMode::Apply,
            false,
            &fast_config(),
        )
        .await;
        assert!(matches!(
            result.outcomes[0].status,
            OutcomeStatus::Failed { attempts: 3, .. }
        ));
        // Execution continued past the failure.
        assert!(matches!(
            result.outcomes[1].status,
            OutcomeStatus::Applied { .. }
        ));
        assert_eq!(result.status, AggregateStatus::TransientFailures);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let mut adapter =
            InMemoryAdapter::new(ProviderKind::Gmail, CapabilitySet::full());
        adapter.fail_next(SyncError::Permanent("403".into()));
        let plan = plan_of(vec![create_label_op("Finance")]);
        let result = execute(
            &plan,
            &mut adapter,
            ExecutionMode::Apply,
            false,
            &fast_config(),
        )
        .await;
        assert!(matches!(
            result.outcomes[0].status,
            OutcomeStatus::Failed { attempts: 1, .. }
        ));
        assert_eq!(result.status, AggregateStatus::PermanentFailures);
    }

    #[tokio::test]
    async fn test_stop_on_error_skips_the_rest() {
        let mut adapter =
            InMemoryAdapter::new(ProviderKind::Gmail, CapabilitySet::full());
        adapter.fail_next(SyncError::Permanent("403".into()));
        let plan = plan_of(vec![create_label_op("Finance"), create_label_op("Travel")]);
        let result = execute(
            &plan,
            &mut adapter,
            ExecutionMode::Apply,
            true,
            &fast_config(),
        )
        .await;
        assert!(matches!(
            result.outcomes[1].status,
            OutcomeStatus::Skipped {
                reason: SkipReason::StopOnError
            }
        ));
        assert_eq!(adapter.labels().len(), 0);
    }

    #[tokio::test]
    async fn test_heal_failure_reports_real_attempt_count() {
        let mut adapter =
            InMemoryAdapter::new(ProviderKind::Gmail, CapabilitySet::full());
        adapter.seed_label("Finance", true);
        adapter.fail_next(SyncError::Transient("429".into()));

        // Attempt 1 is transient, attempt 2 collides with the protected
        // label; the reported count must cover both.
        let plan = plan_of(vec![create_label_op("Finance")]);
        let result = execute(
            &plan,
            &mut adapter,
            ExecutionMode::Apply,
            false,
            &fast_config(),
        )
        .await;
        assert!(matches!(
            result.outcomes[0].status,
            OutcomeStatus::Failed { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_create_collision_heals_into_update() {
        let mut adapter =
            InMemoryAdapter::new(ProviderKind::Gmail, CapabilitySet::full());
        adapter.seed_label("Finance", false);

        // The differ saw a stale snapshot; the executor recovers.
        let plan = plan_of(vec![create_label_op("Finance")]);
        let result = execute(
            &plan,
            &mut adapter,
            ExecutionMode::Apply,
            false,
            &fast_config(),
        )
        .await;
        assert!(matches!(
            result.outcomes[0].status,
            OutcomeStatus::Applied { healed: true, .. }
        ));
        assert_eq!(adapter.labels().len(), 1);
    }
}
