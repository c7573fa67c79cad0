//! Run orchestration
//!
//! Ties the pipeline together for one provider: validate the desired
//! state, snapshot the remote, diff, order the plan, then either report it
//! (dry run) or apply it and verify convergence with a second diff.
//!
//! A [`SyncRun`] is single-use. Each phase advances [`RunState`] and a run
//! that has applied can only move forward to verification, never back to
//! planning.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::diff::{diff, DiffOptions};
use crate::error::{Result, SyncError};
use crate::executor::{execute, ExecutionMode, ExecutorConfig, SyncResult};
use crate::plan::{build_plan, PlanResult};
use crate::provider::{ProviderAdapter, RemoteSnapshot};
use crate::spec::{DesiredState, FilterSpec, LabelSpec};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    PlanBuilt,
    DryRunReported,
    Applied,
    Verified,
    Failed,
}

/// Per-run policy.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Delete remote entities absent from the desired state.
    pub delete_missing: bool,
    /// Mutate the remote; false means dry run.
    pub apply: bool,
    /// Abort remaining operations after the first hard failure.
    pub stop_on_error: bool,
    /// Forward addresses known to be verified on the account. When set,
    /// any filter forwarding elsewhere fails validation up front.
    pub verified_forwards: Option<HashSet<String>>,
}

/// One reconciliation pass against one provider.
pub struct SyncRun<'a> {
    desired: &'a DesiredState,
    adapter: &'a mut dyn ProviderAdapter,
    options: SyncOptions,
    config: ExecutorConfig,
    state: RunState,
}

impl<'a> SyncRun<'a> {
    pub fn new(
        desired: &'a DesiredState,
        adapter: &'a mut dyn ProviderAdapter,
        options: SyncOptions,
    ) -> Self {
        SyncRun {
            desired,
            adapter,
            options,
            config: ExecutorConfig::default(),
            state: RunState::Idle,
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    async fn snapshot(&mut self) -> Result<RemoteSnapshot> {
        self.adapter
            .list()
            .await
            .map_err(|e| SyncError::Snapshot(e.to_string()))
    }

    fn build(&self, snapshot: &RemoteSnapshot) -> Result<PlanResult> {
        let provider = self.adapter.kind();
        let capabilities = self.adapter.capabilities();
        let diff_out = diff(
            provider,
            capabilities,
            self.desired,
            snapshot,
            DiffOptions {
                delete_missing: self.options.delete_missing,
            },
        )?;
        build_plan(
            provider,
            capabilities,
            self.desired,
            diff_out.operations,
            diff_out.diagnostics,
        )
    }

    /// Validate, snapshot, diff, and order: everything short of executing.
    pub async fn plan(&mut self) -> Result<PlanResult> {
        self.desired.validate()?;
        if let Some(verified) = &self.options.verified_forwards {
            self.desired.check_forward_addresses(verified)?;
        }
        let snapshot = self.snapshot().await?;
        let plan = self.build(&snapshot)?;
        info!(
            provider = %plan.provider,
            creates = plan.counts.creates,
            updates = plan.counts.updates,
            deletes = plan.counts.deletes,
            "plan built"
        );
        self.state = RunState::PlanBuilt;
        Ok(plan)
    }

    /// Run the full pipeline. Dry runs stop after reporting; applies are
    /// followed by a verification diff, and any residual operations there
    /// mark the run failed.
    pub async fn sync(&mut self) -> Result<SyncResult> {
        let plan = self.plan().await?;

        if !self.options.apply {
            let result = execute(
                &plan,
                self.adapter,
                ExecutionMode::DryRun,
                self.options.stop_on_error,
                &self.config,
            )
            .await;
            self.state = RunState::DryRunReported;
            return Ok(result);
        }

        let result = execute(
            &plan,
            self.adapter,
            ExecutionMode::Apply,
            self.options.stop_on_error,
            &self.config,
        )
        .await;
        self.state = RunState::Applied;

        match self.verify().await {
            Ok(residual) if residual.is_empty() => self.state = RunState::Verified,
            Ok(residual) => {
                warn!(
                    provider = %plan.provider,
                    residual = residual.operations.len(),
                    "verification found residual drift"
                );
                self.state = RunState::Failed;
            }
            Err(e) => {
                warn!(provider = %plan.provider, error = %e, "verification pass failed");
                self.state = RunState::Failed;
            }
        }
        Ok(result)
    }

    /// Re-diff against a fresh snapshot under the same delete-missing
    /// policy the run was configured with. The returned plan is the
    /// residual drift; empty means the remote has converged.
    pub async fn verify(&mut self) -> Result<PlanResult> {
        let snapshot = self.snapshot().await?;
        self.build(&snapshot)
    }
}

/// Snapshot a provider's live configuration as a desired-state document.
///
/// Protected system entities are skipped so the exported document can be
/// fed straight back into a sync without proposing changes to them.
pub async fn export(adapter: &mut dyn ProviderAdapter) -> Result<DesiredState> {
    let snapshot = adapter
        .list()
        .await
        .map_err(|e| SyncError::Snapshot(e.to_string()))?;

    let labels: Vec<LabelSpec> = snapshot
        .labels
        .into_iter()
        .filter(|l| !l.protected)
        .map(|l| l.spec)
        .collect();
    let filters: Vec<FilterSpec> = snapshot.filters.into_iter().map(|f| f.spec).collect();

    Ok(DesiredState { labels, filters })
}

/// Serialize a desired state back to its YAML document form.
pub fn to_yaml(state: &DesiredState) -> Result<String> {
    Ok(serde_yaml::to_string(state)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::profiles;
    use crate::executor::{AggregateStatus, OutcomeStatus};
    use crate::provider::{InMemoryAdapter, ProviderKind};
    use crate::spec::{FilterAction, FilterMatch, LabelColor};

    fn desired() -> DesiredState {
        DesiredState::from_yaml(
            r#"
labels:
  - path: Finance/Receipts
  - path: Newsletters
    color: blue
filters:
  - match: { from: billing@example.com }
    action: { add: [Finance/Receipts], markRead: true }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_desired_fixture_parses() {
        let state = desired();
        assert_eq!(state.labels.len(), 2);
        assert_eq!(
            state.labels[1].color,
            Some(LabelColor::Named("blue".into()))
        );
        assert_eq!(state.filters.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let state = desired();
        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());
        let mut run = SyncRun::new(&state, &mut adapter, SyncOptions::default());
        let result = run.sync().await.unwrap();

        assert_eq!(run.state(), RunState::DryRunReported);
        assert_eq!(result.outcomes.len(), 3);
        assert!(result
            .outcomes
            .iter()
            .all(|o| matches!(o.status, OutcomeStatus::Skipped { .. })));
        assert!(adapter.labels().is_empty());
        assert!(adapter.filters().is_empty());
    }

    #[tokio::test]
    async fn test_apply_then_replan_is_empty() {
        let state = desired();
        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());

        let options = SyncOptions {
            apply: true,
            ..Default::default()
        };
        let mut run = SyncRun::new(&state, &mut adapter, options.clone());
        let result = run.sync().await.unwrap();
        assert_eq!(result.status, AggregateStatus::Clean);
        assert_eq!(run.state(), RunState::Verified);

        // Second pass over the converged remote proposes nothing.
        let mut run = SyncRun::new(&state, &mut adapter, options);
        let plan = run.plan().await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_sweeps_remote_only_entities() {
        let state = desired();
        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());
        adapter.seed_label("Stale", false);

        let mut run = SyncRun::new(
            &state,
            &mut adapter,
            SyncOptions {
                apply: true,
                delete_missing: true,
                ..Default::default()
            },
        );
        run.sync().await.unwrap();
        assert_eq!(run.state(), RunState::Verified);
        assert!(adapter.labels().iter().all(|l| l.spec.path.as_str() != "Stale"));
    }

    #[tokio::test]
    async fn test_without_delete_missing_remote_extras_survive() {
        let state = desired();
        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());
        adapter.seed_label("Keep/Me", false);

        let mut run = SyncRun::new(
            &state,
            &mut adapter,
            SyncOptions {
                apply: true,
                ..Default::default()
            },
        );
        run.sync().await.unwrap();
        assert_eq!(run.state(), RunState::Verified);
        assert!(adapter
            .labels()
            .iter()
            .any(|l| l.spec.path.as_str() == "Keep/Me"));
    }

    #[tokio::test]
    async fn test_unverified_forward_rejected_before_any_remote_call() {
        let mut state = desired();
        state.filters.push(crate::spec::FilterSpec {
            matcher: FilterMatch {
                from: Some("x@example.com".into()),
                ..Default::default()
            },
            action: FilterAction {
                forward: Some("elsewhere@example.net".into()),
                ..Default::default()
            },
        });

        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());
        let mut run = SyncRun::new(
            &state,
            &mut adapter,
            SyncOptions {
                verified_forwards: Some(HashSet::new()),
                ..Default::default()
            },
        );
        let err = run.plan().await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_export_round_trips_through_yaml() {
        let state = desired();
        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());
        let mut run = SyncRun::new(
            &state,
            &mut adapter,
            SyncOptions {
                apply: true,
                ..Default::default()
            },
        );
        run.sync().await.unwrap();

        let exported = export(&mut adapter).await.unwrap();
        let doc = to_yaml(&exported).unwrap();
        let reparsed = DesiredState::from_yaml(&doc).unwrap();
        assert_eq!(reparsed.labels.len(), 2);
        assert_eq!(reparsed.filters.len(), 1);

        // Exported state syncs back as a no-op.
        let mut run = SyncRun::new(&reparsed, &mut adapter, SyncOptions::default());
        let plan = run.plan().await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_verify_returns_residual_plan() {
        let state = desired();
        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());

        let mut run = SyncRun::new(&state, &mut adapter, SyncOptions::default());
        let residual = run.verify().await.unwrap();
        assert!(!residual.is_empty());
        assert_eq!(residual.operations.len(), 3);
        assert_eq!(residual.counts.creates, 3);

        // Once applied, verification comes back empty.
        let mut run = SyncRun::new(
            &state,
            &mut adapter,
            SyncOptions {
                apply: true,
                ..Default::default()
            },
        );
        run.sync().await.unwrap();
        let residual = run.verify().await.unwrap();
        assert!(residual.is_empty());
    }

    #[tokio::test]
    async fn test_failed_listing_is_a_snapshot_error() {
        let state = desired();
        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());
        adapter.fail_next(SyncError::Permanent("403: insufficient scope".into()));

        let mut run = SyncRun::new(&state, &mut adapter, SyncOptions::default());
        let err = run.plan().await.unwrap_err();
        assert!(matches!(err, SyncError::Snapshot(_)));
    }

    #[tokio::test]
    async fn test_transient_failure_surfaces_in_aggregate_status() {
        let state = desired();
        let mut adapter = InMemoryAdapter::new(ProviderKind::Gmail, profiles::gmail());
        // The planning snapshot goes through; the first operation then
        // fails on every retry attempt.
        adapter.pass_next();
        for _ in 0..3 {
            adapter.fail_next(SyncError::Transient("rate limited".into()));
        }

        let mut run = SyncRun::new(
            &state,
            &mut adapter,
            SyncOptions {
                apply: true,
                ..Default::default()
            },
        )
        .with_config(ExecutorConfig {
            base_backoff: std::time::Duration::from_millis(1),
            batch_delay: std::time::Duration::from_millis(0),
            ..Default::default()
        });
        let result = run.sync().await.unwrap();
        assert_eq!(result.status, AggregateStatus::TransientFailures);
        assert_eq!(run.state(), RunState::Failed);
    }
}
