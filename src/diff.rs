//! Matcher/Differ
//!
//! Computes identity-based correspondence between desired and remote
//! entities and classifies every desired entity as exactly one of create,
//! update, or noop. Remote-only entities become delete candidates, promoted
//! to operations only under the caller's delete-missing policy and never
//! for protected system entities.
//!
//! Capability gating happens here: unsupported sub-actions are stripped
//! from desired payloads with a diagnostic before identities are computed,
//! so a gated desired filter still matches the supported shape the remote
//! actually holds.

use std::collections::HashSet;

use tracing::debug;

use crate::capability::CapabilitySet;
use crate::error::{Result, SyncError};
use crate::plan::{Diagnostic, EntityType, OpKind, Operation, OperationPayload};
use crate::provider::{ProviderKind, RemoteSnapshot};
use crate::signature::{filter_signature, normalize_filter};
use crate::spec::{DesiredState, FilterSpec, LabelSpec};

/// Policy knobs for one diff pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    /// Propose deletion of remote-only entities.
    pub delete_missing: bool,
}

/// Unordered operations plus diagnostics; input to the plan builder.
#[derive(Debug, Default)]
pub struct DiffOutput {
    pub operations: Vec<Operation>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Diff desired state against a remote snapshot.
pub fn diff(
    provider: ProviderKind,
    capabilities: &CapabilitySet,
    desired: &DesiredState,
    snapshot: &RemoteSnapshot,
    options: DiffOptions,
) -> Result<DiffOutput> {
    let mut out = DiffOutput::default();
    diff_labels(provider, capabilities, desired, snapshot, options, &mut out);
    diff_filters(provider, capabilities, desired, snapshot, options, &mut out)?;
    debug!(
        provider = %provider,
        operations = out.operations.len(),
        diagnostics = out.diagnostics.len(),
        "diff complete"
    );
    Ok(out)
}

fn diff_labels(
    provider: ProviderKind,
    capabilities: &CapabilitySet,
    desired: &DesiredState,
    snapshot: &RemoteSnapshot,
    options: DiffOptions,
    out: &mut DiffOutput,
) {
    let mut consumed: HashSet<&str> = HashSet::new();

    for raw in &desired.labels {
        let spec = gate_label(capabilities, raw, &mut out.diagnostics);
        let identity = spec.path.to_string();

        // All remote labels sharing this identity, in listing order.
        let matches: Vec<_> = snapshot
            .labels
            .iter()
            .filter(|remote| remote.spec.path == spec.path)
            .collect();

        let Some(target) = matches.first() else {
            out.operations.push(Operation {
                kind: OpKind::Create,
                payload: OperationPayload::Label(spec),
                target_id: None,
                provider,
            });
            continue;
        };
        consumed.insert(target.id.as_str());

        if matches.len() > 1 {
            out.diagnostics.push(Diagnostic::AmbiguousMatch {
                entity: EntityType::Label,
                identity: identity.clone(),
                kept_id: target.id.clone(),
                duplicate_ids: matches[1..].iter().map(|r| r.id.clone()).collect(),
            });
            for duplicate in &matches[1..] {
                consumed.insert(duplicate.id.as_str());
                if !options.delete_missing {
                    continue;
                }
                if duplicate.protected {
                    out.diagnostics.push(Diagnostic::ProtectedEntitySkipped {
                        entity: EntityType::Label,
                        identity: duplicate.spec.path.to_string(),
                        op: OpKind::Delete,
                    });
                    continue;
                }
                out.operations.push(Operation {
                    kind: OpKind::Delete,
                    payload: OperationPayload::Label(duplicate.spec.clone()),
                    target_id: Some(duplicate.id.clone()),
                    provider,
                });
            }
        }

        if !label_differs(&target.spec, &spec) {
            continue; // noop
        }
        if target.protected {
            out.diagnostics.push(Diagnostic::ProtectedEntitySkipped {
                entity: EntityType::Label,
                identity,
                op: OpKind::Update,
            });
            continue;
        }
        out.operations.push(Operation {
            kind: OpKind::Update,
            payload: OperationPayload::Label(spec),
            target_id: Some(target.id.clone()),
            provider,
        });
    }

    for remote in &snapshot.labels {
        if consumed.contains(remote.id.as_str()) {
            continue;
        }
        if !options.delete_missing {
            continue;
        }
        if remote.protected {
            out.diagnostics.push(Diagnostic::ProtectedEntitySkipped {
                entity: EntityType::Label,
                identity: remote.spec.path.to_string(),
                op: OpKind::Delete,
            });
            continue;
        }
        out.operations.push(Operation {
            kind: OpKind::Delete,
            payload: OperationPayload::Label(remote.spec.clone()),
            target_id: Some(remote.id.clone()),
            provider,
        });
    }
}

fn diff_filters(
    provider: ProviderKind,
    capabilities: &CapabilitySet,
    desired: &DesiredState,
    snapshot: &RemoteSnapshot,
    options: DiffOptions,
    out: &mut DiffOutput,
) -> Result<()> {
    // Normalize remote filters once, keyed in listing order.
    let mut remote: Vec<(String, &crate::provider::RemoteFilter, FilterSpec)> = Vec::new();
    for entry in &snapshot.filters {
        let normalized = normalize_filter(&entry.spec)?;
        remote.push((filter_signature(&entry.spec)?, entry, normalized));
    }

    let mut desired_signatures: HashSet<String> = HashSet::new();
    let mut consumed: HashSet<&str> = HashSet::new();

    for raw in &desired.filters {
        let Some(gated) = gate_filter(capabilities, raw, &mut out.diagnostics)? else {
            continue; // nothing supported remains of this filter
        };
        let normalized = normalize_filter(&gated)?;
        let signature = filter_signature(&gated)?;

        if !desired_signatures.insert(signature.clone()) {
            // Two desired filters collapsed to one identity once unsupported
            // sub-actions were stripped; planning both would fight itself.
            return Err(SyncError::Validation(format!(
                "filters collide after capability gating: {signature}"
            )));
        }

        let match_indices: Vec<usize> = remote
            .iter()
            .enumerate()
            .filter(|(_, (sig, _, _))| *sig == signature)
            .map(|(i, _)| i)
            .collect();

        let Some(&first) = match_indices.first() else {
            out.operations.push(Operation {
                kind: OpKind::Create,
                payload: OperationPayload::Filter(normalized),
                target_id: None,
                provider,
            });
            continue;
        };
        let (_, target, target_normalized) = &remote[first];
        consumed.insert(target.id.as_str());

        if match_indices.len() > 1 {
            out.diagnostics.push(Diagnostic::AmbiguousMatch {
                entity: EntityType::Filter,
                identity: signature.clone(),
                kept_id: target.id.clone(),
                duplicate_ids: match_indices[1..]
                    .iter()
                    .map(|&i| remote[i].1.id.clone())
                    .collect(),
            });
            for &i in &match_indices[1..] {
                let (_, duplicate, dup_normalized) = &remote[i];
                consumed.insert(duplicate.id.as_str());
                if options.delete_missing {
                    out.operations.push(Operation {
                        kind: OpKind::Delete,
                        payload: OperationPayload::Filter(dup_normalized.clone()),
                        target_id: Some(duplicate.id.clone()),
                        provider,
                    });
                }
            }
        }

        // Same identity; flag-style sub-actions may still differ.
        if normalized != *target_normalized {
            out.operations.push(Operation {
                kind: OpKind::Update,
                payload: OperationPayload::Filter(normalized),
                target_id: Some(target.id.clone()),
                provider,
            });
        }
    }

    if options.delete_missing {
        for (_, entry, normalized) in &remote {
            if consumed.contains(entry.id.as_str()) {
                continue;
            }
            out.operations.push(Operation {
                kind: OpKind::Delete,
                payload: OperationPayload::Filter(normalized.clone()),
                target_id: Some(entry.id.clone()),
                provider,
            });
        }
    }
    Ok(())
}

/// Strip label fields the provider cannot express.
fn gate_label(
    capabilities: &CapabilitySet,
    spec: &LabelSpec,
    diagnostics: &mut Vec<Diagnostic>,
) -> LabelSpec {
    let mut gated = spec.clone();
    if !capabilities.label_colors && gated.color.take().is_some() {
        diagnostics.push(Diagnostic::CapabilityGap {
            identity: spec.path.to_string(),
            dropped: "color".into(),
        });
    }
    if !capabilities.visibility_flags {
        let had_list = gated.list_visibility.take().is_some();
        let had_message = gated.message_visibility.take().is_some();
        if had_list || had_message {
            diagnostics.push(Diagnostic::CapabilityGap {
                identity: spec.path.to_string(),
                dropped: "visibility flags".into(),
            });
        }
    }
    gated
}

/// Strip unsupported match criteria and sub-actions from a desired filter.
///
/// Identity is computed after gating, so the planned payload and the rule
/// the backend reads back share one signature. Returns `None` when no
/// supported criterion or sub-action remains; the filter is then
/// represented only by its diagnostics.
fn gate_filter(
    capabilities: &CapabilitySet,
    spec: &FilterSpec,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Option<FilterSpec>> {
    let identity = filter_signature(spec)?;
    let mut gated = spec.clone();

    let mut gap = |dropped: &str, diagnostics: &mut Vec<Diagnostic>| {
        diagnostics.push(Diagnostic::CapabilityGap {
            identity: identity.clone(),
            dropped: dropped.into(),
        });
    };

    if !capabilities.query_match {
        let had_query = gated.matcher.query.take().is_some();
        let had_negated = gated.matcher.negated_query.take().is_some();
        if had_query || had_negated {
            gap("query criteria", diagnostics);
        }
    }
    if !capabilities.size_match {
        let had_size = gated.matcher.size.take().is_some();
        gated.matcher.size_comparison = None;
        if had_size {
            gap("size criteria", diagnostics);
        }
    }
    if gated.matcher.is_empty() {
        gap("all match criteria; filter dropped", diagnostics);
        return Ok(None);
    }

    if !capabilities.remove_label_action && !gated.action.remove_labels.is_empty() {
        gated.action.remove_labels.clear();
        gap("removeLabels", diagnostics);
    }
    if !capabilities.forward_action && gated.action.forward.take().is_some() {
        gap("forward", diagnostics);
    }
    if !capabilities.categorize_action {
        let had_single = gated.action.categorize_as.take().is_some();
        let had_list = !gated.action.categories.is_empty();
        gated.action.categories.clear();
        if had_single || had_list {
            gap("categorize", diagnostics);
        }
    }
    if !capabilities.move_to_folder_action && gated.action.move_to_folder.take().is_some() {
        gap("moveToFolder", diagnostics);
    }

    if gated.action.is_empty() {
        gap("all sub-actions; filter dropped", diagnostics);
        return Ok(None);
    }
    Ok(Some(gated))
}

/// A desired label differs from the remote when any field it specifies
/// disagrees; unspecified fields are "don't care".
fn label_differs(current: &LabelSpec, desired: &LabelSpec) -> bool {
    if desired.color.is_some() && current.color != desired.color {
        return true;
    }
    if desired.list_visibility.is_some() && current.list_visibility != desired.list_visibility {
        return true;
    }
    if desired.message_visibility.is_some()
        && current.message_visibility != desired.message_visibility
    {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::profiles;
    use crate::provider::{RemoteFilter, RemoteLabel};
    use crate::spec::{FilterAction, FilterMatch, LabelColor};

    fn remote_label(id: &str, path: &str, protected: bool) -> RemoteLabel {
        RemoteLabel {
            id: id.into(),
            spec: LabelSpec::new(path),
            protected,
        }
    }

    fn desired_filter(from: &str, add: &[&str], remove: &[&str]) -> FilterSpec {
        FilterSpec {
            matcher: FilterMatch {
                from: Some(from.into()),
                ..Default::default()
            },
            action: FilterAction {
                add_labels: add.iter().map(|s| s.to_string()).collect(),
                remove_labels: remove.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    fn run_diff(
        desired: &DesiredState,
        snapshot: &RemoteSnapshot,
        delete_missing: bool,
    ) -> DiffOutput {
        diff(
            ProviderKind::Gmail,
            &profiles::gmail(),
            desired,
            snapshot,
            DiffOptions { delete_missing },
        )
        .unwrap()
    }

    #[test]
    fn test_missing_label_classified_create() {
        let desired = DesiredState {
            labels: vec![LabelSpec::new("Finance/Receipts")],
            filters: vec![],
        };
        let out = run_diff(&desired, &RemoteSnapshot::default(), false);
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].kind, OpKind::Create);
        assert_eq!(out.operations[0].target_id, None);
    }

    #[test]
    fn test_identical_label_is_noop() {
        let desired = DesiredState {
            labels: vec![LabelSpec::new("Finance/Receipts")],
            filters: vec![],
        };
        let snapshot = RemoteSnapshot {
            labels: vec![remote_label("l1", "Finance/Receipts", false)],
            filters: vec![],
        };
        let out = run_diff(&desired, &snapshot, true);
        assert!(out.operations.is_empty());
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_changed_label_classified_update() {
        let mut spec = LabelSpec::new("Finance");
        spec.color = Some(LabelColor::Named("blue".into()));
        let desired = DesiredState {
            labels: vec![spec],
            filters: vec![],
        };
        let snapshot = RemoteSnapshot {
            labels: vec![remote_label("l1", "Finance", false)],
            filters: vec![],
        };
        let out = run_diff(&desired, &snapshot, false);
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].kind, OpKind::Update);
        assert_eq!(out.operations[0].target_id.as_deref(), Some("l1"));
    }

    #[test]
    fn test_delete_missing_gating() {
        let snapshot = RemoteSnapshot {
            labels: vec![remote_label("l1", "Finance/Receipts", false)],
            filters: vec![],
        };
        let out = run_diff(&DesiredState::default(), &snapshot, false);
        assert!(out.operations.is_empty());

        let out = run_diff(&DesiredState::default(), &snapshot, true);
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].kind, OpKind::Delete);
    }

    #[test]
    fn test_protected_labels_never_touched() {
        let mut desired_inbox = LabelSpec::new("INBOX");
        desired_inbox.color = Some(LabelColor::Named("red".into()));
        let desired = DesiredState {
            labels: vec![desired_inbox],
            filters: vec![],
        };
        let snapshot = RemoteSnapshot {
            labels: vec![
                remote_label("INBOX", "INBOX", true),
                remote_label("TRASH", "TRASH", true),
            ],
            filters: vec![],
        };
        let out = run_diff(&desired, &snapshot, true);
        assert!(out.operations.is_empty());
        let skipped: Vec<_> = out
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::ProtectedEntitySkipped { .. }))
            .collect();
        assert_eq!(skipped.len(), 2); // update of INBOX, delete of TRASH
    }

    #[test]
    fn test_duplicate_remote_filters_tie_break_by_listing_order() {
        let spec = desired_filter("dup@example.com", &["A"], &[]);
        let desired = DesiredState {
            labels: vec![],
            filters: vec![spec.clone()],
        };
        let snapshot = RemoteSnapshot {
            labels: vec![],
            filters: vec![
                RemoteFilter {
                    id: "f1".into(),
                    spec: spec.clone(),
                },
                RemoteFilter {
                    id: "f2".into(),
                    spec: spec.clone(),
                },
            ],
        };
        let out = run_diff(&desired, &snapshot, true);
        // First listed copy is the noop match target; the second is deleted.
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].kind, OpKind::Delete);
        assert_eq!(out.operations[0].target_id.as_deref(), Some("f2"));
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::AmbiguousMatch { kept_id, .. } if kept_id == "f1"
        )));

        // Without delete_missing the duplicate is only reported.
        let out = run_diff(&desired, &snapshot, false);
        assert!(out.operations.is_empty());
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn test_capability_gap_strips_unsupported_sub_action() {
        let desired = DesiredState {
            labels: vec![],
            filters: vec![desired_filter("x@example.com", &["A"], &["B"])],
        };
        let out = diff(
            ProviderKind::Outlook,
            &profiles::outlook(), // no remove_label_action
            &desired,
            &RemoteSnapshot::default(),
            DiffOptions::default(),
        )
        .unwrap();

        assert_eq!(out.operations.len(), 1);
        let OperationPayload::Filter(planned) = &out.operations[0].payload else {
            panic!("expected filter payload");
        };
        assert_eq!(planned.action.add_labels, vec!["A"]);
        assert!(planned.action.remove_labels.is_empty());
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::CapabilityGap { dropped, .. } if dropped == "removeLabels"
        )));
    }

    #[test]
    fn test_unsupported_query_criterion_gated_to_remote_shape() {
        // Graph rules cannot express a free-text query; the remote holds
        // the rule without it. The gated desired filter must converge
        // against that shape instead of re-creating the rule every run.
        let mut spec = desired_filter("x@example.com", &["A"], &[]);
        spec.matcher.query = Some("invoice OR receipt".into());
        let desired = DesiredState {
            labels: vec![],
            filters: vec![spec],
        };
        let snapshot = RemoteSnapshot {
            labels: vec![],
            filters: vec![RemoteFilter {
                id: "r1".into(),
                spec: desired_filter("x@example.com", &["A"], &[]),
            }],
        };
        let out = diff(
            ProviderKind::Outlook,
            &profiles::outlook(),
            &desired,
            &snapshot,
            DiffOptions::default(),
        )
        .unwrap();
        assert!(out.operations.is_empty());
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::CapabilityGap { dropped, .. } if dropped == "query criteria"
        )));
    }

    #[test]
    fn test_filter_with_no_expressible_criteria_dropped() {
        let spec = FilterSpec {
            matcher: FilterMatch {
                query: Some("has:attachment larger:5M".into()),
                size: Some(5_000_000),
                ..Default::default()
            },
            action: FilterAction {
                add_labels: vec!["Big".into()],
                ..Default::default()
            },
        };
        let desired = DesiredState {
            labels: vec![],
            filters: vec![spec],
        };
        let out = diff(
            ProviderKind::Outlook,
            &profiles::outlook(),
            &desired,
            &RemoteSnapshot::default(),
            DiffOptions::default(),
        )
        .unwrap();
        assert!(out.operations.is_empty());
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::CapabilityGap { dropped, .. } if dropped.contains("filter dropped")
        )));
    }

    #[test]
    fn test_protected_duplicate_label_reported_not_deleted() {
        let desired = DesiredState {
            labels: vec![LabelSpec::new("Chats")],
            filters: vec![],
        };
        let snapshot = RemoteSnapshot {
            labels: vec![
                remote_label("l1", "Chats", false),
                remote_label("CHAT", "Chats", true),
            ],
            filters: vec![],
        };
        let out = run_diff(&desired, &snapshot, true);
        assert!(out.operations.is_empty());
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::AmbiguousMatch { kept_id, .. } if kept_id == "l1"
        )));
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::ProtectedEntitySkipped { op: OpKind::Delete, .. }
        )));
    }

    #[test]
    fn test_fully_unsupported_filter_dropped_entirely() {
        let mut spec = desired_filter("x@example.com", &[], &["B"]);
        spec.action.forward = Some("elsewhere@example.com".into());
        let desired = DesiredState {
            labels: vec![],
            filters: vec![spec],
        };
        let out = diff(
            ProviderKind::Outlook,
            &profiles::outlook(),
            &desired,
            &RemoteSnapshot::default(),
            DiffOptions::default(),
        )
        .unwrap();
        assert!(out.operations.is_empty());
        assert!(out.diagnostics.len() >= 3); // remove, forward, whole filter
    }

    #[test]
    fn test_flag_change_is_update_against_matched_filter() {
        let mut desired_spec = desired_filter("x@example.com", &["A"], &[]);
        desired_spec.action.mark_read = true;
        let remote_spec = desired_filter("x@example.com", &["A"], &[]);
        let desired = DesiredState {
            labels: vec![],
            filters: vec![desired_spec],
        };
        let snapshot = RemoteSnapshot {
            labels: vec![],
            filters: vec![RemoteFilter {
                id: "f1".into(),
                spec: remote_spec,
            }],
        };
        let out = run_diff(&desired, &snapshot, false);
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].kind, OpKind::Update);
        assert_eq!(out.operations[0].target_id.as_deref(), Some("f1"));
    }
}
