//! Operations, diagnostics, and the plan builder
//!
//! The differ emits an unordered set of operations; this module orders them
//! so nothing references a not-yet-created entity, lowers filter updates on
//! providers that cannot patch filters in place, and drops label deletes
//! still referenced by desired filters. The builder is pure, so `plan`
//! output is exactly what an apply would execute.

use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::error::Result;
use crate::provider::ProviderKind;
use crate::signature::{filter_signature, resolved_add_labels};
use crate::spec::{DesiredState, FilterSpec, LabelSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Label,
    Filter,
}

/// The entity an operation carries. For deletes this is the remote entity's
/// spec so reports can show what is being removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "spec", rename_all = "lowercase")]
pub enum OperationPayload {
    Label(LabelSpec),
    Filter(FilterSpec),
}

impl OperationPayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            OperationPayload::Label(_) => EntityType::Label,
            OperationPayload::Filter(_) => EntityType::Filter,
        }
    }

    /// Canonical identity string: label path or filter signature.
    pub fn identity(&self) -> Result<String> {
        match self {
            OperationPayload::Label(spec) => Ok(spec.path.to_string()),
            OperationPayload::Filter(spec) => filter_signature(spec),
        }
    }
}

/// One planned remote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    #[serde(flatten)]
    pub payload: OperationPayload,
    /// Remote id, known for updates and deletes; creates discover theirs.
    pub target_id: Option<String>,
    pub provider: ProviderKind,
}

impl Operation {
    pub fn describe(&self) -> String {
        let identity = self
            .payload
            .identity()
            .unwrap_or_else(|_| "<unresolvable>".into());
        let kind = match self.kind {
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        };
        let entity = match self.payload.entity_type() {
            EntityType::Label => "label",
            EntityType::Filter => "filter",
        };
        match &self.target_id {
            Some(id) => format!("{kind} {entity} {identity} (remote id {id})"),
            None => format!("{kind} {entity} {identity}"),
        }
    }
}

/// Non-fatal findings recorded while planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Multiple remote entities share one desired identity. The first by
    /// listing order was kept as the match target.
    AmbiguousMatch {
        entity: EntityType,
        identity: String,
        kept_id: String,
        duplicate_ids: Vec<String>,
    },
    /// A desired sub-action is unsupported by the target provider and was
    /// dropped from the planned payload.
    CapabilityGap { identity: String, dropped: String },
    /// A protected system entity would have been updated or deleted.
    ProtectedEntitySkipped {
        entity: EntityType,
        identity: String,
        op: OpKind,
    },
    /// A label delete was dropped because a desired filter still references
    /// the label.
    DeferredLabelDelete {
        path: String,
        referenced_by: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

/// Ordered operations plus everything the differ wanted to say about them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub provider: ProviderKind,
    pub operations: Vec<Operation>,
    pub diagnostics: Vec<Diagnostic>,
    pub counts: PlanCounts,
}

impl PlanResult {
    /// An empty plan means the remote has converged to the desired state.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Order raw diff output into an executable plan.
///
/// Sequencing: label creates (parents before children), label updates,
/// filter creates and updates, filter deletes, label deletes. On providers
/// without in-place filter update, each filter update is lowered to a
/// delete of the old remote filter followed by a create.
pub fn build_plan(
    provider: ProviderKind,
    capabilities: &CapabilitySet,
    desired: &DesiredState,
    raw_ops: Vec<Operation>,
    mut diagnostics: Vec<Diagnostic>,
) -> Result<PlanResult> {
    let mut label_creates = Vec::new();
    let mut label_updates = Vec::new();
    let mut filter_changes = Vec::new();
    let mut filter_deletes = Vec::new();
    let mut label_deletes = Vec::new();

    for op in raw_ops {
        match (op.payload.entity_type(), op.kind) {
            (EntityType::Label, OpKind::Create) => label_creates.push(op),
            (EntityType::Label, OpKind::Update) => label_updates.push(op),
            (EntityType::Label, OpKind::Delete) => label_deletes.push(op),
            (EntityType::Filter, OpKind::Delete) => filter_deletes.push(op),
            (EntityType::Filter, OpKind::Update) if !capabilities.filter_update => {
                // Replace-style backends: delete the stale filter, then
                // recreate it with the desired content.
                filter_changes.push(Operation {
                    kind: OpKind::Delete,
                    payload: op.payload.clone(),
                    target_id: op.target_id.clone(),
                    provider,
                });
                filter_changes.push(Operation {
                    kind: OpKind::Create,
                    payload: op.payload,
                    target_id: None,
                    provider,
                });
            }
            (EntityType::Filter, _) => filter_changes.push(op),
        }
    }

    // Parents before children so nested creates never race their ancestors.
    label_creates.sort_by_key(|op| match &op.payload {
        OperationPayload::Label(spec) => {
            (spec.path.segments().count(), spec.path.to_string())
        }
        OperationPayload::Filter(_) => (usize::MAX, String::new()),
    });

    // A label still referenced by a desired filter action must outlive this
    // plan; its delete is deferred to a later run.
    let referenced = referenced_label_names(desired)?;
    label_deletes.retain(|op| {
        let OperationPayload::Label(spec) = &op.payload else {
            return true;
        };
        let path = spec.path.to_string();
        if let Some(by) = referenced.iter().find(|(name, _)| *name == path) {
            diagnostics.push(Diagnostic::DeferredLabelDelete {
                path,
                referenced_by: by.1.clone(),
            });
            false
        } else {
            true
        }
    });

    let mut operations = label_creates;
    operations.append(&mut label_updates);
    operations.append(&mut filter_changes);
    operations.append(&mut filter_deletes);
    operations.append(&mut label_deletes);

    let mut counts = PlanCounts::default();
    for op in &operations {
        match op.kind {
            OpKind::Create => counts.creates += 1,
            OpKind::Update => counts.updates += 1,
            OpKind::Delete => counts.deletes += 1,
        }
    }

    Ok(PlanResult {
        provider,
        operations,
        diagnostics,
        counts,
    })
}

/// Label names referenced by any desired filter action, paired with the
/// signature of the first filter referencing each.
fn referenced_label_names(desired: &DesiredState) -> Result<Vec<(String, String)>> {
    let mut out: Vec<(String, String)> = Vec::new();
    for filter in &desired.filters {
        let signature = filter_signature(filter)?;
        for name in resolved_add_labels(&filter.action)?
            .into_iter()
            .chain(filter.action.remove_labels.iter().cloned())
        {
            if !out.iter().any(|(existing, _)| *existing == name) {
                out.push((name, signature.clone()));
            }
        }
    }
    Ok(out)
}
