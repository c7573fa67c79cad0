//! Canonical identity computation
//!
//! A filter's identity is a normalized signature over its match criteria and
//! the resolved action destinations. Two filters with the same signature are
//! the same filter as far as reconciliation is concerned, regardless of
//! field ordering, alias spelling, or which backend they were read from.

use crate::error::{Result, SyncError};
use crate::spec::{FilterAction, FilterSpec, SizeComparison};

/// Friendly category keys and the system labels they resolve to (Gmail tab
/// categories; Outlook maps the same keys onto plain categories).
const CATEGORY_ALIASES: &[(&str, &str)] = &[
    ("promotions", "CATEGORY_PROMOTIONS"),
    ("forums", "CATEGORY_FORUMS"),
    ("updates", "CATEGORY_UPDATES"),
    ("social", "CATEGORY_SOCIAL"),
    ("personal", "CATEGORY_PERSONAL"),
];

/// Resolve a friendly category key to its system label name.
pub fn resolve_category(key: &str) -> Result<&'static str> {
    let needle = key.trim().to_ascii_lowercase();
    CATEGORY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == needle)
        .map(|(_, label)| *label)
        .ok_or_else(|| SyncError::Validation(format!("unknown category alias: {key}")))
}

/// All system labels an action's category fields expand to, deduplicated,
/// preserving first occurrence order.
pub fn expand_categories(action: &FilterAction) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |label: &str| {
        if !out.iter().any(|existing| existing == label) {
            out.push(label.to_string());
        }
    };
    if let Some(single) = &action.categorize_as {
        push(resolve_category(single)?);
    }
    for key in &action.categories {
        push(resolve_category(key)?);
    }
    Ok(out)
}

/// Effective add-label set: explicit adds plus expanded categories, sorted.
pub fn resolved_add_labels(action: &FilterAction) -> Result<Vec<String>> {
    let mut labels: Vec<String> = action.add_labels.clone();
    for label in expand_categories(action)? {
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels.sort();
    labels.dedup();
    Ok(labels)
}

/// Rewrite a filter into its canonical comparison form: category aliases
/// folded into the add set, label lists sorted and deduplicated, the
/// forward address lowercased. Two normalized filters are equal exactly
/// when reconciliation should treat them as identical content.
pub fn normalize_filter(filter: &FilterSpec) -> Result<FilterSpec> {
    let mut out = filter.clone();
    out.action.add_labels = resolved_add_labels(&filter.action)?;
    out.action.categorize_as = None;
    out.action.categories = Vec::new();
    out.action.remove_labels.sort();
    out.action.remove_labels.dedup();
    out.action.forward = filter
        .action
        .forward
        .as_deref()
        .map(|f| f.trim().to_ascii_lowercase());
    out.action.move_to_folder = filter
        .action
        .move_to_folder
        .as_deref()
        .map(|f| f.trim().to_string());
    Ok(out)
}

/// Compute the canonical signature for a filter.
///
/// Match fields are emitted in a fixed order with empty values dropped;
/// add/remove label names are sorted after category resolution; the forward
/// and move destinations close the key. The output is stable across
/// providers, which is what lets a Gmail filter and the desired entry that
/// produced it collapse to one identity.
pub fn filter_signature(filter: &FilterSpec) -> Result<String> {
    let m = &filter.matcher;
    let mut parts: Vec<String> = Vec::new();
    let mut field = |name: &str, value: Option<&str>| {
        if let Some(v) = value {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                parts.push(format!("{name}={trimmed}"));
            }
        }
    };
    field("from", m.from.as_deref());
    field("to", m.to.as_deref());
    field("subject", m.subject.as_deref());
    field("query", m.query.as_deref());
    field("negated", m.negated_query.as_deref());
    if m.has_attachment == Some(true) {
        parts.push("attachment=true".into());
    }
    if let Some(size) = m.size {
        let cmp = match m.size_comparison {
            Some(SizeComparison::Smaller) => "smaller",
            _ => "larger",
        };
        parts.push(format!("size={cmp}:{size}"));
    }

    let action = &filter.action;
    let add = resolved_add_labels(action)?;
    if !add.is_empty() {
        parts.push(format!("add={}", add.join(",")));
    }
    let mut remove = action.remove_labels.clone();
    remove.sort();
    remove.dedup();
    if !remove.is_empty() {
        parts.push(format!("remove={}", remove.join(",")));
    }
    if let Some(forward) = action.forward.as_deref() {
        parts.push(format!("forward={}", forward.trim().to_ascii_lowercase()));
    }
    if let Some(folder) = action.move_to_folder.as_deref() {
        parts.push(format!("move={}", folder.trim()));
    }
    // Flag-style sub-actions (markRead, star, neverSpam) are content, not
    // identity: changing them updates the matched filter rather than
    // creating a second one.

    Ok(parts.join("|"))
}
