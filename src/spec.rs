//! Canonical desired-state model
//!
//! These types are the already-parsed form of the declarative document the
//! user edits. Raw file handling belongs to the caller; this module only
//! deserializes the mapping shape (`labels:` / `filters:`) and validates the
//! result before anything touches a remote backend.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::signature::filter_signature;

/// Hierarchical label path, e.g. `Finance/Receipts`.
///
/// Identity is the full joined path, case-sensitive. Empty segments are
/// stripped at construction so `Finance//Receipts` and `Finance/Receipts`
/// are the same label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelPath(String);

impl LabelPath {
    pub fn new(raw: &str) -> Self {
        let joined = raw
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        LabelPath(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LabelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for LabelPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for LabelPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(LabelPath::new(&raw))
    }
}

/// Whether a label shows in the provider's label list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListVisibility {
    #[serde(alias = "labelShow")]
    Show,
    #[serde(alias = "labelShowIfUnread")]
    ShowIfUnread,
    #[serde(alias = "labelHide")]
    Hide,
}

/// Whether messages carrying the label show in the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageVisibility {
    Show,
    Hide,
}

/// Color names both backends understand, with the Gmail palette hex pair
/// each resolves to. Outlook maps the same names onto category presets.
pub(crate) const NAMED_COLORS: &[(&str, &str, &str)] = &[
    ("red", "#fb4c2f", "#ffffff"),
    ("orange", "#ffad47", "#ffffff"),
    ("yellow", "#fad165", "#000000"),
    ("green", "#16a766", "#ffffff"),
    ("teal", "#2da2bb", "#ffffff"),
    ("blue", "#4a86e8", "#ffffff"),
    ("purple", "#a479e2", "#ffffff"),
    ("gray", "#999999", "#ffffff"),
];

/// Label color, either a shared color name or an explicit palette entry
/// (Gmail background/text hex pair).
///
/// Equality is canonical: `Named("blue")` equals the palette entry it
/// resolves to, so a desired named color matches the hex pair a backend
/// reports and plans converge instead of re-updating every run.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelColor {
    Named(String),
    #[serde(rename_all = "camelCase")]
    Palette {
        background: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl LabelColor {
    /// Background hex this color canonically resolves to, or the lowercased
    /// name when it is not in the shared table.
    pub fn canonical_key(&self) -> String {
        match self {
            LabelColor::Named(name) => {
                let needle = name.trim().to_ascii_lowercase();
                NAMED_COLORS
                    .iter()
                    .find(|(n, _, _)| *n == needle)
                    .map(|(_, bg, _)| bg.to_string())
                    .unwrap_or(needle)
            }
            LabelColor::Palette { background, .. } => background.trim().to_ascii_lowercase(),
        }
    }
}

impl PartialEq for LabelColor {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

/// Desired label, identity = full path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSpec {
    #[serde(alias = "name")]
    pub path: LabelPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_visibility: Option<ListVisibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_visibility: Option<MessageVisibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<LabelColor>,
}

impl LabelSpec {
    pub fn new(path: &str) -> Self {
        LabelSpec {
            path: LabelPath::new(path),
            list_visibility: None,
            message_visibility: None,
            color: None,
        }
    }
}

/// Size comparison for filter matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeComparison {
    Larger,
    Smaller,
}

/// Match half of a filter. All fields optional; at least one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negated_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_attachment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_comparison: Option<SizeComparison>,
}

impl FilterMatch {
    pub fn is_empty(&self) -> bool {
        self.from.is_none()
            && self.to.is_none()
            && self.subject.is_none()
            && self.query.is_none()
            && self.negated_query.is_none()
            && self.has_attachment.is_none()
            && self.size.is_none()
    }
}

/// Action half of a filter.
///
/// `categorize_as` / `categories` hold friendly category keys (promotions,
/// social, ...) which are resolved to system label names during signature
/// normalization and payload building.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterAction {
    #[serde(alias = "add", skip_serializing_if = "Vec::is_empty")]
    pub add_labels: Vec<String>,
    #[serde(alias = "remove", skip_serializing_if = "Vec::is_empty")]
    pub remove_labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_to_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categorize_as: Option<String>,
    #[serde(alias = "categorize", skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mark_read: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub star: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub never_spam: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub archive: bool,
}

impl FilterAction {
    /// True when no sub-action remains; such a filter would do nothing.
    pub fn is_empty(&self) -> bool {
        self.add_labels.is_empty()
            && self.remove_labels.is_empty()
            && self.forward.is_none()
            && self.move_to_folder.is_none()
            && self.categorize_as.is_none()
            && self.categories.is_empty()
            && !self.mark_read
            && !self.star
            && !self.never_spam
            && !self.archive
    }
}

/// Desired filter, identity = normalized signature over match + action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(rename = "match")]
    pub matcher: FilterMatch,
    pub action: FilterAction,
}

/// The full desired-state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredState {
    pub labels: Vec<LabelSpec>,
    pub filters: Vec<FilterSpec>,
}

impl DesiredState {
    /// Parse the declarative document from its YAML form.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let state: DesiredState = serde_yaml::from_str(raw)?;
        Ok(state)
    }

    /// Reject malformed or ambiguous desired state before any remote call.
    ///
    /// Checks, in order: empty label paths, duplicate label paths, filters
    /// with an empty match or action, unresolvable category aliases, and
    /// duplicate filter signatures after normalization.
    pub fn validate(&self) -> Result<()> {
        let mut seen_paths = HashSet::new();
        for label in &self.labels {
            if label.path.is_empty() {
                return Err(SyncError::Validation("label with empty path".into()));
            }
            if !seen_paths.insert(&label.path) {
                return Err(SyncError::Validation(format!(
                    "duplicate label path: {}",
                    label.path
                )));
            }
        }

        let mut seen_signatures = HashSet::new();
        for filter in &self.filters {
            if filter.matcher.is_empty() {
                return Err(SyncError::Validation(
                    "filter with empty match criteria".into(),
                ));
            }
            if filter.action.is_empty() {
                return Err(SyncError::Validation("filter with empty action".into()));
            }
            let signature = filter_signature(filter)?;
            if !seen_signatures.insert(signature.clone()) {
                return Err(SyncError::Validation(format!(
                    "duplicate filter signature: {signature}"
                )));
            }
        }
        Ok(())
    }

    /// Fail when a filter forwards to an address outside the verified set.
    ///
    /// Gmail rejects filters forwarding to unverified addresses at create
    /// time; checking up front keeps the failure out of the apply phase.
    pub fn check_forward_addresses(&self, verified: &HashSet<String>) -> Result<()> {
        for filter in &self.filters {
            if let Some(dest) = &filter.action.forward {
                if !verified.contains(dest) {
                    return Err(SyncError::Validation(format!(
                        "forward address not verified: {dest}"
                    )));
                }
            }
        }
        Ok(())
    }
}
