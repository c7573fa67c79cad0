//! Provider capability modelling
//!
//! Each backend supports a different slice of the declarative surface.
//! Capabilities are queried during planning so unsupported sub-actions turn
//! into diagnostics before any remote call, instead of failing mid-apply.

use serde::{Deserialize, Serialize};

/// Fixed set of operations a provider supports. Immutable for the lifetime
/// of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Labels carry explicit colors (palette or preset).
    pub label_colors: bool,
    /// Labels carry list/message visibility flags.
    pub visibility_flags: bool,
    /// Filter actions may remove labels, not only add them.
    pub remove_label_action: bool,
    /// Filter actions may forward to an external address.
    pub forward_action: bool,
    /// Filter actions may assign tab categories.
    pub categorize_action: bool,
    /// Filter actions may move the message to a folder.
    pub move_to_folder_action: bool,
    /// Match criteria may include free-text queries (query / negatedQuery).
    pub query_match: bool,
    /// Match criteria may include message size thresholds.
    pub size_match: bool,
    /// Existing filters can be updated in place. Without this, a changed
    /// filter is replaced by delete + create.
    pub filter_update: bool,
}

impl CapabilitySet {
    /// Everything on; useful for in-memory test providers.
    pub fn full() -> Self {
        CapabilitySet {
            label_colors: true,
            visibility_flags: true,
            remove_label_action: true,
            forward_action: true,
            categorize_action: true,
            move_to_folder_action: true,
            query_match: true,
            size_match: true,
            filter_update: true,
        }
    }
}

/// Known capability profiles for the two supported backends.
pub mod profiles {
    use super::CapabilitySet;

    /// Gmail: full label surface; filters are immutable objects (replace =
    /// delete + create) and cannot move messages to folders.
    pub fn gmail() -> CapabilitySet {
        CapabilitySet {
            label_colors: true,
            visibility_flags: true,
            remove_label_action: true,
            forward_action: true,
            categorize_action: true,
            move_to_folder_action: false,
            query_match: true,
            size_match: true,
            filter_update: false,
        }
    }

    /// Outlook via Microsoft Graph v1.0: categories have preset colors but
    /// no visibility flags; message rules are additive (no label removal),
    /// cannot forward, match only on sender/recipient/subject/attachment
    /// (no free-text query or size criteria), but can move to folders and
    /// be patched in place.
    pub fn outlook() -> CapabilitySet {
        CapabilitySet {
            label_colors: true,
            visibility_flags: false,
            remove_label_action: false,
            forward_action: false,
            categorize_action: false,
            move_to_folder_action: true,
            query_match: false,
            size_match: false,
            filter_update: true,
        }
    }
}
