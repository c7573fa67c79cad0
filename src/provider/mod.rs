//! Provider adapters
//!
//! One uniform CRUD surface over each remote backend's labels and filters.
//! Every adapter translates its backend's native shapes (Gmail label and
//! filter JSON, Graph categories and message rules) into the canonical spec
//! types, reclassifies transport errors as transient or permanent before
//! they escape, and answers capability queries.
//!
//! The orchestrator always calls [`ProviderAdapter::list`] before any
//! mutation; adapters may rely on that to seed name-to-id maps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::error::Result;
use crate::spec::{FilterSpec, LabelSpec};

pub mod gmail;
pub mod memory;
pub mod outlook;

pub use gmail::GmailAdapter;
pub use memory::InMemoryAdapter;
pub use outlook::OutlookAdapter;

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    Outlook,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Gmail => f.write_str("gmail"),
            ProviderKind::Outlook => f.write_str("outlook"),
        }
    }
}

/// A label as it exists on the remote, in adapter listing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLabel {
    pub id: String,
    pub spec: LabelSpec,
    /// Provider-defined system entity (INBOX, TRASH, CATEGORY_* and
    /// friends). Never the target of an update or delete operation.
    pub protected: bool,
}

/// A filter as it exists on the remote, in adapter listing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFilter {
    pub id: String,
    pub spec: FilterSpec,
}

/// Snapshot of one provider's live configuration state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub labels: Vec<RemoteLabel>,
    pub filters: Vec<RemoteFilter>,
}

/// Uniform CRUD surface over a remote backend.
///
/// Mutating calls take `&mut self` so adapters can keep their name-to-id
/// caches current as entities are created.
#[async_trait]
pub trait ProviderAdapter: Send {
    fn kind(&self) -> ProviderKind;

    /// Supported operations. Immutable for the adapter's lifetime.
    fn capabilities(&self) -> &CapabilitySet;

    /// Fetch the full remote configuration, normalized to spec types.
    async fn list(&mut self) -> Result<RemoteSnapshot>;

    async fn create_label(&mut self, spec: &LabelSpec) -> Result<String>;
    async fn update_label(&mut self, id: &str, spec: &LabelSpec) -> Result<()>;
    async fn delete_label(&mut self, id: &str) -> Result<()>;

    async fn create_filter(&mut self, spec: &FilterSpec) -> Result<String>;
    async fn update_filter(&mut self, id: &str, spec: &FilterSpec) -> Result<()>;
    async fn delete_filter(&mut self, id: &str) -> Result<()>;
}
