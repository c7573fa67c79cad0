//! In-memory provider adapter
//!
//! Backs the test suite and offline planning. Behaves like the real
//! backends where it matters for reconciliation: listing order is stable,
//! duplicate creates are rejected with an already-exists signal, and
//! injected failures surface exactly like classified transport errors.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::capability::CapabilitySet;
use crate::error::{Result, SyncError};
use crate::provider::{
    ProviderAdapter, ProviderKind, RemoteFilter, RemoteLabel, RemoteSnapshot,
};
use crate::spec::{FilterSpec, LabelSpec};

pub struct InMemoryAdapter {
    kind: ProviderKind,
    capabilities: CapabilitySet,
    labels: Vec<RemoteLabel>,
    filters: Vec<RemoteFilter>,
    next_id: u64,
    injected_failures: VecDeque<Option<SyncError>>,
    calls: u64,
}

impl InMemoryAdapter {
    pub fn new(kind: ProviderKind, capabilities: CapabilitySet) -> Self {
        InMemoryAdapter {
            kind,
            capabilities,
            labels: Vec::new(),
            filters: Vec::new(),
            next_id: 1,
            injected_failures: VecDeque::new(),
            calls: 0,
        }
    }

    /// Queue an error; the next adapter call consumes and returns it.
    pub fn fail_next(&mut self, error: SyncError) {
        self.injected_failures.push_back(Some(error));
    }

    /// Let the next adapter call through unharmed. Used to schedule an
    /// injected failure past an expected listing.
    pub fn pass_next(&mut self) {
        self.injected_failures.push_back(None);
    }

    pub fn seed_label(&mut self, path: &str, protected: bool) -> String {
        self.seed_label_spec(LabelSpec::new(path), protected)
    }

    pub fn seed_label_spec(&mut self, spec: LabelSpec, protected: bool) -> String {
        let id = self.mint_id("L");
        self.labels.push(RemoteLabel {
            id: id.clone(),
            spec,
            protected,
        });
        id
    }

    pub fn seed_filter(&mut self, spec: FilterSpec) -> String {
        let id = self.mint_id("F");
        self.filters.push(RemoteFilter {
            id: id.clone(),
            spec,
        });
        id
    }

    pub fn labels(&self) -> &[RemoteLabel] {
        &self.labels
    }

    pub fn filters(&self) -> &[RemoteFilter] {
        &self.filters
    }

    /// Total adapter calls made, including listings.
    pub fn call_count(&self) -> u64 {
        self.calls
    }

    fn mint_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn enter(&mut self) -> Result<()> {
        self.calls += 1;
        match self.injected_failures.pop_front() {
            Some(Some(error)) => Err(error),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for InMemoryAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn list(&mut self) -> Result<RemoteSnapshot> {
        self.enter()?;
        Ok(RemoteSnapshot {
            labels: self.labels.clone(),
            filters: self.filters.clone(),
        })
    }

    async fn create_label(&mut self, spec: &LabelSpec) -> Result<String> {
        self.enter()?;
        if self.labels.iter().any(|l| l.spec.path == spec.path) {
            return Err(SyncError::AlreadyExists(spec.path.to_string()));
        }
        let id = self.mint_id("L");
        self.labels.push(RemoteLabel {
            id: id.clone(),
            spec: spec.clone(),
            protected: false,
        });
        Ok(id)
    }

    async fn update_label(&mut self, id: &str, spec: &LabelSpec) -> Result<()> {
        self.enter()?;
        let label = self
            .labels
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| SyncError::Permanent(format!("no such label: {id}")))?;
        label.spec = spec.clone();
        Ok(())
    }

    async fn delete_label(&mut self, id: &str) -> Result<()> {
        self.enter()?;
        let before = self.labels.len();
        self.labels.retain(|l| l.id != id);
        if self.labels.len() == before {
            return Err(SyncError::Permanent(format!("no such label: {id}")));
        }
        Ok(())
    }

    async fn create_filter(&mut self, spec: &FilterSpec) -> Result<String> {
        self.enter()?;
        let id = self.mint_id("F");
        self.filters.push(RemoteFilter {
            id: id.clone(),
            spec: spec.clone(),
        });
        Ok(id)
    }

    async fn update_filter(&mut self, id: &str, spec: &FilterSpec) -> Result<()> {
        self.enter()?;
        if !self.capabilities.filter_update {
            return Err(SyncError::Permanent(
                "provider does not support filter update".into(),
            ));
        }
        let filter = self
            .filters
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| SyncError::Permanent(format!("no such filter: {id}")))?;
        filter.spec = spec.clone();
        Ok(())
    }

    async fn delete_filter(&mut self, id: &str) -> Result<()> {
        self.enter()?;
        let before = self.filters.len();
        self.filters.retain(|f| f.id != id);
        if self.filters.len() == before {
            return Err(SyncError::Permanent(format!("no such filter: {id}")));
        }
        Ok(())
    }
}
