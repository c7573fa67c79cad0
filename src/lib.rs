//! Mailkeeper - declarative mail configuration sync
//!
//! Reconciles a desired-state document (labels and filter rules in YAML)
//! against what a mail provider actually holds, then applies the minimal
//! set of creates, updates, and deletes to converge.
//!
//! ## Module Organization
//!
//! - `spec`: Desired-state document types and validation
//! - `signature`: Filter identity normalization
//! - `capability`: Per-provider capability sets and profiles
//! - `provider/`: Backend adapters (Gmail, Outlook, in-memory)
//! - `diff`: Desired-vs-remote comparison
//! - `plan`: Operation ordering and diagnostics
//! - `executor`: Retry, pacing, and already-exists recovery
//! - `orchestrator`: Plan / sync / verify / export flows
//! - `report`: JSON and text run reports
//! - `error`: Unified error types

pub mod capability;
pub mod diff;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod provider;
pub mod report;
pub mod signature;
pub mod spec;

pub use error::{Result, SyncError};
pub use executor::{AggregateStatus, ExecutionMode, ExecutorConfig, SyncResult};
pub use orchestrator::{export, to_yaml, RunState, SyncOptions, SyncRun};
pub use plan::{Diagnostic, Operation, PlanResult};
pub use provider::{
    GmailAdapter, InMemoryAdapter, OutlookAdapter, ProviderAdapter, ProviderKind,
};
pub use report::{PlanReport, SyncReport};
pub use spec::DesiredState;
