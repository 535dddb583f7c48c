//! aidgov Review
//!
//! Pending change lifecycle for governed fields. An edit that the policy
//! marks approval-gated becomes a pending change; an admin later approves it
//! (the entity is updated and the change closed) or rejects it with a reason.
//!
//! Key features:
//! - Edit routing: refuse, apply directly, or queue for review
//! - Conditional status writes so terminal states stick
//! - Duplicate pending change detection per entity field
//! - Reconciliation sweep for approvals interrupted between writes
//! - In-memory and SQLite stores
//! - Audit events for every transition

pub mod audit;
pub mod lifecycle;
pub mod sqlite;
pub mod store;

// Re-export primary types
pub use audit::{
    AuditEventKind, AuditSink, GovernanceAuditEvent, InMemoryAuditSink, TracingAuditSink,
};
pub use lifecycle::{
    ChangeLifecycleManager, DuplicatePolicy, EditOutcome, EditRequest, RECONCILE_REVIEWER,
};
pub use sqlite::SqliteStore;
pub use store::{InMemoryEntityStore, InMemoryPendingChangeStore};
