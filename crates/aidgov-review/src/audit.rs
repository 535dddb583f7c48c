//! Audit events for governance transitions.
//!
//! Sinks are observers: a failing sink is logged but never rolls back or
//! fails the transition that produced the event.

use std::sync::Mutex;

use aidgov_core::{ChangeId, EntityId, IdentityId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ChangeProposed,
    DirectEditApplied,
    ChangeApproved,
    ChangeRejected,
    /// Entity mutated but the change could not be marked approved.
    ApprovalInconsistent,
    ChangeReconciled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceAuditEvent {
    pub kind: AuditEventKind,
    pub timestamp: Timestamp,
    pub entity_id: EntityId,
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<ChangeId>,
    /// Proposer for proposals and direct edits, reviewer otherwise.
    pub actor_id: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GovernanceAuditEvent {
    pub fn new(
        kind: AuditEventKind,
        entity_id: &EntityId,
        field_name: &str,
        actor_id: &IdentityId,
    ) -> Self {
        Self {
            kind,
            timestamp: Timestamp::now(),
            entity_id: entity_id.clone(),
            field_name: field_name.to_string(),
            change_id: None,
            actor_id: actor_id.clone(),
            detail: None,
        }
    }

    pub fn change(mut self, change_id: &ChangeId) -> Self {
        self.change_id = Some(change_id.clone());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ---------------------------------------------------------------------------
// AuditSink
// ---------------------------------------------------------------------------

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &GovernanceAuditEvent) -> Result<(), String>;
}

/// In-memory audit sink for testing.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<GovernanceAuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GovernanceAuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: &GovernanceAuditEvent) -> Result<(), String> {
        self.events
            .lock()
            .map_err(|_| "audit sink lock poisoned".to_string())?
            .push(event.clone());
        Ok(())
    }
}

/// Writes each event as a structured `tracing` record on the
/// `aidgov::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &GovernanceAuditEvent) -> Result<(), String> {
        let change_id = event.change_id.as_ref().map(|c| c.as_str()).unwrap_or("-");
        let detail = event.detail.as_deref().unwrap_or("");
        match event.kind {
            AuditEventKind::ApprovalInconsistent => tracing::error!(
                target: "aidgov::audit",
                kind = ?event.kind,
                entity = %event.entity_id,
                field = %event.field_name,
                change = change_id,
                actor = %event.actor_id,
                detail,
                "governance event"
            ),
            _ => tracing::info!(
                target: "aidgov::audit",
                kind = ?event.kind,
                entity = %event.entity_id,
                field = %event.field_name,
                change = change_id,
                actor = %event.actor_id,
                detail,
                "governance event"
            ),
        }
        Ok(())
    }
}
