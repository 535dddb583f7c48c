//! Pending change lifecycle: propose, approve or reject, apply.
//!
//! ```text
//!            propose
//!               |
//!               v
//!   +------- pending -------+
//!   | approve               | reject (reason)
//!   v                       v
//! approved               rejected
//! ```
//!
//! Approval is two writes: the entity field first, then the change status.
//! When the second write fails the entity already holds the new value; the
//! manager reports [`GovError::Inconsistent`] and [`ChangeLifecycleManager::reconcile`]
//! closes such records later.

use std::str::FromStr;
use std::sync::Arc;

use aidgov_core::{
    ChangeFilter, ChangeId, EntityId, EntityStore, FieldValue, GovError, GovResult, IdentityId,
    PendingChange, PendingChangeStore, Proposer, ReviewMeta,
};
use aidgov_policy::{AccessDecisionEngine, EditDecision};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEventKind, AuditSink, GovernanceAuditEvent};

/// Reviewer id stamped on changes closed by [`ChangeLifecycleManager::reconcile`].
pub const RECONCILE_REVIEWER: &str = "system:reconcile";

/// What `propose` does when the same (entity, field) pair already has a
/// pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    /// Queue side by side; whichever is approved last wins.
    Allow,
}

impl DuplicatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DuplicatePolicy::Reject => "reject",
            DuplicatePolicy::Allow => "allow",
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(DuplicatePolicy::Reject),
            "allow" => Ok(DuplicatePolicy::Allow),
            other => Err(format!(
                "unknown duplicate policy '{}' (expected 'reject' or 'allow')",
                other
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Edit submission
// ---------------------------------------------------------------------------

/// One edit attempt from the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub entity_id: EntityId,
    pub field_name: String,
    pub value: FieldValue,
    pub proposer: Proposer,
    /// Whether the caller already completed OTP verification for this edit.
    pub otp_verified: bool,
}

impl EditRequest {
    pub fn new(
        entity_id: EntityId,
        field_name: impl Into<String>,
        value: FieldValue,
        proposer: Proposer,
    ) -> Self {
        Self {
            entity_id,
            field_name: field_name.into(),
            value,
            proposer,
            otp_verified: false,
        }
    }

    pub fn otp_verified(mut self, verified: bool) -> Self {
        self.otp_verified = verified;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    /// The entity was updated immediately.
    Applied,
    /// The edit is waiting for review.
    Queued(PendingChange),
}

// ---------------------------------------------------------------------------
// ChangeLifecycleManager
// ---------------------------------------------------------------------------

pub struct ChangeLifecycleManager {
    engine: AccessDecisionEngine,
    entities: Arc<dyn EntityStore>,
    changes: Arc<dyn PendingChangeStore>,
    audit: Arc<dyn AuditSink>,
    duplicate_policy: DuplicatePolicy,
}

impl ChangeLifecycleManager {
    pub fn new(
        engine: AccessDecisionEngine,
        entities: Arc<dyn EntityStore>,
        changes: Arc<dyn PendingChangeStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            engine,
            entities,
            changes,
            audit,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn engine(&self) -> &AccessDecisionEngine {
        &self.engine
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    fn record(&self, event: GovernanceAuditEvent) {
        if let Err(e) = self.audit.emit(&event) {
            warn!(kind = ?event.kind, error = %e, "audit sink rejected event");
        }
    }

    /// Queue a change for review.
    ///
    /// `current_value` is a snapshot for the reviewer; it is not compared
    /// against anything.
    pub fn propose(
        &self,
        entity_id: &EntityId,
        field_name: &str,
        current_value: Option<FieldValue>,
        proposed_value: FieldValue,
        proposer: &Proposer,
    ) -> GovResult<PendingChange> {
        if entity_id.as_str().trim().is_empty() {
            return Err(GovError::Validation("entity id must not be empty".into()));
        }
        if field_name.trim().is_empty() {
            return Err(GovError::Validation("field name must not be empty".into()));
        }

        let change = PendingChange::new(
            entity_id.clone(),
            field_name,
            current_value,
            proposed_value,
            proposer,
        );
        match self.duplicate_policy {
            DuplicatePolicy::Allow => self.changes.insert(&change)?,
            DuplicatePolicy::Reject => {
                if let Some(existing) = self.changes.insert_unless_pending(&change)? {
                    warn!(
                        entity = %entity_id,
                        field = field_name,
                        existing = %existing.id,
                        "refusing duplicate pending change"
                    );
                    return Err(GovError::Conflict(format!(
                        "change '{}' is already pending for {}.{}",
                        existing.id, entity_id, field_name
                    )));
                }
            }
        }

        info!(
            change = %change.id,
            entity = %entity_id,
            field = field_name,
            proposer = %proposer.id,
            actor_type = %proposer.actor_type,
            "change proposed"
        );
        self.record(
            GovernanceAuditEvent::new(
                AuditEventKind::ChangeProposed,
                entity_id,
                field_name,
                &proposer.id,
            )
            .change(&change.id),
        );
        Ok(change)
    }

    fn get_pending(&self, change_id: &ChangeId) -> GovResult<PendingChange> {
        match self.changes.get(change_id)? {
            Some(change) if change.is_pending() => Ok(change),
            Some(change) => Err(GovError::NotFound(format!(
                "change '{}' is already {}",
                change_id, change.status
            ))),
            None => Err(GovError::NotFound(format!("change '{}'", change_id))),
        }
    }

    /// Apply a pending change to its entity and close it as approved.
    pub fn approve(
        &self,
        change_id: &ChangeId,
        reviewer_id: &IdentityId,
    ) -> GovResult<PendingChange> {
        let change = self.get_pending(change_id)?;

        self.entities
            .update_field(&change.entity_id, &change.field_name, &change.proposed_value)
            .map_err(|e| {
                warn!(change = %change_id, error = %e, "approval could not be applied");
                GovError::Apply(format!(
                    "{}.{}: {}",
                    change.entity_id, change.field_name, e
                ))
            })?;

        let review = ReviewMeta::approved(reviewer_id.clone());
        let failure = match self.changes.update_status(change_id, &review) {
            Ok(true) => None,
            Ok(false) => Some("change left pending state before it could be closed".to_string()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            error!(
                change = %change_id,
                entity = %change.entity_id,
                field = %change.field_name,
                reviewer = %reviewer_id,
                reason = %reason,
                "entity updated but change status was not recorded"
            );
            self.record(
                GovernanceAuditEvent::new(
                    AuditEventKind::ApprovalInconsistent,
                    &change.entity_id,
                    &change.field_name,
                    reviewer_id,
                )
                .change(change_id)
                .detail(reason.clone()),
            );
            return Err(GovError::Inconsistent(format!(
                "change '{}' applied to {}.{} but not marked approved: {}",
                change_id, change.entity_id, change.field_name, reason
            )));
        }

        info!(
            change = %change_id,
            entity = %change.entity_id,
            field = %change.field_name,
            reviewer = %reviewer_id,
            "change approved"
        );
        self.record(
            GovernanceAuditEvent::new(
                AuditEventKind::ChangeApproved,
                &change.entity_id,
                &change.field_name,
                reviewer_id,
            )
            .change(change_id),
        );
        Ok(change.with_review(&review))
    }

    /// Close a pending change without touching the entity.
    pub fn reject(
        &self,
        change_id: &ChangeId,
        reviewer_id: &IdentityId,
        reason: &str,
    ) -> GovResult<PendingChange> {
        let reason = reason.trim();
        if reason.is_empty() {
            warn!(change = %change_id, "rejection without a reason refused");
            return Err(GovError::Validation(
                "rejection reason must not be empty".into(),
            ));
        }

        let change = self.get_pending(change_id)?;
        let review = ReviewMeta::rejected(reviewer_id.clone(), reason);
        if !self.changes.update_status(change_id, &review)? {
            return Err(GovError::NotFound(format!(
                "change '{}' is no longer pending",
                change_id
            )));
        }

        info!(
            change = %change_id,
            entity = %change.entity_id,
            field = %change.field_name,
            reviewer = %reviewer_id,
            "change rejected"
        );
        self.record(
            GovernanceAuditEvent::new(
                AuditEventKind::ChangeRejected,
                &change.entity_id,
                &change.field_name,
                reviewer_id,
            )
            .change(change_id)
            .detail(reason),
        );
        Ok(change.with_review(&review))
    }

    /// Pending changes, newest first, optionally for one entity.
    pub fn list_pending(&self, entity_id: Option<&EntityId>) -> GovResult<Vec<PendingChange>> {
        let mut filter = ChangeFilter::pending();
        if let Some(id) = entity_id {
            filter = filter.for_entity(id.clone());
        }
        self.changes.list(&filter)
    }

    /// A change in any status.
    pub fn get(&self, change_id: &ChangeId) -> GovResult<PendingChange> {
        self.changes
            .get(change_id)?
            .ok_or_else(|| GovError::NotFound(format!("change '{}'", change_id)))
    }

    /// Every change recorded for an entity, newest first.
    pub fn history(
        &self,
        entity_id: &EntityId,
        field_name: Option<&str>,
    ) -> GovResult<Vec<PendingChange>> {
        let mut filter = ChangeFilter::default().for_entity(entity_id.clone());
        if let Some(field) = field_name {
            filter = filter.for_field(field);
        }
        self.changes.list(&filter)
    }

    /// Route an edit attempt: refuse it, apply it, or queue it for review.
    pub fn submit_edit(&self, request: EditRequest) -> GovResult<EditOutcome> {
        let EditRequest {
            entity_id,
            field_name,
            value,
            proposer,
            otp_verified,
        } = request;

        let decision = self.engine.decide(&field_name, proposer.actor_type);
        debug!(
            entity = %entity_id,
            field = %field_name,
            actor_type = %proposer.actor_type,
            ?decision,
            "edit decision"
        );

        if decision.requires_otp() && !otp_verified {
            return Err(GovError::OtpRequired(field_name));
        }

        match decision {
            EditDecision::Forbidden => {
                warn!(
                    entity = %entity_id,
                    field = %field_name,
                    actor_type = %proposer.actor_type,
                    proposer = %proposer.id,
                    "edit refused"
                );
                Err(GovError::Forbidden {
                    field_name,
                    actor_type: proposer.actor_type.as_str().to_string(),
                })
            }
            EditDecision::ApplyDirectly { .. } => {
                self.entities.update_field(&entity_id, &field_name, &value)?;
                info!(
                    entity = %entity_id,
                    field = %field_name,
                    proposer = %proposer.id,
                    "direct edit applied"
                );
                self.record(GovernanceAuditEvent::new(
                    AuditEventKind::DirectEditApplied,
                    &entity_id,
                    &field_name,
                    &proposer.id,
                ));
                Ok(EditOutcome::Applied)
            }
            EditDecision::RequiresApproval { .. } => {
                let current = self.entities.read_field(&entity_id, &field_name)?;
                let change = self.propose(&entity_id, &field_name, current, value, &proposer)?;
                Ok(EditOutcome::Queued(change))
            }
        }
    }

    /// Close pending changes whose proposed value is already live.
    ///
    /// Covers approvals that applied the entity update but failed to record
    /// the status. Entities that cannot be read are skipped.
    pub fn reconcile(&self) -> GovResult<Vec<PendingChange>> {
        let reviewer = IdentityId::new(RECONCILE_REVIEWER);
        let mut closed = Vec::new();

        for change in self.changes.list(&ChangeFilter::pending())? {
            let live = match self.entities.read_field(&change.entity_id, &change.field_name) {
                Ok(live) => live,
                Err(e) => {
                    warn!(change = %change.id, error = %e, "reconcile skipped unreadable entity");
                    continue;
                }
            };
            if live.as_ref() != Some(&change.proposed_value) {
                continue;
            }

            let review = ReviewMeta::approved(reviewer.clone());
            if !self.changes.update_status(&change.id, &review)? {
                continue;
            }
            info!(
                change = %change.id,
                entity = %change.entity_id,
                field = %change.field_name,
                "pending change reconciled"
            );
            self.record(
                GovernanceAuditEvent::new(
                    AuditEventKind::ChangeReconciled,
                    &change.entity_id,
                    &change.field_name,
                    &reviewer,
                )
                .change(&change.id),
            );
            closed.push(change.with_review(&review));
        }

        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::store::{InMemoryEntityStore, InMemoryPendingChangeStore};
    use aidgov_core::{ActorType, ChangeStatus};
    use aidgov_policy::PolicyRegistry;
    use serde_json::json;
    use std::sync::Barrier;

    struct Harness {
        manager: ChangeLifecycleManager,
        entities: Arc<InMemoryEntityStore>,
        changes: Arc<InMemoryPendingChangeStore>,
        audit: Arc<InMemoryAuditSink>,
    }

    fn harness() -> Harness {
        let entities = Arc::new(InMemoryEntityStore::new());
        entities
            .insert_entity(
                EntityId::new("ben-1"),
                [
                    ("address".to_string(), json!("Khan Younis")),
                    ("full_name".to_string(), json!("Ahmad Saleh")),
                ],
            )
            .unwrap();
        let changes = Arc::new(InMemoryPendingChangeStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let engine = AccessDecisionEngine::new(Arc::new(PolicyRegistry::builtin()));
        let manager = ChangeLifecycleManager::new(
            engine,
            entities.clone(),
            changes.clone(),
            audit.clone(),
        );
        Harness {
            manager,
            entities,
            changes,
            audit,
        }
    }

    fn family() -> Proposer {
        Proposer::new(ActorType::Family, "fam-7", "Saleh family")
    }

    fn ben1() -> EntityId {
        EntityId::new("ben-1")
    }

    fn propose_address(h: &Harness) -> PendingChange {
        h.manager
            .propose(
                &ben1(),
                "address",
                Some(json!("Khan Younis")),
                json!("Gaza - Rafah"),
                &family(),
            )
            .unwrap()
    }

    /// Entity store whose writes always fail.
    struct ReadOnlyEntities(InMemoryEntityStore);

    impl EntityStore for ReadOnlyEntities {
        fn read_field(&self, entity_id: &EntityId, field_name: &str) -> GovResult<Option<FieldValue>> {
            self.0.read_field(entity_id, field_name)
        }

        fn update_field(&self, _: &EntityId, _: &str, _: &FieldValue) -> GovResult<()> {
            Err(GovError::Persistence("backend unavailable".into()))
        }
    }

    /// Change store whose status writes always fail.
    struct StuckStatus(Arc<InMemoryPendingChangeStore>);

    impl PendingChangeStore for StuckStatus {
        fn insert(&self, change: &PendingChange) -> GovResult<()> {
            self.0.insert(change)
        }

        fn insert_unless_pending(&self, change: &PendingChange) -> GovResult<Option<PendingChange>> {
            self.0.insert_unless_pending(change)
        }

        fn get(&self, change_id: &ChangeId) -> GovResult<Option<PendingChange>> {
            self.0.get(change_id)
        }

        fn list(&self, filter: &ChangeFilter) -> GovResult<Vec<PendingChange>> {
            self.0.list(filter)
        }

        fn update_status(&self, _: &ChangeId, _: &ReviewMeta) -> GovResult<bool> {
            Err(GovError::Persistence("disk full".into()))
        }
    }

    /// Change store that refuses every write.
    struct BrokenInsert;

    impl PendingChangeStore for BrokenInsert {
        fn insert(&self, _: &PendingChange) -> GovResult<()> {
            Err(GovError::Persistence("connection reset".into()))
        }

        fn insert_unless_pending(&self, _: &PendingChange) -> GovResult<Option<PendingChange>> {
            Err(GovError::Persistence("connection reset".into()))
        }

        fn get(&self, _: &ChangeId) -> GovResult<Option<PendingChange>> {
            Ok(None)
        }

        fn list(&self, _: &ChangeFilter) -> GovResult<Vec<PendingChange>> {
            Ok(Vec::new())
        }

        fn update_status(&self, _: &ChangeId, _: &ReviewMeta) -> GovResult<bool> {
            Ok(false)
        }
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn emit(&self, _: &GovernanceAuditEvent) -> Result<(), String> {
            Err("sink offline".into())
        }
    }

    #[test]
    fn test_propose_creates_pending_with_snapshot() {
        let h = harness();
        let change = propose_address(&h);

        assert_eq!(change.status, ChangeStatus::Pending);
        assert_eq!(change.current_value, Some(json!("Khan Younis")));
        assert_eq!(change.proposed_value, json!("Gaza - Rafah"));
        assert_eq!(change.proposed_by_type, ActorType::Family);
        assert_eq!(change.proposed_by_id.as_str(), "fam-7");
        assert!(change.reviewed_at.is_none());
        assert_eq!(h.changes.get(&change.id).unwrap(), Some(change.clone()));
        // Entity untouched until approval.
        assert_eq!(
            h.entities.read_field(&ben1(), "address").unwrap(),
            Some(json!("Khan Younis"))
        );
        assert_eq!(h.audit.kinds(), vec![AuditEventKind::ChangeProposed]);
    }

    #[test]
    fn test_propose_validates_inputs() {
        let h = harness();
        let err = h
            .manager
            .propose(&EntityId::new(" "), "address", None, json!("x"), &family())
            .unwrap_err();
        assert!(matches!(err, GovError::Validation(_)));
        let err = h
            .manager
            .propose(&ben1(), "", None, json!("x"), &family())
            .unwrap_err();
        assert!(matches!(err, GovError::Validation(_)));
        assert_eq!(h.changes.count(), 0);
    }

    #[test]
    fn test_propose_surfaces_store_failure() {
        let manager = ChangeLifecycleManager::new(
            AccessDecisionEngine::new(Arc::new(PolicyRegistry::builtin())),
            Arc::new(InMemoryEntityStore::new()),
            Arc::new(BrokenInsert),
            Arc::new(InMemoryAuditSink::new()),
        );
        let err = manager
            .propose(&ben1(), "address", None, json!("x"), &family())
            .unwrap_err();
        assert!(matches!(err, GovError::Persistence(_)));
    }

    #[test]
    fn test_duplicate_pending_rejected_by_default() {
        let h = harness();
        let first = propose_address(&h);
        let err = h
            .manager
            .propose(&ben1(), "address", None, json!("Jabalia"), &family())
            .unwrap_err();
        assert!(matches!(err, GovError::Conflict(ref m) if m.contains(first.id.as_str())));
        assert_eq!(h.changes.count(), 1);

        // A different field on the same entity is fine.
        h.manager
            .propose(&ben1(), "members_count", None, json!(6), &family())
            .unwrap();
    }

    #[test]
    fn test_concurrent_proposals_leave_one_pending() {
        let h = harness();
        let barrier = Barrier::new(8);

        let results: Vec<GovResult<PendingChange>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let manager = &h.manager;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        manager.propose(
                            &ben1(),
                            "address",
                            None,
                            json!(format!("Rafah block {}", i)),
                            &family(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, GovError::Conflict(_))));
        assert_eq!(h.changes.count(), 1);
        assert_eq!(h.manager.list_pending(Some(&ben1())).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_pending_allowed_when_configured() {
        let h = harness();
        let manager = h.manager.with_duplicate_policy(DuplicatePolicy::Allow);
        for value in ["Gaza - Rafah", "Jabalia"] {
            manager
                .propose(&ben1(), "address", None, json!(value), &family())
                .unwrap();
        }
        assert_eq!(manager.list_pending(Some(&ben1())).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_allowed_after_review() {
        let h = harness();
        let first = propose_address(&h);
        h.manager
            .reject(&first.id, &IdentityId::new("admin-1"), "wrong district")
            .unwrap();
        assert!(h
            .manager
            .propose(&ben1(), "address", None, json!("Jabalia"), &family())
            .is_ok());
    }

    #[test]
    fn test_approve_applies_and_closes() {
        let h = harness();
        let change = propose_address(&h);
        let admin = IdentityId::new("admin-1");

        let approved = h.manager.approve(&change.id, &admin).unwrap();
        assert_eq!(approved.status, ChangeStatus::Approved);
        assert_eq!(approved.reviewed_by_id, Some(admin.clone()));
        assert!(approved.reviewed_at.is_some());
        assert!(approved.rejection_reason.is_none());

        assert_eq!(
            h.entities.read_field(&ben1(), "address").unwrap(),
            Some(json!("Gaza - Rafah"))
        );
        let stored = h.manager.get(&change.id).unwrap();
        assert_eq!(stored.status, ChangeStatus::Approved);
        assert_eq!(stored.reviewed_by_id, Some(admin));
        assert!(h.manager.list_pending(None).unwrap().is_empty());
        assert_eq!(
            h.audit.kinds(),
            vec![AuditEventKind::ChangeProposed, AuditEventKind::ChangeApproved]
        );
    }

    #[test]
    fn test_approve_non_pending_is_not_found() {
        let h = harness();
        let change = propose_address(&h);
        let admin = IdentityId::new("admin-1");
        h.manager.approve(&change.id, &admin).unwrap();
        h.entities
            .update_field(&ben1(), "address", &json!("Beit Lahia"))
            .unwrap();

        let err = h.manager.approve(&change.id, &admin).unwrap_err();
        assert!(matches!(err, GovError::NotFound(_)));
        // Second approval must not re-apply the value.
        assert_eq!(
            h.entities.read_field(&ben1(), "address").unwrap(),
            Some(json!("Beit Lahia"))
        );

        let err = h
            .manager
            .approve(&ChangeId::new("missing"), &admin)
            .unwrap_err();
        assert!(matches!(err, GovError::NotFound(_)));
    }

    #[test]
    fn test_approve_apply_failure_keeps_pending() {
        let entities = InMemoryEntityStore::new();
        entities
            .insert_entity(ben1(), [("address".to_string(), json!("Khan Younis"))])
            .unwrap();
        let changes = Arc::new(InMemoryPendingChangeStore::new());
        let manager = ChangeLifecycleManager::new(
            AccessDecisionEngine::new(Arc::new(PolicyRegistry::builtin())),
            Arc::new(ReadOnlyEntities(entities)),
            changes.clone(),
            Arc::new(InMemoryAuditSink::new()),
        );
        let change = manager
            .propose(&ben1(), "address", None, json!("Gaza - Rafah"), &family())
            .unwrap();

        let err = manager
            .approve(&change.id, &IdentityId::new("admin-1"))
            .unwrap_err();
        assert!(matches!(err, GovError::Apply(_)));
        assert_eq!(
            changes.get(&change.id).unwrap().unwrap().status,
            ChangeStatus::Pending
        );
    }

    #[test]
    fn test_approve_status_failure_is_inconsistent_then_reconciled() {
        let entities = Arc::new(InMemoryEntityStore::new());
        entities
            .insert_entity(ben1(), [("address".to_string(), json!("Khan Younis"))])
            .unwrap();
        let inner = Arc::new(InMemoryPendingChangeStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let manager = ChangeLifecycleManager::new(
            AccessDecisionEngine::new(Arc::new(PolicyRegistry::builtin())),
            entities.clone(),
            Arc::new(StuckStatus(inner.clone())),
            audit.clone(),
        );
        let change = manager
            .propose(&ben1(), "address", None, json!("Gaza - Rafah"), &family())
            .unwrap();

        let err = manager
            .approve(&change.id, &IdentityId::new("admin-1"))
            .unwrap_err();
        assert!(matches!(err, GovError::Inconsistent(_)));
        assert_eq!(
            entities.read_field(&ben1(), "address").unwrap(),
            Some(json!("Gaza - Rafah"))
        );
        assert_eq!(inner.get(&change.id).unwrap().unwrap().status, ChangeStatus::Pending);
        assert_eq!(
            audit.kinds(),
            vec![
                AuditEventKind::ChangeProposed,
                AuditEventKind::ApprovalInconsistent
            ]
        );

        // Once storage recovers the sweep closes the stuck record.
        let healthy = ChangeLifecycleManager::new(
            AccessDecisionEngine::new(Arc::new(PolicyRegistry::builtin())),
            entities,
            inner,
            audit,
        );
        let closed = healthy.reconcile().unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, change.id);
        assert_eq!(closed[0].status, ChangeStatus::Approved);
        assert_eq!(
            closed[0].reviewed_by_id.as_ref().map(|r| r.as_str()),
            Some(RECONCILE_REVIEWER)
        );
    }

    #[test]
    fn test_reject_requires_reason() {
        let h = harness();
        let change = propose_address(&h);
        let admin = IdentityId::new("admin-1");

        for reason in ["", "   \t"] {
            let err = h.manager.reject(&change.id, &admin, reason).unwrap_err();
            assert!(matches!(err, GovError::Validation(_)));
        }
        let stored = h.manager.get(&change.id).unwrap();
        assert_eq!(stored.status, ChangeStatus::Pending);
        assert!(stored.rejection_reason.is_none());
        assert!(stored.reviewed_by_id.is_none());
    }

    #[test]
    fn test_reject_records_trimmed_reason() {
        let h = harness();
        let change = propose_address(&h);
        let rejected = h
            .manager
            .reject(&change.id, &IdentityId::new("admin-2"), "  no proof of residence ")
            .unwrap();
        assert_eq!(rejected.status, ChangeStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("no proof of residence"));

        // Entity untouched, terminal state sticks.
        assert_eq!(
            h.entities.read_field(&ben1(), "address").unwrap(),
            Some(json!("Khan Younis"))
        );
        let err = h
            .manager
            .approve(&change.id, &IdentityId::new("admin-1"))
            .unwrap_err();
        assert!(matches!(err, GovError::NotFound(_)));
        let err = h
            .manager
            .reject(&change.id, &IdentityId::new("admin-1"), "again")
            .unwrap_err();
        assert!(matches!(err, GovError::NotFound(_)));
        assert_eq!(
            h.audit.kinds(),
            vec![AuditEventKind::ChangeProposed, AuditEventKind::ChangeRejected]
        );
    }

    #[test]
    fn test_list_pending_and_history() {
        let h = harness();
        h.entities.insert_entity(EntityId::new("ben-2"), Vec::<(String, FieldValue)>::new()).unwrap();
        let a = propose_address(&h);
        let b = h
            .manager
            .propose(&EntityId::new("ben-2"), "phone", None, json!("0599111222"), &family())
            .unwrap();
        h.manager
            .reject(&a.id, &IdentityId::new("admin-1"), "duplicate")
            .unwrap();

        let pending = h.manager.list_pending(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
        assert!(h.manager.list_pending(Some(&ben1())).unwrap().is_empty());

        let history = h.manager.history(&ben1(), Some("address")).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ChangeStatus::Rejected);
        assert!(h.manager.history(&ben1(), Some("phone")).unwrap().is_empty());
    }

    #[test]
    fn test_submit_edit_forbidden() {
        let h = harness();
        let org = Proposer::new(ActorType::Organization, "org-1", "Relief Org");
        let err = h
            .manager
            .submit_edit(EditRequest::new(ben1(), "national_id", json!("400000000"), org))
            .unwrap_err();
        assert_eq!(
            err,
            GovError::Forbidden {
                field_name: "national_id".into(),
                actor_type: "organization".into(),
            }
        );
        assert_eq!(h.changes.count(), 0);
        assert!(h.audit.events().is_empty());
    }

    #[test]
    fn test_submit_edit_direct() {
        let h = harness();
        let beneficiary = Proposer::new(ActorType::Beneficiary, "ben-1", "Ahmad Saleh");
        let outcome = h
            .manager
            .submit_edit(EditRequest::new(ben1(), "notes", json!("needs insulin"), beneficiary))
            .unwrap();
        assert_eq!(outcome, EditOutcome::Applied);
        assert_eq!(
            h.entities.read_field(&ben1(), "notes").unwrap(),
            Some(json!("needs insulin"))
        );
        assert_eq!(h.audit.kinds(), vec![AuditEventKind::DirectEditApplied]);
    }

    #[test]
    fn test_submit_edit_queues_with_snapshot() {
        let h = harness();
        let outcome = h
            .manager
            .submit_edit(EditRequest::new(ben1(), "address", json!("Gaza - Rafah"), family()))
            .unwrap();
        let EditOutcome::Queued(change) = outcome else {
            panic!("expected queued outcome");
        };
        assert_eq!(change.current_value, Some(json!("Khan Younis")));
        assert_eq!(
            h.entities.read_field(&ben1(), "address").unwrap(),
            Some(json!("Khan Younis"))
        );
    }

    #[test]
    fn test_submit_edit_otp_gate() {
        let h = harness();
        let beneficiary = Proposer::new(ActorType::Beneficiary, "ben-1", "Ahmad Saleh");

        let request = EditRequest::new(ben1(), "alternative_phone", json!("0597000000"), beneficiary);
        let err = h.manager.submit_edit(request.clone()).unwrap_err();
        assert_eq!(err, GovError::OtpRequired("alternative_phone".into()));

        let outcome = h.manager.submit_edit(request.otp_verified(true)).unwrap();
        assert_eq!(outcome, EditOutcome::Applied);

        // phone needs both OTP and approval.
        let outcome = h
            .manager
            .submit_edit(
                EditRequest::new(ben1(), "phone", json!("0599000000"), family()).otp_verified(true),
            )
            .unwrap();
        assert!(matches!(outcome, EditOutcome::Queued(_)));
    }

    #[test]
    fn test_submit_edit_admin_bypass() {
        let h = harness();
        let admin = Proposer::new(ActorType::Admin, "admin-1", "Field Admin");
        let outcome = h
            .manager
            .submit_edit(EditRequest::new(ben1(), "address", json!("Jabalia"), admin.clone()))
            .unwrap();
        assert_eq!(outcome, EditOutcome::Applied);

        let strict = ChangeLifecycleManager::new(
            AccessDecisionEngine::new(Arc::new(PolicyRegistry::builtin())).with_admin_bypass(false),
            h.entities.clone(),
            h.changes.clone(),
            h.audit.clone(),
        );
        let outcome = strict
            .submit_edit(EditRequest::new(ben1(), "address", json!("Rafah"), admin))
            .unwrap();
        assert!(matches!(outcome, EditOutcome::Queued(_)));
    }

    #[test]
    fn test_submit_edit_unknown_entity() {
        let h = harness();
        let err = h
            .manager
            .submit_edit(EditRequest::new(
                EntityId::new("ghost"),
                "address",
                json!("x"),
                family(),
            ))
            .unwrap_err();
        assert!(matches!(err, GovError::NotFound(_)));
        assert_eq!(h.changes.count(), 0);
    }

    #[test]
    fn test_reconcile_only_closes_matching() {
        let h = harness();
        let manager = h.manager.with_duplicate_policy(DuplicatePolicy::Allow);
        let live = manager
            .propose(&ben1(), "full_name", None, json!("Ahmad Saleh"), &family())
            .unwrap();
        let other = manager
            .propose(&ben1(), "address", None, json!("Jabalia"), &family())
            .unwrap();

        let closed = manager.reconcile().unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, live.id);
        assert_eq!(manager.get(&other.id).unwrap().status, ChangeStatus::Pending);
        assert!(manager.reconcile().unwrap().is_empty());
    }

    #[test]
    fn test_audit_failure_does_not_fail_operation() {
        let entities = Arc::new(InMemoryEntityStore::new());
        entities
            .insert_entity(ben1(), Vec::<(String, FieldValue)>::new())
            .unwrap();
        let manager = ChangeLifecycleManager::new(
            AccessDecisionEngine::new(Arc::new(PolicyRegistry::builtin())),
            entities,
            Arc::new(InMemoryPendingChangeStore::new()),
            Arc::new(FailingSink),
        );
        let change = manager
            .propose(&ben1(), "address", None, json!("Gaza - Rafah"), &family())
            .unwrap();
        assert!(manager.approve(&change.id, &IdentityId::new("admin-1")).is_ok());
    }

    #[test]
    fn test_duplicate_policy_parse() {
        assert_eq!("reject".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
        assert_eq!(" Allow ".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Allow));
        assert!("merge".parse::<DuplicatePolicy>().is_err());
        assert_eq!(DuplicatePolicy::default(), DuplicatePolicy::Reject);
    }
}
