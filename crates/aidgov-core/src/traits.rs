use crate::error::GovResult;
use crate::types::{ChangeFilter, ChangeId, EntityId, FieldValue, PendingChange, ReviewMeta};

// ---------------------------------------------------------------------------
// EntityStore: the governed records
//
// Field-addressed access to beneficiary/family records. Whether this is a
// SQL table, a REST backend or a map is invisible to the governance core.
// ---------------------------------------------------------------------------

pub trait EntityStore: Send + Sync {
    /// Current value of a field. `Ok(None)` when the field is unset on an
    /// existing entity, `NotFound` when the entity itself is unknown.
    fn read_field(&self, entity_id: &EntityId, field_name: &str) -> GovResult<Option<FieldValue>>;

    fn update_field(
        &self,
        entity_id: &EntityId,
        field_name: &str,
        value: &FieldValue,
    ) -> GovResult<()>;
}

// ---------------------------------------------------------------------------
// PendingChangeStore: proposed but unapplied changes
//
// `insert` enforces no uniqueness on (entity, field); `insert_unless_pending`
// does. Each call must be atomic.
// ---------------------------------------------------------------------------

pub trait PendingChangeStore: Send + Sync {
    fn insert(&self, change: &PendingChange) -> GovResult<()>;

    /// Insert `change` unless the same (entity, field) pair already has a
    /// pending change. The check and the write are one atomic step.
    /// Returns the blocking change when nothing was inserted.
    fn insert_unless_pending(&self, change: &PendingChange) -> GovResult<Option<PendingChange>>;

    fn get(&self, change_id: &ChangeId) -> GovResult<Option<PendingChange>>;

    /// Matching changes, newest first by `created_at`.
    fn list(&self, filter: &ChangeFilter) -> GovResult<Vec<PendingChange>>;

    /// Write a review outcome, only if the change is still `pending`.
    /// Returns `false` when no pending row with that id exists.
    fn update_status(&self, change_id: &ChangeId, review: &ReviewMeta) -> GovResult<bool>;
}
