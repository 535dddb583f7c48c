use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use aidgov_core::{
    ChangeFilter, ChangeId, EntityId, EntityStore, FieldValue, GovError, GovResult,
    PendingChange, PendingChangeStore, ReviewMeta,
};

fn lock<T>(mutex: &Mutex<T>) -> GovResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| GovError::Persistence(format!("lock poisoned: {}", e)))
}

// ---------------------------------------------------------------------------
// InMemoryEntityStore
// ---------------------------------------------------------------------------

/// In-memory entity store. Useful for tests and dry runs.
#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: Mutex<HashMap<EntityId, BTreeMap<String, FieldValue>>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity with its initial fields, replacing any previous one.
    pub fn insert_entity(
        &self,
        entity_id: EntityId,
        fields: impl IntoIterator<Item = (String, FieldValue)>,
    ) -> GovResult<()> {
        let mut entities = lock(&self.entities)?;
        entities.insert(entity_id, fields.into_iter().collect());
        Ok(())
    }

    /// All fields of an entity (for testing/inspection).
    pub fn snapshot(&self, entity_id: &EntityId) -> Option<BTreeMap<String, FieldValue>> {
        lock(&self.entities)
            .ok()
            .and_then(|entities| entities.get(entity_id).cloned())
    }
}

impl EntityStore for InMemoryEntityStore {
    fn read_field(&self, entity_id: &EntityId, field_name: &str) -> GovResult<Option<FieldValue>> {
        let entities = lock(&self.entities)?;
        let fields = entities
            .get(entity_id)
            .ok_or_else(|| GovError::NotFound(format!("entity '{}'", entity_id)))?;
        Ok(fields.get(field_name).cloned())
    }

    fn update_field(
        &self,
        entity_id: &EntityId,
        field_name: &str,
        value: &FieldValue,
    ) -> GovResult<()> {
        let mut entities = lock(&self.entities)?;
        let fields = entities
            .get_mut(entity_id)
            .ok_or_else(|| GovError::NotFound(format!("entity '{}'", entity_id)))?;
        fields.insert(field_name.to_string(), value.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InMemoryPendingChangeStore
// ---------------------------------------------------------------------------

/// In-memory pending change store. Keeps insertion order so that changes
/// created within the same clock tick still list newest first.
#[derive(Default)]
pub struct InMemoryPendingChangeStore {
    changes: Mutex<Vec<PendingChange>>,
}

impl InMemoryPendingChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        lock(&self.changes).map(|c| c.len()).unwrap_or(0)
    }
}

fn push_change(changes: &mut Vec<PendingChange>, change: &PendingChange) -> GovResult<()> {
    if changes.iter().any(|c| c.id == change.id) {
        return Err(GovError::Persistence(format!(
            "duplicate change id '{}'",
            change.id
        )));
    }
    changes.push(change.clone());
    Ok(())
}

impl PendingChangeStore for InMemoryPendingChangeStore {
    fn insert(&self, change: &PendingChange) -> GovResult<()> {
        let mut changes = lock(&self.changes)?;
        push_change(&mut changes, change)
    }

    fn insert_unless_pending(&self, change: &PendingChange) -> GovResult<Option<PendingChange>> {
        let mut changes = lock(&self.changes)?;
        let existing = changes.iter().rev().find(|c| {
            c.is_pending() && c.entity_id == change.entity_id && c.field_name == change.field_name
        });
        if let Some(existing) = existing {
            return Ok(Some(existing.clone()));
        }
        push_change(&mut changes, change)?;
        Ok(None)
    }

    fn get(&self, change_id: &ChangeId) -> GovResult<Option<PendingChange>> {
        let changes = lock(&self.changes)?;
        Ok(changes.iter().find(|c| &c.id == change_id).cloned())
    }

    fn list(&self, filter: &ChangeFilter) -> GovResult<Vec<PendingChange>> {
        let changes = lock(&self.changes)?;
        let mut matching: Vec<PendingChange> = changes
            .iter()
            .rev()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        // Stable: ties keep reverse insertion order.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    fn update_status(&self, change_id: &ChangeId, review: &ReviewMeta) -> GovResult<bool> {
        let mut changes = lock(&self.changes)?;
        match changes
            .iter_mut()
            .find(|c| &c.id == change_id && c.is_pending())
        {
            Some(change) => {
                *change = change.with_review(review);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
