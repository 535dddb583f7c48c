use std::sync::{Mutex, MutexGuard};

use aidgov_core::{
    ActorType, ChangeFilter, ChangeId, ChangeStatus, EntityId, EntityStore, FieldValue, GovError,
    GovResult, IdentityId, PendingChange, PendingChangeStore, ReviewMeta, Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    entity_id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);
CREATE TABLE IF NOT EXISTS entity_fields (
    entity_id TEXT NOT NULL REFERENCES entities(entity_id),
    field_name TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (entity_id, field_name)
);
CREATE TABLE IF NOT EXISTS pending_changes (
    id TEXT PRIMARY KEY NOT NULL,
    entity_id TEXT NOT NULL,
    field_name TEXT NOT NULL,
    current_value TEXT,
    proposed_value TEXT NOT NULL,
    proposed_by_type TEXT NOT NULL,
    proposed_by_id TEXT NOT NULL,
    proposed_by_name TEXT NOT NULL,
    status TEXT NOT NULL,
    reviewed_at INTEGER,
    reviewed_by_id TEXT,
    rejection_reason TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_changes_lookup
    ON pending_changes (status, entity_id, field_name);
";

const CHANGE_COLUMNS: &str = "id, entity_id, field_name, current_value, proposed_value, \
     proposed_by_type, proposed_by_id, proposed_by_name, status, reviewed_at, reviewed_by_id, \
     rejection_reason, created_at, updated_at";

/// SQLite persistence for both governed entities and pending changes.
///
/// Field values are stored as JSON text. Timestamps are stored as
/// nanoseconds since the epoch so ordering is a plain integer sort.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &str) -> GovResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| GovError::Persistence(format!("failed to open database: {}", e)))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| GovError::Persistence(format!("failed to create tables: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> GovResult<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> GovResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GovError::Persistence(format!("lock poisoned: {}", e)))
    }

    /// Register an entity if it does not exist yet.
    pub fn ensure_entity(&self, entity_id: &EntityId) -> GovResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO entities (entity_id) VALUES (?1)",
            params![entity_id.as_str()],
        )
        .map_err(|e| GovError::Persistence(format!("insert failed: {}", e)))?;
        Ok(())
    }

    /// All fields of an entity ordered by name.
    pub fn entity_fields(&self, entity_id: &EntityId) -> GovResult<Vec<(String, FieldValue)>> {
        let conn = self.conn()?;
        entity_exists(&conn, entity_id)?;
        let mut stmt = conn
            .prepare(
                "SELECT field_name, value FROM entity_fields WHERE entity_id = ?1 \
                 ORDER BY field_name",
            )
            .map_err(query_failed)?;
        let rows = stmt
            .query_map(params![entity_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(query_failed)?;

        let mut fields = Vec::new();
        for row in rows {
            let (name, raw) = row.map_err(query_failed)?;
            fields.push((name, decode_value(&raw)?));
        }
        Ok(fields)
    }
}

fn query_failed(e: rusqlite::Error) -> GovError {
    GovError::Persistence(format!("query failed: {}", e))
}

fn entity_exists(conn: &Connection, entity_id: &EntityId) -> GovResult<()> {
    let found: Option<String> = conn
        .query_row(
            "SELECT entity_id FROM entities WHERE entity_id = ?1",
            params![entity_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    match found {
        Some(_) => Ok(()),
        None => Err(GovError::NotFound(format!("entity '{}'", entity_id))),
    }
}

fn encode_value(value: &FieldValue) -> GovResult<String> {
    serde_json::to_string(value)
        .map_err(|e| GovError::Persistence(format!("value encoding failed: {}", e)))
}

fn decode_value(raw: &str) -> GovResult<FieldValue> {
    serde_json::from_str(raw)
        .map_err(|e| GovError::Persistence(format!("stored value is not valid JSON: {}", e)))
}

fn to_nanos(ts: &Timestamp) -> i64 {
    (ts.seconds_since_epoch as i64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.nanoseconds as i64)
}

fn from_nanos(nanos: i64) -> Timestamp {
    let nanos = nanos.max(0);
    Timestamp {
        seconds_since_epoch: (nanos / 1_000_000_000) as u64,
        nanoseconds: (nanos % 1_000_000_000) as u32,
    }
}

/// Raw column values of one `pending_changes` row.
struct ChangeRow {
    id: String,
    entity_id: String,
    field_name: String,
    current_value: Option<String>,
    proposed_value: String,
    proposed_by_type: String,
    proposed_by_id: String,
    proposed_by_name: String,
    status: String,
    reviewed_at: Option<i64>,
    reviewed_by_id: Option<String>,
    rejection_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl ChangeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_id: row.get(1)?,
            field_name: row.get(2)?,
            current_value: row.get(3)?,
            proposed_value: row.get(4)?,
            proposed_by_type: row.get(5)?,
            proposed_by_id: row.get(6)?,
            proposed_by_name: row.get(7)?,
            status: row.get(8)?,
            reviewed_at: row.get(9)?,
            reviewed_by_id: row.get(10)?,
            rejection_reason: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_change(self) -> GovResult<PendingChange> {
        let proposed_by_type: ActorType = self
            .proposed_by_type
            .parse()
            .map_err(GovError::Persistence)?;
        let status: ChangeStatus = self.status.parse().map_err(GovError::Persistence)?;
        let current_value = match self.current_value {
            Some(raw) => Some(decode_value(&raw)?),
            None => None,
        };

        Ok(PendingChange {
            id: ChangeId::new(self.id),
            entity_id: EntityId::new(self.entity_id),
            field_name: self.field_name,
            current_value,
            proposed_value: decode_value(&self.proposed_value)?,
            proposed_by_type,
            proposed_by_id: IdentityId::new(self.proposed_by_id),
            proposed_by_name: self.proposed_by_name,
            status,
            reviewed_at: self.reviewed_at.map(from_nanos),
            reviewed_by_id: self.reviewed_by_id.map(IdentityId::new),
            rejection_reason: self.rejection_reason,
            created_at: from_nanos(self.created_at),
            updated_at: from_nanos(self.updated_at),
        })
    }
}

impl EntityStore for SqliteStore {
    fn read_field(&self, entity_id: &EntityId, field_name: &str) -> GovResult<Option<FieldValue>> {
        let conn = self.conn()?;
        entity_exists(&conn, entity_id)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM entity_fields WHERE entity_id = ?1 AND field_name = ?2",
                params![entity_id.as_str(), field_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_failed)?;
        raw.as_deref().map(decode_value).transpose()
    }

    fn update_field(
        &self,
        entity_id: &EntityId,
        field_name: &str,
        value: &FieldValue,
    ) -> GovResult<()> {
        let encoded = encode_value(value)?;
        let conn = self.conn()?;
        entity_exists(&conn, entity_id)?;
        conn.execute(
            "INSERT OR REPLACE INTO entity_fields (entity_id, field_name, value, updated_at) \
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![entity_id.as_str(), field_name, encoded],
        )
        .map_err(|e| GovError::Persistence(format!("update failed: {}", e)))?;
        Ok(())
    }
}

/// Run an insert statement whose fourteen parameters are the
/// `CHANGE_COLUMNS` of `change`, returning the number of rows written.
fn execute_insert(conn: &Connection, sql: &str, change: &PendingChange) -> GovResult<usize> {
    let current = change.current_value.as_ref().map(encode_value).transpose()?;
    let proposed = encode_value(&change.proposed_value)?;
    conn.execute(
        sql,
        params![
            change.id.as_str(),
            change.entity_id.as_str(),
            change.field_name,
            current,
            proposed,
            change.proposed_by_type.as_str(),
            change.proposed_by_id.as_str(),
            change.proposed_by_name,
            change.status.as_str(),
            change.reviewed_at.as_ref().map(to_nanos),
            change.reviewed_by_id.as_ref().map(|r| r.as_str()),
            change.rejection_reason,
            to_nanos(&change.created_at),
            to_nanos(&change.updated_at),
        ],
    )
    .map_err(|e| GovError::Persistence(format!("insert failed: {}", e)))
}

impl PendingChangeStore for SqliteStore {
    fn insert(&self, change: &PendingChange) -> GovResult<()> {
        let conn = self.conn()?;
        execute_insert(
            &conn,
            &format!(
                "INSERT INTO pending_changes ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                CHANGE_COLUMNS
            ),
            change,
        )?;
        Ok(())
    }

    fn insert_unless_pending(&self, change: &PendingChange) -> GovResult<Option<PendingChange>> {
        let conn = self.conn()?;
        let inserted = execute_insert(
            &conn,
            &format!(
                "INSERT INTO pending_changes ({}) \
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14 \
                 WHERE NOT EXISTS (SELECT 1 FROM pending_changes \
                     WHERE status = 'pending' AND entity_id = ?2 AND field_name = ?3)",
                CHANGE_COLUMNS
            ),
            change,
        )?;
        if inserted > 0 {
            return Ok(None);
        }

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM pending_changes \
                     WHERE status = 'pending' AND entity_id = ?1 AND field_name = ?2 \
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    CHANGE_COLUMNS
                ),
                params![change.entity_id.as_str(), change.field_name],
                ChangeRow::from_row,
            )
            .optional()
            .map_err(query_failed)?;
        match row {
            Some(row) => Ok(Some(row.into_change()?)),
            None => Err(GovError::Persistence(format!(
                "change '{}' was neither inserted nor blocked",
                change.id
            ))),
        }
    }

    fn get(&self, change_id: &ChangeId) -> GovResult<Option<PendingChange>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM pending_changes WHERE id = ?1", CHANGE_COLUMNS),
                params![change_id.as_str()],
                ChangeRow::from_row,
            )
            .optional()
            .map_err(query_failed)?;
        row.map(ChangeRow::into_change).transpose()
    }

    fn list(&self, filter: &ChangeFilter) -> GovResult<Vec<PendingChange>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM pending_changes \
                 WHERE (?1 IS NULL OR status = ?1) \
                   AND (?2 IS NULL OR entity_id = ?2) \
                   AND (?3 IS NULL OR field_name = ?3) \
                 ORDER BY created_at DESC, rowid DESC",
                CHANGE_COLUMNS
            ))
            .map_err(query_failed)?;

        let rows = stmt
            .query_map(
                params![
                    filter.status.map(|s| s.as_str()),
                    filter.entity_id.as_ref().map(|e| e.as_str()),
                    filter.field_name.as_deref(),
                ],
                ChangeRow::from_row,
            )
            .map_err(query_failed)?;

        let mut changes = Vec::new();
        for row in rows {
            changes.push(row.map_err(query_failed)?.into_change()?);
        }
        Ok(changes)
    }

    fn update_status(&self, change_id: &ChangeId, review: &ReviewMeta) -> GovResult<bool> {
        let conn = self.conn()?;
        let reviewed_at = to_nanos(&review.reviewed_at);
        let rows = conn
            .execute(
                "UPDATE pending_changes \
                 SET status = ?1, reviewed_at = ?2, reviewed_by_id = ?3, \
                     rejection_reason = ?4, updated_at = ?2 \
                 WHERE id = ?5 AND status = 'pending'",
                params![
                    review.status.as_str(),
                    reviewed_at,
                    review.reviewed_by_id.as_str(),
                    review.rejection_reason,
                    change_id.as_str(),
                ],
            )
            .map_err(|e| GovError::Persistence(format!("update failed: {}", e)))?;
        Ok(rows > 0)
    }
}
