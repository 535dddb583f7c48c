//! aidgov Root Library
//!
//! Wiring for the aidgov binary: loads configuration and the field policy
//! table, opens the SQLite store and assembles the change lifecycle manager
//! the CLI commands operate on.

pub mod config;
pub mod error;

pub use config::{GovernanceConfig, PolicyConfig, RootConfig};
pub use error::{RootError, RootResult};

use std::sync::Arc;

use aidgov_core::{EntityId, EntityStore, FieldValue, PendingChange};
use aidgov_policy::{AccessDecisionEngine, ActorClassifier, DisplayFormatter, PolicyRegistry};
use aidgov_review::{ChangeLifecycleManager, SqliteStore, TracingAuditSink};
use tracing::info;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Everything a command needs, built once from a [`RootConfig`].
pub struct AppState {
    pub config: RootConfig,
    pub registry: Arc<PolicyRegistry>,
    pub classifier: ActorClassifier,
    pub formatter: DisplayFormatter,
    pub store: Arc<SqliteStore>,
    pub manager: ChangeLifecycleManager,
}

/// Build the policy registry named by the configuration.
pub fn load_registry(policy: &PolicyConfig) -> RootResult<PolicyRegistry> {
    match &policy.policy_file {
        Some(path) => Ok(PolicyRegistry::load(path)?),
        None => Ok(PolicyRegistry::builtin()),
    }
}

/// Validate the configuration and open every subsystem.
pub fn initialize(config: RootConfig) -> RootResult<AppState> {
    config.validate()?;

    info!(
        database = %config.database_path.display(),
        duplicate_pending = config.governance.duplicate_pending.as_str(),
        admin_bypass = config.governance.admin_bypasses_approval,
        "initializing aidgov"
    );

    let registry = Arc::new(load_registry(&config.policy)?);

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RootError::Config(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    let db_path = config.database_path.to_str().ok_or_else(|| {
        RootError::Config(format!(
            "database path is not valid UTF-8: {}",
            config.database_path.display()
        ))
    })?;
    let store = Arc::new(SqliteStore::open(db_path)?);

    let engine = AccessDecisionEngine::new(registry.clone())
        .with_admin_bypass(config.governance.admin_bypasses_approval);
    let manager = ChangeLifecycleManager::new(
        engine,
        store.clone(),
        store.clone(),
        Arc::new(TracingAuditSink),
    )
    .with_duplicate_policy(config.governance.duplicate_pending);

    Ok(AppState {
        classifier: ActorClassifier::new(config.governance.admin_marker.clone()),
        formatter: DisplayFormatter::new(registry.clone()),
        registry,
        store,
        manager,
        config,
    })
}

/// Interpret a command-line value: JSON when it parses, a plain string
/// otherwise.
pub fn parse_value(raw: &str) -> FieldValue {
    serde_json::from_str(raw).unwrap_or_else(|_| FieldValue::String(raw.to_string()))
}

impl AppState {
    pub fn engine(&self) -> &AccessDecisionEngine {
        self.manager.engine()
    }

    /// Write a field without governance checks, registering the entity if
    /// needed. Used to load existing records.
    pub fn import_field(
        &self,
        entity_id: &EntityId,
        field_name: &str,
        value: &FieldValue,
    ) -> RootResult<()> {
        self.store.ensure_entity(entity_id)?;
        self.store.update_field(entity_id, field_name, value)?;
        info!(entity = %entity_id, field = field_name, "field imported");
        Ok(())
    }

    pub fn entity_fields(&self, entity_id: &EntityId) -> RootResult<Vec<(String, FieldValue)>> {
        Ok(self.store.entity_fields(entity_id)?)
    }

    /// Multi-line review card for one change.
    pub fn render_change(&self, change: &PendingChange) -> String {
        let summary = self.formatter.summarize(change);
        let mut out = format!(
            "{}  [{}]  {} / {}\n  {}: {} -> {}\n  level {} ({})\n  proposed by {} at {}",
            change.id,
            change.status,
            change.entity_id,
            change.field_name,
            summary.field_label,
            summary.current,
            summary.proposed,
            summary.level,
            summary.description,
            summary.proposer,
            change.created_at.to_rfc3339(),
        );
        if let (Some(reviewer), Some(at)) = (&change.reviewed_by_id, &change.reviewed_at) {
            out.push_str(&format!("\n  reviewed by {} at {}", reviewer, at.to_rfc3339()));
        }
        if let Some(reason) = &change.rejection_reason {
            out.push_str(&format!("\n  reason: {}", reason));
        }
        out
    }
}
