use std::sync::Arc;

use aidgov_core::ActorType;
use serde::{Deserialize, Serialize};

use crate::registry::{PolicyRegistry, MAX_LEVEL};

/// Description reported for fields the registry does not govern.
pub const UNGOVERNED_DESCRIPTION: &str = "Ungoverned field (admin only)";

// ---------------------------------------------------------------------------
// EditDecision: what happens to an edit attempt
// ---------------------------------------------------------------------------

/// Outcome of checking one (field, actor type) pair against the registry.
///
/// OTP is independent of approval: a field may need a passcode and still
/// apply directly, or need both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EditDecision {
    Forbidden,
    ApplyDirectly { requires_otp: bool },
    RequiresApproval { requires_otp: bool },
}

impl EditDecision {
    pub fn requires_otp(&self) -> bool {
        match self {
            EditDecision::Forbidden => false,
            EditDecision::ApplyDirectly { requires_otp }
            | EditDecision::RequiresApproval { requires_otp } => *requires_otp,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, EditDecision::Forbidden)
    }
}

// ---------------------------------------------------------------------------
// AccessDecisionEngine
// ---------------------------------------------------------------------------

/// Pure lookups over a shared [`PolicyRegistry`].
///
/// Unknown fields fail closed: admin-only, no approval, no OTP.
#[derive(Debug, Clone)]
pub struct AccessDecisionEngine {
    registry: Arc<PolicyRegistry>,
    admin_bypasses_approval: bool,
}

impl AccessDecisionEngine {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self {
            registry,
            admin_bypasses_approval: true,
        }
    }

    /// When false, admin edits to approval-gated fields are queued like
    /// everyone else's.
    pub fn with_admin_bypass(mut self, bypass: bool) -> Self {
        self.admin_bypasses_approval = bypass;
        self
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn can_edit_field(&self, field_name: &str, actor_type: ActorType) -> bool {
        match self.registry.get(field_name) {
            Some(policy) => policy.allows(actor_type),
            None => actor_type == ActorType::Admin,
        }
    }

    pub fn requires_approval(&self, field_name: &str) -> bool {
        self.registry
            .get(field_name)
            .map_or(false, |p| p.requires_approval)
    }

    pub fn requires_otp(&self, field_name: &str) -> bool {
        self.registry
            .get(field_name)
            .map_or(false, |p| p.requires_otp)
    }

    pub fn level(&self, field_name: &str) -> u8 {
        self.registry.get(field_name).map_or(MAX_LEVEL, |p| p.level)
    }

    pub fn description(&self, field_name: &str) -> &str {
        self.registry
            .get(field_name)
            .map_or(UNGOVERNED_DESCRIPTION, |p| p.description.as_str())
    }

    /// Combine permission, approval and OTP checks for one edit attempt.
    pub fn decide(&self, field_name: &str, actor_type: ActorType) -> EditDecision {
        if !self.can_edit_field(field_name, actor_type) {
            return EditDecision::Forbidden;
        }

        let requires_otp = self.requires_otp(field_name);
        let bypass = actor_type == ActorType::Admin && self.admin_bypasses_approval;

        if self.requires_approval(field_name) && !bypass {
            EditDecision::RequiresApproval { requires_otp }
        } else {
            EditDecision::ApplyDirectly { requires_otp }
        }
    }
}
