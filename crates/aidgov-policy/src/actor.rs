use aidgov_core::{ActorType, EntityId, IdentityId, Proposer};
use serde::{Deserialize, Serialize};

/// Default marker looked for in role identifiers.
pub const DEFAULT_ADMIN_MARKER: &str = "admin";

/// Identity data supplied by the session layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub identity_id: IdentityId,
    #[serde(default)]
    pub role_identifier: Option<String>,
    #[serde(default)]
    pub associated_entity_id: Option<EntityId>,
    /// Kind of record the identity is linked to, e.g. "organization".
    #[serde(default)]
    pub associated_entity_type: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl SessionContext {
    pub fn new(identity_id: impl Into<IdentityId>) -> Self {
        Self {
            identity_id: identity_id.into(),
            ..Self::default()
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role_identifier = Some(role.into());
        self
    }

    pub fn associated_with(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<EntityId>,
    ) -> Self {
        self.associated_entity_type = Some(entity_type.into());
        self.associated_entity_id = Some(entity_id.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    fn is_associated_with(&self, entity_type: &str) -> bool {
        self.associated_entity_type
            .as_deref()
            .map_or(false, |t| t.trim().eq_ignore_ascii_case(entity_type))
    }
}

/// Derives the governing actor type from session data.
///
/// Admin detection is a substring match on the role identifier and runs
/// before the association checks, so an admin linked to a family record is
/// still an admin.
#[derive(Debug, Clone)]
pub struct ActorClassifier {
    admin_marker: String,
}

impl Default for ActorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_MARKER)
    }
}

impl ActorClassifier {
    pub fn new(admin_marker: impl Into<String>) -> Self {
        Self {
            admin_marker: admin_marker.into().trim().to_lowercase(),
        }
    }

    pub fn admin_marker(&self) -> &str {
        &self.admin_marker
    }

    /// `None` means no authenticated identity.
    pub fn classify(&self, session: Option<&SessionContext>) -> ActorType {
        let Some(session) = session else {
            return ActorType::Beneficiary;
        };

        let actor_type = if self.has_admin_role(session) {
            ActorType::Admin
        } else if session.is_associated_with("organization") {
            ActorType::Organization
        } else if session.is_associated_with("family") {
            ActorType::Family
        } else {
            ActorType::Beneficiary
        };

        tracing::debug!(
            identity = %session.identity_id,
            actor_type = %actor_type,
            "classified session"
        );
        actor_type
    }

    /// Proposer identity for a session. Falls back to the identity id when
    /// the session carries no display name.
    pub fn proposer(&self, session: &SessionContext) -> Proposer {
        let name = session
            .display_name
            .clone()
            .unwrap_or_else(|| session.identity_id.to_string());
        Proposer::new(self.classify(Some(session)), session.identity_id.clone(), name)
    }

    fn has_admin_role(&self, session: &SessionContext) -> bool {
        if self.admin_marker.is_empty() {
            return false;
        }
        session
            .role_identifier
            .as_deref()
            .map_or(false, |role| role.to_lowercase().contains(&self.admin_marker))
    }
}
