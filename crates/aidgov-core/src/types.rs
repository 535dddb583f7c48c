use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw field value. Values are opaque during transport and only interpreted
/// when rendered for review.
pub type FieldValue = serde_json::Value;

// ---------------------------------------------------------------------------
// ActorType: governing identity category for access checks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Admin,
    Organization,
    Family,
    Beneficiary,
}

impl ActorType {
    pub const ALL: [ActorType; 4] = [
        ActorType::Admin,
        ActorType::Organization,
        ActorType::Family,
        ActorType::Beneficiary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActorType::Admin => "admin",
            ActorType::Organization => "organization",
            ActorType::Family => "family",
            ActorType::Beneficiary => "beneficiary",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(ActorType::Admin),
            "organization" => Ok(ActorType::Organization),
            "family" => Ok(ActorType::Family),
            "beneficiary" => Ok(ActorType::Beneficiary),
            other => Err(format!("unknown actor type '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeStatus: pending change state machine
// ---------------------------------------------------------------------------

/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Approved => "approved",
            ChangeStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ChangeStatus::Pending)
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangeStatus::Pending),
            "approved" => Ok(ChangeStatus::Approved),
            "rejected" => Ok(ChangeStatus::Rejected),
            other => Err(format!("unknown change status '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp: canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        chrono::Utc::now().into()
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    pub fn to_rfc3339(&self) -> String {
        let dt =
            chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds);
        dt.map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            seconds_since_epoch: dt.timestamp() as u64,
            nanoseconds: dt.timestamp_subsec_nanos(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(EntityId, "Identifier of a governed record (e.g. a beneficiary).");
define_id!(IdentityId, "Identifier of an authenticated identity.");
define_id!(ChangeId, "Identifier of a pending change.");

impl ChangeId {
    /// Generate a random URL-safe identifier (128 bits).
    pub fn generate() -> Self {
        use base64::Engine;
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }
}

// ---------------------------------------------------------------------------
// Proposer: who submitted a change
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposer {
    pub actor_type: ActorType,
    pub id: IdentityId,
    pub name: String,
}

impl Proposer {
    pub fn new(actor_type: ActorType, id: impl Into<IdentityId>, name: impl Into<String>) -> Self {
        Self {
            actor_type,
            id: id.into(),
            name: name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PendingChange: one proposed field mutation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: ChangeId,
    pub entity_id: EntityId,
    pub field_name: String,
    pub current_value: Option<FieldValue>,
    pub proposed_value: FieldValue,
    pub proposed_by_type: ActorType,
    pub proposed_by_id: IdentityId,
    pub proposed_by_name: String,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by_id: Option<IdentityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PendingChange {
    /// Build a fresh `pending` change with a generated id.
    pub fn new(
        entity_id: EntityId,
        field_name: impl Into<String>,
        current_value: Option<FieldValue>,
        proposed_value: FieldValue,
        proposer: &Proposer,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: ChangeId::generate(),
            entity_id,
            field_name: field_name.into(),
            current_value,
            proposed_value,
            proposed_by_type: proposer.actor_type,
            proposed_by_id: proposer.id.clone(),
            proposed_by_name: proposer.name.clone(),
            status: ChangeStatus::Pending,
            reviewed_at: None,
            reviewed_by_id: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ChangeStatus::Pending
    }

    /// Copy of this change with a review outcome stamped on it.
    pub fn with_review(&self, review: &ReviewMeta) -> Self {
        let mut reviewed = self.clone();
        reviewed.status = review.status;
        reviewed.reviewed_at = Some(review.reviewed_at);
        reviewed.reviewed_by_id = Some(review.reviewed_by_id.clone());
        reviewed.rejection_reason = review.rejection_reason.clone();
        reviewed.updated_at = review.reviewed_at;
        reviewed
    }
}

/// Review outcome written by the status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewMeta {
    pub status: ChangeStatus,
    pub reviewed_at: Timestamp,
    pub reviewed_by_id: IdentityId,
    pub rejection_reason: Option<String>,
}

impl ReviewMeta {
    pub fn approved(reviewer: IdentityId) -> Self {
        Self {
            status: ChangeStatus::Approved,
            reviewed_at: Timestamp::now(),
            reviewed_by_id: reviewer,
            rejection_reason: None,
        }
    }

    pub fn rejected(reviewer: IdentityId, reason: impl Into<String>) -> Self {
        Self {
            status: ChangeStatus::Rejected,
            reviewed_at: Timestamp::now(),
            reviewed_by_id: reviewer,
            rejection_reason: Some(reason.into()),
        }
    }
}

/// Selection criteria for listing pending changes. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    pub status: Option<ChangeStatus>,
    pub entity_id: Option<EntityId>,
    pub field_name: Option<String>,
}

impl ChangeFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(ChangeStatus::Pending),
            ..Self::default()
        }
    }

    pub fn for_entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn for_field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn matches(&self, change: &PendingChange) -> bool {
        self.status.map_or(true, |s| change.status == s)
            && self
                .entity_id
                .as_ref()
                .map_or(true, |e| &change.entity_id == e)
            && self
                .field_name
                .as_ref()
                .map_or(true, |f| &change.field_name == f)
    }
}
