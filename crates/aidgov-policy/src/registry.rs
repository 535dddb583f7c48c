//! Field policy registry.
//!
//! Maps each governed field to its sensitivity level, the actor types
//! allowed to propose changes, and the approval/OTP flags. A registry is
//! built once at startup (the built-in table or a TOML policy file) and
//! shared by reference; it is never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use aidgov_core::ActorType;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

/// Most restricted sensitivity level.
pub const MIN_LEVEL: u8 = 1;
/// Open sensitivity level; also the level reported for ungoverned fields.
pub const MAX_LEVEL: u8 = 4;

// ---------------------------------------------------------------------------
// FieldPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    pub field_name: String,
    /// 1 = most restricted .. 4 = open. Drives UI emphasis only.
    pub level: u8,
    /// Actor types permitted to propose a change to this field.
    pub allowed_actor_types: BTreeSet<ActorType>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub requires_otp: bool,
    #[serde(default)]
    pub description: String,
}

impl FieldPolicy {
    pub fn new(
        field_name: impl Into<String>,
        level: u8,
        allowed: &[ActorType],
        requires_approval: bool,
        requires_otp: bool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            level,
            allowed_actor_types: allowed.iter().copied().collect(),
            requires_approval,
            requires_otp,
            description: description.into(),
        }
    }

    pub fn allows(&self, actor_type: ActorType) -> bool {
        self.allowed_actor_types.contains(&actor_type)
    }
}

/// On-disk shape of a policy file: a list of `[[fields]]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub fields: Vec<FieldPolicy>,
}

// ---------------------------------------------------------------------------
// PolicyRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, FieldPolicy>,
}

impl PolicyRegistry {
    /// Build a registry from a list of policies, rejecting invalid entries.
    pub fn new(policies: Vec<FieldPolicy>) -> PolicyResult<Self> {
        validate_policies(&policies)
            .map_err(|errors| PolicyError::ValidationError(errors.join("; ")))?;
        Ok(Self {
            policies: policies
                .into_iter()
                .map(|p| (p.field_name.clone(), p))
                .collect(),
        })
    }

    /// The registry shipped with the dashboard.
    #[rustfmt::skip]
    pub fn builtin() -> Self {
        use ActorType::{Admin, Beneficiary, Family, Organization};
        let all = [Admin, Organization, Family, Beneficiary];

        let policies = vec![
            FieldPolicy::new("full_name", 1, &[Admin], false, false,
                "Legal name as printed on identity documents"),
            FieldPolicy::new("national_id", 1, &[Admin], false, false,
                "National identity number, primary deduplication key"),
            FieldPolicy::new("date_of_birth", 1, &[Admin], false, false,
                "Date of birth from identity documents"),
            FieldPolicy::new("gender", 1, &[Admin], false, false,
                "Gender as registered on identity documents"),
            FieldPolicy::new("eligibility_status", 1, &[Admin], false, false,
                "Aid eligibility decision"),
            FieldPolicy::new("status", 1, &[Admin], false, false,
                "Account status of the registered record"),
            FieldPolicy::new("phone", 2, &all, true, true,
                "Primary contact number used for delivery notifications"),
            FieldPolicy::new("alternative_phone", 2, &all, false, true,
                "Secondary contact number"),
            FieldPolicy::new("address", 2, &[Admin, Organization, Family], true, false,
                "Residence area used for package routing"),
            FieldPolicy::new("marital_status", 2, &[Admin, Organization], true, false,
                "Marital status, affects household classification"),
            FieldPolicy::new("members_count", 2, &[Admin, Organization, Family], true, false,
                "Household size, drives package allocation"),
            FieldPolicy::new("economic_level", 2, &[Admin, Organization], true, false,
                "Assessed economic level, drives prioritisation"),
            FieldPolicy::new("detailed_address", 3, &all, true, false,
                "Street-level address details for couriers"),
            FieldPolicy::new("profession", 3, &all, false, false,
                "Occupation of the head of household"),
            FieldPolicy::new("notes", 4, &all, false, false,
                "Free-form notes"),
        ];

        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.field_name.clone(), p))
                .collect(),
        }
    }

    /// Parse a registry from TOML text (`[[fields]]` tables).
    pub fn from_toml_str(text: &str) -> PolicyResult<Self> {
        let file: PolicyFile = toml::from_str(text)
            .map_err(|e| PolicyError::DeserializationError(e.to_string()))?;
        Self::new(file.fields)
    }

    /// Load a registry from a TOML policy file.
    pub fn load(path: &Path) -> PolicyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PolicyError::LoadError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let registry = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            fields = registry.len(),
            "loaded field policy file"
        );
        Ok(registry)
    }

    pub fn to_toml_string(&self) -> PolicyResult<String> {
        let file = PolicyFile {
            fields: self.policies.values().cloned().collect(),
        };
        toml::to_string_pretty(&file).map_err(|e| PolicyError::LoadError(e.to_string()))
    }

    pub fn get(&self, field_name: &str) -> Option<&FieldPolicy> {
        self.policies.get(field_name)
    }

    pub fn is_governed(&self, field_name: &str) -> bool {
        self.policies.contains_key(field_name)
    }

    /// Policies ordered by field name.
    pub fn iter(&self) -> impl Iterator<Item = &FieldPolicy> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Structural checks: non-empty unique names, level in 1..=4, at least one
/// allowed actor type.
fn validate_policies(policies: &[FieldPolicy]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for policy in policies {
        if policy.field_name.trim().is_empty() {
            errors.push("field name must not be empty".to_string());
        } else if !seen.insert(policy.field_name.as_str()) {
            errors.push(format!("duplicate field policy: '{}'", policy.field_name));
        }

        if !(MIN_LEVEL..=MAX_LEVEL).contains(&policy.level) {
            errors.push(format!(
                "field '{}': level must be between {} and {}, got {}",
                policy.field_name, MIN_LEVEL, MAX_LEVEL, policy.level
            ));
        }

        if policy.allowed_actor_types.is_empty() {
            errors.push(format!(
                "field '{}': allowed_actor_types must not be empty",
                policy.field_name
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
