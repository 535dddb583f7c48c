//! Human-readable rendering of field names and raw values for review
//! screens. Every function here is total: unknown inputs pass through.

use std::sync::Arc;

use aidgov_core::{FieldValue, PendingChange};
use serde::Serialize;

use crate::engine::AccessDecisionEngine;
use crate::registry::PolicyRegistry;

/// Rendered in place of a missing value.
pub const EMPTY_PLACEHOLDER: &str = "-";

const MARITAL_STATUS: &[(&str, &str)] = &[
    ("single", "أعزب"),
    ("married", "متزوج"),
    ("divorced", "مطلق"),
    ("widowed", "أرمل"),
];

const ECONOMIC_LEVEL: &[(&str, &str)] = &[
    ("very_poor", "فقير جداً"),
    ("poor", "فقير"),
    ("moderate", "متوسط"),
    ("good", "ميسور"),
];

const ACCOUNT_STATUS: &[(&str, &str)] = &[
    ("active", "نشط"),
    ("pending", "في الانتظار"),
    ("suspended", "موقوف"),
    ("inactive", "غير نشط"),
];

const ELIGIBILITY_STATUS: &[(&str, &str)] = &[
    ("eligible", "مؤهل"),
    ("under_review", "قيد المراجعة"),
    ("rejected", "مرفوض"),
];

const GENDER: &[(&str, &str)] = &[("male", "ذكر"), ("female", "أنثى")];

const FIELD_NAMES: &[(&str, &str)] = &[
    ("full_name", "الاسم الكامل"),
    ("name", "الاسم"),
    ("national_id", "رقم الهوية"),
    ("date_of_birth", "تاريخ الميلاد"),
    ("gender", "الجنس"),
    ("phone", "رقم الهاتف"),
    ("alternative_phone", "رقم الهاتف البديل"),
    ("address", "العنوان"),
    ("detailed_address", "العنوان التفصيلي"),
    ("marital_status", "الحالة الاجتماعية"),
    ("members_count", "عدد أفراد الأسرة"),
    ("economic_level", "المستوى الاقتصادي"),
    ("profession", "المهنة"),
    ("status", "حالة الحساب"),
    ("eligibility_status", "حالة الأهلية"),
    ("notes", "ملاحظات"),
    ("family_id", "الأسرة"),
    ("organization_id", "المؤسسة"),
];

/// Lookup table for an enumerated field, if the field is enumerated.
pub fn enum_labels(field_name: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match field_name {
        "marital_status" => Some(MARITAL_STATUS),
        "economic_level" => Some(ECONOMIC_LEVEL),
        "status" => Some(ACCOUNT_STATUS),
        "eligibility_status" => Some(ELIGIBILITY_STATUS),
        "gender" => Some(GENDER),
        _ => None,
    }
}

fn lookup<'a>(table: &'a [(&str, &'a str)], key: &str) -> Option<&'a str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Localized label for a field identifier; unknown names pass through.
pub fn display_name(field_name: &str) -> String {
    lookup(FIELD_NAMES, field_name)
        .unwrap_or(field_name)
        .to_string()
}

/// Render a raw value. `None` and JSON `null` become the placeholder dash,
/// objects and arrays their JSON text, enum values their label.
pub fn display_value(field_name: &str, raw: Option<&FieldValue>) -> String {
    match raw {
        None | Some(FieldValue::Null) => EMPTY_PLACEHOLDER.to_string(),
        Some(FieldValue::String(s)) => enum_labels(field_name)
            .and_then(|table| lookup(table, s.as_str()))
            .unwrap_or(s.as_str())
            .to_string(),
        Some(value @ (FieldValue::Object(_) | FieldValue::Array(_))) => {
            serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
        }
        Some(other) => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// DisplayFormatter: review-screen rendering backed by the registry
// ---------------------------------------------------------------------------

/// One pending change rendered for a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub field_label: String,
    pub current: String,
    pub proposed: String,
    pub level: u8,
    pub description: String,
    pub proposer: String,
}

#[derive(Debug, Clone)]
pub struct DisplayFormatter {
    engine: AccessDecisionEngine,
}

impl DisplayFormatter {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self {
            engine: AccessDecisionEngine::new(registry),
        }
    }

    pub fn display_name(&self, field_name: &str) -> String {
        display_name(field_name)
    }

    pub fn display_value(&self, field_name: &str, raw: Option<&FieldValue>) -> String {
        display_value(field_name, raw)
    }

    pub fn summarize(&self, change: &PendingChange) -> ChangeSummary {
        let field = change.field_name.as_str();
        ChangeSummary {
            field_label: display_name(field),
            current: display_value(field, change.current_value.as_ref()),
            proposed: display_value(field, Some(&change.proposed_value)),
            level: self.engine.level(field),
            description: self.engine.description(field).to_string(),
            proposer: format!("{} ({})", change.proposed_by_name, change.proposed_by_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidgov_core::{ActorType, EntityId, Proposer};
    use serde_json::json;
    use std::collections::HashSet;

    const ENUM_FIELDS: [&str; 5] = [
        "marital_status",
        "economic_level",
        "status",
        "eligibility_status",
        "gender",
    ];

    #[test]
    fn test_enum_labels_non_empty_and_distinct() {
        for field in ENUM_FIELDS {
            let table = enum_labels(field).unwrap();
            let mut seen = HashSet::new();
            for (raw, _) in table {
                let label = display_value(field, Some(&json!(raw)));
                assert!(!label.is_empty());
                assert_ne!(&label, raw, "{field}/{raw} should be translated");
                assert!(seen.insert(label), "duplicate label in {field}");
            }
        }
    }

    #[test]
    fn test_unmapped_enum_passes_through() {
        for field in ENUM_FIELDS {
            assert_eq!(display_value(field, Some(&json!("engaged"))), "engaged");
        }
    }

    #[test]
    fn test_missing_values_render_dash() {
        assert_eq!(display_value("address", None), "-");
        assert_eq!(display_value("address", Some(&FieldValue::Null)), "-");
    }

    #[test]
    fn test_structured_values_render_as_json() {
        let value = json!({"city": "Rafah", "block": 4});
        let rendered = display_value("address", Some(&value));
        let reparsed: FieldValue = serde_json::from_str(&rendered).unwrap();
        assert_eq!(reparsed, value);
        assert_eq!(display_value("notes", Some(&json!(["a", "b"]))), r#"["a","b"]"#);
    }

    #[test]
    fn test_scalars_render_plain() {
        assert_eq!(display_value("members_count", Some(&json!(6))), "6");
        assert_eq!(display_value("notes", Some(&json!(true))), "true");
        assert_eq!(display_value("address", Some(&json!("Gaza - Rafah"))), "Gaza - Rafah");
    }

    #[test]
    fn test_enum_lookup_is_per_field() {
        // "pending" is an account status but not a gender
        assert_eq!(display_value("status", Some(&json!("pending"))), "في الانتظار");
        assert_eq!(display_value("gender", Some(&json!("pending"))), "pending");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("national_id"), "رقم الهوية");
        assert_eq!(display_name("address"), "العنوان");
        assert_eq!(display_name("blood_type"), "blood_type");
    }

    #[test]
    fn test_summarize_change() {
        let formatter = DisplayFormatter::new(Arc::new(PolicyRegistry::builtin()));
        let change = PendingChange::new(
            EntityId::new("ben-1"),
            "marital_status",
            Some(json!("single")),
            json!("married"),
            &Proposer::new(ActorType::Organization, "org-user-1", "Al Amal"),
        );
        let summary = formatter.summarize(&change);
        assert_eq!(summary.field_label, "الحالة الاجتماعية");
        assert_eq!(summary.current, "أعزب");
        assert_eq!(summary.proposed, "متزوج");
        assert_eq!(summary.level, 2);
        assert_eq!(summary.proposer, "Al Amal (organization)");
    }

    #[test]
    fn test_summarize_ungoverned_field() {
        let formatter = DisplayFormatter::new(Arc::new(PolicyRegistry::builtin()));
        let change = PendingChange::new(
            EntityId::new("ben-1"),
            "blood_type",
            None,
            json!("O+"),
            &Proposer::new(ActorType::Admin, "admin-1", "Admin"),
        );
        let summary = formatter.summarize(&change);
        assert_eq!(summary.field_label, "blood_type");
        assert_eq!(summary.current, "-");
        assert_eq!(summary.level, 4);
    }
}
