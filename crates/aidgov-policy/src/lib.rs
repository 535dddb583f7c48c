//! aidgov Policy
//!
//! Field-level governance policy for beneficiary and family records. Answers,
//! per field and per actor type, whether an edit may apply directly, must be
//! queued for review, or needs a one-time passcode first.
//!
//! Key features:
//! - Injectable field policy registry (built-in table or TOML policy file)
//! - Fail-closed defaults: ungoverned fields are admin-only
//! - Pure access decisions, separate "who may propose" from "needs approval"
//! - Session-to-actor classification with admin-first precedence
//! - Localized labels for review screens

pub mod actor;
pub mod display;
pub mod engine;
pub mod error;
pub mod registry;

// Re-export primary types for convenience
pub use actor::{ActorClassifier, SessionContext, DEFAULT_ADMIN_MARKER};
pub use display::{display_name, display_value, ChangeSummary, DisplayFormatter};
pub use engine::{AccessDecisionEngine, EditDecision, UNGOVERNED_DESCRIPTION};
pub use error::{PolicyError, PolicyResult};
pub use registry::{FieldPolicy, PolicyFile, PolicyRegistry};
