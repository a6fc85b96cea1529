//! Governance: action policies, tenant settings, and effective-policy resolution.

pub mod actions;
pub mod catalog;
pub mod resolver;
pub mod settings;

pub use actions::{ActionPolicy, ActionTable, CapabilityFlag};
pub use catalog::PolicyCatalog;
pub use resolver::{EffectivePolicy, PolicyResolver, SettingsLineage};
pub use settings::{
    BaseRules, CreationControls, FieldError, FieldErrorKind, GovernanceSettings, Limits,
    SettingsUpdate, TaskRules,
};
