#![allow(clippy::result_large_err)]
//! # Warden Core
//!
//! Membership governance and role-threshold authorization for multi-tenant
//! collaboration hierarchies (Organization → Team → Project → Task).
//!
//! ## Architecture
//!
//! - **Roles**: per scope-type role hierarchies with strictly ordered ranks
//! - **Governance**: the fixed action policy table, tenant-configured settings,
//!   and the resolver that clamps configured thresholds and cascades base rules
//! - **Authorization**: the engine deciding whether an actor may perform an
//!   action on a scope (optionally against a target member)
//! - **Membership**: the lifecycle manager (add, remove, self-remove, role
//!   updates, ownership transfer) enforcing last-holder and capacity invariants
//! - **Store**: transactional repository capabilities with in-memory and
//!   PostgreSQL implementations
//! - **Telemetry**: structured logging and decision metrics

pub mod authz;
pub mod config;
pub mod error;
pub mod governance;
pub mod invite;
pub mod membership;
pub mod models;
pub mod roles;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorSeverity, GovernanceError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::authz::{AllowReason, AuthzRequest, Authorizer, Decision, DenyReason};
    pub use crate::config::{Config, GovernanceDefaults};
    pub use crate::error::{ErrorCode, ErrorSeverity, GovernanceError, Result};
    pub use crate::governance::{
        actions, ActionPolicy, ActionTable, BaseRules, CapabilityFlag, EffectivePolicy,
        FieldError, GovernanceSettings, PolicyCatalog, PolicyResolver, SettingsLineage,
        SettingsUpdate,
    };
    pub use crate::invite::InviteRedemption;
    pub use crate::membership::MembershipManager;
    pub use crate::models::{
        Membership, NewScope, PrincipalId, RoleName, ScopeId, ScopeInstance, ScopeType,
    };
    pub use crate::roles::{RoleHierarchy, RoleRegistry};
    pub use crate::store::{memory::MemoryStore, Store, StoreError, StoreTransaction};
}
