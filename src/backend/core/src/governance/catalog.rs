//! The immutable role + action catalog shared by every component.

use std::sync::{Arc, OnceLock};

use super::actions::{ActionPolicy, ActionTable};
use crate::models::{RoleName, ScopeType};
use crate::roles::{RegistryError, RoleHierarchy, RoleRegistry};

/// Role hierarchies and action policies, validated against each other.
///
/// Built once at process start and shared behind an `Arc`; reads need no
/// synchronization.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    roles: RoleRegistry,
    actions: ActionTable,
}

static BUILTIN: OnceLock<Arc<PolicyCatalog>> = OnceLock::new();

impl PolicyCatalog {
    /// Validate and assemble a catalog from caller-supplied tables.
    pub fn new(roles: RoleRegistry, actions: ActionTable) -> Result<Self, RegistryError> {
        for policy in actions.iter() {
            validate_policy(roles.hierarchy(policy.scope_type), policy)?;
        }
        Ok(Self { roles, actions })
    }

    /// The built-in catalog, constructed on first use.
    pub fn builtin() -> Arc<Self> {
        BUILTIN
            .get_or_init(|| {
                Arc::new(Self {
                    roles: RoleRegistry::builtin(),
                    actions: ActionTable::builtin(),
                })
            })
            .clone()
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    pub fn hierarchy(&self, scope_type: ScopeType) -> &RoleHierarchy {
        self.roles.hierarchy(scope_type)
    }

    pub fn policy(&self, scope_type: ScopeType, action: &str) -> Option<&ActionPolicy> {
        self.actions.get(scope_type, action)
    }
}

fn validate_policy(hierarchy: &RoleHierarchy, policy: &ActionPolicy) -> Result<(), RegistryError> {
    let rank = |role: &RoleName| {
        hierarchy
            .rank_of(role.as_str())
            .ok_or_else(|| RegistryError::MissingRole {
                scope_type: policy.scope_type,
                role: role.clone(),
            })
    };

    let min = rank(&policy.system_min_role)?;
    let max = rank(&policy.system_max_role)?;
    let default = rank(&policy.default_role)?;

    if min > max {
        return Err(RegistryError::InvertedBounds {
            scope_type: policy.scope_type,
            action: policy.action.clone(),
            min: policy.system_min_role.clone(),
            max: policy.system_max_role.clone(),
        });
    }
    if default < min || default > max {
        return Err(RegistryError::DefaultOutOfBounds {
            scope_type: policy.scope_type,
            action: policy.action.clone(),
            default: policy.default_role.clone(),
            min: policy.system_min_role.clone(),
            max: policy.system_max_role.clone(),
        });
    }
    Ok(())
}
