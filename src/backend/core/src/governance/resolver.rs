//! Effective policy resolution.
//!
//! Two pure computations over the catalog and stored settings:
//!
//! 1. **Minimum role per action**: the tenant-configured threshold clamped into
//!    the action's `[system_min_role, system_max_role]` window.
//! 2. **Base rules**: the scope's own flags, overwritten by the parent Team's
//!    when `inherit_base_rules_from_team` is set, then by the Organization's
//!    when `inherit_base_rules_from_org` is set. The Organization step runs
//!    last and therefore wins.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::actions::{ActionPolicy, CapabilityFlag};
use super::catalog::PolicyCatalog;
use super::settings::{BaseRules, FieldError, FieldErrorKind, GovernanceSettings, Limits, SettingsUpdate};
use crate::error::{GovernanceError, Result};
use crate::models::{RoleName, ScopeId, ScopeInstance, ScopeType};
use crate::roles::RoleHierarchy;
use crate::store::StoreTransaction;

// ═══════════════════════════════════════════════════════════════════════════════
// Settings Lineage
// ═══════════════════════════════════════════════════════════════════════════════

/// A scope's settings together with those of its live ancestors.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsLineage {
    pub own: GovernanceSettings,
    pub team: Option<GovernanceSettings>,
    pub organization: Option<GovernanceSettings>,
}

impl SettingsLineage {
    /// Lineage of a scope with no ancestors.
    pub fn standalone(own: GovernanceSettings) -> Self {
        Self {
            own,
            team: None,
            organization: None,
        }
    }

    pub fn with_team(mut self, team: GovernanceSettings) -> Self {
        self.team = Some(team);
        self
    }

    pub fn with_organization(mut self, organization: GovernanceSettings) -> Self {
        self.organization = Some(organization);
        self
    }

    /// Read the lineage of `scope` inside an open transaction.
    ///
    /// Deleted ancestors contribute nothing.
    pub async fn load(tx: &mut dyn StoreTransaction, scope: &ScopeInstance) -> Result<Self> {
        let own = tx.settings(scope.id).await?.ok_or_else(|| {
            GovernanceError::Inconsistent(format!("scope {} has no governance settings", scope.id))
        })?;

        let team = match scope.team {
            Some(id) => tx.settings(id).await?,
            None => None,
        };
        let organization = match scope.organization {
            Some(id) => tx.settings(id).await?,
            None => None,
        };

        Ok(Self {
            own,
            team,
            organization,
        })
    }

    pub fn scope(&self) -> ScopeId {
        self.own.scope
    }

    pub fn scope_type(&self) -> ScopeType {
        self.own.scope_type
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Effective Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything enforced on a scope after clamping and inheritance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectivePolicy {
    pub scope: ScopeId,
    pub scope_type: ScopeType,
    pub min_roles: BTreeMap<String, RoleName>,
    pub base_rules: BaseRules,
    /// Every flag that applies to the scope type, post-cascade.
    pub flags: BTreeMap<CapabilityFlag, bool>,
    pub default_member_role: RoleName,
    pub limits: Limits,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Resolver
// ═══════════════════════════════════════════════════════════════════════════════

/// Combines the catalog with stored settings.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    catalog: Arc<PolicyCatalog>,
}

impl PolicyResolver {
    pub fn new(catalog: Arc<PolicyCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    fn policy(&self, scope_type: ScopeType, action: &str) -> Result<&ActionPolicy> {
        self.catalog
            .policy(scope_type, action)
            .ok_or_else(|| GovernanceError::UnknownAction {
                scope_type,
                action: action.to_string(),
            })
    }

    /// The minimum role enforced for `action` on a scope with these settings.
    pub fn effective_min_role(
        &self,
        scope_type: ScopeType,
        settings: &GovernanceSettings,
        action: &str,
    ) -> Result<RoleName> {
        let policy = self.policy(scope_type, action)?;
        if !policy.configurable {
            return Ok(policy.default_role.clone());
        }

        let hierarchy = self.catalog.hierarchy(scope_type);
        let configured = settings
            .configured_min_role(action)
            .filter(|role| hierarchy.contains(role.as_str()))
            .unwrap_or(&policy.default_role);

        Ok(clamp(hierarchy, policy, configured))
    }

    /// The cascaded base rules for a lineage.
    pub fn effective_base_rules(lineage: &SettingsLineage) -> BaseRules {
        let mut rules = lineage.own.base;

        if lineage.own.inherit_base_rules_from_team {
            if let Some(team) = &lineage.team {
                rules = team.base;
            }
        }
        if lineage.own.inherit_base_rules_from_org {
            if let Some(organization) = &lineage.organization {
                rules = organization.base;
            }
        }

        rules
    }

    /// Post-cascade value of any capability flag.
    pub fn effective_flag(lineage: &SettingsLineage, flag: CapabilityFlag) -> bool {
        Self::effective_base_rules(lineage)
            .get(flag)
            .unwrap_or_else(|| lineage.own.flag(flag))
    }

    /// Per-action thresholds and cascaded flags, for settings display.
    pub fn resolve_effective_policy(&self, lineage: &SettingsLineage) -> Result<EffectivePolicy> {
        let scope_type = lineage.scope_type();
        let base_rules = Self::effective_base_rules(lineage);

        let mut min_roles = BTreeMap::new();
        for policy in self.catalog.actions().for_scope(scope_type) {
            let role = self.effective_min_role(scope_type, &lineage.own, &policy.action)?;
            min_roles.insert(policy.action.clone(), role);
        }

        let flags = CapabilityFlag::ALL
            .into_iter()
            .filter(|flag| flag.applies_to(scope_type))
            .map(|flag| {
                let value = base_rules.get(flag).unwrap_or_else(|| lineage.own.flag(flag));
                (flag, value)
            })
            .collect();

        Ok(EffectivePolicy {
            scope: lineage.scope(),
            scope_type,
            min_roles,
            base_rules,
            flags,
            default_member_role: lineage.own.default_member_role.clone(),
            limits: lineage.own.limits,
        })
    }

    /// Check a proposed patch. Every violation is reported, not just the first.
    pub fn validate_governance_update(
        &self,
        scope_type: ScopeType,
        update: &SettingsUpdate,
    ) -> std::result::Result<(), Vec<FieldError>> {
        let hierarchy = self.catalog.hierarchy(scope_type);
        let mut errors = Vec::new();

        for (action, role) in &update.min_roles {
            let field = format!("min_roles.{}", action);
            let Some(policy) = self.catalog.policy(scope_type, action) else {
                errors.push(FieldError::new(
                    field,
                    FieldErrorKind::UnknownAction,
                    format!("{} has no action '{}'", scope_type, action),
                ));
                continue;
            };
            let Some(rank) = hierarchy.rank_of(role.as_str()) else {
                errors.push(unknown_role(field, scope_type, role));
                continue;
            };
            if !policy.configurable {
                if *role != policy.default_role {
                    errors.push(FieldError::new(
                        field,
                        FieldErrorKind::NotConfigurable,
                        format!("'{}' is fixed at {}", action, policy.default_role),
                    ));
                }
                continue;
            }
            // Catalog validation guarantees both bounds are in the hierarchy.
            let min = hierarchy.rank_of(policy.system_min_role.as_str()).unwrap_or(0);
            let max = hierarchy.rank_of(policy.system_max_role.as_str()).unwrap_or(u8::MAX);
            if rank < min {
                errors.push(FieldError::below_minimum(field, role, &policy.system_min_role));
            } else if rank > max {
                errors.push(FieldError::above_maximum(field, role, &policy.system_max_role));
            }
        }

        if let Some(role) = &update.default_member_role {
            let field = "default_member_role";
            if !hierarchy.contains(role.as_str()) {
                errors.push(unknown_role(field.to_string(), scope_type, role));
            } else if hierarchy.is_top(role.as_str()) {
                errors.push(FieldError::new(
                    field,
                    FieldErrorKind::ReservedRole,
                    format!("{} is only granted through ownership transfer", role),
                ));
            }
        }

        for flag in update.flags.keys() {
            if !flag.applies_to(scope_type) {
                errors.push(not_applicable(format!("flags.{}", flag), scope_type));
            }
        }

        if update.only_assignee_can_update_task.is_some() && scope_type != ScopeType::Project {
            errors.push(not_applicable("only_assignee_can_update_task".into(), scope_type));
        }

        if let Some(0) = update.max_members {
            errors.push(must_be_positive("max_members"));
        }
        match update.max_teams {
            Some(_) if scope_type != ScopeType::Organization => {
                errors.push(not_applicable("max_teams".into(), scope_type))
            }
            Some(0) => errors.push(must_be_positive("max_teams")),
            _ => {}
        }
        match update.max_projects {
            Some(_) if scope_type == ScopeType::Project => {
                errors.push(not_applicable("max_projects".into(), scope_type))
            }
            Some(0) => errors.push(must_be_positive("max_projects")),
            _ => {}
        }

        if update.inherit_base_rules_from_team.is_some() && scope_type != ScopeType::Project {
            errors.push(not_applicable("inherit_base_rules_from_team".into(), scope_type));
        }
        if update.inherit_base_rules_from_org.is_some() && scope_type == ScopeType::Organization {
            errors.push(not_applicable("inherit_base_rules_from_org".into(), scope_type));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Clamp `configured` into the policy's system window.
fn clamp(hierarchy: &RoleHierarchy, policy: &ActionPolicy, configured: &RoleName) -> RoleName {
    let rank = |role: &RoleName| hierarchy.rank_of(role.as_str());
    match (rank(configured), rank(&policy.system_min_role), rank(&policy.system_max_role)) {
        (Some(c), Some(min), _) if c < min => policy.system_min_role.clone(),
        (Some(c), _, Some(max)) if c > max => policy.system_max_role.clone(),
        (Some(_), _, _) => configured.clone(),
        (None, _, _) => policy.default_role.clone(),
    }
}

fn unknown_role(field: String, scope_type: ScopeType, role: &RoleName) -> FieldError {
    FieldError::new(
        field,
        FieldErrorKind::UnknownRole,
        format!("{} is not a {} role", role, scope_type),
    )
}

fn not_applicable(field: String, scope_type: ScopeType) -> FieldError {
    FieldError::new(
        field,
        FieldErrorKind::NotApplicable,
        format!("does not apply to a {}", scope_type),
    )
}

fn must_be_positive(field: &str) -> FieldError {
    FieldError::new(field, FieldErrorKind::MustBePositive, "must be at least 1")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
