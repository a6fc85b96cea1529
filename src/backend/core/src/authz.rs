//! Authorization engine.
//!
//! Decides whether an actor may perform an action on a scope instance,
//! optionally against a target member and with a role being assigned. Rules
//! are evaluated in a fixed order and the first failing rule determines the
//! deny reason:
//!
//! 1. The holder of the scope's top role is always allowed.
//! 2. The action's gate flag (after inheritance) must be on.
//! 3. The actor must be a member.
//! 4. The actor's role must reach the effective minimum role.
//! 5. For member-targeting actions the actor must strictly outrank the target.
//! 6. For role-assigning actions the assigned role must rank strictly below
//!    the actor's own role.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GovernanceError, Result};
use crate::governance::{PolicyCatalog, PolicyResolver, SettingsLineage};
use crate::models::{PrincipalId, RoleName, ScopeId, ScopeInstance, ScopeType};
use crate::roles::RoleHierarchy;
use crate::store::{Store, StoreTransaction};
use crate::telemetry::metrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Request / Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// One authorization question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthzRequest {
    pub actor: PrincipalId,
    pub scope: ScopeId,
    pub action: String,
    pub target: Option<PrincipalId>,
    pub assigned_role: Option<RoleName>,
}

impl AuthzRequest {
    pub fn new(actor: impl Into<PrincipalId>, scope: ScopeId, action: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            scope,
            action: action.into(),
            target: None,
            assigned_role: None,
        }
    }

    /// The member the action operates on.
    pub fn on_target(mut self, target: impl Into<PrincipalId>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// The role the action hands out.
    pub fn assigning(mut self, role: impl Into<RoleName>) -> Self {
        self.assigned_role = Some(role.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AllowReason {
    /// The actor holds the scope's top role.
    Owner,
    /// The actor passed every rule. `approval_required` mirrors the action's
    /// approval flag; enforcing an approval flow is up to the caller.
    RoleThreshold { approval_required: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DenyReason {
    ActionDisabled {
        action: String,
        flag: crate::governance::CapabilityFlag,
    },
    NotAMember {
        principal: PrincipalId,
    },
    InsufficientRole {
        action: String,
        required: RoleName,
        actual: RoleName,
    },
    CannotActOnEqualOrHigherRole {
        target: PrincipalId,
    },
    CannotGrantEqualOrHigherRole {
        role: RoleName,
    },
    InvalidRole {
        scope_type: ScopeType,
        role: RoleName,
    },
}

impl DenyReason {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionDisabled { .. } => "action_disabled",
            Self::NotAMember { .. } => "not_a_member",
            Self::InsufficientRole { .. } => "insufficient_role",
            Self::CannotActOnEqualOrHigherRole { .. } => "cannot_act_on_equal_or_higher_role",
            Self::CannotGrantEqualOrHigherRole { .. } => "cannot_grant_equal_or_higher_role",
            Self::InvalidRole { .. } => "invalid_role",
        }
    }

    pub fn into_error(self, scope: ScopeId) -> GovernanceError {
        match self {
            Self::ActionDisabled { action, flag } => GovernanceError::ActionDisabled { scope, action, flag },
            Self::NotAMember { principal } => GovernanceError::NotAMember { scope, principal },
            Self::InsufficientRole {
                action,
                required,
                actual,
            } => GovernanceError::InsufficientRole {
                scope,
                action,
                required,
                actual,
            },
            Self::CannotActOnEqualOrHigherRole { target } => {
                GovernanceError::CannotActOnEqualOrHigherRole { scope, target }
            }
            Self::CannotGrantEqualOrHigherRole { role } => {
                GovernanceError::CannotGrantEqualOrHigherRole { scope, role }
            }
            Self::InvalidRole { scope_type, role } => GovernanceError::InvalidRole { scope_type, role },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Decision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    pub fn approval_required(&self) -> bool {
        matches!(
            self,
            Self::Allow(AllowReason::RoleThreshold {
                approval_required: true
            })
        )
    }

    /// `Ok` for an allow, the matching [`GovernanceError`] for a deny.
    pub fn into_result(self, scope: ScopeId) -> Result<AllowReason> {
        match self {
            Self::Allow(reason) => Ok(reason),
            Self::Deny(reason) => Err(reason.into_error(scope)),
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Allow(_) => "allow",
            Self::Deny(reason) => reason.as_str(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Predicates
// ═══════════════════════════════════════════════════════════════════════════════

pub fn is_owner(hierarchy: &RoleHierarchy, role: &RoleName) -> bool {
    hierarchy.is_top(role.as_str())
}

pub fn at_least(hierarchy: &RoleHierarchy, role: &RoleName, required: &RoleName) -> bool {
    hierarchy.at_least(role.as_str(), required.as_str())
}

/// Strictly greater rank; equal-ranked peers never outrank each other.
pub fn outranks(hierarchy: &RoleHierarchy, role: &RoleName, other: &RoleName) -> bool {
    hierarchy.outranks(role.as_str(), other.as_str())
}

/// An actor may only hand out roles ranked strictly below its own.
pub fn can_grant(hierarchy: &RoleHierarchy, actor_role: &RoleName, assigned: &RoleName) -> bool {
    outranks(hierarchy, actor_role, assigned)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authorizer
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluates [`AuthzRequest`]s against the catalog and live store state.
#[derive(Clone)]
pub struct Authorizer {
    catalog: Arc<PolicyCatalog>,
    resolver: PolicyResolver,
    store: Arc<dyn Store>,
}

impl Authorizer {
    pub fn new(catalog: Arc<PolicyCatalog>, store: Arc<dyn Store>) -> Self {
        Self {
            resolver: PolicyResolver::new(catalog.clone()),
            catalog,
            store,
        }
    }

    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    /// Decide a request in its own read-only transaction.
    pub async fn authorize(&self, request: &AuthzRequest) -> Result<Decision> {
        let mut tx = self.store.begin().await?;
        let decision = self.authorize_in(tx.as_mut(), request).await;
        tx.rollback().await?;
        decision
    }

    /// Decide a request inside a caller-owned transaction.
    pub(crate) async fn authorize_in(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &AuthzRequest,
    ) -> Result<Decision> {
        let scope = tx
            .scope(request.scope)
            .await?
            .ok_or(GovernanceError::ScopeNotFound {
                scope: request.scope,
            })?;
        let lineage = SettingsLineage::load(tx, &scope).await?;
        self.evaluate(tx, &scope, &lineage, request).await
    }

    /// Apply the rules against an already-loaded scope and lineage.
    pub(crate) async fn evaluate(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: &ScopeInstance,
        lineage: &SettingsLineage,
        request: &AuthzRequest,
    ) -> Result<Decision> {
        let decision = self.decide(tx, scope, lineage, request).await?;

        debug!(
            actor = %request.actor,
            scope = %scope.id,
            scope_type = %scope.scope_type,
            action = %request.action,
            target = ?request.target,
            outcome = decision.outcome(),
            "Authorization decided"
        );
        metrics::record_decision(scope.scope_type, &request.action, decision.outcome());

        Ok(decision)
    }

    async fn decide(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: &ScopeInstance,
        lineage: &SettingsLineage,
        request: &AuthzRequest,
    ) -> Result<Decision> {
        let scope_type = scope.scope_type;
        let hierarchy = self.catalog.hierarchy(scope_type);
        let policy = self
            .catalog
            .policy(scope_type, &request.action)
            .ok_or_else(|| GovernanceError::UnknownAction {
                scope_type,
                action: request.action.clone(),
            })?;

        let actor = tx.membership(&request.actor, scope.id).await?;

        // Rule 1
        if let Some(membership) = &actor {
            if is_owner(hierarchy, &membership.role) {
                return Ok(Decision::Allow(AllowReason::Owner));
            }
        }

        // Rule 2
        let required = self
            .resolver
            .effective_min_role(scope_type, &lineage.own, &request.action)?;
        if let Some(flag) = policy.gate {
            if !PolicyResolver::effective_flag(lineage, flag) {
                return Ok(Decision::Deny(DenyReason::ActionDisabled {
                    action: request.action.clone(),
                    flag,
                }));
            }
        }

        // Rule 3
        let Some(actor) = actor else {
            return Ok(Decision::Deny(DenyReason::NotAMember {
                principal: request.actor.clone(),
            }));
        };

        // Rule 4
        if !at_least(hierarchy, &actor.role, &required) {
            return Ok(Decision::Deny(DenyReason::InsufficientRole {
                action: request.action.clone(),
                required,
                actual: actor.role,
            }));
        }

        // Rule 5
        if policy.targets_member {
            if let Some(target) = &request.target {
                match tx.membership(target, scope.id).await? {
                    None => {
                        return Ok(Decision::Deny(DenyReason::NotAMember {
                            principal: target.clone(),
                        }))
                    }
                    Some(membership) if !outranks(hierarchy, &actor.role, &membership.role) => {
                        return Ok(Decision::Deny(DenyReason::CannotActOnEqualOrHigherRole {
                            target: target.clone(),
                        }))
                    }
                    Some(_) => {}
                }
            }
        }

        // Rule 6
        if policy.assigns_role {
            if let Some(role) = &request.assigned_role {
                if !hierarchy.contains(role.as_str()) {
                    return Ok(Decision::Deny(DenyReason::InvalidRole {
                        scope_type,
                        role: role.clone(),
                    }));
                }
                if !can_grant(hierarchy, &actor.role, role) {
                    return Ok(Decision::Deny(DenyReason::CannotGrantEqualOrHigherRole {
                        role: role.clone(),
                    }));
                }
            }
        }

        let approval_required = policy
            .approval
            .map(|flag| PolicyResolver::effective_flag(lineage, flag))
            .unwrap_or(false);
        Ok(Decision::Allow(AllowReason::RoleThreshold { approval_required }))
    }
}
