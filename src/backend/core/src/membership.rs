//! Membership lifecycle manager.
//!
//! Every operation runs inside a single store transaction: the scope row is
//! locked first, authorization and invariant checks read the same snapshot
//! the mutation writes to, and any error rolls the whole transaction back.
//!
//! Invariants enforced here:
//! - at most one active membership per (principal, scope)
//! - the scope's top role is held by exactly the owner, and only ownership
//!   transfer moves it
//! - the last holder of the scope's critical role (ADMIN / MANAGER) cannot be
//!   removed or demoted, except by the owner acting directly
//! - member, team and project counts stay within the configured limits

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::authz::{AllowReason, AuthzRequest, Authorizer};
use crate::config::GovernanceDefaults;
use crate::error::{GovernanceError, Result};
use crate::governance::actions::{CREATE_PROJECT, CREATE_TEAM, INVITE_MEMBER, REMOVE_MEMBER, UPDATE_MEMBER};
use crate::governance::{
    CapabilityFlag, EffectivePolicy, GovernanceSettings, PolicyCatalog, PolicyResolver,
    SettingsLineage, SettingsUpdate,
};
use crate::invite::InviteRedemption;
use crate::models::{
    Membership, NewScope, PrincipalId, RoleName, ScopeId, ScopeInstance, ScopeType,
};
use crate::store::{Store, StoreTransaction};
use crate::telemetry::metrics;

/// Executes membership and scope mutations against a [`Store`].
#[derive(Clone)]
pub struct MembershipManager {
    authorizer: Authorizer,
    catalog: Arc<PolicyCatalog>,
    store: Arc<dyn Store>,
    defaults: GovernanceDefaults,
}

impl MembershipManager {
    pub fn new(catalog: Arc<PolicyCatalog>, store: Arc<dyn Store>, defaults: GovernanceDefaults) -> Self {
        Self {
            authorizer: Authorizer::new(catalog.clone(), store.clone()),
            catalog,
            store,
            defaults,
        }
    }

    /// Manager over the built-in catalog and default limits.
    pub fn with_builtin(store: Arc<dyn Store>) -> Self {
        Self::new(PolicyCatalog::builtin(), store, GovernanceDefaults::default())
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    fn resolver(&self) -> &PolicyResolver {
        self.authorizer.resolver()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Transaction plumbing
    // ═══════════════════════════════════════════════════════════════════════════

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        self.store.begin().await.map_err(|e| {
            let err = GovernanceError::from(e);
            err.log();
            err
        })
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(
        &self,
        operation: &'static str,
        tx: Box<dyn StoreTransaction>,
        result: Result<(T, ScopeType)>,
    ) -> Result<T> {
        match result {
            Ok((value, scope_type)) => {
                if let Err(e) = tx.commit().await {
                    let err = GovernanceError::from(e);
                    err.log();
                    return Err(err);
                }
                info!(operation, scope_type = %scope_type, "Governance mutation committed");
                metrics::record_mutation(operation, scope_type);
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(operation, error = %rollback, "Rollback failed");
                }
                err.log();
                Err(err)
            }
        }
    }

    /// Close a read-only transaction.
    async fn close<T>(&self, tx: Box<dyn StoreTransaction>, result: Result<T>) -> Result<T> {
        let rollback = tx.rollback().await;
        let value = result.map_err(|err| {
            err.log();
            err
        })?;
        rollback?;
        Ok(value)
    }

    async fn lock_live_scope(tx: &mut dyn StoreTransaction, id: ScopeId) -> Result<ScopeInstance> {
        tx.lock_scope(id)
            .await?
            .ok_or(GovernanceError::ScopeNotFound { scope: id })
    }

    async fn live_scope(tx: &mut dyn StoreTransaction, id: ScopeId) -> Result<ScopeInstance> {
        tx.scope(id).await?.ok_or(GovernanceError::ScopeNotFound { scope: id })
    }

    async fn own_settings(tx: &mut dyn StoreTransaction, scope: &ScopeInstance) -> Result<GovernanceSettings> {
        tx.settings(scope.id).await?.ok_or_else(|| {
            GovernanceError::Inconsistent(format!("scope {} has no governance settings", scope.id))
        })
    }

    /// Owner of the scope, or owner of its parent organization.
    async fn may_administer(
        tx: &mut dyn StoreTransaction,
        scope: &ScopeInstance,
        actor: &PrincipalId,
    ) -> Result<bool> {
        if scope.is_owned_by(actor) {
            return Ok(true);
        }
        match scope.organization {
            Some(org) => Ok(tx.scope(org).await?.is_some_and(|o| o.is_owned_by(actor))),
            None => Ok(false),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Add
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a membership without an authorization check.
    ///
    /// `role` defaults to the scope's configured default member role.
    #[instrument(skip_all, fields(scope = %scope, principal = %principal))]
    pub async fn add_member(
        &self,
        scope: ScopeId,
        principal: PrincipalId,
        role: Option<RoleName>,
    ) -> Result<Membership> {
        let mut tx = self.begin().await?;
        let result = self.add_member_in(tx.as_mut(), scope, principal, role).await;
        self.finish("add_member", tx, result).await
    }

    async fn add_member_in(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: ScopeId,
        principal: PrincipalId,
        role: Option<RoleName>,
    ) -> Result<(Membership, ScopeType)> {
        let scope = Self::lock_live_scope(tx, scope).await?;
        let settings = Self::own_settings(tx, &scope).await?;
        let membership = self.insert_member(tx, &scope, &settings, principal, role).await?;
        Ok((membership, scope.scope_type))
    }

    /// Create a membership on behalf of `actor`, who must pass `invite_member`.
    #[instrument(skip_all, fields(actor = %actor, scope = %scope, principal = %principal))]
    pub async fn add_member_as(
        &self,
        actor: &PrincipalId,
        scope: ScopeId,
        principal: PrincipalId,
        role: Option<RoleName>,
    ) -> Result<Membership> {
        let mut tx = self.begin().await?;
        let result = self
            .add_member_as_in(tx.as_mut(), actor, scope, principal, role)
            .await;
        self.finish("add_member", tx, result).await
    }

    async fn add_member_as_in(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &PrincipalId,
        scope: ScopeId,
        principal: PrincipalId,
        role: Option<RoleName>,
    ) -> Result<(Membership, ScopeType)> {
        let scope = Self::lock_live_scope(tx, scope).await?;
        let lineage = SettingsLineage::load(tx, &scope).await?;
        let role = role.unwrap_or_else(|| lineage.own.default_member_role.clone());

        let request = AuthzRequest::new(actor.clone(), scope.id, INVITE_MEMBER).assigning(role.clone());
        self.authorizer
            .evaluate(tx, &scope, &lineage, &request)
            .await?
            .into_result(scope.id)?;

        let membership = self
            .insert_member(tx, &scope, &lineage.own, principal, Some(role))
            .await?;
        Ok((membership, scope.scope_type))
    }

    /// Complete an invitation handed over by the token collaborator.
    pub async fn redeem_invite(&self, invite: InviteRedemption) -> Result<Membership> {
        let InviteRedemption { principal, scope, role } = invite;
        self.add_member(scope, principal, role).await
    }

    async fn insert_member(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: &ScopeInstance,
        settings: &GovernanceSettings,
        principal: PrincipalId,
        role: Option<RoleName>,
    ) -> Result<Membership> {
        if tx.membership(&principal, scope.id).await?.is_some() {
            return Err(GovernanceError::AlreadyMember {
                scope: scope.id,
                principal,
            });
        }

        let limit = settings.limits.max_members;
        if tx.count_members(scope.id).await? >= limit {
            warn!(scope = %scope.id, limit, "Member limit reached");
            return Err(GovernanceError::CapacityExceeded {
                scope: scope.id,
                resource: "members",
                limit,
            });
        }

        let role = role.unwrap_or_else(|| settings.default_member_role.clone());
        let hierarchy = self.catalog.hierarchy(scope.scope_type);
        if !hierarchy.contains(role.as_str()) || hierarchy.is_top(role.as_str()) {
            return Err(GovernanceError::InvalidRole {
                scope_type: scope.scope_type,
                role,
            });
        }

        let membership = Membership::new(principal, scope.id, role);
        tx.insert_membership(&membership).await?;
        Ok(membership)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Remove
    // ═══════════════════════════════════════════════════════════════════════════

    /// Remove `target` from the scope on behalf of `actor`.
    #[instrument(skip_all, fields(actor = %actor, scope = %scope, target = %target))]
    pub async fn remove_member(
        &self,
        actor: &PrincipalId,
        scope: ScopeId,
        target: &PrincipalId,
    ) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = self.remove_member_in(tx.as_mut(), actor, scope, target).await;
        self.finish("remove_member", tx, result).await
    }

    async fn remove_member_in(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &PrincipalId,
        scope: ScopeId,
        target: &PrincipalId,
    ) -> Result<((), ScopeType)> {
        let scope = Self::lock_live_scope(tx, scope).await?;
        let lineage = SettingsLineage::load(tx, &scope).await?;

        let request = AuthzRequest::new(actor.clone(), scope.id, REMOVE_MEMBER).on_target(target.clone());
        let reason = self
            .authorizer
            .evaluate(tx, &scope, &lineage, &request)
            .await?
            .into_result(scope.id)?;

        if scope.is_owned_by(target) {
            return Err(GovernanceError::CannotRemoveOwner { scope: scope.id });
        }

        let membership = self.lock_member(tx, &scope, target).await?;
        let owner_acting = reason == AllowReason::Owner;
        self.protect_last_holder(tx, &scope, &membership, None, owner_acting)
            .await?;

        tx.delete_membership(membership.id, Utc::now()).await?;
        Ok(((), scope.scope_type))
    }

    /// Leave a scope.
    #[instrument(skip_all, fields(scope = %scope, principal = %principal))]
    pub async fn self_remove(&self, scope: ScopeId, principal: &PrincipalId) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = self.self_remove_in(tx.as_mut(), scope, principal).await;
        self.finish("self_remove", tx, result).await
    }

    async fn self_remove_in(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: ScopeId,
        principal: &PrincipalId,
    ) -> Result<((), ScopeType)> {
        let scope = Self::lock_live_scope(tx, scope).await?;
        let lineage = SettingsLineage::load(tx, &scope).await?;

        if !PolicyResolver::effective_flag(&lineage, CapabilityFlag::AllowSelfRemoval) {
            return Err(GovernanceError::SelfRemovalDisabled { scope: scope.id });
        }
        if scope.is_owned_by(principal) {
            return Err(GovernanceError::OwnerMustTransferFirst { scope: scope.id });
        }

        let membership = self.lock_member(tx, &scope, principal).await?;
        self.protect_last_holder(tx, &scope, &membership, None, false)
            .await?;

        tx.delete_membership(membership.id, Utc::now()).await?;
        Ok(((), scope.scope_type))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Update role
    // ═══════════════════════════════════════════════════════════════════════════

    /// Change `target`'s role on behalf of `actor`.
    #[instrument(skip_all, fields(actor = %actor, scope = %scope, target = %target, role = %new_role))]
    pub async fn update_role(
        &self,
        actor: &PrincipalId,
        scope: ScopeId,
        target: &PrincipalId,
        new_role: RoleName,
    ) -> Result<Membership> {
        let mut tx = self.begin().await?;
        let result = self
            .update_role_in(tx.as_mut(), actor, scope, target, new_role)
            .await;
        self.finish("update_role", tx, result).await
    }

    async fn update_role_in(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &PrincipalId,
        scope: ScopeId,
        target: &PrincipalId,
        new_role: RoleName,
    ) -> Result<(Membership, ScopeType)> {
        let scope = Self::lock_live_scope(tx, scope).await?;
        let hierarchy = self.catalog.hierarchy(scope.scope_type);

        if !hierarchy.contains(new_role.as_str()) || hierarchy.is_top(new_role.as_str()) {
            return Err(GovernanceError::InvalidRole {
                scope_type: scope.scope_type,
                role: new_role,
            });
        }
        if scope.is_owned_by(target) {
            return Err(GovernanceError::OwnerMustTransferFirst { scope: scope.id });
        }

        let lineage = SettingsLineage::load(tx, &scope).await?;
        let request = AuthzRequest::new(actor.clone(), scope.id, UPDATE_MEMBER)
            .on_target(target.clone())
            .assigning(new_role.clone());
        let reason = self
            .authorizer
            .evaluate(tx, &scope, &lineage, &request)
            .await?
            .into_result(scope.id)?;

        let mut membership = self.lock_member(tx, &scope, target).await?;
        if membership.role == new_role {
            return Ok((membership, scope.scope_type));
        }

        let owner_acting = reason == AllowReason::Owner;
        self.protect_last_holder(tx, &scope, &membership, Some(&new_role), owner_acting)
            .await?;

        tx.update_membership_role(membership.id, &new_role).await?;
        membership.role = new_role;
        Ok((membership, scope.scope_type))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Transfer ownership
    // ═══════════════════════════════════════════════════════════════════════════

    /// Hand the scope's top role to `new_owner`; the previous owner is demoted
    /// to the critical role. All three writes commit together.
    #[instrument(skip_all, fields(actor = %actor, scope = %scope, new_owner = %new_owner))]
    pub async fn transfer_ownership(
        &self,
        actor: &PrincipalId,
        scope: ScopeId,
        new_owner: &PrincipalId,
    ) -> Result<ScopeInstance> {
        let mut tx = self.begin().await?;
        let result = self
            .transfer_ownership_in(tx.as_mut(), actor, scope, new_owner)
            .await;
        self.finish("transfer_ownership", tx, result).await
    }

    async fn transfer_ownership_in(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &PrincipalId,
        scope: ScopeId,
        new_owner: &PrincipalId,
    ) -> Result<(ScopeInstance, ScopeType)> {
        let mut scope = Self::lock_live_scope(tx, scope).await?;

        if !Self::may_administer(tx, &scope, actor).await? {
            return Err(GovernanceError::NotOwner {
                scope: scope.id,
                principal: actor.clone(),
            });
        }
        if scope.is_owned_by(new_owner) {
            return Err(GovernanceError::AlreadyOwner {
                scope: scope.id,
                principal: new_owner.clone(),
            });
        }

        let previous_owner = scope.owner.clone();
        let mut principals = vec![previous_owner.clone(), new_owner.clone()];
        principals.sort();
        let locked = tx.lock_memberships(scope.id, &principals).await?;

        let incoming = locked
            .iter()
            .find(|m| &m.principal == new_owner)
            .ok_or_else(|| GovernanceError::NotAMember {
                scope: scope.id,
                principal: new_owner.clone(),
            })?;
        if let Some(parent) = scope.membership_parent() {
            if tx.membership(new_owner, parent).await?.is_none() {
                return Err(GovernanceError::NotAMember {
                    scope: parent,
                    principal: new_owner.clone(),
                });
            }
        }
        let outgoing = locked
            .iter()
            .find(|m| m.principal == previous_owner)
            .ok_or_else(|| {
                GovernanceError::Inconsistent(format!(
                    "owner {} of {} holds no membership",
                    previous_owner, scope.id
                ))
            })?;

        let hierarchy = self.catalog.hierarchy(scope.scope_type);
        tx.update_membership_role(outgoing.id, hierarchy.critical())
            .await?;
        tx.update_membership_role(incoming.id, hierarchy.top()).await?;
        tx.update_owner(scope.id, new_owner).await?;

        info!(
            scope = %scope.id,
            from = %previous_owner,
            to = %new_owner,
            "Ownership transferred"
        );
        scope.owner = new_owner.clone();
        let scope_type = scope.scope_type;
        Ok((scope, scope_type))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Scope lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a scope with its default settings and `actor` as owner.
    #[instrument(skip_all, fields(actor = %actor, scope_type = %new.scope_type))]
    pub async fn create_scope(&self, actor: &PrincipalId, new: NewScope) -> Result<ScopeInstance> {
        let mut tx = self.begin().await?;
        let result = self.create_scope_in(tx.as_mut(), actor, new).await;
        self.finish("create_scope", tx, result).await
    }

    async fn create_scope_in(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &PrincipalId,
        new: NewScope,
    ) -> Result<(ScopeInstance, ScopeType)> {
        let (organization, team) = self.resolve_parents(tx, actor, &new).await?;

        let scope = ScopeInstance {
            id: ScopeId::generate(),
            scope_type: new.scope_type,
            name: new.name,
            owner: actor.clone(),
            organization,
            team,
            created_at: Utc::now(),
            deleted_at: None,
        };
        tx.insert_scope(&scope).await?;

        let settings = GovernanceSettings::defaults_for(scope.id, scope.scope_type, &self.catalog, &self.defaults);
        tx.put_settings(&settings).await?;

        let top = self.catalog.hierarchy(scope.scope_type).top().clone();
        tx.insert_membership(&Membership::new(actor.clone(), scope.id, top))
            .await?;

        let scope_type = scope.scope_type;
        Ok((scope, scope_type))
    }

    /// Check the parent references of a new scope and authorize creation on
    /// the immediate parent. Returns the (organization, team) references.
    async fn resolve_parents(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &PrincipalId,
        new: &NewScope,
    ) -> Result<(Option<ScopeId>, Option<ScopeId>)> {
        match new.scope_type {
            ScopeType::Organization if new.organization.is_some() || new.team.is_some() => {
                return Err(GovernanceError::InvalidParent(
                    "an organization cannot have a parent".into(),
                ));
            }
            ScopeType::Organization => return Ok((None, None)),
            ScopeType::Team if new.team.is_some() => {
                return Err(GovernanceError::InvalidParent(
                    "a team cannot be nested in another team".into(),
                ));
            }
            ScopeType::Team if new.organization.is_none() => {
                return Err(GovernanceError::InvalidParent(
                    "a team requires a parent organization".into(),
                ));
            }
            ScopeType::Project if new.organization.is_none() && new.team.is_none() => {
                return Err(GovernanceError::InvalidParent(
                    "a project requires a parent team or organization".into(),
                ));
            }
            _ => {}
        }

        let mut organization = new.organization;
        let mut immediate: Option<ScopeInstance> = None;

        if let Some(team_id) = new.team {
            let team = Self::lock_live_scope(tx, team_id).await?;
            if team.scope_type != ScopeType::Team {
                return Err(GovernanceError::InvalidParent(format!("{} is not a team", team_id)));
            }
            match organization {
                Some(org) if team.organization != Some(org) => {
                    return Err(GovernanceError::InvalidParent(format!(
                        "team {} does not belong to organization {}",
                        team_id, org
                    )));
                }
                None => organization = team.organization,
                Some(_) => {}
            }
            immediate = Some(team);
        }

        if let Some(org_id) = organization {
            let org = match &immediate {
                Some(_) => Self::live_scope(tx, org_id).await?,
                None => Self::lock_live_scope(tx, org_id).await?,
            };
            if org.scope_type != ScopeType::Organization {
                return Err(GovernanceError::InvalidParent(format!(
                    "{} is not an organization",
                    org_id
                )));
            }
            if immediate.is_none() {
                immediate = Some(org);
            }
        }

        let parent = immediate.ok_or_else(|| {
            GovernanceError::InvalidParent("no live parent scope".into())
        })?;

        let (action, resource) = match new.scope_type {
            ScopeType::Team => (CREATE_TEAM, "teams"),
            _ => (CREATE_PROJECT, "projects"),
        };

        let lineage = SettingsLineage::load(tx, &parent).await?;
        let request = AuthzRequest::new(actor.clone(), parent.id, action);
        self.authorizer
            .evaluate(tx, &parent, &lineage, &request)
            .await?
            .into_result(parent.id)?;

        let max = match new.scope_type {
            ScopeType::Team => lineage.own.limits.max_teams,
            _ => lineage.own.limits.max_projects,
        };
        if let Some(max) = max {
            if tx.count_children(parent.id, new.scope_type).await? >= max {
                warn!(parent = %parent.id, resource, limit = max, "Child scope limit reached");
                return Err(GovernanceError::CapacityExceeded {
                    scope: parent.id,
                    resource,
                    limit: max,
                });
            }
        }

        Ok((organization, new.team))
    }

    /// Soft-delete a scope. Memberships are kept for history.
    #[instrument(skip_all, fields(actor = %actor, scope = %scope))]
    pub async fn delete_scope(&self, actor: &PrincipalId, scope: ScopeId) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = self.delete_scope_in(tx.as_mut(), actor, scope).await;
        self.finish("delete_scope", tx, result).await
    }

    async fn delete_scope_in(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &PrincipalId,
        scope: ScopeId,
    ) -> Result<((), ScopeType)> {
        let scope = Self::lock_live_scope(tx, scope).await?;
        if !Self::may_administer(tx, &scope, actor).await? {
            return Err(GovernanceError::NotOwner {
                scope: scope.id,
                principal: actor.clone(),
            });
        }
        tx.soft_delete_scope(scope.id, Utc::now()).await?;
        Ok(((), scope.scope_type))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Settings
    // ═══════════════════════════════════════════════════════════════════════════

    /// Validate and apply a settings patch. Owner only.
    #[instrument(skip_all, fields(actor = %actor, scope = %scope))]
    pub async fn update_settings(
        &self,
        actor: &PrincipalId,
        scope: ScopeId,
        update: SettingsUpdate,
    ) -> Result<GovernanceSettings> {
        let mut tx = self.begin().await?;
        let result = self
            .update_settings_in(tx.as_mut(), actor, scope, &update)
            .await;
        self.finish("update_settings", tx, result).await
    }

    async fn update_settings_in(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &PrincipalId,
        scope: ScopeId,
        update: &SettingsUpdate,
    ) -> Result<(GovernanceSettings, ScopeType)> {
        let scope = Self::lock_live_scope(tx, scope).await?;
        if !scope.is_owned_by(actor) {
            return Err(GovernanceError::NotOwner {
                scope: scope.id,
                principal: actor.clone(),
            });
        }
        self.resolver()
            .validate_governance_update(scope.scope_type, update)
            .map_err(|errors| GovernanceError::SettingsOutOfBounds { errors })?;

        let mut settings = Self::own_settings(tx, &scope).await?;
        settings.apply(update);
        tx.put_settings(&settings).await?;
        Ok((settings, scope.scope_type))
    }

    /// Check a patch against a scope without applying it.
    pub async fn validate_governance_update(&self, scope: ScopeId, update: &SettingsUpdate) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = self.validate_update_in(tx.as_mut(), scope, update).await;
        self.close(tx, result).await
    }

    async fn validate_update_in(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: ScopeId,
        update: &SettingsUpdate,
    ) -> Result<()> {
        let scope = Self::live_scope(tx, scope).await?;
        self.resolver()
            .validate_governance_update(scope.scope_type, update)
            .map_err(|errors| GovernanceError::SettingsOutOfBounds { errors })
    }

    /// Effective thresholds and cascaded flags of a scope.
    pub async fn effective_policy(&self, scope: ScopeId) -> Result<EffectivePolicy> {
        let mut tx = self.begin().await?;
        let result = self.effective_policy_in(tx.as_mut(), scope).await;
        self.close(tx, result).await
    }

    async fn effective_policy_in(&self, tx: &mut dyn StoreTransaction, scope: ScopeId) -> Result<EffectivePolicy> {
        let scope = Self::live_scope(tx, scope).await?;
        let lineage = SettingsLineage::load(tx, &scope).await?;
        self.resolver().resolve_effective_policy(&lineage)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn scope(&self, scope: ScopeId) -> Result<ScopeInstance> {
        let mut tx = self.begin().await?;
        let result = Self::live_scope(tx.as_mut(), scope).await;
        self.close(tx, result).await
    }

    pub async fn settings(&self, scope: ScopeId) -> Result<GovernanceSettings> {
        let mut tx = self.begin().await?;
        let result = Self::settings_in(tx.as_mut(), scope).await;
        self.close(tx, result).await
    }

    async fn settings_in(tx: &mut dyn StoreTransaction, scope: ScopeId) -> Result<GovernanceSettings> {
        let scope = Self::live_scope(tx, scope).await?;
        Self::own_settings(tx, &scope).await
    }

    /// Active memberships of a scope, oldest first.
    pub async fn members(&self, scope: ScopeId) -> Result<Vec<Membership>> {
        let mut tx = self.begin().await?;
        let result = Self::members_in(tx.as_mut(), scope).await;
        self.close(tx, result).await
    }

    async fn members_in(tx: &mut dyn StoreTransaction, scope: ScopeId) -> Result<Vec<Membership>> {
        let scope = Self::live_scope(tx, scope).await?;
        Ok(tx.memberships(scope.id).await?)
    }

    pub async fn membership(&self, principal: &PrincipalId, scope: ScopeId) -> Result<Option<Membership>> {
        let mut tx = self.begin().await?;
        let result = Self::membership_in(tx.as_mut(), principal, scope).await;
        self.close(tx, result).await
    }

    async fn membership_in(
        tx: &mut dyn StoreTransaction,
        principal: &PrincipalId,
        scope: ScopeId,
    ) -> Result<Option<Membership>> {
        let scope = Self::live_scope(tx, scope).await?;
        Ok(tx.membership(principal, scope.id).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Invariant helpers
    // ═══════════════════════════════════════════════════════════════════════════

    async fn lock_member(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: &ScopeInstance,
        principal: &PrincipalId,
    ) -> Result<Membership> {
        tx.lock_memberships(scope.id, std::slice::from_ref(principal))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GovernanceError::NotAMember {
                scope: scope.id,
                principal: principal.clone(),
            })
    }

    /// Refuse to take the last holder of a protected role away from it.
    ///
    /// `new_role` is `None` for removals. The owner acting directly may
    /// remove or demote the last critical-role holder; the top role is
    /// always protected.
    async fn protect_last_holder(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: &ScopeInstance,
        membership: &Membership,
        new_role: Option<&RoleName>,
        owner_acting: bool,
    ) -> Result<()> {
        let hierarchy = self.catalog.hierarchy(scope.scope_type);
        let role = &membership.role;

        if new_role == Some(role) {
            return Ok(());
        }
        let protected = hierarchy.is_top(role.as_str())
            || (role == hierarchy.critical() && !owner_acting);
        if !protected {
            return Ok(());
        }

        if tx.count_by_role(scope.id, role).await? <= 1 {
            warn!(
                scope = %scope.id,
                principal = %membership.principal,
                role = %role,
                "Refusing to remove last holder of protected role"
            );
            return Err(GovernanceError::LastHolderProtected {
                scope: scope.id,
                role: role.clone(),
            });
        }
        Ok(())
    }
}
