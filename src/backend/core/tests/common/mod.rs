//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use warden_core::governance::actions::INVITE_MEMBER;
use warden_core::prelude::*;

pub fn principal(name: &str) -> PrincipalId {
    PrincipalId::from(name)
}

/// Catalog whose project hierarchy has no LEAD role.
pub fn four_role_project_catalog() -> Arc<PolicyCatalog> {
    let project = RoleHierarchy::new(
        ScopeType::Project,
        &[("OWNER", 4), ("MANAGER", 3), ("CONTRIBUTOR", 2), ("VIEWER", 1)],
        "MANAGER",
        "CONTRIBUTOR",
    )
    .unwrap();
    let roles = RoleRegistry::builtin().with_hierarchy(project);

    let mut actions = ActionTable::builtin();
    actions.insert(
        ActionPolicy::new(ScopeType::Project, INVITE_MEMBER, "CONTRIBUTOR", "MANAGER", "MANAGER")
            .gated_by(CapabilityFlag::AllowMemberInvites)
            .approval_by(CapabilityFlag::RequireApprovalForInvites)
            .assigning_role(),
    );

    Arc::new(PolicyCatalog::new(roles, actions).unwrap())
}

pub struct Harness {
    pub store: MemoryStore,
    pub manager: MembershipManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_catalog(PolicyCatalog::builtin())
    }

    pub fn with_catalog(catalog: Arc<PolicyCatalog>) -> Self {
        Self::with_defaults(catalog, GovernanceDefaults::default())
    }

    pub fn with_defaults(catalog: Arc<PolicyCatalog>, defaults: GovernanceDefaults) -> Self {
        let store = MemoryStore::new();
        let manager = MembershipManager::new(catalog, Arc::new(store.clone()), defaults);
        Self { store, manager }
    }

    pub fn authorizer(&self) -> &Authorizer {
        self.manager.authorizer()
    }

    pub async fn organization(&self, owner: &str) -> ScopeInstance {
        self.manager
            .create_scope(&principal(owner), NewScope::organization("acme"))
            .await
            .unwrap()
    }

    pub async fn team(&self, owner: &str, organization: ScopeId) -> ScopeInstance {
        self.manager
            .create_scope(&principal(owner), NewScope::team("platform").in_organization(organization))
            .await
            .unwrap()
    }

    pub async fn project(&self, owner: &str, organization: ScopeId) -> ScopeInstance {
        self.manager
            .create_scope(&principal(owner), NewScope::project("apollo").in_organization(organization))
            .await
            .unwrap()
    }

    pub async fn join(&self, scope: ScopeId, who: &str, role: &str) -> Membership {
        self.manager
            .add_member(scope, principal(who), Some(RoleName::from(role)))
            .await
            .unwrap()
    }

    /// Switch flags on through the owner.
    pub async fn enable(&self, owner: &str, scope: ScopeId, flags: &[CapabilityFlag]) {
        let update = flags
            .iter()
            .fold(SettingsUpdate::new(), |update, flag| update.flag(*flag, true));
        self.manager
            .update_settings(&principal(owner), scope, update)
            .await
            .unwrap();
    }

    /// Overwrite stored settings without validation.
    pub async fn put_settings(&self, settings: &GovernanceSettings) {
        let mut tx = self.store.begin().await.unwrap();
        tx.put_settings(settings).await.unwrap();
        tx.commit().await.unwrap();
    }

    pub async fn role_of(&self, who: &str, scope: ScopeId) -> Option<RoleName> {
        self.manager
            .membership(&principal(who), scope)
            .await
            .unwrap()
            .map(|m| m.role)
    }

    pub async fn count_by_role(&self, scope: ScopeId, role: &RoleName) -> u32 {
        let mut tx = self.store.begin().await.unwrap();
        let count = tx.count_by_role(scope, role).await.unwrap();
        tx.rollback().await.unwrap();
        count
    }
}
