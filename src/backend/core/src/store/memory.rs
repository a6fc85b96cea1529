//! In-memory store.
//!
//! Transactions hold the whole-store lock for their lifetime, which makes them
//! serializable. Writes go to a staged copy that replaces the committed state
//! only on commit, so a rollback (or a dropped transaction) leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, StoreTransaction};
use crate::governance::GovernanceSettings;
use crate::models::{Membership, PrincipalId, RoleName, ScopeId, ScopeInstance, ScopeType};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    scopes: HashMap<ScopeId, ScopeInstance>,
    memberships: HashMap<Uuid, Membership>,
    settings: HashMap<ScopeId, GovernanceSettings>,
}

impl MemoryState {
    fn live_scope(&self, id: ScopeId) -> Option<&ScopeInstance> {
        self.scopes.get(&id).filter(|s| !s.is_deleted())
    }

    fn active(&self, scope: ScopeId) -> impl Iterator<Item = &Membership> {
        self.memberships
            .values()
            .filter(move |m| m.scope == scope && m.is_active())
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_begin: AtomicBool,
    fail_next_commit: AtomicBool,
}

/// A process-local [`Store`] for tests, benchmarks and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `begin` fails with [`StoreError::Unavailable`].
    pub fn fail_next_begin(&self) {
        self.faults.fail_next_begin.store(true, Ordering::SeqCst);
    }

    /// The next `commit` fails with [`StoreError::Conflict`] and discards its writes.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        if self.faults.fail_next_begin.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected begin failure".into()));
        }

        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            faults: self.faults.clone(),
        }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    faults: Arc<Faults>,
}

impl MemoryTransaction {
    fn membership_mut(&mut self, id: Uuid) -> StoreResult<&mut Membership> {
        self.staged
            .memberships
            .get_mut(&id)
            .filter(|m| m.is_active())
            .ok_or_else(|| StoreError::Backend(format!("membership {} does not exist", id)))
    }

    fn scope_mut(&mut self, id: ScopeId) -> StoreResult<&mut ScopeInstance> {
        self.staged
            .scopes
            .get_mut(&id)
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| StoreError::Backend(format!("scope {} does not exist", id)))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn scope(&mut self, id: ScopeId) -> StoreResult<Option<ScopeInstance>> {
        Ok(self.staged.live_scope(id).cloned())
    }

    async fn lock_scope(&mut self, id: ScopeId) -> StoreResult<Option<ScopeInstance>> {
        // The whole-store guard already serializes transactions.
        self.scope(id).await
    }

    async fn insert_scope(&mut self, scope: &ScopeInstance) -> StoreResult<()> {
        if self.staged.scopes.contains_key(&scope.id) {
            return Err(StoreError::Conflict(format!("scope {} already exists", scope.id)));
        }
        self.staged.scopes.insert(scope.id, scope.clone());
        Ok(())
    }

    async fn update_owner(&mut self, id: ScopeId, owner: &PrincipalId) -> StoreResult<()> {
        self.scope_mut(id)?.owner = owner.clone();
        Ok(())
    }

    async fn soft_delete_scope(&mut self, id: ScopeId, at: DateTime<Utc>) -> StoreResult<()> {
        self.scope_mut(id)?.deleted_at = Some(at);
        Ok(())
    }

    async fn count_children(&mut self, parent: ScopeId, scope_type: ScopeType) -> StoreResult<u32> {
        let count = self
            .staged
            .scopes
            .values()
            .filter(|s| !s.is_deleted() && s.scope_type == scope_type)
            .filter(|s| s.organization == Some(parent) || s.team == Some(parent))
            .count();
        Ok(count as u32)
    }

    async fn membership(
        &mut self,
        principal: &PrincipalId,
        scope: ScopeId,
    ) -> StoreResult<Option<Membership>> {
        Ok(self
            .staged
            .active(scope)
            .find(|m| &m.principal == principal)
            .cloned())
    }

    async fn lock_memberships(
        &mut self,
        scope: ScopeId,
        principals: &[PrincipalId],
    ) -> StoreResult<Vec<Membership>> {
        let mut found: Vec<Membership> = self
            .staged
            .active(scope)
            .filter(|m| principals.contains(&m.principal))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.principal.cmp(&b.principal));
        Ok(found)
    }

    async fn count_by_role(&mut self, scope: ScopeId, role: &RoleName) -> StoreResult<u32> {
        Ok(self.staged.active(scope).filter(|m| &m.role == role).count() as u32)
    }

    async fn count_members(&mut self, scope: ScopeId) -> StoreResult<u32> {
        Ok(self.staged.active(scope).count() as u32)
    }

    async fn memberships(&mut self, scope: ScopeId) -> StoreResult<Vec<Membership>> {
        let mut list: Vec<Membership> = self.staged.active(scope).cloned().collect();
        list.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.principal.cmp(&b.principal)));
        Ok(list)
    }

    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        let duplicate = self
            .staged
            .active(membership.scope)
            .any(|m| m.principal == membership.principal);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "{} already has an active membership in {}",
                membership.principal, membership.scope
            )));
        }
        self.staged.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    async fn update_membership_role(&mut self, id: Uuid, role: &RoleName) -> StoreResult<()> {
        self.membership_mut(id)?.role = role.clone();
        Ok(())
    }

    async fn delete_membership(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.membership_mut(id)?.deleted_at = Some(at);
        Ok(())
    }

    async fn settings(&mut self, scope: ScopeId) -> StoreResult<Option<GovernanceSettings>> {
        if self.staged.live_scope(scope).is_none() {
            return Ok(None);
        }
        Ok(self.staged.settings.get(&scope).cloned())
    }

    async fn put_settings(&mut self, settings: &GovernanceSettings) -> StoreResult<()> {
        self.staged.settings.insert(settings.scope, settings.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            mut guard,
            staged,
            faults,
        } = *self;
        if faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict("injected commit failure".into()));
        }
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
