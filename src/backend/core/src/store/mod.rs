//! Transactional storage capabilities consumed by the governance core.
//!
//! The core never talks to a database directly. It opens a [`StoreTransaction`]
//! through a [`Store`], performs every read, invariant check and write of one
//! operation inside it, then commits or rolls back.
//!
//! Every lookup filters soft-deleted rows; callers never see a scope or
//! membership whose `deleted_at` is set.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::governance::GovernanceSettings;
use crate::models::{Membership, PrincipalId, RoleName, ScopeId, ScopeInstance, ScopeType};

/// Result type for repository calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Repository-layer faults. All of them are transient from the caller's
/// point of view: the operation may be retried from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Serialization failure, deadlock, or a lost uniqueness race.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Connection loss, pool exhaustion, or timeout.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure (bad row data, protocol errors).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A handle able to open transactions.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// One open transaction.
///
/// `lock_*` methods take row locks that are held until commit or rollback.
#[async_trait]
pub trait StoreTransaction: Send {
    // ─────────────────────────────────────────────────────────────────────────
    // Scopes
    // ─────────────────────────────────────────────────────────────────────────

    async fn scope(&mut self, id: ScopeId) -> StoreResult<Option<ScopeInstance>>;

    async fn lock_scope(&mut self, id: ScopeId) -> StoreResult<Option<ScopeInstance>>;

    async fn insert_scope(&mut self, scope: &ScopeInstance) -> StoreResult<()>;

    async fn update_owner(&mut self, id: ScopeId, owner: &PrincipalId) -> StoreResult<()>;

    async fn soft_delete_scope(&mut self, id: ScopeId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Live scopes of `scope_type` whose organization or team reference is `parent`.
    async fn count_children(&mut self, parent: ScopeId, scope_type: ScopeType) -> StoreResult<u32>;

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    async fn membership(
        &mut self,
        principal: &PrincipalId,
        scope: ScopeId,
    ) -> StoreResult<Option<Membership>>;

    /// Locks the active memberships of `principals` in ascending principal order.
    async fn lock_memberships(
        &mut self,
        scope: ScopeId,
        principals: &[PrincipalId],
    ) -> StoreResult<Vec<Membership>>;

    async fn count_by_role(&mut self, scope: ScopeId, role: &RoleName) -> StoreResult<u32>;

    async fn count_members(&mut self, scope: ScopeId) -> StoreResult<u32>;

    async fn memberships(&mut self, scope: ScopeId) -> StoreResult<Vec<Membership>>;

    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()>;

    async fn update_membership_role(&mut self, id: Uuid, role: &RoleName) -> StoreResult<()>;

    async fn delete_membership(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Governance settings
    // ─────────────────────────────────────────────────────────────────────────

    async fn settings(&mut self, scope: ScopeId) -> StoreResult<Option<GovernanceSettings>>;

    async fn put_settings(&mut self, settings: &GovernanceSettings) -> StoreResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────────────────────────────────────

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
