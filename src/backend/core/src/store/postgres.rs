//! PostgreSQL store backed by `sqlx`.
//!
//! Each [`StoreTransaction`] wraps one `BEGIN … COMMIT` block. Scope rows are
//! locked with `SELECT … FOR UPDATE`; membership rows are locked in ascending
//! principal order (byte collation, matching [`PrincipalId`]'s `Ord`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, StoreTransaction};
use crate::config::DatabaseConfig;
use crate::governance::GovernanceSettings;
use crate::models::{Membership, PrincipalId, RoleName, ScopeId, ScopeInstance, ScopeType};

// ═══════════════════════════════════════════════════════════════════════════════
// Error Mapping
// ═══════════════════════════════════════════════════════════════════════════════

/// SQLSTATEs that mean "another transaction got in the way".
const CONFLICT_STATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "23505", // unique_violation
];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let conflict = db
                    .code()
                    .as_deref()
                    .map(|code| CONFLICT_STATES.contains(&code))
                    .unwrap_or(false);
                if conflict {
                    Self::Conflict(db.message().to_string())
                } else {
                    Self::Backend(err.to_string())
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Unavailable(err.to_string()),
            _ => Self::Backend(err.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct ScopeRow {
    id: Uuid,
    scope_type: String,
    name: String,
    owner_id: String,
    organization_id: Option<Uuid>,
    team_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScopeRow> for ScopeInstance {
    type Error = StoreError;

    fn try_from(row: ScopeRow) -> StoreResult<Self> {
        let scope_type = row
            .scope_type
            .parse::<ScopeType>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            id: ScopeId(row.id),
            scope_type,
            name: row.name,
            owner: PrincipalId(row.owner_id),
            organization: row.organization_id.map(ScopeId),
            team: row.team_id.map(ScopeId),
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MembershipRow {
    id: Uuid,
    principal_id: String,
    scope_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Self {
            id: row.id,
            principal: PrincipalId(row.principal_id),
            scope: ScopeId(row.scope_id),
            role: RoleName(row.role),
            joined_at: row.joined_at,
            deleted_at: row.deleted_at,
        }
    }
}

const SCOPE_COLUMNS: &str =
    "id, scope_type, name, owner_id, organization_id, team_id, created_at, deleted_at";

const MEMBERSHIP_COLUMNS: &str = "id, principal_id, scope_id, role, joined_at, deleted_at";

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a connection pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected governance store to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn fetch_scope(&mut self, id: ScopeId, lock: bool) -> StoreResult<Option<ScopeInstance>> {
        let sql = format!(
            "SELECT {} FROM scopes WHERE id = $1 AND deleted_at IS NULL{}",
            SCOPE_COLUMNS,
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, ScopeRow>(&sql)
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(ScopeInstance::try_from).transpose()
    }

    fn expect_one(affected: u64, what: &str, id: impl std::fmt::Display) -> StoreResult<()> {
        if affected == 0 {
            return Err(StoreError::Backend(format!("{} {} does not exist", what, id)));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn scope(&mut self, id: ScopeId) -> StoreResult<Option<ScopeInstance>> {
        self.fetch_scope(id, false).await
    }

    async fn lock_scope(&mut self, id: ScopeId) -> StoreResult<Option<ScopeInstance>> {
        self.fetch_scope(id, true).await
    }

    async fn insert_scope(&mut self, scope: &ScopeInstance) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scopes (id, scope_type, name, owner_id, organization_id, team_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(scope.id.0)
        .bind(scope.scope_type.as_str())
        .bind(&scope.name)
        .bind(scope.owner.as_str())
        .bind(scope.organization.map(|id| id.0))
        .bind(scope.team.map(|id| id.0))
        .bind(scope.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_owner(&mut self, id: ScopeId, owner: &PrincipalId) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE scopes SET owner_id = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .bind(owner.as_str())
        .execute(&mut *self.tx)
        .await?;

        Self::expect_one(result.rows_affected(), "scope", id)
    }

    async fn soft_delete_scope(&mut self, id: ScopeId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE scopes SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;

        Self::expect_one(result.rows_affected(), "scope", id)
    }

    async fn count_children(&mut self, parent: ScopeId, scope_type: ScopeType) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scopes
            WHERE scope_type = $2
              AND (organization_id = $1 OR team_id = $1)
              AND deleted_at IS NULL
            "#,
        )
        .bind(parent.0)
        .bind(scope_type.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count as u32)
    }

    async fn membership(
        &mut self,
        principal: &PrincipalId,
        scope: ScopeId,
    ) -> StoreResult<Option<Membership>> {
        let sql = format!(
            "SELECT {} FROM memberships WHERE principal_id = $1 AND scope_id = $2 AND deleted_at IS NULL",
            MEMBERSHIP_COLUMNS
        );
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(principal.as_str())
            .bind(scope.0)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(Membership::from))
    }

    async fn lock_memberships(
        &mut self,
        scope: ScopeId,
        principals: &[PrincipalId],
    ) -> StoreResult<Vec<Membership>> {
        let ids: Vec<String> = principals.iter().map(|p| p.0.clone()).collect();
        let sql = format!(
            r#"SELECT {} FROM memberships
               WHERE scope_id = $1 AND principal_id = ANY($2) AND deleted_at IS NULL
               ORDER BY principal_id COLLATE "C"
               FOR UPDATE"#,
            MEMBERSHIP_COLUMNS
        );
        let rows = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(scope.0)
            .bind(&ids)
            .fetch_all(&mut *self.tx)
            .await?;

        debug!(scope = %scope, locked = rows.len(), "Locked membership rows");
        Ok(rows.into_iter().map(Membership::from).collect())
    }

    async fn count_by_role(&mut self, scope: ScopeId, role: &RoleName) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM memberships WHERE scope_id = $1 AND role = $2 AND deleted_at IS NULL",
        )
        .bind(scope.0)
        .bind(role.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count as u32)
    }

    async fn count_members(&mut self, scope: ScopeId) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM memberships WHERE scope_id = $1 AND deleted_at IS NULL",
        )
        .bind(scope.0)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count as u32)
    }

    async fn memberships(&mut self, scope: ScopeId) -> StoreResult<Vec<Membership>> {
        let sql = format!(
            "SELECT {} FROM memberships WHERE scope_id = $1 AND deleted_at IS NULL ORDER BY joined_at, principal_id",
            MEMBERSHIP_COLUMNS
        );
        let rows = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(scope.0)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows.into_iter().map(Membership::from).collect())
    }

    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (id, principal_id, scope_id, role, joined_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(membership.id)
        .bind(membership.principal.as_str())
        .bind(membership.scope.0)
        .bind(membership.role.as_str())
        .bind(membership.joined_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_membership_role(&mut self, id: Uuid, role: &RoleName) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE memberships SET role = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(role.as_str())
        .execute(&mut *self.tx)
        .await?;

        Self::expect_one(result.rows_affected(), "membership", id)
    }

    async fn delete_membership(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE memberships SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;

        Self::expect_one(result.rows_affected(), "membership", id)
    }

    async fn settings(&mut self, scope: ScopeId) -> StoreResult<Option<GovernanceSettings>> {
        let settings: Option<Json<GovernanceSettings>> = sqlx::query_scalar(
            r#"
            SELECT g.settings FROM governance_settings g
            JOIN scopes s ON s.id = g.scope_id
            WHERE g.scope_id = $1 AND s.deleted_at IS NULL
            "#,
        )
        .bind(scope.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(settings.map(|Json(s)| s))
    }

    async fn put_settings(&mut self, settings: &GovernanceSettings) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO governance_settings (scope_id, settings, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (scope_id)
            DO UPDATE SET settings = EXCLUDED.settings, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(settings.scope.0)
        .bind(Json(settings))
        .bind(settings.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
