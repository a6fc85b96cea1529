//! Governance data models: principals, scopes, roles, and memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed principal identifier (a user or service account).
///
/// Ordered so that row locks can be acquired in a fixed global order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Strongly-typed scope instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub Uuid);

impl ScopeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ScopeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Name of a role within a scope-type's role set (e.g. `"OWNER"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(pub String);

impl RoleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoleName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoleName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for RoleName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RoleName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scope Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The level of a scope in the collaboration hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Organization,
    Team,
    Project,
}

impl ScopeType {
    pub const ALL: [ScopeType; 3] = [Self::Organization, Self::Team, Self::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Team => "team",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored scope-type tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope type: {0}")]
pub struct UnknownScopeType(pub String);

impl FromStr for ScopeType {
    type Err = UnknownScopeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" => Ok(Self::Organization),
            "team" => Ok(Self::Team),
            "project" => Ok(Self::Project),
            other => Err(UnknownScopeType(other.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scope Instance
// ═══════════════════════════════════════════════════════════════════════════════

/// One Organization, Team, or Project record.
///
/// `owner` always coincides with the principal whose membership holds the
/// scope-type's top role. Scopes are soft-deleted: a set `deleted_at` excludes
/// the scope from every lookup while keeping historical memberships valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInstance {
    pub id: ScopeId,
    pub scope_type: ScopeType,
    pub name: String,
    pub owner: PrincipalId,
    /// Parent organization (Teams and Projects).
    pub organization: Option<ScopeId>,
    /// Parent team (Projects only).
    pub team: Option<ScopeId>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ScopeInstance {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_owned_by(&self, principal: &PrincipalId) -> bool {
        &self.owner == principal
    }

    /// The ancestor a principal must belong to before it may own this scope.
    pub fn membership_parent(&self) -> Option<ScopeId> {
        self.organization.or(self.team)
    }
}

/// Input for creating a new scope instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewScope {
    pub scope_type: ScopeType,
    pub name: String,
    pub organization: Option<ScopeId>,
    pub team: Option<ScopeId>,
}

impl NewScope {
    pub fn organization(name: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Organization,
            name: name.into(),
            organization: None,
            team: None,
        }
    }

    pub fn team(name: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Team,
            name: name.into(),
            organization: None,
            team: None,
        }
    }

    pub fn project(name: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Project,
            name: name.into(),
            organization: None,
            team: None,
        }
    }

    /// Place the new scope inside an organization.
    pub fn in_organization(mut self, organization: ScopeId) -> Self {
        self.organization = Some(organization);
        self
    }

    /// Place the new project inside a team.
    pub fn in_team(mut self, team: ScopeId) -> Self {
        self.team = Some(team);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Membership
// ═══════════════════════════════════════════════════════════════════════════════

/// A principal's role within one scope instance.
///
/// At most one active membership exists per (principal, scope). Removal
/// soft-deletes the row; re-adding creates a fresh membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub principal: PrincipalId,
    pub scope: ScopeId,
    pub role: RoleName,
    pub joined_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn new(principal: PrincipalId, scope: ScopeId, role: RoleName) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal,
            scope,
            role,
            joined_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
