//! Role hierarchies per scope type.
//!
//! Warden ships with one hierarchy per scope type:
//!
//! | Organization | Team      | Project       | Rank |
//! |--------------|-----------|---------------|------|
//! | OWNER        | OWNER     | OWNER         | 5    |
//! | ADMIN        | MANAGER   | MANAGER       | 4    |
//! | MANAGER      | LEAD      | LEAD          | 3    |
//! | MEMBER       | MEMBER    | CONTRIBUTOR   | 2    |
//! | VIEWER       | VIEWER    | VIEWER        | 1    |
//!
//! Hierarchies are plain data: one comparison routine serves every scope type.
//! Registries are immutable once built and safe to share across threads.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::models::{RoleName, ScopeType};

/// Errors raised while assembling a role registry or action table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{scope_type} hierarchy has no roles")]
    EmptyHierarchy { scope_type: ScopeType },

    #[error("{scope_type} roles {first} and {second} share rank {rank}")]
    DuplicateRank {
        scope_type: ScopeType,
        first: RoleName,
        second: RoleName,
        rank: u8,
    },

    #[error("{scope_type} role {role} is declared twice")]
    DuplicateRole { scope_type: ScopeType, role: RoleName },

    #[error("{scope_type} hierarchy does not define role {role}")]
    MissingRole { scope_type: ScopeType, role: RoleName },

    #[error("{scope_type} role {role} is the owner role and cannot be critical or default")]
    ReservedRole { scope_type: ScopeType, role: RoleName },

    #[error("no role hierarchy registered for {scope_type}")]
    MissingHierarchy { scope_type: ScopeType },

    #[error("{scope_type} action {action}: system minimum {min} ranks above system maximum {max}")]
    InvertedBounds {
        scope_type: ScopeType,
        action: String,
        min: RoleName,
        max: RoleName,
    },

    #[error("{scope_type} action {action}: default role {default} lies outside [{min}, {max}]")]
    DefaultOutOfBounds {
        scope_type: ScopeType,
        action: String,
        default: RoleName,
        min: RoleName,
        max: RoleName,
    },
}

/// A named role with its rank. Higher rank = more privileged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDef {
    pub name: RoleName,
    pub rank: u8,
}

/// The ordered role set of one scope type.
#[derive(Debug, Clone, Serialize)]
pub struct RoleHierarchy {
    scope_type: ScopeType,
    /// Sorted by rank, most privileged first.
    roles: Vec<RoleDef>,
    critical: RoleName,
    default_member: RoleName,
}

impl RoleHierarchy {
    /// Build a hierarchy from `(name, rank)` pairs.
    ///
    /// `critical` is the administrative role whose last holder is protected
    /// and which a former owner is demoted to; `default_member` is assigned
    /// when a membership is created without an explicit role.
    pub fn new(
        scope_type: ScopeType,
        roles: &[(&str, u8)],
        critical: &str,
        default_member: &str,
    ) -> Result<Self, RegistryError> {
        if roles.is_empty() {
            return Err(RegistryError::EmptyHierarchy { scope_type });
        }

        let mut names = HashSet::new();
        let mut ranks: HashMap<u8, &str> = HashMap::new();
        for (name, rank) in roles {
            if !names.insert(*name) {
                return Err(RegistryError::DuplicateRole {
                    scope_type,
                    role: RoleName::from(*name),
                });
            }
            if let Some(first) = ranks.insert(*rank, name) {
                return Err(RegistryError::DuplicateRank {
                    scope_type,
                    first: RoleName::from(first),
                    second: RoleName::from(*name),
                    rank: *rank,
                });
            }
        }

        for required in [critical, default_member] {
            if !names.contains(required) {
                return Err(RegistryError::MissingRole {
                    scope_type,
                    role: RoleName::from(required),
                });
            }
        }

        let top = roles
            .iter()
            .max_by_key(|(_, rank)| *rank)
            .map(|(name, _)| *name);
        for reserved in [critical, default_member] {
            if top == Some(reserved) {
                return Err(RegistryError::ReservedRole {
                    scope_type,
                    role: RoleName::from(reserved),
                });
            }
        }

        Ok(Self::from_table(scope_type, roles, critical, default_member))
    }

    fn from_table(
        scope_type: ScopeType,
        roles: &[(&str, u8)],
        critical: &str,
        default_member: &str,
    ) -> Self {
        let mut roles: Vec<RoleDef> = roles
            .iter()
            .map(|(name, rank)| RoleDef {
                name: RoleName::from(*name),
                rank: *rank,
            })
            .collect();
        roles.sort_by(|a, b| b.rank.cmp(&a.rank));

        Self {
            scope_type,
            roles,
            critical: RoleName::from(critical),
            default_member: RoleName::from(default_member),
        }
    }

    /// Built-in Organization roles.
    pub fn organization() -> Self {
        Self::from_table(
            ScopeType::Organization,
            &[("OWNER", 5), ("ADMIN", 4), ("MANAGER", 3), ("MEMBER", 2), ("VIEWER", 1)],
            "ADMIN",
            "MEMBER",
        )
    }

    /// Built-in Team roles.
    pub fn team() -> Self {
        Self::from_table(
            ScopeType::Team,
            &[("OWNER", 5), ("MANAGER", 4), ("LEAD", 3), ("MEMBER", 2), ("VIEWER", 1)],
            "MANAGER",
            "MEMBER",
        )
    }

    /// Built-in Project roles.
    pub fn project() -> Self {
        Self::from_table(
            ScopeType::Project,
            &[("OWNER", 5), ("MANAGER", 4), ("LEAD", 3), ("CONTRIBUTOR", 2), ("VIEWER", 1)],
            "MANAGER",
            "CONTRIBUTOR",
        )
    }

    pub fn scope_type(&self) -> ScopeType {
        self.scope_type
    }

    /// Roles ordered from most to least privileged.
    pub fn roles(&self) -> &[RoleDef] {
        &self.roles
    }

    pub fn rank_of(&self, role: &str) -> Option<u8> {
        self.roles
            .iter()
            .find(|def| def.name == role)
            .map(|def| def.rank)
    }

    pub fn contains(&self, role: &str) -> bool {
        self.rank_of(role).is_some()
    }

    /// `rank(candidate) >= rank(required)`; false if either role is unknown.
    pub fn at_least(&self, candidate: &str, required: &str) -> bool {
        match (self.rank_of(candidate), self.rank_of(required)) {
            (Some(c), Some(r)) => c >= r,
            _ => false,
        }
    }

    /// `rank(candidate) > rank(other)`; false if either role is unknown.
    pub fn outranks(&self, candidate: &str, other: &str) -> bool {
        match (self.rank_of(candidate), self.rank_of(other)) {
            (Some(c), Some(o)) => c > o,
            _ => false,
        }
    }

    /// The most privileged role (the owner's role).
    pub fn top(&self) -> &RoleName {
        // Construction guarantees at least one role.
        &self.roles[0].name
    }

    pub fn is_top(&self, role: &str) -> bool {
        self.top() == role
    }

    pub fn critical(&self) -> &RoleName {
        &self.critical
    }

    pub fn default_member(&self) -> &RoleName {
        &self.default_member
    }
}

/// Role hierarchies for every scope type.
#[derive(Debug, Clone, Serialize)]
pub struct RoleRegistry {
    hierarchies: HashMap<ScopeType, RoleHierarchy>,
}

impl RoleRegistry {
    /// Assemble a registry; every scope type must be covered exactly once.
    pub fn new(hierarchies: Vec<RoleHierarchy>) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for hierarchy in hierarchies {
            map.insert(hierarchy.scope_type, hierarchy);
        }
        for scope_type in ScopeType::ALL {
            if !map.contains_key(&scope_type) {
                return Err(RegistryError::MissingHierarchy { scope_type });
            }
        }
        Ok(Self { hierarchies: map })
    }

    /// The built-in Organization/Team/Project hierarchies.
    pub fn builtin() -> Self {
        let hierarchies = [
            RoleHierarchy::organization(),
            RoleHierarchy::team(),
            RoleHierarchy::project(),
        ]
        .into_iter()
        .map(|h| (h.scope_type, h))
        .collect();
        Self { hierarchies }
    }

    /// Replace the hierarchy for one scope type.
    pub fn with_hierarchy(mut self, hierarchy: RoleHierarchy) -> Self {
        self.hierarchies.insert(hierarchy.scope_type, hierarchy);
        self
    }

    /// Hierarchy for a scope type. Present for every scope type by construction.
    pub fn hierarchy(&self, scope_type: ScopeType) -> &RoleHierarchy {
        &self.hierarchies[&scope_type]
    }

    pub fn rank_of(&self, scope_type: ScopeType, role: &str) -> Result<u8, RegistryError> {
        self.hierarchy(scope_type)
            .rank_of(role)
            .ok_or_else(|| RegistryError::MissingRole {
                scope_type,
                role: RoleName::from(role),
            })
    }

    /// Never fails: unknown roles compare as "not at least".
    pub fn at_least(&self, scope_type: ScopeType, candidate: &str, required: &str) -> bool {
        self.hierarchy(scope_type).at_least(candidate, required)
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ranks() {
        let registry = RoleRegistry::builtin();
        assert_eq!(registry.rank_of(ScopeType::Organization, "OWNER").unwrap(), 5);
        assert_eq!(registry.rank_of(ScopeType::Organization, "ADMIN").unwrap(), 4);
        assert_eq!(registry.rank_of(ScopeType::Team, "LEAD").unwrap(), 3);
        assert_eq!(registry.rank_of(ScopeType::Project, "CONTRIBUTOR").unwrap(), 2);
        assert!(registry.rank_of(ScopeType::Project, "ADMIN").is_err());
    }

    #[test]
    fn test_at_least() {
        let registry = RoleRegistry::builtin();
        assert!(registry.at_least(ScopeType::Organization, "ADMIN", "MANAGER"));
        assert!(registry.at_least(ScopeType::Organization, "ADMIN", "ADMIN"));
        assert!(!registry.at_least(ScopeType::Organization, "MEMBER", "ADMIN"));
    }

    #[test]
    fn test_at_least_is_false_for_unknown_roles() {
        let registry = RoleRegistry::builtin();
        assert!(!registry.at_least(ScopeType::Team, "ADMIN", "VIEWER"));
        assert!(!registry.at_least(ScopeType::Team, "OWNER", "SUPERUSER"));
        assert!(!registry.at_least(ScopeType::Team, "", ""));
    }

    #[test]
    fn test_top_critical_default() {
        let org = RoleHierarchy::organization();
        assert_eq!(org.top(), "OWNER");
        assert_eq!(org.critical(), "ADMIN");
        assert_eq!(org.default_member(), "MEMBER");

        let project = RoleHierarchy::project();
        assert_eq!(project.critical(), "MANAGER");
        assert_eq!(project.default_member(), "CONTRIBUTOR");
    }

    #[test]
    fn test_roles_sorted_by_rank() {
        let team = RoleHierarchy::team();
        let ranks: Vec<u8> = team.roles().iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_custom_hierarchy() {
        let hierarchy = RoleHierarchy::new(
            ScopeType::Project,
            &[("VIEWER", 1), ("OWNER", 4), ("CONTRIBUTOR", 2), ("MANAGER", 3)],
            "MANAGER",
            "CONTRIBUTOR",
        )
        .unwrap();
        assert_eq!(hierarchy.top(), "OWNER");
        assert!(hierarchy.outranks("MANAGER", "CONTRIBUTOR"));
        assert!(!hierarchy.outranks("MANAGER", "MANAGER"));
    }

    #[test]
    fn test_duplicate_rank_rejected() {
        let err = RoleHierarchy::new(
            ScopeType::Team,
            &[("OWNER", 3), ("MANAGER", 3)],
            "MANAGER",
            "MANAGER",
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRank { rank: 3, .. }));
    }

    #[test]
    fn test_missing_critical_role_rejected() {
        let err = RoleHierarchy::new(ScopeType::Team, &[("OWNER", 2), ("MEMBER", 1)], "MANAGER", "MEMBER")
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingRole { .. }));
    }

    #[test]
    fn test_owner_role_cannot_be_critical_or_default() {
        let roles = [("OWNER", 5), ("ADMIN", 4), ("MANAGER", 3), ("MEMBER", 2), ("VIEWER", 1)];

        let err = RoleHierarchy::new(ScopeType::Organization, &roles, "OWNER", "MEMBER").unwrap_err();
        assert_eq!(
            err,
            RegistryError::ReservedRole {
                scope_type: ScopeType::Organization,
                role: RoleName::from("OWNER"),
            }
        );

        let err = RoleHierarchy::new(ScopeType::Organization, &roles, "ADMIN", "OWNER").unwrap_err();
        assert!(matches!(err, RegistryError::ReservedRole { .. }));

        assert!(RoleHierarchy::new(ScopeType::Organization, &roles, "ADMIN", "MEMBER").is_ok());
    }

    #[test]
    fn test_registry_requires_every_scope_type() {
        let err = RoleRegistry::new(vec![RoleHierarchy::organization(), RoleHierarchy::team()]).unwrap_err();
        assert_eq!(err, RegistryError::MissingHierarchy { scope_type: ScopeType::Project });
    }
}
