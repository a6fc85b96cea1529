//! Per-scope governance settings and partial updates to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::actions::CapabilityFlag;
use super::catalog::PolicyCatalog;
use crate::config::GovernanceDefaults;
use crate::models::{RoleName, ScopeId, ScopeType};

// ═══════════════════════════════════════════════════════════════════════════════
// Flag Groups
// ═══════════════════════════════════════════════════════════════════════════════

/// Flags subject to the parent inheritance cascade. All default to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseRules {
    pub allow_member_invites: bool,
    pub allow_member_updates: bool,
    pub allow_member_removal: bool,
    pub allow_self_removal: bool,
    pub require_approval_for_invites: bool,
    pub require_approval_for_updates: bool,
    pub require_approval_for_removal: bool,
}

impl BaseRules {
    /// Value of a base-rule flag; `None` for flags outside this family.
    pub fn get(&self, flag: CapabilityFlag) -> Option<bool> {
        match flag {
            CapabilityFlag::AllowMemberInvites => Some(self.allow_member_invites),
            CapabilityFlag::AllowMemberUpdates => Some(self.allow_member_updates),
            CapabilityFlag::AllowMemberRemoval => Some(self.allow_member_removal),
            CapabilityFlag::AllowSelfRemoval => Some(self.allow_self_removal),
            CapabilityFlag::RequireApprovalForInvites => Some(self.require_approval_for_invites),
            CapabilityFlag::RequireApprovalForUpdates => Some(self.require_approval_for_updates),
            CapabilityFlag::RequireApprovalForRemoval => Some(self.require_approval_for_removal),
            _ => None,
        }
    }

    fn slot(&mut self, flag: CapabilityFlag) -> Option<&mut bool> {
        match flag {
            CapabilityFlag::AllowMemberInvites => Some(&mut self.allow_member_invites),
            CapabilityFlag::AllowMemberUpdates => Some(&mut self.allow_member_updates),
            CapabilityFlag::AllowMemberRemoval => Some(&mut self.allow_member_removal),
            CapabilityFlag::AllowSelfRemoval => Some(&mut self.allow_self_removal),
            CapabilityFlag::RequireApprovalForInvites => Some(&mut self.require_approval_for_invites),
            CapabilityFlag::RequireApprovalForUpdates => Some(&mut self.require_approval_for_updates),
            CapabilityFlag::RequireApprovalForRemoval => Some(&mut self.require_approval_for_removal),
            _ => None,
        }
    }
}

/// Team/project creation toggles. All default to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreationControls {
    pub allow_team_creation: bool,
    pub allow_project_creation: bool,
    pub require_approval_for_team: bool,
    pub require_approval_for_project: bool,
}

/// Task toggles for projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRules {
    pub allow_task_creation: bool,
    pub allow_task_updates: bool,
    pub allow_task_deletions: bool,
    pub only_assignee_can_update_task: bool,
}

impl Default for TaskRules {
    fn default() -> Self {
        Self {
            allow_task_creation: true,
            allow_task_updates: true,
            allow_task_deletions: true,
            only_assignee_can_update_task: false,
        }
    }
}

/// Capacity limits. `max_teams` exists only on organizations, `max_projects`
/// on organizations and teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_members: u32,
    pub max_teams: Option<u32>,
    pub max_projects: Option<u32>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Governance Settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Tenant-configured governance for one scope instance.
///
/// Created together with its scope and never outlives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceSettings {
    pub scope: ScopeId,
    pub scope_type: ScopeType,
    pub base: BaseRules,
    pub creation: CreationControls,
    pub tasks: TaskRules,
    pub limits: Limits,
    pub default_member_role: RoleName,
    /// Configured minimum role per action name.
    pub min_roles: BTreeMap<String, RoleName>,
    pub inherit_base_rules_from_team: bool,
    pub inherit_base_rules_from_org: bool,
    pub updated_at: DateTime<Utc>,
}

impl GovernanceSettings {
    /// Fresh settings for a newly created scope.
    pub fn defaults_for(
        scope: ScopeId,
        scope_type: ScopeType,
        catalog: &PolicyCatalog,
        defaults: &GovernanceDefaults,
    ) -> Self {
        let min_roles = catalog
            .actions()
            .for_scope(scope_type)
            .filter(|policy| policy.configurable)
            .map(|policy| (policy.action.clone(), policy.default_role.clone()))
            .collect();

        let limits = Limits {
            max_members: defaults.max_members_for(scope_type),
            max_teams: (scope_type == ScopeType::Organization).then_some(defaults.max_teams),
            max_projects: (scope_type != ScopeType::Project).then_some(defaults.max_projects),
        };

        Self {
            scope,
            scope_type,
            base: BaseRules::default(),
            creation: CreationControls::default(),
            tasks: TaskRules::default(),
            limits,
            default_member_role: catalog.hierarchy(scope_type).default_member().clone(),
            min_roles,
            inherit_base_rules_from_team: false,
            inherit_base_rules_from_org: false,
            updated_at: Utc::now(),
        }
    }

    /// This scope's local value of a flag (no inheritance applied).
    pub fn flag(&self, flag: CapabilityFlag) -> bool {
        if let Some(value) = self.base.get(flag) {
            return value;
        }
        match flag {
            CapabilityFlag::AllowTeamCreation => self.creation.allow_team_creation,
            CapabilityFlag::AllowProjectCreation => self.creation.allow_project_creation,
            CapabilityFlag::RequireApprovalForTeam => self.creation.require_approval_for_team,
            CapabilityFlag::RequireApprovalForProject => self.creation.require_approval_for_project,
            CapabilityFlag::AllowTaskCreation => self.tasks.allow_task_creation,
            CapabilityFlag::AllowTaskUpdates => self.tasks.allow_task_updates,
            CapabilityFlag::AllowTaskDeletions => self.tasks.allow_task_deletions,
            _ => false,
        }
    }

    pub fn set_flag(&mut self, flag: CapabilityFlag, value: bool) {
        if let Some(slot) = self.base.slot(flag) {
            *slot = value;
            return;
        }
        let slot = match flag {
            CapabilityFlag::AllowTeamCreation => &mut self.creation.allow_team_creation,
            CapabilityFlag::AllowProjectCreation => &mut self.creation.allow_project_creation,
            CapabilityFlag::RequireApprovalForTeam => &mut self.creation.require_approval_for_team,
            CapabilityFlag::RequireApprovalForProject => &mut self.creation.require_approval_for_project,
            CapabilityFlag::AllowTaskCreation => &mut self.tasks.allow_task_creation,
            CapabilityFlag::AllowTaskUpdates => &mut self.tasks.allow_task_updates,
            CapabilityFlag::AllowTaskDeletions => &mut self.tasks.allow_task_deletions,
            _ => return,
        };
        *slot = value;
    }

    pub fn configured_min_role(&self, action: &str) -> Option<&RoleName> {
        self.min_roles.get(action)
    }

    /// Apply a validated patch.
    pub fn apply(&mut self, update: &SettingsUpdate) {
        for (flag, value) in &update.flags {
            self.set_flag(*flag, *value);
        }
        if let Some(value) = update.only_assignee_can_update_task {
            self.tasks.only_assignee_can_update_task = value;
        }
        for (action, role) in &update.min_roles {
            self.min_roles.insert(action.clone(), role.clone());
        }
        if let Some(role) = &update.default_member_role {
            self.default_member_role = role.clone();
        }
        if let Some(n) = update.max_members {
            self.limits.max_members = n;
        }
        if let Some(n) = update.max_teams {
            self.limits.max_teams = Some(n);
        }
        if let Some(n) = update.max_projects {
            self.limits.max_projects = Some(n);
        }
        if let Some(value) = update.inherit_base_rules_from_team {
            self.inherit_base_rules_from_team = value;
        }
        if let Some(value) = update.inherit_base_rules_from_org {
            self.inherit_base_rules_from_org = value;
        }
        self.updated_at = Utc::now();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Settings Update
// ═══════════════════════════════════════════════════════════════════════════════

/// A partial settings patch. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub flags: BTreeMap<CapabilityFlag, bool>,
    pub only_assignee_can_update_task: Option<bool>,
    pub min_roles: BTreeMap<String, RoleName>,
    pub default_member_role: Option<RoleName>,
    pub max_members: Option<u32>,
    pub max_teams: Option<u32>,
    pub max_projects: Option<u32>,
    pub inherit_base_rules_from_team: Option<bool>,
    pub inherit_base_rules_from_org: Option<bool>,
}

impl SettingsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(mut self, flag: CapabilityFlag, value: bool) -> Self {
        self.flags.insert(flag, value);
        self
    }

    pub fn min_role(mut self, action: impl Into<String>, role: impl Into<RoleName>) -> Self {
        self.min_roles.insert(action.into(), role.into());
        self
    }

    pub fn default_member_role(mut self, role: impl Into<RoleName>) -> Self {
        self.default_member_role = Some(role.into());
        self
    }

    pub fn max_members(mut self, n: u32) -> Self {
        self.max_members = Some(n);
        self
    }

    pub fn max_teams(mut self, n: u32) -> Self {
        self.max_teams = Some(n);
        self
    }

    pub fn max_projects(mut self, n: u32) -> Self {
        self.max_projects = Some(n);
        self
    }

    pub fn only_assignee_can_update_task(mut self, value: bool) -> Self {
        self.only_assignee_can_update_task = Some(value);
        self
    }

    pub fn inherit_from_team(mut self, value: bool) -> Self {
        self.inherit_base_rules_from_team = Some(value);
        self
    }

    pub fn inherit_from_org(mut self, value: bool) -> Self {
        self.inherit_base_rules_from_org = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Field Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    UnknownAction,
    UnknownRole,
    BelowSystemMinimum,
    AboveSystemMaximum,
    NotConfigurable,
    ReservedRole,
    MustBePositive,
    NotApplicable,
}

/// One rejected field of a settings update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn below_minimum(field: impl Into<String>, role: &RoleName, minimum: &RoleName) -> Self {
        Self::new(
            field,
            FieldErrorKind::BelowSystemMinimum,
            format!("{} ranks below the system minimum {}", role, minimum),
        )
    }

    pub fn above_maximum(field: impl Into<String>, role: &RoleName, maximum: &RoleName) -> Self {
        Self::new(
            field,
            FieldErrorKind::AboveSystemMaximum,
            format!("{} ranks above the system maximum {}", role, maximum),
        )
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(scope_type: ScopeType) -> GovernanceSettings {
        GovernanceSettings::defaults_for(
            ScopeId::generate(),
            scope_type,
            &PolicyCatalog::builtin(),
            &GovernanceDefaults::default(),
        )
    }

    #[test]
    fn test_defaults() {
        let org = settings(ScopeType::Organization);
        assert_eq!(org.base, BaseRules::default());
        assert!(!org.base.allow_self_removal);
        assert_eq!(org.limits.max_members, 50);
        assert_eq!(org.limits.max_teams, Some(5));
        assert_eq!(org.limits.max_projects, Some(10));
        assert_eq!(org.default_member_role, "MEMBER");
        assert_eq!(org.configured_min_role("invite_member").unwrap(), "ADMIN");

        let project = settings(ScopeType::Project);
        assert_eq!(project.limits.max_members, 20);
        assert_eq!(project.limits.max_teams, None);
        assert_eq!(project.limits.max_projects, None);
        assert_eq!(project.default_member_role, "CONTRIBUTOR");
        assert!(project.flag(CapabilityFlag::AllowTaskCreation));
        assert!(!project.tasks.only_assignee_can_update_task);
    }

    #[test]
    fn test_set_and_read_flags() {
        let mut team = settings(ScopeType::Team);
        for flag in CapabilityFlag::ALL {
            team.set_flag(flag, true);
            assert!(team.flag(flag), "{} should be on", flag);
            team.set_flag(flag, false);
            assert!(!team.flag(flag), "{} should be off", flag);
        }
    }

    #[test]
    fn test_apply_patch() {
        let mut org = settings(ScopeType::Organization);
        let update = SettingsUpdate::new()
            .flag(CapabilityFlag::AllowSelfRemoval, true)
            .min_role("invite_member", "MANAGER")
            .max_members(75)
            .max_teams(8);
        org.apply(&update);

        assert!(org.base.allow_self_removal);
        assert_eq!(org.configured_min_role("invite_member").unwrap(), "MANAGER");
        assert_eq!(org.limits.max_members, 75);
        assert_eq!(org.limits.max_teams, Some(8));
        assert_eq!(org.limits.max_projects, Some(10));
    }

    #[test]
    fn test_update_is_empty() {
        assert!(SettingsUpdate::new().is_empty());
        assert!(!SettingsUpdate::new().inherit_from_org(true).is_empty());
    }

    #[test]
    fn test_settings_serde_round_trip() {
        let project = settings(ScopeType::Project);
        let json = serde_json::to_value(&project).unwrap();
        assert_eq!(json["base"]["allow_self_removal"], false);
        let back: GovernanceSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, project);
    }
}
