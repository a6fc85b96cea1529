//! Action policies: the deploy-time table bounding every privileged action.
//!
//! Each `(scope type, action)` pair carries a system minimum and maximum role,
//! whether tenants may configure the threshold, the default threshold, and the
//! capability flags that gate it or mark it as approval-bound.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{RoleName, ScopeType};

pub const INVITE_MEMBER: &str = "invite_member";
pub const UPDATE_MEMBER: &str = "update_member";
pub const REMOVE_MEMBER: &str = "remove_member";
pub const CREATE_TEAM: &str = "create_team";
pub const CREATE_PROJECT: &str = "create_project";
pub const CREATE_TASK: &str = "create_task";
pub const UPDATE_TASK: &str = "update_task";
pub const DELETE_TASK: &str = "delete_task";

// ═══════════════════════════════════════════════════════════════════════════════
// Capability Flags
// ═══════════════════════════════════════════════════════════════════════════════

/// Boolean toggles stored in governance settings.
///
/// The base-rule family participates in the parent inheritance cascade; the
/// creation and task families are always read from the scope's own settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityFlag {
    AllowMemberInvites,
    AllowMemberUpdates,
    AllowMemberRemoval,
    AllowSelfRemoval,
    RequireApprovalForInvites,
    RequireApprovalForUpdates,
    RequireApprovalForRemoval,

    AllowTeamCreation,
    AllowProjectCreation,
    RequireApprovalForTeam,
    RequireApprovalForProject,

    AllowTaskCreation,
    AllowTaskUpdates,
    AllowTaskDeletions,
}

impl CapabilityFlag {
    pub const ALL: [Self; 14] = [
        Self::AllowMemberInvites,
        Self::AllowMemberUpdates,
        Self::AllowMemberRemoval,
        Self::AllowSelfRemoval,
        Self::RequireApprovalForInvites,
        Self::RequireApprovalForUpdates,
        Self::RequireApprovalForRemoval,
        Self::AllowTeamCreation,
        Self::AllowProjectCreation,
        Self::RequireApprovalForTeam,
        Self::RequireApprovalForProject,
        Self::AllowTaskCreation,
        Self::AllowTaskUpdates,
        Self::AllowTaskDeletions,
    ];

    pub const BASE_RULES: [Self; 7] = [
        Self::AllowMemberInvites,
        Self::AllowMemberUpdates,
        Self::AllowMemberRemoval,
        Self::AllowSelfRemoval,
        Self::RequireApprovalForInvites,
        Self::RequireApprovalForUpdates,
        Self::RequireApprovalForRemoval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowMemberInvites => "allow_member_invites",
            Self::AllowMemberUpdates => "allow_member_updates",
            Self::AllowMemberRemoval => "allow_member_removal",
            Self::AllowSelfRemoval => "allow_self_removal",
            Self::RequireApprovalForInvites => "require_approval_for_invites",
            Self::RequireApprovalForUpdates => "require_approval_for_updates",
            Self::RequireApprovalForRemoval => "require_approval_for_removal",
            Self::AllowTeamCreation => "allow_team_creation",
            Self::AllowProjectCreation => "allow_project_creation",
            Self::RequireApprovalForTeam => "require_approval_for_team",
            Self::RequireApprovalForProject => "require_approval_for_project",
            Self::AllowTaskCreation => "allow_task_creation",
            Self::AllowTaskUpdates => "allow_task_updates",
            Self::AllowTaskDeletions => "allow_task_deletions",
        }
    }

    pub fn is_base_rule(&self) -> bool {
        Self::BASE_RULES.contains(self)
    }

    /// Whether the flag means anything on a scope of this type.
    pub fn applies_to(&self, scope_type: ScopeType) -> bool {
        match self {
            Self::AllowTeamCreation | Self::RequireApprovalForTeam => {
                scope_type == ScopeType::Organization
            }
            Self::AllowProjectCreation | Self::RequireApprovalForProject => {
                scope_type != ScopeType::Project
            }
            Self::AllowTaskCreation | Self::AllowTaskUpdates | Self::AllowTaskDeletions => {
                scope_type == ScopeType::Project
            }
            _ => true,
        }
    }
}

impl fmt::Display for CapabilityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Action Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// System bounds for one action on one scope type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPolicy {
    pub scope_type: ScopeType,
    pub action: String,
    pub system_min_role: RoleName,
    pub system_max_role: RoleName,
    pub configurable: bool,
    pub default_role: RoleName,
    /// Flag that must be on (after the cascade, for base rules) for non-owners.
    pub gate: Option<CapabilityFlag>,
    /// Flag that marks an allowed action as needing approval.
    pub approval: Option<CapabilityFlag>,
    /// The action operates on another member (rank comparison applies).
    pub targets_member: bool,
    /// The action hands out a role (grant ceiling applies).
    pub assigns_role: bool,
}

impl ActionPolicy {
    /// A configurable policy with no flags attached.
    pub fn new(
        scope_type: ScopeType,
        action: impl Into<String>,
        system_min_role: impl Into<RoleName>,
        system_max_role: impl Into<RoleName>,
        default_role: impl Into<RoleName>,
    ) -> Self {
        Self {
            scope_type,
            action: action.into(),
            system_min_role: system_min_role.into(),
            system_max_role: system_max_role.into(),
            configurable: true,
            default_role: default_role.into(),
            gate: None,
            approval: None,
            targets_member: false,
            assigns_role: false,
        }
    }

    /// Tenants may not change the threshold.
    pub fn fixed(mut self) -> Self {
        self.configurable = false;
        self
    }

    pub fn gated_by(mut self, flag: CapabilityFlag) -> Self {
        self.gate = Some(flag);
        self
    }

    pub fn approval_by(mut self, flag: CapabilityFlag) -> Self {
        self.approval = Some(flag);
        self
    }

    pub fn targeting_member(mut self) -> Self {
        self.targets_member = true;
        self
    }

    pub fn assigning_role(mut self) -> Self {
        self.assigns_role = true;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Action Table
// ═══════════════════════════════════════════════════════════════════════════════

/// All action policies, keyed by scope type then action name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionTable {
    policies: BTreeMap<ScopeType, BTreeMap<String, ActionPolicy>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in policies for Organizations, Teams and Projects.
    pub fn builtin() -> Self {
        use CapabilityFlag::*;
        use ScopeType::*;

        let mut table = Self::new();

        // Organization
        table.insert(
            ActionPolicy::new(Organization, INVITE_MEMBER, "MANAGER", "ADMIN", "ADMIN")
                .gated_by(AllowMemberInvites)
                .approval_by(RequireApprovalForInvites)
                .assigning_role(),
        );
        table.insert(
            ActionPolicy::new(Organization, UPDATE_MEMBER, "ADMIN", "ADMIN", "ADMIN")
                .gated_by(AllowMemberUpdates)
                .approval_by(RequireApprovalForUpdates)
                .targeting_member()
                .assigning_role(),
        );
        table.insert(
            ActionPolicy::new(Organization, REMOVE_MEMBER, "ADMIN", "ADMIN", "ADMIN")
                .gated_by(AllowMemberRemoval)
                .approval_by(RequireApprovalForRemoval)
                .targeting_member(),
        );
        table.insert(
            ActionPolicy::new(Organization, CREATE_TEAM, "MANAGER", "ADMIN", "ADMIN")
                .gated_by(AllowTeamCreation)
                .approval_by(RequireApprovalForTeam),
        );
        table.insert(
            ActionPolicy::new(Organization, CREATE_PROJECT, "MANAGER", "ADMIN", "ADMIN")
                .gated_by(AllowProjectCreation)
                .approval_by(RequireApprovalForProject),
        );

        // Team
        table.insert(
            ActionPolicy::new(Team, INVITE_MEMBER, "MANAGER", "MANAGER", "MANAGER")
                .gated_by(AllowMemberInvites)
                .approval_by(RequireApprovalForInvites)
                .assigning_role(),
        );
        table.insert(
            ActionPolicy::new(Team, UPDATE_MEMBER, "MANAGER", "MANAGER", "MANAGER")
                .gated_by(AllowMemberUpdates)
                .approval_by(RequireApprovalForUpdates)
                .targeting_member()
                .assigning_role(),
        );
        table.insert(
            ActionPolicy::new(Team, REMOVE_MEMBER, "MANAGER", "MANAGER", "MANAGER")
                .gated_by(AllowMemberRemoval)
                .approval_by(RequireApprovalForRemoval)
                .targeting_member(),
        );
        table.insert(
            ActionPolicy::new(Team, CREATE_PROJECT, "LEAD", "MANAGER", "MANAGER")
                .gated_by(AllowProjectCreation)
                .approval_by(RequireApprovalForProject),
        );

        // Project
        table.insert(
            ActionPolicy::new(Project, INVITE_MEMBER, "LEAD", "MANAGER", "MANAGER")
                .gated_by(AllowMemberInvites)
                .approval_by(RequireApprovalForInvites)
                .assigning_role(),
        );
        table.insert(
            ActionPolicy::new(Project, UPDATE_MEMBER, "MANAGER", "MANAGER", "MANAGER")
                .gated_by(AllowMemberUpdates)
                .approval_by(RequireApprovalForUpdates)
                .targeting_member()
                .assigning_role(),
        );
        table.insert(
            ActionPolicy::new(Project, REMOVE_MEMBER, "MANAGER", "MANAGER", "MANAGER")
                .gated_by(AllowMemberRemoval)
                .approval_by(RequireApprovalForRemoval)
                .targeting_member(),
        );
        table.insert(
            ActionPolicy::new(Project, CREATE_TASK, "CONTRIBUTOR", "MANAGER", "MANAGER")
                .gated_by(AllowTaskCreation),
        );
        table.insert(
            ActionPolicy::new(Project, UPDATE_TASK, "CONTRIBUTOR", "MANAGER", "MANAGER")
                .gated_by(AllowTaskUpdates),
        );
        table.insert(
            ActionPolicy::new(Project, DELETE_TASK, "MANAGER", "MANAGER", "MANAGER")
                .gated_by(AllowTaskDeletions),
        );

        table
    }

    /// Add or replace a policy; returns the replaced one.
    pub fn insert(&mut self, policy: ActionPolicy) -> Option<ActionPolicy> {
        self.policies
            .entry(policy.scope_type)
            .or_default()
            .insert(policy.action.clone(), policy)
    }

    pub fn remove(&mut self, scope_type: ScopeType, action: &str) -> Option<ActionPolicy> {
        self.policies.get_mut(&scope_type)?.remove(action)
    }

    pub fn get(&self, scope_type: ScopeType, action: &str) -> Option<&ActionPolicy> {
        self.policies.get(&scope_type)?.get(action)
    }

    /// Policies of one scope type, ordered by action name.
    pub fn for_scope(&self, scope_type: ScopeType) -> impl Iterator<Item = &ActionPolicy> {
        self.policies
            .get(&scope_type)
            .into_iter()
            .flat_map(|policies| policies.values())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionPolicy> {
        self.policies.values().flat_map(|policies| policies.values())
    }
}
