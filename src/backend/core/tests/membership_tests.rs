//! Membership lifecycle tests.
//!
//! Tests cover:
//! - Last-holder protection and the owner's bypass
//! - Member capacity, duplicate and reserved-role rejections
//! - Role updates and ownership transfer
//! - Scope creation parents, child limits and soft deletion
//! - Rollback on store faults

mod common;

use common::{four_role_project_catalog, principal, Harness};
use fake::Fake;
use warden_core::prelude::*;

fn code<T: std::fmt::Debug>(result: Result<T>) -> ErrorCode {
    result.unwrap_err().code()
}

// ============================================================================
// Last Holder Tests
// ============================================================================

#[tokio::test]
async fn test_owner_removes_last_manager_but_manager_cannot_leave() {
    let h = Harness::with_catalog(four_role_project_catalog());
    let org = h.organization("olga").await;
    let project = h.project("olga", org.id).await;
    h.join(project.id, "mona", "MANAGER").await;
    h.join(project.id, "carl", "CONTRIBUTOR").await;
    h.enable("olga", project.id, &[CapabilityFlag::AllowSelfRemoval]).await;

    let err = h.manager.self_remove(project.id, &principal("mona")).await.unwrap_err();
    assert_eq!(
        err,
        GovernanceError::LastHolderProtected {
            scope: project.id,
            role: RoleName::from("MANAGER"),
        }
    );
    assert_eq!(h.role_of("mona", project.id).await.unwrap(), "MANAGER");

    h.manager
        .remove_member(&principal("olga"), project.id, &principal("mona"))
        .await
        .unwrap();
    assert!(h.role_of("mona", project.id).await.is_none());
    assert_eq!(h.role_of("carl", project.id).await.unwrap(), "CONTRIBUTOR");
}

#[tokio::test]
async fn test_second_to_last_critical_holder_may_leave() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "ada", "ADMIN").await;
    h.join(org.id, "abe", "ADMIN").await;
    h.enable("olga", org.id, &[CapabilityFlag::AllowSelfRemoval]).await;

    h.manager.self_remove(org.id, &principal("ada")).await.unwrap();
    assert_eq!(
        code(h.manager.self_remove(org.id, &principal("abe")).await),
        ErrorCode::LastHolderProtected
    );
}

#[tokio::test]
async fn test_self_removal_disabled_by_default() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "mia", "MEMBER").await;

    assert_eq!(
        code(h.manager.self_remove(org.id, &principal("mia")).await),
        ErrorCode::SelfRemovalDisabled
    );
}

#[tokio::test]
async fn test_owner_must_transfer_before_leaving() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.enable("olga", org.id, &[CapabilityFlag::AllowSelfRemoval]).await;

    assert_eq!(
        code(h.manager.self_remove(org.id, &principal("olga")).await),
        ErrorCode::OwnerMustTransferFirst
    );
    assert_eq!(
        code(
            h.manager
                .remove_member(&principal("olga"), org.id, &principal("olga"))
                .await
        ),
        ErrorCode::CannotRemoveOwner
    );
}

#[tokio::test]
async fn test_removal_needs_authorization() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "ada", "ADMIN").await;
    h.join(org.id, "mia", "MEMBER").await;

    assert_eq!(
        code(
            h.manager
                .remove_member(&principal("ada"), org.id, &principal("mia"))
                .await
        ),
        ErrorCode::ActionDisabled
    );

    h.enable("olga", org.id, &[CapabilityFlag::AllowMemberRemoval]).await;
    h.manager
        .remove_member(&principal("ada"), org.id, &principal("mia"))
        .await
        .unwrap();
    assert!(h.role_of("mia", org.id).await.is_none());
}

// ============================================================================
// Add Member Tests
// ============================================================================

#[tokio::test]
async fn test_add_member_defaults_and_duplicates() {
    let h = Harness::new();
    let org = h.organization("olga").await;

    let membership = h.manager.add_member(org.id, principal("mia"), None).await.unwrap();
    assert_eq!(membership.role, "MEMBER");
    assert!(membership.is_active());

    let err = h
        .manager
        .add_member(org.id, principal("mia"), Some(RoleName::from("ADMIN")))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GovernanceError::AlreadyMember {
            scope: org.id,
            principal: principal("mia"),
        }
    );
}

#[tokio::test]
async fn test_add_member_rejects_top_and_unknown_roles() {
    let h = Harness::new();
    let org = h.organization("olga").await;

    for role in ["OWNER", "PHARAOH"] {
        let result = h
            .manager
            .add_member(org.id, principal("mia"), Some(RoleName::from(role)))
            .await;
        assert_eq!(code(result), ErrorCode::InvalidRole);
    }
    assert!(h.role_of("mia", org.id).await.is_none());
}

#[tokio::test]
async fn test_member_capacity_counts_owner() {
    let defaults = GovernanceDefaults {
        organization_max_members: 3,
        ..GovernanceDefaults::default()
    };
    let h = Harness::with_defaults(PolicyCatalog::builtin(), defaults);
    let org = h.organization("olga").await;
    h.join(org.id, "mia", "MEMBER").await;
    h.join(org.id, "max", "MEMBER").await;

    let err = h
        .manager
        .add_member(org.id, principal("moe"), None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GovernanceError::CapacityExceeded {
            scope: org.id,
            resource: "members",
            limit: 3,
        }
    );
}

#[tokio::test]
async fn test_concurrent_adds_respect_capacity() {
    let defaults = GovernanceDefaults {
        organization_max_members: 5,
        ..GovernanceDefaults::default()
    };
    let h = Harness::with_defaults(PolicyCatalog::builtin(), defaults);
    let org = h.organization("olga").await;
    let scope = org.id;

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let manager = h.manager.clone();
            tokio::spawn(async move {
                manager
                    .add_member(scope, principal(&format!("user-{}", i)), None)
                    .await
            })
        })
        .collect();

    let mut added = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => added += 1,
            Err(err) => assert_eq!(err.code(), ErrorCode::CapacityExceeded),
        }
    }

    assert_eq!(added, 4);
    assert_eq!(h.manager.members(org.id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_add_member_as_checks_grant() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "ada", "ADMIN").await;
    h.enable("olga", org.id, &[CapabilityFlag::AllowMemberInvites]).await;

    let ada = principal("ada");
    let membership = h
        .manager
        .add_member_as(&ada, org.id, principal("mia"), None)
        .await
        .unwrap();
    assert_eq!(membership.role, "MEMBER");

    h.manager
        .add_member_as(&ada, org.id, principal("max"), Some(RoleName::from("MANAGER")))
        .await
        .unwrap();

    assert_eq!(
        code(
            h.manager
                .add_member_as(&ada, org.id, principal("abe"), Some(RoleName::from("ADMIN")))
                .await
        ),
        ErrorCode::CannotGrantEqualOrHigherRole
    );
    assert!(h.role_of("abe", org.id).await.is_none());
}

#[tokio::test]
async fn test_redeem_invite() {
    let h = Harness::new();
    let org = h.organization("olga").await;

    let membership = h
        .manager
        .redeem_invite(InviteRedemption::new("dana", org.id))
        .await
        .unwrap();
    assert_eq!(membership.role, "MEMBER");

    let membership = h
        .manager
        .redeem_invite(InviteRedemption::new("vic", org.id).with_role("VIEWER"))
        .await
        .unwrap();
    assert_eq!(membership.role, "VIEWER");
}

// ============================================================================
// Update Role Tests
// ============================================================================

#[tokio::test]
async fn test_update_role() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "ada", "ADMIN").await;
    h.join(org.id, "max", "MANAGER").await;
    h.enable("olga", org.id, &[CapabilityFlag::AllowMemberUpdates]).await;

    let membership = h
        .manager
        .update_role(&principal("ada"), org.id, &principal("max"), RoleName::from("VIEWER"))
        .await
        .unwrap();
    assert_eq!(membership.role, "VIEWER");
    assert_eq!(h.role_of("max", org.id).await.unwrap(), "VIEWER");

    assert_eq!(
        code(
            h.manager
                .update_role(&principal("ada"), org.id, &principal("max"), RoleName::from("ADMIN"))
                .await
        ),
        ErrorCode::CannotGrantEqualOrHigherRole
    );
}

#[tokio::test]
async fn test_update_role_never_touches_top_role() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "ada", "ADMIN").await;

    assert_eq!(
        code(
            h.manager
                .update_role(&principal("olga"), org.id, &principal("ada"), RoleName::from("OWNER"))
                .await
        ),
        ErrorCode::InvalidRole
    );
    assert_eq!(
        code(
            h.manager
                .update_role(&principal("ada"), org.id, &principal("olga"), RoleName::from("VIEWER"))
                .await
        ),
        ErrorCode::OwnerMustTransferFirst
    );
}

#[tokio::test]
async fn test_owner_may_demote_last_critical_holder() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "ada", "ADMIN").await;

    let membership = h
        .manager
        .update_role(&principal("olga"), org.id, &principal("ada"), RoleName::from("MEMBER"))
        .await
        .unwrap();
    assert_eq!(membership.role, "MEMBER");
    assert_eq!(h.count_by_role(org.id, &RoleName::from("ADMIN")).await, 0);
}

// ============================================================================
// Ownership Transfer Tests
// ============================================================================

#[tokio::test]
async fn test_transfer_ownership_swaps_roles() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "bob", "MEMBER").await;

    let scope = h
        .manager
        .transfer_ownership(&principal("olga"), org.id, &principal("bob"))
        .await
        .unwrap();

    assert_eq!(scope.owner, principal("bob"));
    assert_eq!(h.manager.scope(org.id).await.unwrap().owner, principal("bob"));
    assert_eq!(h.role_of("bob", org.id).await.unwrap(), "OWNER");
    assert_eq!(h.role_of("olga", org.id).await.unwrap(), "ADMIN");
    assert_eq!(h.count_by_role(org.id, &RoleName::from("OWNER")).await, 1);
}

#[tokio::test]
async fn test_transfer_preconditions() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "ada", "ADMIN").await;

    let olga = principal("olga");
    assert_eq!(
        code(h.manager.transfer_ownership(&principal("ada"), org.id, &olga).await),
        ErrorCode::NotOwner
    );
    assert_eq!(
        code(h.manager.transfer_ownership(&olga, org.id, &olga).await),
        ErrorCode::AlreadyOwner
    );
    assert_eq!(
        code(h.manager.transfer_ownership(&olga, org.id, &principal("zed")).await),
        ErrorCode::NotAMember
    );
    assert_eq!(h.manager.scope(org.id).await.unwrap().owner, olga);
}

#[tokio::test]
async fn test_transfer_requires_parent_membership() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    let project = h.project("olga", org.id).await;
    h.join(project.id, "bob", "CONTRIBUTOR").await;

    let err = h
        .manager
        .transfer_ownership(&principal("olga"), project.id, &principal("bob"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GovernanceError::NotAMember {
            scope: org.id,
            principal: principal("bob"),
        }
    );

    assert_eq!(h.manager.scope(project.id).await.unwrap().owner, principal("olga"));
    assert_eq!(h.role_of("olga", project.id).await.unwrap(), "OWNER");
    assert_eq!(h.role_of("bob", project.id).await.unwrap(), "CONTRIBUTOR");
}

#[tokio::test]
async fn test_parent_owner_may_transfer_child() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "pete", "ADMIN").await;
    h.join(org.id, "bob", "MEMBER").await;
    h.enable("olga", org.id, &[CapabilityFlag::AllowProjectCreation]).await;

    let project = h.project("pete", org.id).await;
    assert_eq!(project.owner, principal("pete"));
    h.join(project.id, "bob", "CONTRIBUTOR").await;

    h.manager
        .transfer_ownership(&principal("olga"), project.id, &principal("bob"))
        .await
        .unwrap();
    assert_eq!(h.role_of("bob", project.id).await.unwrap(), "OWNER");
    assert_eq!(h.role_of("pete", project.id).await.unwrap(), "MANAGER");
}

// ============================================================================
// Scope Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_create_scope_seeds_settings_and_owner() {
    let h = Harness::new();
    let org = h.organization("olga").await;

    assert_eq!(h.role_of("olga", org.id).await.unwrap(), "OWNER");
    let settings = h.manager.settings(org.id).await.unwrap();
    assert_eq!(settings.limits.max_members, 50);
    assert_eq!(settings.limits.max_teams, Some(5));
    assert_eq!(settings.default_member_role, "MEMBER");
}

#[tokio::test]
async fn test_create_scope_parent_validation() {
    let h = Harness::new();
    let olga = principal("olga");
    let org = h.organization("olga").await;
    let other = h.organization("olga").await;
    let team = h.team("olga", other.id).await;

    assert_eq!(
        code(h.manager.create_scope(&olga, NewScope::team("orphan")).await),
        ErrorCode::InvalidParent
    );
    assert_eq!(
        code(
            h.manager
                .create_scope(&olga, NewScope::organization("nested").in_organization(org.id))
                .await
        ),
        ErrorCode::InvalidParent
    );
    assert_eq!(
        code(
            h.manager
                .create_scope(&olga, NewScope::project("stray").in_organization(org.id).in_team(team.id))
                .await
        ),
        ErrorCode::InvalidParent
    );
    assert_eq!(
        code(
            h.manager
                .create_scope(&olga, NewScope::team("ghost").in_organization(ScopeId::generate()))
                .await
        ),
        ErrorCode::ScopeNotFound
    );
}

#[tokio::test]
async fn test_project_inherits_organization_from_team() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    let team = h.team("olga", org.id).await;

    let project = h
        .manager
        .create_scope(&principal("olga"), NewScope::project("apollo").in_team(team.id))
        .await
        .unwrap();
    assert_eq!(project.team, Some(team.id));
    assert_eq!(project.organization, Some(org.id));
    assert_eq!(project.membership_parent(), Some(org.id));
}

#[tokio::test]
async fn test_team_limit() {
    let defaults = GovernanceDefaults {
        max_teams: 1,
        ..GovernanceDefaults::default()
    };
    let h = Harness::with_defaults(PolicyCatalog::builtin(), defaults);
    let org = h.organization("olga").await;
    h.team("olga", org.id).await;

    let err = h
        .manager
        .create_scope(&principal("olga"), NewScope::team("second").in_organization(org.id))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GovernanceError::CapacityExceeded {
            scope: org.id,
            resource: "teams",
            limit: 1,
        }
    );
}

#[tokio::test]
async fn test_creation_requires_authorization_on_parent() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "mia", "MEMBER").await;
    h.enable("olga", org.id, &[CapabilityFlag::AllowTeamCreation]).await;

    let result = h
        .manager
        .create_scope(&principal("mia"), NewScope::team("skunkworks").in_organization(org.id))
        .await;
    assert_eq!(code(result), ErrorCode::InsufficientRole);

    let result = h
        .manager
        .create_scope(&principal("stranger"), NewScope::team("skunkworks").in_organization(org.id))
        .await;
    assert_eq!(code(result), ErrorCode::NotAMember);
}

#[tokio::test]
async fn test_delete_scope() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "ada", "ADMIN").await;

    assert_eq!(
        code(h.manager.delete_scope(&principal("ada"), org.id).await),
        ErrorCode::NotOwner
    );

    h.manager.delete_scope(&principal("olga"), org.id).await.unwrap();
    assert_eq!(code(h.manager.scope(org.id).await), ErrorCode::ScopeNotFound);
    assert_eq!(
        code(h.manager.add_member(org.id, principal("mia"), None).await),
        ErrorCode::ScopeNotFound
    );
}

// ============================================================================
// Store Fault Tests
// ============================================================================

#[tokio::test]
async fn test_failed_commit_leaves_no_trace() {
    let h = Harness::new();
    let org = h.organization("olga").await;

    h.store.fail_next_commit();
    let err = h
        .manager
        .add_member(org.id, principal("mia"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TransientStore);
    assert!(err.is_retryable());
    assert!(h.role_of("mia", org.id).await.is_none());

    h.manager.add_member(org.id, principal("mia"), None).await.unwrap();
    assert_eq!(h.role_of("mia", org.id).await.unwrap(), "MEMBER");
}

#[tokio::test]
async fn test_failed_begin_is_retryable() {
    let h = Harness::new();
    let org = h.organization("olga").await;

    h.store.fail_next_begin();
    let err = h
        .manager
        .transfer_ownership(&principal("olga"), org.id, &principal("bob"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

// ============================================================================
// Property Tests
// ============================================================================

#[tokio::test]
async fn test_random_operations_keep_single_owner() {
    let h = Harness::new();
    let org = h.organization("olga").await;
    h.join(org.id, "p1", "ADMIN").await;
    h.join(org.id, "p2", "MANAGER").await;
    h.enable(
        "olga",
        org.id,
        &[
            CapabilityFlag::AllowMemberInvites,
            CapabilityFlag::AllowMemberUpdates,
            CapabilityFlag::AllowMemberRemoval,
            CapabilityFlag::AllowSelfRemoval,
        ],
    )
    .await;

    let people = ["olga", "p1", "p2", "p3", "p4", "p5"];
    let roles = ["OWNER", "ADMIN", "MANAGER", "MEMBER", "VIEWER"];
    let top = RoleName::from("OWNER");

    for _ in 0..300 {
        let actor = principal(people[(0..people.len()).fake::<usize>()]);
        let target = principal(people[(0..people.len()).fake::<usize>()]);
        let role = RoleName::from(roles[(0..roles.len()).fake::<usize>()]);

        let _ = match (0..5).fake::<u8>() {
            0 => h
                .manager
                .add_member_as(&actor, org.id, target, Some(role))
                .await
                .map(|_| ()),
            1 => h.manager.remove_member(&actor, org.id, &target).await,
            2 => h.manager.self_remove(org.id, &target).await,
            3 => h
                .manager
                .update_role(&actor, org.id, &target, role)
                .await
                .map(|_| ()),
            _ => h
                .manager
                .transfer_ownership(&actor, org.id, &target)
                .await
                .map(|_| ()),
        };

        let scope = h.manager.scope(org.id).await.unwrap();
        assert_eq!(h.count_by_role(org.id, &top).await, 1);
        assert_eq!(h.role_of(scope.owner.as_str(), org.id).await, Some(top.clone()));
    }
}
