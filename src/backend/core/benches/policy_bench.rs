//! Benchmarks for threshold clamping and base-rule inheritance.
//!
//! Run with: cargo bench --bench policy_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use warden_core::config::GovernanceDefaults;
use warden_core::governance::actions::{CREATE_TASK, INVITE_MEMBER, REMOVE_MEMBER};
use warden_core::prelude::*;

fn settings(scope_type: ScopeType, catalog: &PolicyCatalog) -> GovernanceSettings {
    GovernanceSettings::defaults_for(ScopeId::generate(), scope_type, catalog, &GovernanceDefaults::default())
}

fn bench_effective_min_role(c: &mut Criterion) {
    let mut group = c.benchmark_group("effective_min_role");
    let catalog = PolicyCatalog::builtin();
    let resolver = PolicyResolver::new(catalog.clone());

    for (scope_type, action) in [
        (ScopeType::Organization, INVITE_MEMBER),
        (ScopeType::Team, REMOVE_MEMBER),
        (ScopeType::Project, CREATE_TASK),
    ] {
        let mut settings = settings(scope_type, &catalog);
        // Stored below the system minimum so every call clamps.
        settings.min_roles.insert(action.to_string(), RoleName::from("VIEWER"));

        group.bench_with_input(
            BenchmarkId::new(scope_type.as_str(), action),
            &settings,
            |b, settings| {
                b.iter(|| black_box(resolver.effective_min_role(scope_type, settings, action)));
            },
        );
    }
    group.finish();
}

fn bench_resolve_effective_policy(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_effective_policy");
    let catalog = PolicyCatalog::builtin();
    let resolver = PolicyResolver::new(catalog.clone());

    let organization = settings(ScopeType::Organization, &catalog);
    let team = settings(ScopeType::Team, &catalog);
    let mut project = settings(ScopeType::Project, &catalog);
    project.inherit_base_rules_from_team = true;
    project.inherit_base_rules_from_org = true;

    let standalone = SettingsLineage::standalone(settings(ScopeType::Organization, &catalog));
    let full = SettingsLineage::standalone(project)
        .with_team(team)
        .with_organization(organization);

    group.bench_function("standalone", |b| {
        b.iter(|| black_box(resolver.resolve_effective_policy(&standalone)));
    });
    group.bench_function("full_lineage", |b| {
        b.iter(|| black_box(resolver.resolve_effective_policy(&full)));
    });
    group.bench_function("effective_base_rules", |b| {
        b.iter(|| black_box(PolicyResolver::effective_base_rules(&full)));
    });
    group.finish();
}

fn bench_validate_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_governance_update");
    let resolver = PolicyResolver::new(PolicyCatalog::builtin());

    let valid = SettingsUpdate::new()
        .min_role(INVITE_MEMBER, "ADMIN")
        .flag(CapabilityFlag::AllowMemberInvites, true)
        .max_members(40);
    let invalid = SettingsUpdate::new()
        .min_role(INVITE_MEMBER, "VIEWER")
        .min_role("launch_rocket", "ADMIN")
        .default_member_role("OWNER")
        .max_members(0);

    group.bench_function("valid", |b| {
        b.iter(|| black_box(resolver.validate_governance_update(ScopeType::Organization, &valid)));
    });
    group.bench_function("invalid", |b| {
        b.iter(|| black_box(resolver.validate_governance_update(ScopeType::Organization, &invalid)));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_effective_min_role,
    bench_resolve_effective_policy,
    bench_validate_update,
);
criterion_main!(benches);
