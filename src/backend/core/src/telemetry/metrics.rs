//! Governance counters recorded through the `metrics` facade.
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, describe_counter};

use crate::error::ErrorCode;
use crate::models::ScopeType;

pub const AUTHZ_DECISIONS: &str = "warden_authz_decisions_total";
pub const MEMBERSHIP_MUTATIONS: &str = "warden_membership_mutations_total";
pub const ERRORS: &str = "warden_errors_total";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(AUTHZ_DECISIONS, "Authorization decisions by scope type, action and outcome");
    describe_counter!(MEMBERSHIP_MUTATIONS, "Committed membership and scope mutations");
    describe_counter!(ERRORS, "Governance errors by code and category");
}

/// Count one authorization decision. `outcome` is `allow` or a deny reason.
pub fn record_decision(scope_type: ScopeType, action: &str, outcome: &'static str) {
    counter!(
        AUTHZ_DECISIONS,
        "scope_type" => scope_type.as_str(),
        "action" => action.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
}

/// Count one committed mutation.
pub fn record_mutation(operation: &'static str, scope_type: ScopeType) {
    counter!(
        MEMBERSHIP_MUTATIONS,
        "operation" => operation,
        "scope_type" => scope_type.as_str(),
    )
    .increment(1);
}

pub fn record_error(code: ErrorCode) {
    counter!(
        ERRORS,
        "code" => code.to_string(),
        "category" => code.category(),
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        record_decision(ScopeType::Team, "invite_member", "allow");
        record_mutation("add_member", ScopeType::Project);
        record_error(ErrorCode::LastHolderProtected);
    }
}
