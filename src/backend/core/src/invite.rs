//! Invitation redemption.
//!
//! Tokens are issued, stored and verified outside this crate. On successful
//! verification the token service hands over an [`InviteRedemption`], which
//! [`MembershipManager::redeem_invite`](crate::membership::MembershipManager::redeem_invite)
//! turns directly into an active membership.

use serde::{Deserialize, Serialize};

use crate::models::{PrincipalId, RoleName, ScopeId};

/// The payload of a verified invitation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRedemption {
    pub principal: PrincipalId,
    pub scope: ScopeId,
    /// Role to grant; the scope's default member role when absent.
    #[serde(default)]
    pub role: Option<RoleName>,
}

impl InviteRedemption {
    pub fn new(principal: impl Into<PrincipalId>, scope: ScopeId) -> Self {
        Self {
            principal: principal.into(),
            scope,
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<RoleName>) -> Self {
        self.role = Some(role.into());
        self
    }
}
