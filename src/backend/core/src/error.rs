//! Error handling for the governance core.
//!
//! This module provides:
//! - [`GovernanceError`], one variant per business-rule outcome plus the
//!   transient store failure that callers may retry
//! - [`ErrorCode`], stable machine-readable codes for the consuming HTTP layer
//! - Severity classification and tracing/metrics integration via [`GovernanceError::log`]
//!
//! Business-rule errors are expected outcomes and terminal for the request.
//! Only [`GovernanceError::TransientStore`] is retryable.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::governance::{CapabilityFlag, FieldError};
use crate::models::{PrincipalId, RoleName, ScopeId, ScopeType};
use crate::roles::RegistryError;
use crate::store::StoreError;
use crate::telemetry::metrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for governance operations.
pub type Result<T> = std::result::Result<T, GovernanceError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authorization (1000-1099)
    UnknownAction,
    ActionDisabled,
    NotAMember,
    InsufficientRole,
    CannotActOnEqualOrHigherRole,
    CannotGrantEqualOrHigherRole,
    NotOwner,

    // Membership (1100-1199)
    AlreadyMember,
    CapacityExceeded,
    InvalidRole,
    CannotRemoveOwner,
    LastHolderProtected,
    SelfRemovalDisabled,
    OwnerMustTransferFirst,
    AlreadyOwner,

    // Validation (1200-1299)
    SettingsOutOfBounds,
    InvalidParent,

    // Lookup (1300-1399)
    ScopeNotFound,

    // Store (2000-2099)
    TransientStore,

    // Configuration (5000-5099)
    InvalidRegistry,

    // Internal (9000-9099)
    InconsistentState,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::UnknownAction => 1000,
            Self::ActionDisabled => 1001,
            Self::NotAMember => 1002,
            Self::InsufficientRole => 1003,
            Self::CannotActOnEqualOrHigherRole => 1004,
            Self::CannotGrantEqualOrHigherRole => 1005,
            Self::NotOwner => 1006,

            Self::AlreadyMember => 1100,
            Self::CapacityExceeded => 1101,
            Self::InvalidRole => 1102,
            Self::CannotRemoveOwner => 1103,
            Self::LastHolderProtected => 1104,
            Self::SelfRemovalDisabled => 1105,
            Self::OwnerMustTransferFirst => 1106,
            Self::AlreadyOwner => 1107,

            Self::SettingsOutOfBounds => 1200,
            Self::InvalidParent => 1201,

            Self::ScopeNotFound => 1300,

            Self::TransientStore => 2000,

            Self::InvalidRegistry => 5000,

            Self::InconsistentState => 9000,
        }
    }

    /// HTTP status hint for the consuming API layer.
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::UnknownAction | Self::InvalidRole | Self::InvalidParent => 400,

            Self::ActionDisabled
            | Self::NotAMember
            | Self::InsufficientRole
            | Self::CannotActOnEqualOrHigherRole
            | Self::CannotGrantEqualOrHigherRole
            | Self::NotOwner
            | Self::SelfRemovalDisabled => 403,

            Self::ScopeNotFound => 404,

            Self::AlreadyMember
            | Self::AlreadyOwner
            | Self::CannotRemoveOwner
            | Self::LastHolderProtected
            | Self::OwnerMustTransferFirst
            | Self::CapacityExceeded => 409,

            Self::SettingsOutOfBounds => 422,

            Self::InvalidRegistry | Self::InconsistentState => 500,

            Self::TransientStore => 503,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "authorization",
            1100..=1199 => "membership",
            1200..=1299 => "validation",
            1300..=1399 => "lookup",
            2000..=2099 => "store",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Business-rule rejections
    Low,
    /// Operational issues (store conflicts, timeouts)
    Medium,
    /// Misconfiguration
    High,
    /// Broken invariants in persisted state
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::TransientStore => Self::Medium,
            ErrorCode::InvalidRegistry => Self::High,
            ErrorCode::InconsistentState => Self::Critical,
            _ => Self::Low,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Governance Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Every failure a governance operation can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GovernanceError {
    #[error("unknown action '{action}' for {scope_type}")]
    UnknownAction { scope_type: ScopeType, action: String },

    #[error("action '{action}' is disabled on {scope} ({flag} is off)")]
    ActionDisabled {
        scope: ScopeId,
        action: String,
        flag: CapabilityFlag,
    },

    #[error("{principal} is not a member of {scope}")]
    NotAMember { scope: ScopeId, principal: PrincipalId },

    #[error("action '{action}' on {scope} requires {required}, actor holds {actual}")]
    InsufficientRole {
        scope: ScopeId,
        action: String,
        required: RoleName,
        actual: RoleName,
    },

    #[error("cannot act on {target} in {scope}: target holds an equal or higher role")]
    CannotActOnEqualOrHigherRole { scope: ScopeId, target: PrincipalId },

    #[error("cannot grant {role} in {scope}: not strictly below the actor's own role")]
    CannotGrantEqualOrHigherRole { scope: ScopeId, role: RoleName },

    #[error("{principal} is already a member of {scope}")]
    AlreadyMember { scope: ScopeId, principal: PrincipalId },

    #[error("{scope} has reached its {resource} limit of {limit}")]
    CapacityExceeded {
        scope: ScopeId,
        resource: &'static str,
        limit: u32,
    },

    #[error("role {role} is not assignable in {scope_type}")]
    InvalidRole { scope_type: ScopeType, role: RoleName },

    #[error("the owner of {scope} cannot be removed")]
    CannotRemoveOwner { scope: ScopeId },

    #[error("{scope} must keep at least one {role}")]
    LastHolderProtected { scope: ScopeId, role: RoleName },

    #[error("members may not remove themselves from {scope}")]
    SelfRemovalDisabled { scope: ScopeId },

    #[error("the owner of {scope} must transfer ownership first")]
    OwnerMustTransferFirst { scope: ScopeId },

    #[error("{principal} does not own {scope}")]
    NotOwner { scope: ScopeId, principal: PrincipalId },

    #[error("{principal} already owns {scope}")]
    AlreadyOwner { scope: ScopeId, principal: PrincipalId },

    #[error("{} settings field(s) out of bounds", errors.len())]
    SettingsOutOfBounds { errors: Vec<FieldError> },

    #[error("scope {scope} not found")]
    ScopeNotFound { scope: ScopeId },

    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("inconsistent governance state: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    TransientStore(#[from] StoreError),
}

impl GovernanceError {
    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownAction { .. } => ErrorCode::UnknownAction,
            Self::ActionDisabled { .. } => ErrorCode::ActionDisabled,
            Self::NotAMember { .. } => ErrorCode::NotAMember,
            Self::InsufficientRole { .. } => ErrorCode::InsufficientRole,
            Self::CannotActOnEqualOrHigherRole { .. } => ErrorCode::CannotActOnEqualOrHigherRole,
            Self::CannotGrantEqualOrHigherRole { .. } => ErrorCode::CannotGrantEqualOrHigherRole,
            Self::AlreadyMember { .. } => ErrorCode::AlreadyMember,
            Self::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            Self::InvalidRole { .. } => ErrorCode::InvalidRole,
            Self::CannotRemoveOwner { .. } => ErrorCode::CannotRemoveOwner,
            Self::LastHolderProtected { .. } => ErrorCode::LastHolderProtected,
            Self::SelfRemovalDisabled { .. } => ErrorCode::SelfRemovalDisabled,
            Self::OwnerMustTransferFirst { .. } => ErrorCode::OwnerMustTransferFirst,
            Self::NotOwner { .. } => ErrorCode::NotOwner,
            Self::AlreadyOwner { .. } => ErrorCode::AlreadyOwner,
            Self::SettingsOutOfBounds { .. } => ErrorCode::SettingsOutOfBounds,
            Self::ScopeNotFound { .. } => ErrorCode::ScopeNotFound,
            Self::InvalidParent(_) => ErrorCode::InvalidParent,
            Self::Registry(_) => ErrorCode::InvalidRegistry,
            Self::Inconsistent(_) => ErrorCode::InconsistentState,
            Self::TransientStore(_) => ErrorCode::TransientStore,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.code().http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code())
    }

    /// Field errors carried by a settings rejection.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::SettingsOutOfBounds { errors } => errors,
            _ => &[],
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity and count it.
    pub fn log(&self) {
        let code = self.code();
        let category = code.category();
        let status = code.http_status();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    error = %self,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    error = %self,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    retryable = code.is_retryable(),
                    error = %self,
                    "Transient governance failure"
                );
            }
            ErrorSeverity::Low => {
                debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    error = %self,
                    "Governance rule rejected request"
                );
            }
        }

        metrics::record_error(code);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
