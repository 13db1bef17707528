// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Schedule policy error type
#[derive(Error, Debug, Diagnostic)]
pub enum ScheduleError {
    /// Named policy does not exist
    #[error("Schedule policy {name} not found")]
    #[diagnostic(
        code(portage::schedule::policy_not_found),
        help("Create the SchedulePolicy or fix the schedulePolicyName reference")
    )]
    PolicyNotFound {
        #[allow(unused)]
        name: String,
    },

    /// Policy exists but has no schedule of the requested type
    #[error("Schedule policy {name} has no {policy_type} schedule")]
    #[diagnostic(
        code(portage::schedule::policy_type_not_set),
        help("Add a {policy_type} section to the policy or request another type")
    )]
    PolicyTypeNotSet {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        policy_type: String,
    },

    /// Policy type name is not one of interval, daily, weekly, monthly
    #[error("Unknown schedule policy type {value}")]
    #[diagnostic(
        code(portage::schedule::unknown_policy_type),
        help("Use one of Interval, Daily, Weekly or Monthly")
    )]
    UnknownPolicyType {
        #[allow(unused)]
        value: String,
    },

    /// Policy failed validation
    #[error("Invalid schedule policy {name}: {reason}")]
    #[diagnostic(code(portage::schedule::invalid_policy), help("{suggestion}"))]
    InvalidPolicy {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Core error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] portage_core::PortageError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(portage::schedule::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for schedule operations
pub type Result<T> = std::result::Result<T, ScheduleError>;

impl ScheduleError {
    pub fn policy_not_found(name: impl Into<String>) -> Self {
        Self::PolicyNotFound { name: name.into() }
    }

    pub fn policy_type_not_set(name: impl Into<String>, policy_type: impl Into<String>) -> Self {
        Self::PolicyTypeNotSet {
            name: name.into(),
            policy_type: policy_type.into(),
        }
    }

    pub fn unknown_policy_type(value: impl Into<String>) -> Self {
        Self::UnknownPolicyType { value: value.into() }
    }

    pub fn invalid_policy(
        name: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidPolicy {
            name: name.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
