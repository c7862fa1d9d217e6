use thiserror::Error;

use crate::auth::{Action, Role};

/// A string did not name any variant of a closed enumeration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Returned by [`crate::authorize`] when a role may not perform an action.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Role {role} is not allowed to {action}")]
pub struct AccessDenied {
    pub role: Role,
    pub action: Action,
}
