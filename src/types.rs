//! Shared error and result types.
//!
//! The error taxonomy matters operationally: callers react differently to a
//! locked cellar (prompt for unlock) than to a validation failure (fix the
//! request) or a reload-signal miss (log a warning, durable state is already
//! correct).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CellarError>;

#[derive(Debug, Error)]
pub enum CellarError {
    /// Malformed address, JSON, base64, or key blob. Client-facing, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The master key is not available. Callers should prompt for unlock
    /// rather than retry blindly.
    #[error("cellar is locked")]
    Locked,

    /// Wrong password or unknown operator. Deliberately indistinguishable
    /// so the unlock path cannot be used as an authentication oracle.
    #[error("login failed")]
    LoginFailed,

    /// AEAD failure outside the unlock path (tag mismatch on stored material).
    /// Never logged with secret material attached.
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No live tor process to signal. A warning, not a failure: the durable
    /// configuration was already updated and takes effect on the next restart.
    #[error("reload signal failed: {0}")]
    ReloadSignal(String),

    #[error("{0}")]
    Internal(String),
}

impl CellarError {
    /// Process exit code for the CLI surface: 0 success, 1 validation/IO, 2 locked.
    pub fn exit_code(&self) -> i32 {
        match self {
            CellarError::Locked => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_maps_to_exit_code_2() {
        assert_eq!(CellarError::Locked.exit_code(), 2);
        assert_eq!(CellarError::Validation("x".into()).exit_code(), 1);
        assert_eq!(CellarError::LoginFailed.exit_code(), 1);
    }
}
