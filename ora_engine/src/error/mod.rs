mod multi;

pub use multi::{ErrorList, MultiError};

use crate::provider::ProviderError;
use thiserror::Error;

/// Error category for decision-making (retry, abort, reconnect, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - retry may resolve
    Transient,
    /// Fatal error - should abort operation
    Fatal,
    /// Validation error - invalid user input
    Validation,
    /// Connection lost - should reconnect
    ConnectionLost,
}

/// Provider codes that mean the server connection is gone.
const CONNECTION_LOST_CODES: [i32; 4] = [3113, 3114, 3135, 12541];

#[derive(Error, Debug, Clone)]
pub enum OraError {
    #[error("{0} is closed")]
    AlreadyClosed(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid bind parameter at index {index} ({type_name}): {reason}")]
    InvalidBindParameter {
        index: usize,
        type_name: String,
        reason: String,
    },

    #[error("{0}")]
    Provider(ProviderError),

    #[error("Recovered fault: {0}")]
    RecoveredFault(String),

    #[error("{0}")]
    Multi(MultiError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<ProviderError> for OraError {
    fn from(err: ProviderError) -> Self {
        OraError::Provider(err)
    }
}

impl OraError {
    pub(crate) fn invalid_bind(index: usize, type_name: &str, reason: impl Into<String>) -> Self {
        OraError::InvalidBindParameter {
            index,
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        OraError::InternalError(format!("{} lock poisoned", what))
    }

    pub fn is_already_closed(&self) -> bool {
        matches!(self, OraError::AlreadyClosed(_))
    }

    /// Native error code, or 0 when the error did not come from the provider.
    pub fn code(&self) -> i32 {
        match self {
            OraError::Provider(e) => e.code,
            _ => 0,
        }
    }

    /// The leaf errors behind this error: the members of a `Multi`, or itself.
    pub fn causes(&self) -> Vec<&OraError> {
        match self {
            OraError::Multi(m) => m.errors().iter().collect(),
            other => vec![other],
        }
    }

    /// Returns true if the error is transient and may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            OraError::Provider(e) => CONNECTION_LOST_CODES.contains(&e.code),
            OraError::PoolError(_) | OraError::DeadlineExceeded => true,
            OraError::InternalError(msg) => msg.contains("timeout") || msg.contains("Timeout"),
            _ => false,
        }
    }

    /// Returns true if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        match self {
            OraError::Provider(e) => CONNECTION_LOST_CODES.contains(&e.code),
            OraError::Multi(m) => m.errors().iter().any(|e| e.is_connection_error()),
            _ => false,
        }
    }

    /// Returns the error category for decision-making
    pub fn error_category(&self) -> ErrorCategory {
        if matches!(
            self,
            OraError::InvalidParameter(_) | OraError::InvalidBindParameter { .. }
        ) {
            return ErrorCategory::Validation;
        }
        if self.is_connection_error() {
            return ErrorCategory::ConnectionLost;
        }
        if self.is_retryable() {
            return ErrorCategory::Transient;
        }
        ErrorCategory::Fatal
    }
}

pub type Result<T> = std::result::Result<T, OraError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_err(code: i32, message: &str) -> OraError {
        OraError::Provider(ProviderError::new(code, message))
    }

    #[test]
    fn test_ora_error_variants() {
        let err1 = OraError::AlreadyClosed("Stmt");
        assert_eq!(err1.to_string(), "Stmt is closed");

        let err2 = OraError::InvalidParameter("sql may not be empty".to_string());
        assert_eq!(err2.to_string(), "Invalid parameter: sql may not be empty");

        let err3 = OraError::invalid_bind(2, "HashMap<u8, u8>", "unsupported type");
        assert_eq!(
            err3.to_string(),
            "Invalid bind parameter at index 2 (HashMap<u8, u8>): unsupported type"
        );

        let err4 = provider_err(942, "ORA-00942: table or view does not exist");
        assert!(err4.to_string().contains("ORA-00942"));

        let err5 = OraError::RecoveredFault("boom".to_string());
        assert!(err5.to_string().contains("boom"));

        let err6 = OraError::InternalError("Lock poisoned".to_string());
        assert!(err6.to_string().contains("Lock poisoned"));
    }

    #[test]
    fn test_code_defaults_to_zero() {
        assert_eq!(OraError::Cancelled.code(), 0);
        assert_eq!(provider_err(1, "ORA-00001").code(), 1);
    }

    #[test]
    fn test_is_retryable() {
        assert!(provider_err(3113, "ORA-03113: end-of-file on communication channel").is_retryable());
        assert!(OraError::PoolError("Pool exhausted".to_string()).is_retryable());
        assert!(OraError::InternalError("Query timeout".to_string()).is_retryable());
        assert!(!provider_err(1, "ORA-00001: unique constraint violated").is_retryable());
        assert!(!OraError::InvalidParameter("x".to_string()).is_retryable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            OraError::InvalidParameter("x".to_string()).error_category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            OraError::invalid_bind(0, "()", "nope").error_category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            provider_err(12541, "ORA-12541: TNS:no listener").error_category(),
            ErrorCategory::ConnectionLost
        );
        assert_eq!(
            OraError::PoolError("Pool exhausted".to_string()).error_category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            OraError::AlreadyClosed("Ses").error_category(),
            ErrorCategory::Fatal
        );
    }

    #[test]
    fn test_multi_connection_error_propagates() {
        let mut errs = ErrorList::new();
        errs.push(provider_err(3114, "ORA-03114: not connected to ORACLE"));
        let err = errs.finish().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.causes().len(), 1);
    }
}
