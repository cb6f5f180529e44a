use super::{OraError, Result};
use crate::pool::POOLS;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Every failure collected while tearing down a node and its descendants.
#[derive(Debug, Clone, Default)]
pub struct MultiError {
    errors: Vec<OraError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error. Nested multis are flattened so only leaf causes remain.
    pub fn push(&mut self, err: OraError) {
        match err {
            OraError::Multi(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    pub fn errors(&self) -> &[OraError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no errors"),
            [only] => write!(f, "{}", only),
            many => {
                write!(f, "{} errors: ", many.len())?;
                for (i, err) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

/// Collector used by cascading close. The backing vector comes from the
/// shared error-list pool and goes back there on `finish`.
pub struct ErrorList {
    errors: Vec<OraError>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self {
            errors: POOLS.errors.acquire(),
        }
    }

    pub fn push(&mut self, err: OraError) {
        match err {
            OraError::Multi(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Runs one teardown step. An error is recorded; a panic is caught and
    /// recorded as `RecoveredFault` so the remaining steps still run.
    pub fn guard<F>(&mut self, step: &str, f: F)
    where
        F: FnOnce() -> Result<()>,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.push(err),
            Err(payload) => {
                let msg = format!("{}: {}", step, panic_message(payload.as_ref()));
                log::error!("recovered fault during {}", msg);
                self.errors.push(OraError::RecoveredFault(msg));
            }
        }
    }

    /// Reduces the collected errors to `Ok(())` or a single `OraError::Multi`.
    pub fn finish(mut self) -> Result<()> {
        let mut errors = std::mem::take(&mut self.errors);
        if errors.is_empty() {
            POOLS.errors.release(errors);
            return Ok(());
        }
        let multi = MultiError {
            errors: errors.drain(..).collect(),
        };
        POOLS.errors.release(errors);
        Err(OraError::Multi(multi))
    }
}

impl Default for ErrorList {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_is_ok() {
        let errs = ErrorList::new();
        assert!(errs.is_empty());
        assert!(errs.finish().is_ok());
    }

    #[test]
    fn test_single_error_still_multi() {
        let mut errs = ErrorList::new();
        errs.push(OraError::InvalidState("detach failed".to_string()));
        match errs.finish() {
            Err(OraError::Multi(m)) => {
                assert_eq!(m.len(), 1);
                assert_eq!(m.to_string(), "Invalid state: detach failed");
            }
            other => panic!("Expected Multi, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_multi_is_flattened() {
        let mut inner = MultiError::new();
        inner.push(OraError::Cancelled);
        inner.push(OraError::DeadlineExceeded);

        let mut errs = ErrorList::new();
        errs.push(OraError::Multi(inner));
        errs.push(OraError::AlreadyClosed("Srv"));
        assert_eq!(errs.len(), 3);

        let err = errs.finish().unwrap_err();
        let causes = err.causes();
        assert_eq!(causes.len(), 3);
        assert!(causes.iter().all(|e| !matches!(e, OraError::Multi(_))));
        assert!(err.to_string().starts_with("3 errors: "));
    }

    #[test]
    fn test_guard_records_error_and_continues() {
        let mut errs = ErrorList::new();
        let mut ran = 0;
        errs.guard("first", || Err(OraError::Cancelled));
        errs.guard("second", || {
            ran += 1;
            Ok(())
        });
        assert_eq!(ran, 1);
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn test_guard_recovers_panic() {
        let mut errs = ErrorList::new();
        errs.guard("free handle", || panic!("handle table corrupted"));
        let err = errs.finish().unwrap_err();
        match err.causes().as_slice() {
            [OraError::RecoveredFault(msg)] => {
                assert!(msg.contains("free handle"));
                assert!(msg.contains("handle table corrupted"));
            }
            other => panic!("Expected RecoveredFault, got {:?}", other),
        }
    }
}
