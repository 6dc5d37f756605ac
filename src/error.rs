use thiserror::Error;

// Unified error type for kryst-struct

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("{0} used after destroy")]
    UseAfterFree(&'static str),
    #[error("singular operator: {0}")]
    SingularOperator(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("communication failure: {0}")]
    Communication(String),
}

impl KError {
    /// Integer status code handed to binding layers (0 is reserved for success).
    pub fn code(&self) -> i32 {
        match self {
            KError::InvalidArgument(_) => -1,
            KError::OutOfRange(_) => -2,
            KError::InvalidState(_) => -3,
            KError::UseAfterFree(_) => -4,
            KError::SingularOperator(_) => -5,
            KError::Fatal(_) => -6,
            KError::Communication(_) => -7,
        }
    }
}

/// Collapse a result into the integer status convention: `0` on success.
pub fn status<T>(result: &Result<T, KError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_negative() {
        let all = [
            KError::InvalidArgument(String::new()),
            KError::OutOfRange(String::new()),
            KError::InvalidState(String::new()),
            KError::UseAfterFree("stencil"),
            KError::SingularOperator(String::new()),
            KError::Fatal(String::new()),
            KError::Communication(String::new()),
        ];
        let mut codes: Vec<i32> = all.iter().map(KError::code).collect();
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn status_of_ok_is_zero() {
        let ok: Result<(), KError> = Ok(());
        assert_eq!(status(&ok), 0);
        let err: Result<(), KError> = Err(KError::OutOfRange("entry 7".into()));
        assert_eq!(status(&err), -2);
    }
}
