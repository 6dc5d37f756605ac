//! Object lifecycle tracking shared by grids, stencils, matrices and vectors.

use crate::error::KError;

/// Where an object stands between creation and destroy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Created, accepting configuration or values.
    Building,
    /// Finalized; usable by dependent objects and solvers.
    Assembled,
    /// Storage released; every further call fails with `UseAfterFree`.
    Destroyed,
}

impl Phase {
    pub fn ensure_live(self, what: &'static str) -> Result<(), KError> {
        match self {
            Phase::Destroyed => Err(KError::UseAfterFree(what)),
            _ => Ok(()),
        }
    }

    pub fn ensure_assembled(self, what: &'static str) -> Result<(), KError> {
        match self {
            Phase::Assembled => Ok(()),
            Phase::Building => Err(KError::InvalidState(format!("{what} has not been assembled"))),
            Phase::Destroyed => Err(KError::UseAfterFree(what)),
        }
    }

    /// Transition to `Destroyed`; a second destroy is reported, not ignored.
    pub fn destroy(&mut self, what: &'static str) -> Result<(), KError> {
        self.ensure_live(what)?;
        *self = Phase::Destroyed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_destroy_is_use_after_free() {
        let mut p = Phase::Building;
        p.destroy("grid").unwrap();
        assert_eq!(p.destroy("grid"), Err(KError::UseAfterFree("grid")));
        assert_eq!(p.ensure_assembled("grid"), Err(KError::UseAfterFree("grid")));
    }

    #[test]
    fn building_is_not_assembled() {
        assert!(matches!(
            Phase::Building.ensure_assembled("matrix"),
            Err(KError::InvalidState(_))
        ));
        assert!(Phase::Assembled.ensure_assembled("matrix").is_ok());
    }
}
