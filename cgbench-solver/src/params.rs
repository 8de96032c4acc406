//! Problem classes, validated problem parameters and result verification.

use crate::error::CgError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Relative tolerance used when comparing `zeta` to its reference value.
pub const VERIFY_EPSILON: f64 = 1.0e-10;

/// Inner CG steps per outer iteration.
pub const CG_ITERATIONS: usize = 25;

/// Default condition-number control.
pub const DEFAULT_RCOND: f64 = 0.1;

/// Standard benchmark problem sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemClass {
    S,
    W,
    A,
    B,
    C,
    D,
    E,
}

impl ProblemClass {
    pub const ALL: [ProblemClass; 7] = [
        ProblemClass::S,
        ProblemClass::W,
        ProblemClass::A,
        ProblemClass::B,
        ProblemClass::C,
        ProblemClass::D,
        ProblemClass::E,
    ];

    pub fn letter(&self) -> char {
        match self {
            ProblemClass::S => 'S',
            ProblemClass::W => 'W',
            ProblemClass::A => 'A',
            ProblemClass::B => 'B',
            ProblemClass::C => 'C',
            ProblemClass::D => 'D',
            ProblemClass::E => 'E',
        }
    }

    /// `(na, nonzer, niter, shift)` for the class.
    fn table_entry(&self) -> (usize, usize, usize, f64) {
        match self {
            ProblemClass::S => (1400, 7, 15, 10.0),
            ProblemClass::W => (7000, 8, 15, 12.0),
            ProblemClass::A => (14000, 11, 15, 20.0),
            ProblemClass::B => (75000, 13, 75, 60.0),
            ProblemClass::C => (150000, 15, 75, 110.0),
            ProblemClass::D => (1500000, 21, 100, 500.0),
            ProblemClass::E => (9000000, 26, 100, 1500.0),
        }
    }

    /// Reference eigenvalue estimate after `niter` outer iterations.
    pub fn reference_zeta(&self) -> f64 {
        match self {
            ProblemClass::S => 8.5971775078648,
            ProblemClass::W => 10.362595087124,
            ProblemClass::A => 17.130235054029,
            ProblemClass::B => 22.712745482631,
            ProblemClass::C => 28.973605592845,
            ProblemClass::D => 52.514532105794,
            ProblemClass::E => 77.522164599383,
        }
    }

    pub fn params(&self) -> ProblemParams {
        let (na, nonzer, niter, shift) = self.table_entry();
        ProblemParams {
            na,
            nonzer,
            niter,
            shift,
            rcond: DEFAULT_RCOND,
        }
    }
}

impl fmt::Display for ProblemClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for ProblemClass {
    type Err = CgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ProblemClass::ALL
            .into_iter()
            .find(|c| trimmed.eq_ignore_ascii_case(&c.letter().to_string()))
            .ok_or_else(|| CgError::InvalidConfig(format!("unknown problem class '{}'", s)))
    }
}

/// Size and spectrum parameters of one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProblemParams {
    /// Matrix order.
    pub na: usize,
    /// Nonzeros drawn per column template (before the diagonal entry).
    pub nonzer: usize,
    /// Outer inverse-power iterations.
    pub niter: usize,
    /// Eigenvalue shift.
    pub shift: f64,
    /// Condition-number control, in (0, 1].
    pub rcond: f64,
}

impl ProblemParams {
    /// Checks the parameters can drive matrix generation to completion.
    pub fn validate(&self) -> Result<(), CgError> {
        if self.na == 0 {
            return Err(CgError::InvalidParams("na must be positive".to_string()));
        }
        if self.nonzer + 1 > self.na {
            return Err(CgError::InvalidParams(format!(
                "nonzer + 1 ({}) exceeds na ({})",
                self.nonzer + 1,
                self.na
            )));
        }
        if !(self.rcond > 0.0 && self.rcond <= 1.0) {
            return Err(CgError::InvalidParams(format!(
                "rcond {} not in (0, 1]",
                self.rcond
            )));
        }
        if self.niter == 0 {
            return Err(CgError::InvalidParams("niter must be positive".to_string()));
        }
        if u32::try_from(self.na).is_err() {
            return Err(CgError::InvalidParams(format!(
                "na ({}) does not fit device indexing",
                self.na
            )));
        }
        Ok(())
    }

    /// Upper bound on stored entries: `na * (nonzer + 1)^2`.
    pub fn nz_max(&self) -> usize {
        self.na * (self.nonzer + 1) * (self.nonzer + 1)
    }

    /// Standard class these parameters correspond to, if any.
    pub fn class(&self) -> Option<ProblemClass> {
        ProblemClass::ALL.into_iter().find(|c| {
            let p = c.params();
            p.na == self.na
                && p.nonzer == self.nonzer
                && p.niter == self.niter
                && p.shift == self.shift
        })
    }

    /// Class letter, `'U'` for non-standard sizes.
    pub fn class_letter(&self) -> char {
        self.class().map_or('U', |c| c.letter())
    }

    /// Floating-point operation count of a full run, in the benchmark's
    /// convention.
    pub fn operation_count(&self) -> f64 {
        let nz = (self.nonzer * (self.nonzer + 1)) as f64;
        2.0 * self.niter as f64
            * self.na as f64
            * (3.0 + nz + CG_ITERATIONS as f64 * (5.0 + nz) + 3.0)
    }

    /// Compares `zeta` with the reference for these parameters.
    pub fn verify(&self, zeta: f64) -> Verification {
        match self.class() {
            None => Verification::NotPerformed,
            Some(class) => {
                let reference = class.reference_zeta();
                let error = ((zeta - reference) / reference).abs();
                Verification::Checked {
                    reference,
                    error,
                    passed: error <= VERIFY_EPSILON,
                }
            }
        }
    }
}

/// Outcome of comparing the final `zeta` against the reference table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Verification {
    /// Problem size has no reference value.
    NotPerformed,
    Checked {
        reference: f64,
        error: f64,
        passed: bool,
    },
}

impl Verification {
    pub fn passed(&self) -> bool {
        matches!(self, Verification::Checked { passed: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_s_parameters() {
        let p = ProblemClass::S.params();
        assert_eq!((p.na, p.nonzer, p.niter), (1400, 7, 15));
        assert_eq!(p.shift, 10.0);
        assert_eq!(p.nz_max(), 1400 * 64);
        assert!(p.validate().is_ok());
        assert_eq!(p.class_letter(), 'S');
    }

    #[test]
    fn test_class_parsing() {
        assert_eq!("w".parse::<ProblemClass>().unwrap(), ProblemClass::W);
        assert_eq!(" B ".parse::<ProblemClass>().unwrap(), ProblemClass::B);
        assert!("Q".parse::<ProblemClass>().is_err());
    }

    #[test]
    fn test_unknown_size_is_not_verified() {
        let p = ProblemParams {
            na: 100,
            nonzer: 3,
            niter: 2,
            shift: 5.0,
            rcond: 0.1,
        };
        assert_eq!(p.class_letter(), 'U');
        assert_eq!(p.verify(1.0), Verification::NotPerformed);
        assert!(!p.verify(1.0).passed());
    }

    #[test]
    fn test_verify_uses_relative_tolerance() {
        let p = ProblemClass::S.params();
        assert!(p.verify(8.5971775078648).passed());
        assert!(p.verify(8.5971775078648 * (1.0 + 5e-11)).passed());
        assert!(!p.verify(8.5971775078648 * (1.0 + 1e-9)).passed());
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let base = ProblemClass::S.params();
        let too_dense = ProblemParams {
            na: 4,
            nonzer: 4,
            ..base
        };
        assert!(matches!(too_dense.validate(), Err(CgError::InvalidParams(_))));
        let bad_rcond = ProblemParams { rcond: 0.0, ..base };
        assert!(bad_rcond.validate().is_err());
    }

    #[test]
    fn test_operation_count_class_s() {
        let p = ProblemClass::S.params();
        // 2 * 15 * 1400 * (3 + 56 + 25 * 61 + 3)
        assert_eq!(p.operation_count(), 2.0 * 15.0 * 1400.0 * 1587.0);
    }
}
