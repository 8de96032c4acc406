use super::{validate_order, ConjugateGradient};
use crate::error::CgError;
use crate::kernels;
use crate::schedule::PolicyCache;
use cgbench_core::{CgCoreError, SparseMatrix};
use log::{debug, trace};

/// Phase of a single solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgState {
    Init,
    Iterating { step: usize },
    Finalizing,
}

/// Result of one solve. The solution itself is written to the caller's `z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgOutcome {
    /// `||x - A z||` after the last step.
    pub rnorm: f64,
}

/// Scratch vectors `p`, `q` and `r`, reset at the start of every solve.
#[derive(Debug, Clone)]
pub struct CgWorkspace {
    pub p: Vec<f64>,
    pub q: Vec<f64>,
    pub r: Vec<f64>,
}

impl CgWorkspace {
    pub fn new(n: usize) -> Self {
        Self {
            p: vec![0.0; n],
            q: vec![0.0; n],
            r: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.p.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p.is_empty()
    }
}

impl ConjugateGradient {
    /// Approximately solves `A z = x`, overwriting `z`.
    ///
    /// Runs exactly `inner_iterations` steps from `z = 0`. There is no
    /// guard against `p.q == 0`: running more steps than the order of a
    /// small system that converges exactly produces NaN.
    pub fn solve(
        &self,
        policy: &PolicyCache,
        a: &SparseMatrix,
        x: &[f64],
        z: &mut [f64],
        work: &mut CgWorkspace,
    ) -> Result<CgOutcome, CgError> {
        validate_order(a, x.len(), "x length")?;
        if z.len() != x.len() || work.len() != x.len() {
            return Err(CgCoreError::InvalidDimensions(format!(
                "z ({}) and workspace ({}) must match x ({})",
                z.len(),
                work.len(),
                x.len()
            ))
            .into());
        }
        let CgWorkspace { p, q, r } = work;

        let mut state = CgState::Init;
        let mut rho = 0.0;
        loop {
            state = match state {
                CgState::Init => {
                    q.fill(0.0);
                    z.fill(0.0);
                    r.copy_from_slice(x);
                    p.copy_from_slice(x);
                    rho = kernels::dot(policy, r, r)?;
                    CgState::Iterating { step: 1 }
                }
                CgState::Iterating { step } if step > self.inner_iterations => {
                    CgState::Finalizing
                }
                CgState::Iterating { step } => {
                    kernels::spmv(policy, a, p, q)?;
                    let d = kernels::dot(policy, p, q)?;
                    if d == 0.0 {
                        debug!("CG step {}: p.q is zero", step);
                    }
                    let alpha = rho / d;
                    let rho0 = rho;
                    kernels::update_solution(policy, alpha, p, q, z, r)?;
                    rho = kernels::dot(policy, r, r)?;
                    let beta = rho / rho0;
                    kernels::update_direction(policy, beta, r, p)?;
                    trace!("CG step {}: rho = {:e}", step, rho);
                    CgState::Iterating { step: step + 1 }
                }
                CgState::Finalizing => {
                    kernels::spmv(policy, a, z, r)?;
                    let rnorm = kernels::residual_norm(policy, x, r)?;
                    return Ok(CgOutcome { rnorm });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_by_one_system_solves_in_one_step() {
        let a = SparseMatrix::from_dense(&[vec![4.0]]).unwrap();
        let mut z = vec![0.0];
        let mut work = CgWorkspace::new(1);
        let outcome = ConjugateGradient::with_iterations(1)
            .solve(&PolicyCache::default(), &a, &[2.0], &mut z, &mut work)
            .unwrap();
        assert_eq!(z, vec![0.5]);
        assert_eq!(outcome.rnorm, 0.0);
    }

    #[test]
    fn test_spd_system_converges_within_fixed_steps() {
        let a = SparseMatrix::from_dense(&[
            vec![4.0, -1.0, 0.0],
            vec![-1.0, 4.0, -1.0],
            vec![0.0, -1.0, 4.0],
        ])
        .unwrap();
        let x = [1.0, 2.0, 3.0];
        let mut z = vec![0.0; 3];
        let mut work = CgWorkspace::new(3);
        // Three steps solve a 3x3 system exactly up to rounding.
        let outcome = ConjugateGradient::with_iterations(3)
            .solve(&PolicyCache::default(), &a, &x, &mut z, &mut work)
            .unwrap();
        let expected = [0.4642857142857143, 0.8571428571428571, 0.9642857142857143];
        for (zi, ei) in z.iter().zip(expected) {
            assert!((zi - ei).abs() < 1e-12);
        }
        assert!(outcome.rnorm < 1e-12);
    }

    #[test]
    fn test_solve_resets_stale_state() {
        let a = SparseMatrix::from_dense(&[vec![2.0, 0.0], vec![0.0, 8.0]]).unwrap();
        let mut z = vec![123.0, -7.0];
        let mut work = CgWorkspace::new(2);
        work.p.fill(9.0);
        work.q.fill(9.0);
        ConjugateGradient::with_iterations(1)
            .solve(&PolicyCache::default(), &a, &[1.0, 0.0], &mut z, &mut work)
            .unwrap();
        assert_eq!(z, vec![0.5, 0.0]);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let a = SparseMatrix::from_dense(&[vec![1.0]]).unwrap();
        let mut z = vec![0.0; 2];
        let mut work = CgWorkspace::new(2);
        assert!(ConjugateGradient::default()
            .solve(&PolicyCache::default(), &a, &[1.0, 1.0], &mut z, &mut work)
            .is_err());
    }
}
