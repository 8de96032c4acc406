//! Solver algorithms: the fixed-step conjugate gradient and the shifted
//! inverse power method built on it.

pub mod conjugate_gradient;
pub mod inverse_power;

pub use conjugate_gradient::{CgOutcome, CgState, CgWorkspace};
pub use inverse_power::{
    HostBackend, IterationRecord, OffloadBackend, PowerRunSummary, PowerStepBackend,
};

use crate::error::CgError;
use crate::params::{ProblemParams, CG_ITERATIONS};
use cgbench_core::{CgCoreError, Matrix};

/// Checks that `a` is square with order `n`, naming `what` on failure.
fn validate_order<M: Matrix>(a: &M, n: usize, what: &str) -> Result<(), CgError> {
    let (rows, cols) = a.dims();
    if rows != cols {
        return Err(CgCoreError::InvalidDimensions(format!(
            "matrix must be square (dims: {}x{})",
            rows, cols
        ))
        .into());
    }
    if rows != n {
        return Err(CgCoreError::InvalidDimensions(format!(
            "matrix order ({}) must match {} ({})",
            rows, what, n
        ))
        .into());
    }
    Ok(())
}

/// Conjugate Gradient with a fixed number of steps and no convergence test.
#[derive(Debug, Clone)]
pub struct ConjugateGradient {
    pub inner_iterations: usize,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self {
            inner_iterations: CG_ITERATIONS,
        }
    }
}

impl ConjugateGradient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_iterations(inner_iterations: usize) -> Self {
        Self { inner_iterations }
    }
}

/// Shifted inverse power method estimating the largest eigenvalue.
#[derive(Debug, Clone)]
pub struct InversePower {
    pub params: ProblemParams,
    pub solver: ConjugateGradient,
    /// Run one extra untimed iteration before the measured loop. Off by
    /// default, so the measured loop starts cold.
    pub warm_up: bool,
}

impl InversePower {
    pub fn new(params: ProblemParams) -> Self {
        Self {
            params,
            solver: ConjugateGradient::default(),
            warm_up: false,
        }
    }

    pub fn with_warm_up(mut self) -> Self {
        self.warm_up = true;
        self
    }
}
