//! Host vector kernels used by the CG solver.
//!
//! Every kernel runs as a parallel region of the [`PolicyCache`]. Scalar
//! reductions split the input into fixed `REDUCTION_BLOCK`-sized blocks,
//! sum each block sequentially and then add the block sums in order, so
//! the result is the same for any thread count or schedule.

use crate::error::CgError;
use crate::schedule::{CallSite, PolicyCache};
use cgbench_core::{ordered_sum, CgCoreError, SparseMatrix};
use rayon::prelude::*;

/// Elements per reduction block.
pub const REDUCTION_BLOCK: usize = 1024;

fn check_len(what: &str, expected: usize, actual: usize) -> Result<(), CgError> {
    if expected != actual {
        return Err(CgCoreError::InvalidDimensions(format!(
            "{} has length {}, expected {}",
            what, actual, expected
        ))
        .into());
    }
    Ok(())
}

/// Fixed-block reduction of `f(i)` over `0..len`.
fn blocked_sum<F>(policy: &PolicyCache, site: CallSite, len: usize, f: F) -> Result<f64, CgError>
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    let blocks = len.div_ceil(REDUCTION_BLOCK);
    let sums: Vec<f64> = policy.region(site, len, |region| {
        region
            .tune((0..blocks).into_par_iter())
            .map(|b| {
                let end = ((b + 1) * REDUCTION_BLOCK).min(len);
                (b * REDUCTION_BLOCK..end).map(&f).sum::<f64>()
            })
            .collect()
    })?;
    Ok(ordered_sum(&sums))
}

/// `q = A * p`.
pub fn spmv(
    policy: &PolicyCache,
    a: &SparseMatrix,
    p: &[f64],
    q: &mut [f64],
) -> Result<(), CgError> {
    check_len("p", a.cols(), p.len())?;
    check_len("q", a.rows(), q.len())?;
    let row_ptr = a.row_ptr();
    let col_indices = a.col_indices();
    let values = a.values();
    policy.region(CallSite::Spmv, q.len(), |region| {
        region
            .tune(q.par_iter_mut().enumerate())
            .for_each(|(j, qj)| {
                let range = row_ptr[j]..row_ptr[j + 1];
                *qj = col_indices[range.clone()]
                    .iter()
                    .zip(&values[range])
                    .map(|(&col, &v)| v * p[col])
                    .sum();
            });
    })
}

/// `x . y`.
pub fn dot(policy: &PolicyCache, x: &[f64], y: &[f64]) -> Result<f64, CgError> {
    check_len("y", x.len(), y.len())?;
    blocked_sum(policy, CallSite::Dot, x.len(), |i| x[i] * y[i])
}

/// `z += alpha * p` and `r -= alpha * q` in one pass.
pub fn update_solution(
    policy: &PolicyCache,
    alpha: f64,
    p: &[f64],
    q: &[f64],
    z: &mut [f64],
    r: &mut [f64],
) -> Result<(), CgError> {
    let n = z.len();
    check_len("p", n, p.len())?;
    check_len("q", n, q.len())?;
    check_len("r", n, r.len())?;
    policy.region(CallSite::Axpy, n, |region| {
        region
            .tune(z.par_iter_mut().zip(r.par_iter_mut()))
            .enumerate()
            .for_each(|(j, (zj, rj))| {
                *zj += alpha * p[j];
                *rj -= alpha * q[j];
            });
    })
}

/// `p = r + beta * p`.
pub fn update_direction(
    policy: &PolicyCache,
    beta: f64,
    r: &[f64],
    p: &mut [f64],
) -> Result<(), CgError> {
    check_len("r", p.len(), r.len())?;
    policy.region(CallSite::DirectionUpdate, p.len(), |region| {
        region
            .tune(p.par_iter_mut().zip(r.par_iter()))
            .for_each(|(pj, &rj)| *pj = rj + beta * *pj);
    })
}

/// `sqrt(sum((x - r)^2))`.
pub fn residual_norm(policy: &PolicyCache, x: &[f64], r: &[f64]) -> Result<f64, CgError> {
    check_len("r", x.len(), r.len())?;
    let sum = blocked_sum(policy, CallSite::ResidualNorm, x.len(), |i| {
        let d = x[i] - r[i];
        d * d
    })?;
    Ok(sum.sqrt())
}

/// `x = factor * z`.
pub fn scale_into(
    policy: &PolicyCache,
    factor: f64,
    z: &[f64],
    x: &mut [f64],
) -> Result<(), CgError> {
    check_len("z", x.len(), z.len())?;
    policy.region(CallSite::Normalize, x.len(), |region| {
        region
            .tune(x.par_iter_mut().zip(z.par_iter()))
            .for_each(|(xj, &zj)| *xj = factor * zj);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::FixedPolicy;

    fn sample(n: usize) -> Vec<f64> {
        (0..n).map(|i| ((i * 7919) % 1000) as f64 / 999.0 - 0.5).collect()
    }

    #[test]
    fn test_dot_is_independent_of_schedule() {
        let x = sample(10_000);
        let y: Vec<f64> = x.iter().rev().copied().collect();
        let reference = dot(&PolicyCache::default(), &x, &y).unwrap();
        // single thread, dynamic chunk 1; four threads, guided chunk 64
        for index in [27 + 9 + 1, 81 + 18 + 5] {
            let cache = PolicyCache::new(Box::new(FixedPolicy(index)), None);
            assert_eq!(dot(&cache, &x, &y).unwrap().to_bits(), reference.to_bits());
        }
    }

    #[test]
    fn test_spmv_small_matrix() {
        let a = SparseMatrix::from_dense(&[
            vec![4.0, -1.0, 0.0],
            vec![-1.0, 4.0, -1.0],
            vec![0.0, -1.0, 4.0],
        ])
        .unwrap();
        let mut q = vec![0.0; 3];
        spmv(&PolicyCache::default(), &a, &[1.0, 2.0, 3.0], &mut q).unwrap();
        assert_eq!(q, vec![2.0, 4.0, 10.0]);
    }

    #[test]
    fn test_spmv_rejects_length_mismatch() {
        let a = SparseMatrix::new(3, 3);
        let mut q = vec![0.0; 2];
        assert!(spmv(&PolicyCache::default(), &a, &[0.0; 3], &mut q).is_err());
    }

    #[test]
    fn test_vector_updates() {
        let policy = PolicyCache::default();
        let p = vec![1.0, 2.0];
        let q = vec![3.0, 4.0];
        let mut z = vec![0.0, 1.0];
        let mut r = vec![10.0, 10.0];
        update_solution(&policy, 0.5, &p, &q, &mut z, &mut r).unwrap();
        assert_eq!(z, vec![0.5, 2.0]);
        assert_eq!(r, vec![8.5, 8.0]);

        let mut p = vec![1.0, 2.0];
        update_direction(&policy, 2.0, &r, &mut p).unwrap();
        assert_eq!(p, vec![10.5, 12.0]);

        let mut x = vec![0.0; 2];
        scale_into(&policy, 0.5, &p, &mut x).unwrap();
        assert_eq!(x, vec![5.25, 6.0]);
    }

    #[test]
    fn test_residual_norm() {
        let policy = PolicyCache::default();
        let norm = residual_norm(&policy, &[3.0, 0.0], &[0.0, 4.0]).unwrap();
        assert_eq!(norm, 5.0);
    }
}
