use super::{validate_order, CgWorkspace, InversePower};
use crate::error::CgError;
use crate::kernels;
use crate::params::Verification;
use crate::schedule::PolicyCache;
use cgbench_core::{
    CgCoreError, GpuDevice, MirroredVector, PowerStepBuffers, SparseMatrix, TransferStats,
};
use log::{debug, info};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

/// Where the per-iteration dot products and the normalization run.
///
/// Both operations see the host copies of `x` and `z`; `normalize` must
/// leave the host `x` equal to `factor * z`.
pub trait PowerStepBackend {
    fn name(&self) -> &'static str;

    /// Returns `(x.z, z.z)`.
    fn dot_products(
        &mut self,
        x: &[f64],
        z: &[f64],
    ) -> impl Future<Output = Result<(f64, f64), CgError>>;

    /// Sets `x = factor * z`.
    fn normalize(
        &mut self,
        factor: f64,
        z: &[f64],
        x: &mut [f64],
    ) -> impl Future<Output = Result<(), CgError>>;
}

/// Runs both operations with the host kernels.
#[derive(Debug)]
pub struct HostBackend<'a> {
    policy: &'a PolicyCache,
}

impl<'a> HostBackend<'a> {
    pub fn new(policy: &'a PolicyCache) -> Self {
        Self { policy }
    }
}

impl PowerStepBackend for HostBackend<'_> {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn dot_products(&mut self, x: &[f64], z: &[f64]) -> Result<(f64, f64), CgError> {
        let xz = kernels::dot(self.policy, x, z)?;
        let zz = kernels::dot(self.policy, z, z)?;
        Ok((xz, zz))
    }

    async fn normalize(&mut self, factor: f64, z: &[f64], x: &mut [f64]) -> Result<(), CgError> {
        kernels::scale_into(self.policy, factor, z, x)
    }
}

/// Runs the reduction and normalization kernels on a [`GpuDevice`].
pub struct OffloadBackend<'a> {
    device: &'a GpuDevice,
    buffers: PowerStepBuffers,
}

impl<'a> OffloadBackend<'a> {
    /// Allocates device vectors of order `n`, starting from `x = 1`.
    pub fn new(device: &'a GpuDevice, n: usize) -> Result<Self, CgError> {
        let buffers = device.create_power_step(&vec![1.0; n], &vec![0.0; n])?;
        Ok(Self { device, buffers })
    }

    pub fn transfer_stats(&self) -> TransferStats {
        self.device.get_transfer_stats()
    }
}

/// Replaces the host side of `vector` with `data` unless it already holds
/// exactly that.
fn stage(vector: &mut MirroredVector, data: &[f64]) -> Result<(), CgCoreError> {
    let unchanged = match vector.host() {
        Ok(current) => current == data,
        Err(CgCoreError::StaleHostView(_)) => false,
        Err(e) => return Err(e),
    };
    if !unchanged {
        vector.replace_host(data)?;
    }
    Ok(())
}

impl PowerStepBackend for OffloadBackend<'_> {
    fn name(&self) -> &'static str {
        "offload"
    }

    async fn dot_products(&mut self, x: &[f64], z: &[f64]) -> Result<(f64, f64), CgError> {
        stage(self.buffers.x_mut(), x)?;
        stage(self.buffers.z_mut(), z)?;
        Ok(self.device.dot_products(&mut self.buffers).await?)
    }

    async fn normalize(&mut self, factor: f64, z: &[f64], x: &mut [f64]) -> Result<(), CgError> {
        stage(self.buffers.z_mut(), z)?;
        self.device.normalize(&mut self.buffers, factor).await?;
        let device_x = self.buffers.x().host()?;
        if device_x.len() != x.len() {
            return Err(CgCoreError::InvalidDimensions(format!(
                "device x has length {}, host x {}",
                device_x.len(),
                x.len()
            ))
            .into());
        }
        x.copy_from_slice(device_x);
        Ok(())
    }
}

/// One outer iteration as printed in the progress table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub rnorm: f64,
    pub zeta: f64,
}

/// Result of a full inverse power run.
#[derive(Debug, Clone, Serialize)]
pub struct PowerRunSummary {
    pub zeta: f64,
    /// Residual norm of the last CG solve.
    pub rnorm: f64,
    pub history: Vec<IterationRecord>,
    pub verification: Verification,
    pub backend: &'static str,
    /// Wall time of the timed loop.
    pub benchmark_seconds: f64,
    /// Part of `benchmark_seconds` spent in CG solves.
    pub cg_seconds: f64,
}

struct Step {
    rnorm: f64,
    zeta: f64,
    cg_seconds: f64,
}

impl InversePower {
    /// One outer iteration: solve `A z = x`, estimate `zeta`, then
    /// `x = z / ||z||`.
    async fn step<B: PowerStepBackend>(
        &self,
        policy: &PolicyCache,
        a: &SparseMatrix,
        backend: &mut B,
        x: &mut [f64],
        z: &mut [f64],
        work: &mut CgWorkspace,
    ) -> Result<Step, CgError> {
        let started = Instant::now();
        let outcome = self.solver.solve(policy, a, x, z, work)?;
        let cg_seconds = started.elapsed().as_secs_f64();

        let (xz, zz) = backend.dot_products(x, z).await?;
        let norm_factor = 1.0 / zz.sqrt();
        let zeta = self.params.shift + 1.0 / xz;

        backend.normalize(norm_factor, z, x).await?;
        Ok(Step {
            rnorm: outcome.rnorm,
            zeta,
            cg_seconds,
        })
    }

    /// Runs `niter` outer iterations from `x = 1`, calling `progress` after
    /// each one, and verifies the final `zeta`.
    pub async fn run<B, F>(
        &self,
        policy: &PolicyCache,
        a: &SparseMatrix,
        backend: &mut B,
        mut progress: F,
    ) -> Result<PowerRunSummary, CgError>
    where
        B: PowerStepBackend,
        F: FnMut(&IterationRecord),
    {
        let n = self.params.na;
        validate_order(a, n, "na")?;

        let mut x = vec![1.0; n];
        let mut z = vec![0.0; n];
        let mut work = CgWorkspace::new(n);

        if self.warm_up {
            let step = self
                .step(policy, a, backend, &mut x, &mut z, &mut work)
                .await?;
            debug!("Warm-up iteration: zeta = {}", step.zeta);
            x.fill(1.0);
        }

        info!(
            "Running {} inverse power iterations (n = {}, backend {})",
            self.params.niter,
            n,
            backend.name()
        );
        let started = Instant::now();
        let mut cg_seconds = 0.0;
        let mut history = Vec::with_capacity(self.params.niter);
        for iteration in 1..=self.params.niter {
            let step = self
                .step(policy, a, backend, &mut x, &mut z, &mut work)
                .await?;
            cg_seconds += step.cg_seconds;
            let record = IterationRecord {
                iteration,
                rnorm: step.rnorm,
                zeta: step.zeta,
            };
            progress(&record);
            history.push(record);
        }
        let benchmark_seconds = started.elapsed().as_secs_f64();

        let (zeta, rnorm) = history
            .last()
            .map_or((0.0, 0.0), |last| (last.zeta, last.rnorm));
        Ok(PowerRunSummary {
            zeta,
            rnorm,
            verification: self.params.verify(zeta),
            history,
            backend: backend.name(),
            benchmark_seconds,
            cg_seconds,
        })
    }
}
