//! `cgbench-solver`: problem generation and the solvers of the CG benchmark.
//!
//! Builds the random sparse symmetric matrix of a problem class, runs the
//! shifted inverse power method with a fixed-step Conjugate Gradient inner
//! solver on the host, and optionally offloads the per-iteration reduction
//! and normalization to a [`GpuDevice`].

pub mod algorithms;
pub mod assembler;
pub mod error;
pub mod kernels;
pub mod params;
pub mod randdp;
pub mod sampler;
pub mod schedule;

pub use algorithms::{
    CgOutcome, ConjugateGradient, HostBackend, InversePower, IterationRecord, OffloadBackend,
    PowerRunSummary, PowerStepBackend,
};
pub use assembler::{build_matrix, MatrixAssembler, Partition};
pub use error::CgError;
pub use params::{ProblemClass, ProblemParams, Verification};
pub use randdp::RandomStream;
pub use schedule::{FixedPolicy, PolicyCache, PolicySource, StaticRegionModel};

// Re-export from cgbench_core
pub use cgbench_core::{
    CgCoreError, DeviceClass, GpuDevice, KernelSource, Matrix, SparseMatrix, TransferStats,
};
