//! # cgbench core
//!
//! Compressed-row matrix storage and the offload layer of the benchmark:
//! adapter selection, work-group sizing, program building, mirrored
//! host/device vectors and the two power-step kernels.

mod context;
pub mod device;
pub mod error;
pub mod ops;
pub mod program;
pub mod sparse_matrix;
pub mod traits;
pub mod vector;
pub mod workgroup;

pub use device::{GpuDevice, TransferStats};
pub use error::CgCoreError;
pub use ops::{ordered_sum, PowerStepBuffers};
pub use program::{BuildOptions, KernelSource};
pub use sparse_matrix::{Entry, MatrixShape, SparseMatrix};
pub use vector::{Coherence, MirroredVector};
pub use workgroup::{DeviceClass, LaunchGeometry, WorkGroupSizing};

pub use traits::{Matrix, Vector};
