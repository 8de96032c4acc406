use cgbench_core::CgCoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CgError {
    #[error(transparent)]
    Core(#[from] CgCoreError),

    #[error("Space for matrix elements exceeded: nza = {requested}, nz_max = {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("Internal error in sparse assembly: no free slot in row {row} for column {column}")]
    InsertionFailed { row: usize, column: usize },

    #[error("Invalid problem parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
