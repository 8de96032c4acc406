use thiserror::Error;

#[derive(Error, Debug)]
pub enum CgCoreError {
    #[error("WGPU initialization failed: {0}")]
    WgpuInitError(String),

    #[error("WGPU error: {0}")]
    WgpuError(String),

    #[error("No compute adapter found for device class {0}")]
    NoAdapter(String),

    #[error("Adapter '{0}' does not support SHADER_F64")]
    MissingF64Support(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Program build failed for '{source_name}': {message}")]
    ProgramBuild {
        source_name: String,
        message: String,
    },

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Host view of '{0}' is stale; download it before reading")]
    StaleHostView(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
