use cgbench_core::CgCoreError;
use cgbench_solver::CgError;
use derive_more::From;

pub type Result<T> = core::result::Result<T, BenchError>;

#[derive(Debug, From)]
pub enum BenchError {
    // -- Externals
    #[from]
    Io(std::io::Error),

    #[from]
    Json(serde_json::Error),

    #[from]
    Core(CgCoreError),

    #[from]
    Solver(CgError),

    Config(String),
}

// region:    --- Error Boilerplate

impl core::fmt::Display for BenchError {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            BenchError::Io(e) => write!(fmt, "I/O error: {e}"),
            BenchError::Json(e) => write!(fmt, "report serialization failed: {e}"),
            BenchError::Core(e) => write!(fmt, "{e}"),
            BenchError::Solver(e) => write!(fmt, "{e}"),
            BenchError::Config(msg) => write!(fmt, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for BenchError {}

// endregion: --- Error Boilerplate
