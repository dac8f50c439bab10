//! Error taxonomy shared by the round-trip layer and the demos.
//!
//! Every failure aborts the current demo; nothing here is retried.

/// Errors produced while acquiring a device, compiling kernels, moving
/// data to and from the GPU, or running a demo.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// No adapter or device could be obtained, or the adapter cannot run
    /// compute shaders.
    #[error("GPU backend unsupported: {0}")]
    UnsupportedBackend(String),

    /// The backend rejected the kernel source or the pipeline built from it.
    #[error("kernel compilation failed: {0}")]
    CompileError(String),

    /// The buffer could not be mapped for reading.
    #[error("buffer map failed: {0}")]
    MapError(String),

    /// An optional device capability was requested but is not present.
    #[error("feature unavailable: {0}")]
    FeatureUnavailable(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Sizes and offsets handed to the backend must respect its copy
    /// granularity; the caller pads.
    #[error("{what} ({value}) is not a multiple of {alignment}")]
    Misaligned {
        what: &'static str,
        value: u64,
        alignment: u64,
    },

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("unknown demo `{0}`")]
    UnknownDemo(String),
}

pub type Result<T, E = GpuError> = std::result::Result<T, E>;

impl GpuError {
    pub(crate) fn misaligned(what: &'static str, value: u64, alignment: u64) -> Self {
        GpuError::Misaligned {
            what,
            value,
            alignment,
        }
    }
}
