//! Error type shared by the device layer and every solver component.

use thiserror::Error;

/// Errors surfaced by construction, binding, recording and solving.
///
/// Convergence stalls are not errors: inspect `Parameters::out_error` and
/// `Parameters::out_iterations` after a solve instead.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("GPU device lost")]
    DeviceLost,

    #[error("buffer map failed: {0}")]
    BufferMapFailed(#[from] wgpu::BufferAsyncError),

    #[error("buffer map channel disconnected")]
    ChannelDisconnected,

    #[error("buffer `{label}` is not host-mappable")]
    NotMappable { label: String },

    #[error("invalid multigrid size {width}x{height}: odd dimension above the coarsest level")]
    InvalidMultigridSize { width: u32, height: u32 },

    #[error("kernel `{kernel}` expects {expected} buffers, got {actual}")]
    BindingCount {
        kernel: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("kernel `{kernel}` failed validation: {message}")]
    KernelValidation { kernel: &'static str, message: String },

    #[error("could not create buffer `{label}` of {bytes} bytes: {message}")]
    ResourceCreation {
        label: String,
        bytes: u64,
        message: String,
    },

    #[error("buffer `{label}` holds {actual} elements, expected {expected}")]
    SizeMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },

    #[error("strong rigid-body coupling is not supported by the {solver} solver")]
    UnsupportedCoupling { solver: &'static str },

    #[error("{component} used before bind")]
    NotBound { component: &'static str },
}

pub type Result<T, E = SolverError> = std::result::Result<T, E>;
