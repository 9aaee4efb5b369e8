use crate::device::BackendKind;
use crate::dtype::DType;
use crate::shape::Shape;

/// All errors that can occur within Tessera.
///
/// Covers registry misses, unsupported dtypes, device mismatches, the two
/// device-reported failures of the solve pipeline, and the array-level
/// validation done by the routine layer before a kernel is invoked.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No kernel is registered for this (operation, backend) pair.
    #[error("operation '{op}' is not implemented for backend '{backend}'")]
    UnimplementedForBackend {
        op: &'static str,
        backend: BackendKind,
    },

    /// A kernel for this (operation, backend) pair was registered twice.
    #[error("kernel for operation '{op}' on backend '{backend}' is already registered")]
    AlreadyRegistered {
        op: &'static str,
        backend: BackendKind,
    },

    /// The process-wide registry was used before `init()`.
    #[error("kernel registry has not been initialized")]
    RegistryNotInitialized,

    /// The kernel exists but does not support this element type.
    #[error("unsupported dtype {dtype} for operation '{op}'")]
    UnsupportedDType { dtype: DType, op: &'static str },

    /// Arrays taking part in one call are bound to incompatible devices.
    #[error("device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: String, got: String },

    /// LU factorization reported a non-zero status (singular matrix or bad call).
    #[error("unsuccessful getrf (LU) execution, info = {info}")]
    FactorizationFailed { info: i32 },

    /// Back-substitution reported a non-zero status.
    #[error("unsuccessful getrs (solve) execution, info = {info}")]
    SolveFailed { info: i32 },

    /// Error raised by a device driver or device library.
    #[error("device error: {0}")]
    Device(String),

    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// Dimension index out of range for the array's rank.
    #[error("dimension out of range: dim {dim} for array with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// The same axis was named twice in one reduction.
    #[error("duplicate axis {axis}")]
    DuplicateAxis { axis: usize },

    /// Index-producing reductions need every reduced axis to be non-empty.
    #[error("cannot reduce over zero-sized axis {axis}")]
    EmptyReduction { axis: usize },

    /// Element count mismatch when creating from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Wrap a driver/library error.
    pub fn device(e: impl std::fmt::Display) -> Self {
        Error::Device(e.to_string())
    }
}

/// Convenience Result type used throughout Tessera.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted error message.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
