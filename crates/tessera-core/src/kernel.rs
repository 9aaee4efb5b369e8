use crate::array::Array;
use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Axes;

// Kernels and operations
//
// A kernel is a stateless object that performs one operation on one backend.
// Operations are identified by zero-sized marker types implementing `Op`; the
// marker fixes the operation's name and the kernel trait every backend must
// implement for it. The registry keys kernels by (marker type, backend), so a
// new operation is added by declaring a marker and a kernel trait, without
// touching the registry.
//
// Kernels never allocate their outputs: the caller passes a preallocated `out`
// array on the same device as the inputs.

/// Marker for an operation that can be registered per backend.
pub trait Op: 'static {
    /// Name used in error messages and logs.
    const NAME: &'static str;

    /// Kernel interface implemented by every backend for this operation.
    type Kernel: ?Sized + Send + Sync + 'static;
}

/// Reduce `a` over `axes` into `out`.
pub trait ReductionKernel: Send + Sync {
    fn call(&self, a: &Array, axes: &Axes, out: &Array) -> Result<()>;
}

/// Solve `a · x = b` for `x`, writing `x` into `out` (shape of `b`).
pub trait SolveKernel: Send + Sync {
    /// Whether the kernel accepts this element type at all. Checked before
    /// the output is allocated.
    fn supports_dtype(&self, _dtype: DType) -> bool {
        true
    }

    fn call(&self, a: &Array, b: &Array, out: &Array) -> Result<()>;
}

/// Write the inverse of the square matrix `a` into `out`.
pub trait InverseKernel: Send + Sync {
    fn supports_dtype(&self, _dtype: DType) -> bool {
        true
    }

    fn call(&self, a: &Array, out: &Array) -> Result<()>;
}

/// `out = x · wᵀ + b`.
pub trait LinearKernel: Send + Sync {
    fn supports_dtype(&self, _dtype: DType) -> bool {
        true
    }

    fn call(&self, x: &Array, w: &Array, b: Option<&Array>, out: &Array) -> Result<()>;
}

macro_rules! define_op {
    ($(#[$meta:meta])* $marker:ident, $name:literal, $kernel:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $marker;

        impl Op for $marker {
            const NAME: &'static str = $name;
            type Kernel = dyn $kernel;
        }
    };
}

define_op!(
    /// Index of the maximum along the reduced axes (first occurrence wins).
    ArgMaxOp,
    "argmax",
    ReductionKernel
);
define_op!(
    /// Index of the minimum along the reduced axes (first occurrence wins).
    ArgMinOp,
    "argmin",
    ReductionKernel
);
define_op!(
    /// Sum over the reduced axes, accumulated in a type chosen by the output dtype.
    SumOp,
    "sum",
    ReductionKernel
);
define_op!(
    /// Maximum over the reduced axes. NaN propagates.
    AMaxOp,
    "amax",
    ReductionKernel
);
define_op!(
    /// Minimum over the reduced axes. NaN propagates.
    AMinOp,
    "amin",
    ReductionKernel
);
define_op!(
    /// Dense linear solve.
    SolveOp,
    "solve",
    SolveKernel
);
define_op!(
    /// Dense matrix inverse.
    InverseOp,
    "inverse",
    InverseKernel
);
define_op!(
    /// Affine map `x · wᵀ + b`.
    LinearOp,
    "linear",
    LinearKernel
);
