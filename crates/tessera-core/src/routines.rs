use crate::array::Array;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::kernel::{
    AMaxOp, AMinOp, ArgMaxOp, ArgMinOp, InverseOp, LinearOp, Op, ReductionKernel, SolveOp, SumOp,
};
use crate::registry::KernelRegistry;
use crate::shape::{Axes, Shape};

// Routines — user-facing entry points
//
// Each routine validates its arguments into typed errors, looks the kernel up
// for the input's backend, allocates the output on the input's device and
// invokes the kernel. Lookups and dtype checks happen before the output is
// allocated, so an unsupported call leaves no trace on the device.
//
// `axes: None` reduces over every axis.

fn resolve_axes(a: &Array, axes: Option<&[usize]>) -> Result<Axes> {
    match axes {
        Some(axes) => Axes::new(axes, a.rank()),
        None => Ok(Axes::all(a.rank())),
    }
}

fn check_nonempty(a: &Array, axes: &Axes) -> Result<()> {
    match axes.iter().find(|&axis| a.dims()[axis] == 0) {
        Some(axis) => Err(Error::EmptyReduction { axis }),
        None => Ok(()),
    }
}

fn reduce_with<O>(a: &Array, axes: &Axes, out_shape: Shape, out_dtype: DType) -> Result<Array>
where
    O: Op<Kernel = dyn ReductionKernel>,
{
    let kernel = KernelRegistry::global()?.lookup::<O>(a.device().backend_kind())?;
    let out = Array::zeros(out_shape, out_dtype, a.device())?;
    kernel.call(a, axes, &out)?;
    Ok(out)
}

/// Indices (as i64) of the maximum values over `axes`.
///
/// With several axes the index counts positions row-major over the reduced
/// axes. Ties resolve to the first occurrence.
pub fn argmax(a: &Array, axes: Option<&[usize]>) -> Result<Array> {
    let axes = resolve_axes(a, axes)?;
    check_nonempty(a, &axes)?;
    let shape = axes.reduced_shape(a.shape(), false);
    reduce_with::<ArgMaxOp>(a, &axes, shape, DType::I64)
}

/// Indices (as i64) of the minimum values over `axes`.
pub fn argmin(a: &Array, axes: Option<&[usize]>) -> Result<Array> {
    let axes = resolve_axes(a, axes)?;
    check_nonempty(a, &axes)?;
    let shape = axes.reduced_shape(a.shape(), false);
    reduce_with::<ArgMinOp>(a, &axes, shape, DType::I64)
}

/// Sum over `axes`, in the input's dtype.
pub fn sum(a: &Array, axes: Option<&[usize]>, keepdims: bool) -> Result<Array> {
    sum_as(a, axes, keepdims, a.dtype())
}

/// Sum over `axes`, producing `dtype`. Reducing an empty axis yields zeros.
pub fn sum_as(a: &Array, axes: Option<&[usize]>, keepdims: bool, dtype: DType) -> Result<Array> {
    let axes = resolve_axes(a, axes)?;
    let shape = axes.reduced_shape(a.shape(), keepdims);
    reduce_with::<SumOp>(a, &axes, shape, dtype)
}

/// Maximum over `axes`. Any NaN in a reduced group makes the result NaN.
pub fn amax(a: &Array, axes: Option<&[usize]>, keepdims: bool) -> Result<Array> {
    let axes = resolve_axes(a, axes)?;
    check_nonempty(a, &axes)?;
    let shape = axes.reduced_shape(a.shape(), keepdims);
    reduce_with::<AMaxOp>(a, &axes, shape, a.dtype())
}

/// Minimum over `axes`. Any NaN in a reduced group makes the result NaN.
pub fn amin(a: &Array, axes: Option<&[usize]>, keepdims: bool) -> Result<Array> {
    let axes = resolve_axes(a, axes)?;
    check_nonempty(a, &axes)?;
    let shape = axes.reduced_shape(a.shape(), keepdims);
    reduce_with::<AMinOp>(a, &axes, shape, a.dtype())
}

fn check_square(a: &Array) -> Result<usize> {
    if a.rank() != 2 {
        return Err(Error::RankMismatch {
            expected: 2,
            got: a.rank(),
        });
    }
    let n = a.dims()[0];
    if a.dims()[1] != n {
        return Err(Error::ShapeMismatch {
            expected: Shape::from((n, n)),
            got: a.shape().clone(),
        });
    }
    Ok(n)
}

fn check_same_dtype(a: &Array, b: &Array) -> Result<()> {
    if a.dtype() != b.dtype() {
        return Err(Error::DTypeMismatch {
            expected: a.dtype(),
            got: b.dtype(),
        });
    }
    Ok(())
}

/// Solve `a · x = b` for a square `a` and a vector or matrix `b`.
pub fn solve(a: &Array, b: &Array) -> Result<Array> {
    let n = check_square(a)?;
    let expected = match b.rank() {
        1 => Shape::from(n),
        2 => Shape::from((n, b.dims()[1])),
        got => return Err(Error::RankMismatch { expected: 2, got }),
    };
    if b.shape() != &expected {
        return Err(Error::ShapeMismatch {
            expected,
            got: b.shape().clone(),
        });
    }
    check_same_dtype(a, b)?;
    a.device().check_compatible(&[b])?;

    let kernel = KernelRegistry::global()?.lookup::<SolveOp>(a.device().backend_kind())?;
    if !kernel.supports_dtype(a.dtype()) {
        return Err(Error::UnsupportedDType {
            dtype: a.dtype(),
            op: SolveOp::NAME,
        });
    }
    let out = Array::zeros(b.shape().clone(), b.dtype(), a.device())?;
    kernel.call(a, b, &out)?;
    Ok(out)
}

/// Inverse of a square matrix.
pub fn inverse(a: &Array) -> Result<Array> {
    check_square(a)?;
    let kernel = KernelRegistry::global()?.lookup::<InverseOp>(a.device().backend_kind())?;
    if !kernel.supports_dtype(a.dtype()) {
        return Err(Error::UnsupportedDType {
            dtype: a.dtype(),
            op: InverseOp::NAME,
        });
    }
    let out = Array::zeros(a.shape().clone(), a.dtype(), a.device())?;
    kernel.call(a, &out)?;
    Ok(out)
}

/// `x · wᵀ + b` for `x` of shape (batch, in), `w` of shape (out, in) and an
/// optional bias of shape (out).
pub fn linear(x: &Array, w: &Array, b: Option<&Array>) -> Result<Array> {
    for m in [x, w] {
        if m.rank() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: m.rank(),
            });
        }
    }
    let (batch, in_features) = (x.dims()[0], x.dims()[1]);
    let out_features = w.dims()[0];
    if w.dims()[1] != in_features {
        return Err(Error::ShapeMismatch {
            expected: Shape::from((out_features, in_features)),
            got: w.shape().clone(),
        });
    }
    check_same_dtype(x, w)?;
    x.device().check_compatible(&[w])?;
    if let Some(b) = b {
        if b.shape() != &Shape::from(out_features) {
            return Err(Error::ShapeMismatch {
                expected: Shape::from(out_features),
                got: b.shape().clone(),
            });
        }
        check_same_dtype(x, b)?;
        x.device().check_compatible(&[b])?;
    }

    let kernel = KernelRegistry::global()?.lookup::<LinearOp>(x.device().backend_kind())?;
    if !kernel.supports_dtype(x.dtype()) {
        return Err(Error::UnsupportedDType {
            dtype: x.dtype(),
            op: LinearOp::NAME,
        });
    }
    let out = Array::zeros((batch, out_features), x.dtype(), x.device())?;
    kernel.call(x, w, b, &out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;

    // No registry is ever installed in this crate's unit tests.

    #[test]
    fn test_validation_precedes_lookup() {
        let a = Array::zeros((2, 0), DType::F32, &Device::Native).unwrap();
        assert!(matches!(
            argmax(&a, Some(&[1])),
            Err(Error::EmptyReduction { axis: 1 })
        ));
        assert!(matches!(
            sum(&a, Some(&[0, 0]), false),
            Err(Error::DuplicateAxis { axis: 0 })
        ));
        assert!(matches!(
            amax(&a, Some(&[2]), false),
            Err(Error::DimOutOfRange { dim: 2, rank: 2 })
        ));
    }

    #[test]
    fn test_uninitialized_registry() {
        let a = Array::zeros((2, 3), DType::F32, &Device::Native).unwrap();
        assert!(matches!(
            sum(&a, None, false),
            Err(Error::RegistryNotInitialized)
        ));
    }

    #[test]
    fn test_solve_shape_checks() {
        let a = Array::zeros((2, 3), DType::F32, &Device::Native).unwrap();
        let b = Array::zeros(2, DType::F32, &Device::Native).unwrap();
        assert!(matches!(solve(&a, &b), Err(Error::ShapeMismatch { .. })));

        let a = Array::zeros((2, 2), DType::F32, &Device::Native).unwrap();
        let b = Array::zeros(3, DType::F32, &Device::Native).unwrap();
        assert!(matches!(solve(&a, &b), Err(Error::ShapeMismatch { .. })));

        let b = Array::zeros(2, DType::F64, &Device::Native).unwrap();
        assert!(matches!(
            solve(&a, &b),
            Err(Error::DTypeMismatch {
                expected: DType::F32,
                got: DType::F64
            })
        ));
    }

    #[test]
    fn test_linear_shape_checks() {
        let x = Array::zeros((4, 3), DType::F32, &Device::Native).unwrap();
        let w = Array::zeros((5, 2), DType::F32, &Device::Native).unwrap();
        assert!(matches!(
            linear(&x, &w, None),
            Err(Error::ShapeMismatch { .. })
        ));
        let w = Array::zeros((5, 3), DType::F32, &Device::Native).unwrap();
        let b = Array::zeros(4, DType::F32, &Device::Native).unwrap();
        assert!(matches!(
            linear(&x, &w, Some(&b)),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
