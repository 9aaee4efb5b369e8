// Dense linear solve on an accelerator: LU factorization + back-substitution
//
// PIPELINE (inside a DeviceScope on the operands' device):
//
//   1. stage A column-major into a scratch LU buffer
//   2. query the getrf workspace size, allocate workspace, pivots and status
//   3. getrf (in place on the LU buffer)
//   4. copy the status to the host; non-zero → FactorizationFailed
//   5. stage the right-hand side column-major (directly into `out` for a
//      single right-hand side, into scratch otherwise)
//   6. getrs (in place on the staged right-hand side)
//   7. copy the status to the host; non-zero → SolveFailed
//   8. for several right-hand sides, transpose the result back into `out`
//
// Steps 4 and 7 are the only synchronization points. Every scratch buffer is
// a DeviceBuffer, so each early return releases what was allocated so far.
//
// The inverse is the same pipeline run against the identity matrix.

use std::sync::Arc;

use tessera_core::accelerator::{byte_len, read_status};
use tessera_core::{
    Accelerator, Array, DType, DeviceBuffer, DevicePtr, DeviceScope, Error, InverseKernel,
    InverseOp, Op, Result, SolveKernel, SolveOp,
};

/// Whether `dtype` can go through the LU pipeline on `accel`.
fn check_dtype(accel: &dyn Accelerator, dtype: DType, op: &'static str) -> Result<()> {
    if dtype.is_half() || !accel.supports_factorization(dtype) {
        return Err(Error::UnsupportedDType { dtype, op });
    }
    Ok(())
}

/// Address of the first element of an array's view.
fn view_ptr(array: &Array, base: DevicePtr) -> DevicePtr {
    base.add(array.layout().offset() * array.dtype().size_in_bytes())
}

/// Copy the `rows`×`cols` matrix viewed by `m` (data at `src`) to `dst` in
/// column-major order.
fn stage_column_major(
    accel: &dyn Accelerator,
    m: &Array,
    rows: usize,
    cols: usize,
    src: DevicePtr,
    dst: DevicePtr,
) -> Result<()> {
    let dtype = m.dtype();
    let bytes = byte_len(dtype, rows * cols)?;
    let layout = m.layout();
    if layout.is_contiguous() && (cols == 1 || m.rank() == 1) {
        accel.copy_device_to_device(dst, src, bytes)
    } else if layout.is_contiguous() {
        accel.transpose(dtype, rows, cols, src, dst)
    } else if layout.is_transposed_contiguous() {
        accel.copy_device_to_device(dst, src, bytes)
    } else {
        Err(Error::msg(format!(
            "solve needs a dense matrix, got strides {:?} for shape {}",
            layout.strides(),
            m.shape()
        )))
    }
}

fn solve_in_scope(accel: &Arc<dyn Accelerator>, a: &Array, b: &Array, out: &Array) -> Result<()> {
    let dtype = a.dtype();
    let n = a.dims()[0];
    let nrhs = if b.rank() == 1 { 1 } else { b.dims()[1] };

    let a_storage = a.storage();
    let a_ptr = view_ptr(a, a_storage.as_device()?.ptr());

    let lu = DeviceBuffer::alloc(accel, byte_len(dtype, n * n)?)?;
    stage_column_major(accel.as_ref(), a, n, n, a_ptr, lu.ptr())?;
    drop(a_storage);

    let work_len = accel.getrf_workspace_len(dtype, n, lu.ptr())?;
    let work = DeviceBuffer::alloc(accel, byte_len(dtype, work_len)?)?;
    let ipiv = DeviceBuffer::alloc(accel, n * std::mem::size_of::<i32>())?;
    let info = DeviceBuffer::alloc(accel, std::mem::size_of::<i32>())?;

    log::debug!("getrf n={n} dtype={dtype} on {}", accel.name());
    accel.getrf(dtype, n, lu.ptr(), work.ptr(), ipiv.ptr(), info.ptr())?;
    let status = read_status(accel.as_ref(), info.ptr())?;
    if status != 0 {
        return Err(Error::FactorizationFailed { info: status });
    }

    let b_storage = b.storage();
    let b_ptr = view_ptr(b, b_storage.as_device()?.ptr());
    let out_storage = out.storage_mut();
    let out_ptr = view_ptr(out, out_storage.as_device()?.ptr());

    // A single right-hand side is the same in both orders; solve in `out`.
    let staged = if nrhs == 1 {
        stage_column_major(accel.as_ref(), b, n, 1, b_ptr, out_ptr)?;
        None
    } else {
        let scratch = DeviceBuffer::alloc(accel, byte_len(dtype, n * nrhs)?)?;
        stage_column_major(accel.as_ref(), b, n, nrhs, b_ptr, scratch.ptr())?;
        Some(scratch)
    };
    drop(b_storage);
    let rhs = staged.as_ref().map_or(out_ptr, |s| s.ptr());

    log::debug!("getrs n={n} nrhs={nrhs} on {}", accel.name());
    accel.getrs(dtype, n, nrhs, lu.ptr(), ipiv.ptr(), rhs, info.ptr())?;
    let status = read_status(accel.as_ref(), info.ptr())?;
    if status != 0 {
        return Err(Error::SolveFailed { info: status });
    }

    if let Some(scratch) = &staged {
        // Column-major n×nrhs is row-major nrhs×n.
        accel.transpose(dtype, nrhs, n, scratch.ptr(), out_ptr)?;
    }
    Ok(())
}

/// Solves `a · x = b` by LU factorization on the operands' accelerator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CudaSolveKernel;

impl SolveKernel for CudaSolveKernel {
    fn supports_dtype(&self, dtype: DType) -> bool {
        matches!(dtype, DType::F32 | DType::F64)
    }

    fn call(&self, a: &Array, b: &Array, out: &Array) -> Result<()> {
        let device = a.device();
        device.check_compatible(&[b, out])?;
        let accel = device.as_accelerator()?;
        check_dtype(accel.as_ref(), a.dtype(), SolveOp::NAME)?;

        assert_eq!(a.rank(), 2, "solve expects a matrix");
        let n = a.dims()[0];
        assert_eq!(a.dims()[1], n, "solve expects a square matrix");
        assert!(b.rank() == 1 || b.rank() == 2, "right-hand side must be a vector or matrix");
        assert_eq!(b.dims()[0], n, "right-hand side rows");
        assert_eq!(out.shape(), b.shape(), "output shape");
        assert!(
            b.dtype() == a.dtype() && out.dtype() == a.dtype(),
            "solve operands must share a dtype"
        );
        assert!(out.is_contiguous(), "solve output must be contiguous");
        assert!(
            !out.shares_storage(a) && !out.shares_storage(b),
            "solve output aliases an input"
        );

        let _scope = DeviceScope::enter(accel.as_ref())?;
        solve_in_scope(accel, a, b, out)
    }
}

/// Inverts a square matrix by solving against the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct CudaInverseKernel {
    solve: CudaSolveKernel,
}

impl InverseKernel for CudaInverseKernel {
    fn supports_dtype(&self, dtype: DType) -> bool {
        self.solve.supports_dtype(dtype)
    }

    fn call(&self, a: &Array, out: &Array) -> Result<()> {
        let device = a.device();
        device.check_compatible(&[out])?;
        check_dtype(device.as_accelerator()?.as_ref(), a.dtype(), InverseOp::NAME)?;
        assert!(
            a.rank() == 2 && a.dims()[0] == a.dims()[1],
            "inverse expects a square matrix"
        );
        let eye = Array::identity(a.dims()[0], a.dtype(), device)?;
        self.solve.call(a, &eye, out)
    }
}
