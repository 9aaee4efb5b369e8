// CUDA accelerator — NVIDIA devices through cudarc
//
// Memory and copies go through the driver API, the transpose through cuBLAS
// `geam`, and the factorization through cuSOLVER's dense LU (`getrf`,
// `getrs`). All library calls are queued on the context's default stream;
// device-to-host copies synchronize that stream first, which is what makes
// the status words written by cuSOLVER visible to the solve pipeline.

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use cudarc::cublas::CudaBlas;
use cudarc::driver::sys::{self as drv, CUresult};
use cudarc::driver::{CudaContext, CudaStream};
use cudarc::{cublas, cusolver};

use tessera_core::accelerator::DeviceSelection;
use tessera_core::{Accelerator, BackendKind, DType, DevicePtr, Error, Result};

fn check_driver(result: CUresult, what: &str) -> Result<()> {
    if result == CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(Error::device(format!("{what}: {result:?}")))
    }
}

fn check_blas(status: cublas::sys::cublasStatus_t, what: &str) -> Result<()> {
    if status == cublas::sys::cublasStatus_t::CUBLAS_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(Error::device(format!("cuBLAS {what}: {status:?}")))
    }
}

fn check_solver(status: cusolver::sys::cusolverStatus_t, what: &str) -> Result<()> {
    if status == cusolver::sys::cusolverStatus_t::CUSOLVER_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(Error::device(format!("cuSOLVER {what}: {status:?}")))
    }
}

/// A matrix dimension as the `int` cuBLAS and cuSOLVER take.
fn dim(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|e| Error::device(format!("{what} = {value} exceeds the 32-bit BLAS range: {e}")))
}

/// Owned cuSOLVER dense handle.
struct SolverHandle(cusolver::sys::cusolverDnHandle_t);

impl Drop for SolverHandle {
    fn drop(&mut self) {
        let status = unsafe { cusolver::sys::cusolverDnDestroy(self.0) };
        if status != cusolver::sys::cusolverStatus_t::CUSOLVER_STATUS_SUCCESS {
            log::warn!("cusolverDnDestroy failed: {status:?}");
        }
    }
}

/// A CUDA device with cuBLAS and cuSOLVER handles bound to its default stream.
pub struct CudaAccelerator {
    context: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    blas: CudaBlas,
    solver: SolverHandle,
    ordinal: usize,
}

// Safety: the raw cuSOLVER handle is only used on the stream it is bound to,
// and every call is made with the owning context current.
unsafe impl Send for CudaAccelerator {}
unsafe impl Sync for CudaAccelerator {}

impl CudaAccelerator {
    /// Open GPU `ordinal` (0, 1, ...).
    pub fn new(ordinal: usize) -> Result<Self> {
        let context = CudaContext::new(ordinal)
            .map_err(|e| Error::device(format!("CUDA context for device {ordinal}: {e:?}")))?;
        context
            .bind_to_thread()
            .map_err(|e| Error::device(format!("bind CUDA context: {e:?}")))?;
        let stream = context.default_stream();
        let blas = CudaBlas::new(stream.clone())
            .map_err(|e| Error::device(format!("cuBLAS init: {e:?}")))?;

        let mut raw = std::ptr::null_mut();
        check_solver(unsafe { cusolver::sys::cusolverDnCreate(&mut raw) }, "create")?;
        let solver = SolverHandle(raw);
        check_solver(
            unsafe { cusolver::sys::cusolverDnSetStream(solver.0, stream.cu_stream() as _) },
            "set stream",
        )?;

        log::debug!("opened cuda:{ordinal}");
        Ok(CudaAccelerator {
            context,
            stream,
            blas,
            solver,
            ordinal,
        })
    }

    fn sync(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| Error::device(format!("stream synchronize: {e:?}")))
    }

    fn unsupported(dtype: DType, op: &'static str) -> Error {
        Error::UnsupportedDType { dtype, op }
    }
}

impl fmt::Debug for CudaAccelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CudaAccelerator(cuda:{})", self.ordinal)
    }
}

impl Accelerator for CudaAccelerator {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn select(&self) -> Result<DeviceSelection> {
        let mut previous: drv::CUcontext = std::ptr::null_mut();
        check_driver(unsafe { drv::cuCtxGetCurrent(&mut previous) }, "cuCtxGetCurrent")?;
        self.context
            .bind_to_thread()
            .map_err(|e| Error::device(format!("bind CUDA context: {e:?}")))?;
        Ok(DeviceSelection(if previous.is_null() {
            None
        } else {
            Some(previous as u64)
        }))
    }

    fn restore(&self, previous: DeviceSelection) -> Result<()> {
        let ctx = previous.0.map_or(std::ptr::null_mut(), |p| p as drv::CUcontext);
        check_driver(unsafe { drv::cuCtxSetCurrent(ctx) }, "cuCtxSetCurrent")
    }

    fn malloc(&self, bytes: usize) -> Result<DevicePtr> {
        let mut ptr: drv::CUdeviceptr = 0;
        check_driver(unsafe { drv::cuMemAlloc_v2(&mut ptr, bytes.max(1)) }, "cuMemAlloc")?;
        Ok(DevicePtr(ptr))
    }

    fn free(&self, ptr: DevicePtr) {
        let result = unsafe { drv::cuMemFree_v2(ptr.0) };
        if result != CUresult::CUDA_SUCCESS {
            log::warn!("cuda:{}: cuMemFree({ptr}) failed: {result:?}", self.ordinal);
        }
    }

    fn copy_host_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        check_driver(
            unsafe { drv::cuMemcpyHtoD_v2(dst.0, src.as_ptr() as *const c_void, src.len()) },
            "cuMemcpyHtoD",
        )
    }

    fn copy_device_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<()> {
        self.sync()?;
        if dst.is_empty() {
            return Ok(());
        }
        check_driver(
            unsafe { drv::cuMemcpyDtoH_v2(dst.as_mut_ptr() as *mut c_void, src.0, dst.len()) },
            "cuMemcpyDtoH",
        )
    }

    fn copy_device_to_device(&self, dst: DevicePtr, src: DevicePtr, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        self.sync()?;
        check_driver(
            unsafe { drv::cuMemcpyDtoD_v2(dst.0, src.0, bytes) },
            "cuMemcpyDtoD",
        )
    }

    fn transpose(
        &self,
        dtype: DType,
        rows: usize,
        cols: usize,
        src: DevicePtr,
        dst: DevicePtr,
    ) -> Result<()> {
        use cublas::sys::cublasOperation_t::{CUBLAS_OP_N, CUBLAS_OP_T};
        // Column-major view: src is cols×rows (ld = cols); dst = srcᵀ is rows×cols (ld = rows).
        let (m, n) = (dim(rows, "rows")?, dim(cols, "cols")?);
        let handle = *self.blas.handle();
        let status = match dtype {
            DType::F32 => unsafe {
                cublas::sys::cublasSgeam(
                    handle,
                    CUBLAS_OP_T,
                    CUBLAS_OP_N,
                    m,
                    n,
                    &1.0f32,
                    src.0 as *const f32,
                    n,
                    &0.0f32,
                    dst.0 as *const f32,
                    m,
                    dst.0 as *mut f32,
                    m,
                )
            },
            DType::F64 => unsafe {
                cublas::sys::cublasDgeam(
                    handle,
                    CUBLAS_OP_T,
                    CUBLAS_OP_N,
                    m,
                    n,
                    &1.0f64,
                    src.0 as *const f64,
                    n,
                    &0.0f64,
                    dst.0 as *const f64,
                    m,
                    dst.0 as *mut f64,
                    m,
                )
            },
            dtype => return Err(Self::unsupported(dtype, "transpose")),
        };
        check_blas(status, "geam")
    }

    fn supports_factorization(&self, dtype: DType) -> bool {
        matches!(dtype, DType::F32 | DType::F64)
    }

    fn getrf_workspace_len(&self, dtype: DType, n: usize, a: DevicePtr) -> Result<usize> {
        let n = dim(n, "n")?;
        let mut len: i32 = 0;
        let status = match dtype {
            DType::F32 => unsafe {
                cusolver::sys::cusolverDnSgetrf_bufferSize(
                    self.solver.0,
                    n,
                    n,
                    a.0 as *mut f32,
                    n.max(1),
                    &mut len,
                )
            },
            DType::F64 => unsafe {
                cusolver::sys::cusolverDnDgetrf_bufferSize(
                    self.solver.0,
                    n,
                    n,
                    a.0 as *mut f64,
                    n.max(1),
                    &mut len,
                )
            },
            dtype => return Err(Self::unsupported(dtype, "getrf")),
        };
        check_solver(status, "getrf_bufferSize")?;
        Ok(len.max(1) as usize)
    }

    fn getrf(
        &self,
        dtype: DType,
        n: usize,
        a: DevicePtr,
        work: DevicePtr,
        ipiv: DevicePtr,
        info: DevicePtr,
    ) -> Result<()> {
        let n = dim(n, "n")?;
        let status = match dtype {
            DType::F32 => unsafe {
                cusolver::sys::cusolverDnSgetrf(
                    self.solver.0,
                    n,
                    n,
                    a.0 as *mut f32,
                    n.max(1),
                    work.0 as *mut f32,
                    ipiv.0 as *mut i32,
                    info.0 as *mut i32,
                )
            },
            DType::F64 => unsafe {
                cusolver::sys::cusolverDnDgetrf(
                    self.solver.0,
                    n,
                    n,
                    a.0 as *mut f64,
                    n.max(1),
                    work.0 as *mut f64,
                    ipiv.0 as *mut i32,
                    info.0 as *mut i32,
                )
            },
            dtype => return Err(Self::unsupported(dtype, "getrf")),
        };
        check_solver(status, "getrf")
    }

    fn getrs(
        &self,
        dtype: DType,
        n: usize,
        nrhs: usize,
        a: DevicePtr,
        ipiv: DevicePtr,
        b: DevicePtr,
        info: DevicePtr,
    ) -> Result<()> {
        use cusolver::sys::cublasOperation_t::CUBLAS_OP_N;
        let (n, nrhs) = (dim(n, "n")?, dim(nrhs, "nrhs")?);
        let status = match dtype {
            DType::F32 => unsafe {
                cusolver::sys::cusolverDnSgetrs(
                    self.solver.0,
                    CUBLAS_OP_N,
                    n,
                    nrhs,
                    a.0 as *const f32,
                    n.max(1),
                    ipiv.0 as *const i32,
                    b.0 as *mut f32,
                    n.max(1),
                    info.0 as *mut i32,
                )
            },
            DType::F64 => unsafe {
                cusolver::sys::cusolverDnDgetrs(
                    self.solver.0,
                    CUBLAS_OP_N,
                    n,
                    nrhs,
                    a.0 as *const f64,
                    n.max(1),
                    ipiv.0 as *const i32,
                    b.0 as *mut f64,
                    n.max(1),
                    info.0 as *mut i32,
                )
            },
            dtype => return Err(Self::unsupported(dtype, "getrs")),
        };
        check_solver(status, "getrs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dim_rejects_sizes_beyond_i32() {
        assert_eq!(dim(0, "n").unwrap(), 0);
        assert_eq!(dim(i32::MAX as usize, "n").unwrap(), i32::MAX);
        let err = dim(i32::MAX as usize + 1, "nrhs").unwrap_err();
        assert!(matches!(err, Error::Device(ref msg) if msg.contains("nrhs")), "{err}");
    }
}
