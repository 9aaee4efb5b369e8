use std::fmt;
use std::sync::Arc;

use crate::device::BackendKind;
use crate::dtype::DType;
use crate::error::{Error, Result};

// Accelerator — the narrow device interface the GPU kernels are written against
//
// An accelerator owns a memory space addressed by `DevicePtr`, a notion of
// "current device" per calling thread, and a dense LU factorization routine
// with LAPACK conventions (column-major, 1-based pivots, status written to
// device memory). Everything above this trait (arrays, the solve pipeline)
// is device agnostic; `tessera-cuda` provides the implementations.
//
// Status words written by `getrf`/`getrs` live in device memory. They are only
// observable after `copy_device_to_host`, which is a synchronization point.

/// Opaque byte address in an accelerator's memory space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The address `bytes` past this one.
    pub fn add(self, bytes: usize) -> DevicePtr {
        DevicePtr(self.0 + bytes as u64)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Device selection that was active before a `select` call, for `restore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelection(pub Option<u64>);

/// A device with its own memory and a dense LU solver.
pub trait Accelerator: Send + Sync + fmt::Debug + 'static {
    /// Which backend's kernels run on this device.
    fn backend_kind(&self) -> BackendKind;

    fn ordinal(&self) -> usize;

    fn name(&self) -> String {
        format!("{}:{}", self.backend_kind(), self.ordinal())
    }

    /// Make this device current for the calling thread. Returns the previous
    /// selection so it can be restored.
    fn select(&self) -> Result<DeviceSelection>;

    fn restore(&self, previous: DeviceSelection) -> Result<()>;

    fn malloc(&self, bytes: usize) -> Result<DevicePtr>;

    /// Release memory obtained from `malloc`. Called from destructors, so
    /// failures are logged rather than returned.
    fn free(&self, ptr: DevicePtr);

    fn copy_host_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<()>;

    /// Blocks until all work writing `src` has completed.
    fn copy_device_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<()>;

    fn copy_device_to_device(&self, dst: DevicePtr, src: DevicePtr, bytes: usize) -> Result<()>;

    /// Write the transpose of the row-major `rows`×`cols` matrix at `src` into
    /// `dst` as a row-major `cols`×`rows` matrix.
    fn transpose(
        &self,
        dtype: DType,
        rows: usize,
        cols: usize,
        src: DevicePtr,
        dst: DevicePtr,
    ) -> Result<()>;

    /// Whether `getrf`/`getrs` accept this element type.
    fn supports_factorization(&self, dtype: DType) -> bool;

    /// Workspace length, in elements of `dtype`, that `getrf` needs for an
    /// `n`×`n` matrix at `a`.
    fn getrf_workspace_len(&self, dtype: DType, n: usize, a: DevicePtr) -> Result<usize>;

    /// In-place LU factorization with partial pivoting of the column-major
    /// `n`×`n` matrix at `a`. Writes `n` 1-based `i32` pivots to `ipiv` and an
    /// `i32` status to `info`: 0 on success, `k > 0` if `U(k, k)` is exactly
    /// zero, `k < 0` if argument `-k` was invalid.
    #[allow(clippy::too_many_arguments)]
    fn getrf(
        &self,
        dtype: DType,
        n: usize,
        a: DevicePtr,
        work: DevicePtr,
        ipiv: DevicePtr,
        info: DevicePtr,
    ) -> Result<()>;

    /// Solve `A X = B` in place on the column-major `n`×`nrhs` matrix at `b`,
    /// using the factors and pivots produced by `getrf`. Writes an `i32`
    /// status to `info` (0 on success, negative for an invalid argument).
    #[allow(clippy::too_many_arguments)]
    fn getrs(
        &self,
        dtype: DType,
        n: usize,
        nrhs: usize,
        a: DevicePtr,
        ipiv: DevicePtr,
        b: DevicePtr,
        info: DevicePtr,
    ) -> Result<()>;
}

// DeviceBuffer — scoped device allocation
//
// The allocation is released when the buffer is dropped, so every exit path
// of a kernel (including `?` returns) frees its scratch memory.

/// An owned device allocation, freed on drop.
pub struct DeviceBuffer {
    accel: Arc<dyn Accelerator>,
    ptr: DevicePtr,
    bytes: usize,
}

impl DeviceBuffer {
    /// Allocate `bytes` bytes (content undefined) on `accel`.
    pub fn alloc(accel: &Arc<dyn Accelerator>, bytes: usize) -> Result<Self> {
        let ptr = accel.malloc(bytes)?;
        Ok(DeviceBuffer {
            accel: accel.clone(),
            ptr,
            bytes,
        })
    }

    /// Allocate a buffer holding a copy of `data`.
    pub fn from_host(accel: &Arc<dyn Accelerator>, data: &[u8]) -> Result<Self> {
        let buf = Self::alloc(accel, data.len())?;
        accel.copy_host_to_device(buf.ptr, data)?;
        Ok(buf)
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes
    }

    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.accel
    }

    /// Copy the whole buffer back to host memory.
    pub fn to_host(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.bytes];
        self.accel.copy_device_to_host(&mut out, self.ptr)?;
        Ok(out)
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.accel.free(self.ptr);
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.accel.name())
            .field("ptr", &self.ptr)
            .field("bytes", &self.bytes)
            .finish()
    }
}

// DeviceScope — RAII device selection

/// Keeps an accelerator selected for the calling thread until dropped, then
/// restores whatever was selected before.
pub struct DeviceScope<'a> {
    accel: &'a dyn Accelerator,
    previous: DeviceSelection,
}

impl<'a> DeviceScope<'a> {
    pub fn enter(accel: &'a dyn Accelerator) -> Result<Self> {
        let previous = accel.select()?;
        Ok(DeviceScope { accel, previous })
    }
}

impl Drop for DeviceScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.accel.restore(self.previous) {
            log::warn!("failed to restore device selection after {}: {e}", self.accel.name());
        }
    }
}

/// Copy a device-resident `i32` status word to the host.
///
/// This blocks until the routine that writes the status has finished.
pub fn read_status(accel: &dyn Accelerator, status: DevicePtr) -> Result<i32> {
    let mut host = [0u8; 4];
    accel.copy_device_to_host(&mut host, status)?;
    Ok(i32::from_ne_bytes(host))
}

/// Bytes needed for `count` elements of `dtype`, checked for overflow.
pub fn byte_len(dtype: DType, count: usize) -> Result<usize> {
    count
        .checked_mul(dtype.size_in_bytes())
        .ok_or_else(|| Error::msg(format!("allocation of {count} x {dtype} overflows")))
}
