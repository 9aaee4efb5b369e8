// Emulated accelerator — a CUDA-shaped device backed by host memory
//
// Implements the Accelerator interface with the same observable contract as
// a real GPU, so the whole solve pipeline (device selection, scratch
// allocation, status words in device memory, explicit synchronizing copies)
// can run and be tested on machines without one.
//
// MEMORY:
//   Allocations live in a map from base address to byte buffer. A DevicePtr
//   may point anywhere inside an allocation; every access is bounds-checked
//   against the allocation it falls in. Atomic counters track live
//   allocations, so tests can assert that a kernel released all of its
//   scratch memory.
//
// DEVICE SELECTION:
//   Like a CUDA context, the current device is per thread. Every operation
//   except `free` requires this device to be current.
//
// FACTORIZATION:
//   LAPACK getrf/getrs semantics on column-major data: partial pivoting with
//   1-based i32 pivots, info = k for the first exactly-zero pivot U(k, k),
//   factorization continuing past it.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use num_traits::Float;
use parking_lot::Mutex;

use tessera_core::accelerator::DeviceSelection;
use tessera_core::{Accelerator, BackendKind, DType, DevicePtr, Error, Result};

thread_local! {
    static CURRENT: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Allocation granularity; keeps distinct allocations apart.
const ALIGN: u64 = 256;

/// Snapshot of an emulated device's allocation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Allocations not yet freed.
    pub live_allocations: usize,
    /// Bytes held by live allocations.
    pub live_bytes: usize,
    /// Allocations made since creation.
    pub total_allocations: u64,
}

/// Host-memory stand-in for a CUDA device.
pub struct EmulatedAccelerator {
    ordinal: usize,
    memory: Mutex<BTreeMap<u64, Vec<u8>>>,
    next_addr: AtomicU64,
    live_allocations: AtomicUsize,
    live_bytes: AtomicUsize,
    total_allocations: AtomicU64,
    forced_getrs_status: Mutex<Option<i32>>,
}

impl EmulatedAccelerator {
    pub fn new(ordinal: usize) -> Self {
        EmulatedAccelerator {
            ordinal,
            memory: Mutex::new(BTreeMap::new()),
            next_addr: AtomicU64::new(ALIGN),
            live_allocations: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            total_allocations: AtomicU64::new(0),
            forced_getrs_status: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            live_allocations: self.live_allocations.load(Ordering::SeqCst),
            live_bytes: self.live_bytes.load(Ordering::SeqCst),
            total_allocations: self.total_allocations.load(Ordering::SeqCst),
        }
    }

    /// Ordinal of the emulated device current on this thread, if any.
    pub fn current_ordinal() -> Option<usize> {
        CURRENT.with(|c| c.get()).map(|o| o as usize)
    }

    /// Make the next `getrs` report `status` instead of running. Used to
    /// exercise the back-substitution failure path, which a well-formed call
    /// never reaches.
    pub fn force_next_getrs_status(&self, status: i32) {
        *self.forced_getrs_status.lock() = Some(status);
    }

    fn require_selected(&self) -> Result<()> {
        match CURRENT.with(|c| c.get()) {
            Some(o) if o == self.ordinal as u64 => Ok(()),
            other => Err(Error::device(format!(
                "{} is not the current device (current: {other:?})",
                self.name()
            ))),
        }
    }

    /// Run `f` on the `len` bytes starting at `ptr`.
    fn with_region<R>(
        &self,
        ptr: DevicePtr,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let mut memory = self.memory.lock();
        let (&base, buf) = memory
            .range_mut(..=ptr.0)
            .next_back()
            .ok_or_else(|| Error::device(format!("invalid device address {ptr}")))?;
        let start = (ptr.0 - base) as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                Error::device(format!(
                    "access of {len} bytes at {ptr} overruns allocation at {:#x} ({} bytes)",
                    base,
                    buf.len()
                ))
            })?;
        Ok(f(&mut buf[start..end]))
    }

    fn read_vec<T: bytemuck::Pod>(&self, ptr: DevicePtr, count: usize) -> Result<Vec<T>> {
        let len = count * std::mem::size_of::<T>();
        self.with_region(ptr, len, |bytes| {
            bytemuck::allocation::pod_collect_to_vec::<u8, T>(bytes)
        })
    }

    fn write_slice<T: bytemuck::Pod>(&self, ptr: DevicePtr, data: &[T]) -> Result<()> {
        let src: &[u8] = bytemuck::cast_slice(data);
        self.with_region(ptr, src.len(), |dst| dst.copy_from_slice(src))
    }

    fn getrf_typed<T: Float + bytemuck::Pod>(
        &self,
        n: usize,
        a: DevicePtr,
        work: DevicePtr,
        ipiv: DevicePtr,
        info: DevicePtr,
    ) -> Result<()> {
        // The workspace is unused here, but must be a valid allocation.
        self.with_region(work, n.max(1) * std::mem::size_of::<T>(), |_| ())?;
        let mut lu = self.read_vec::<T>(a, n * n)?;
        let mut pivots = vec![0i32; n];
        let status = lu_factor(n, &mut lu, &mut pivots);
        self.write_slice(a, &lu)?;
        self.write_slice(ipiv, &pivots)?;
        self.write_slice(info, &[status])
    }

    #[allow(clippy::too_many_arguments)]
    fn getrs_typed<T: Float + bytemuck::Pod>(
        &self,
        n: usize,
        nrhs: usize,
        a: DevicePtr,
        ipiv: DevicePtr,
        b: DevicePtr,
        info: DevicePtr,
    ) -> Result<()> {
        if let Some(status) = self.forced_getrs_status.lock().take() {
            return self.write_slice(info, &[status]);
        }
        let lu = self.read_vec::<T>(a, n * n)?;
        let pivots = self.read_vec::<i32>(ipiv, n)?;
        if let Some(k) = pivots.iter().position(|&p| p < 1 || p as usize > n) {
            log::trace!("getrs: pivot {k} out of range");
            // LAPACK reports the offending argument position; ipiv is the 5th.
            return self.write_slice(info, &[-5i32]);
        }
        let mut rhs = self.read_vec::<T>(b, n * nrhs)?;
        lu_solve(n, nrhs, &lu, &pivots, &mut rhs);
        self.write_slice(b, &rhs)?;
        self.write_slice(info, &[0i32])
    }
}

impl std::fmt::Debug for EmulatedAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EmulatedAccelerator({})", self.name())
    }
}

impl Accelerator for EmulatedAccelerator {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn select(&self) -> Result<DeviceSelection> {
        let previous = CURRENT.with(|c| c.replace(Some(self.ordinal as u64)));
        Ok(DeviceSelection(previous))
    }

    fn restore(&self, previous: DeviceSelection) -> Result<()> {
        CURRENT.with(|c| c.set(previous.0));
        Ok(())
    }

    fn malloc(&self, bytes: usize) -> Result<DevicePtr> {
        self.require_selected()?;
        let len = bytes.max(1);
        let span = (len as u64).div_ceil(ALIGN) * ALIGN;
        let addr = self.next_addr.fetch_add(span, Ordering::SeqCst);
        self.memory.lock().insert(addr, vec![0u8; len]);
        self.live_allocations.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(len, Ordering::SeqCst);
        self.total_allocations.fetch_add(1, Ordering::SeqCst);
        log::trace!("{}: malloc {bytes} bytes at {:#x}", self.name(), addr);
        Ok(DevicePtr(addr))
    }

    fn free(&self, ptr: DevicePtr) {
        match self.memory.lock().remove(&ptr.0) {
            Some(buf) => {
                self.live_allocations.fetch_sub(1, Ordering::SeqCst);
                self.live_bytes.fetch_sub(buf.len(), Ordering::SeqCst);
                log::trace!("{}: free {ptr}", self.name());
            }
            None => log::warn!("{}: free of unknown address {ptr}", self.name()),
        }
    }

    fn copy_host_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<()> {
        self.require_selected()?;
        log::trace!("{}: htod {} bytes to {dst}", self.name(), src.len());
        self.with_region(dst, src.len(), |d| d.copy_from_slice(src))
    }

    fn copy_device_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<()> {
        self.require_selected()?;
        log::trace!("{}: dtoh {} bytes from {src}", self.name(), dst.len());
        self.with_region(src, dst.len(), |s| dst.copy_from_slice(s))
    }

    fn copy_device_to_device(&self, dst: DevicePtr, src: DevicePtr, bytes: usize) -> Result<()> {
        self.require_selected()?;
        log::trace!("{}: dtod {bytes} bytes {src} -> {dst}", self.name());
        let data = self.read_vec::<u8>(src, bytes)?;
        self.write_slice(dst, &data)
    }

    fn transpose(
        &self,
        dtype: DType,
        rows: usize,
        cols: usize,
        src: DevicePtr,
        dst: DevicePtr,
    ) -> Result<()> {
        self.require_selected()?;
        let size = dtype.size_in_bytes();
        let input = self.read_vec::<u8>(src, rows * cols * size)?;
        let mut output = vec![0u8; input.len()];
        for r in 0..rows {
            for c in 0..cols {
                let from = (r * cols + c) * size;
                let to = (c * rows + r) * size;
                output[to..to + size].copy_from_slice(&input[from..from + size]);
            }
        }
        self.write_slice(dst, &output)
    }

    fn supports_factorization(&self, dtype: DType) -> bool {
        matches!(dtype, DType::F32 | DType::F64)
    }

    fn getrf_workspace_len(&self, dtype: DType, n: usize, a: DevicePtr) -> Result<usize> {
        self.require_selected()?;
        self.with_region(a, n * n * dtype.size_in_bytes(), |_| ())?;
        Ok(n.max(1))
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
        self.require_selected()?;
        match dtype {
            DType::F32 => self.getrf_typed::<f32>(n, a, work, ipiv, info),
            DType::F64 => self.getrf_typed::<f64>(n, a, work, ipiv, info),
            dtype => Err(Error::UnsupportedDType { dtype, op: "getrf" }),
        }
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
        self.require_selected()?;
        match dtype {
            DType::F32 => self.getrs_typed::<f32>(n, nrhs, a, ipiv, b, info),
            DType::F64 => self.getrs_typed::<f64>(n, nrhs, a, ipiv, b, info),
            dtype => Err(Error::UnsupportedDType { dtype, op: "getrs" }),
        }
    }
}

/// In-place LU factorization with partial pivoting of a column-major `n`×`n`
/// matrix. Returns the LAPACK `info` value.
fn lu_factor<T: Float>(n: usize, a: &mut [T], ipiv: &mut [i32]) -> i32 {
    let at = |i: usize, j: usize| i + j * n;
    let mut info = 0;
    for k in 0..n {
        let mut p = k;
        let mut best = a[at(k, k)].abs();
        for i in k + 1..n {
            let v = a[at(i, k)].abs();
            if v > best {
                best = v;
                p = i;
            }
        }
        ipiv[k] = (p + 1) as i32;
        if best == T::zero() {
            if info == 0 {
                info = (k + 1) as i32;
            }
            continue;
        }
        if p != k {
            for j in 0..n {
                a.swap(at(k, j), at(p, j));
            }
        }
        let pivot = a[at(k, k)];
        for i in k + 1..n {
            a[at(i, k)] = a[at(i, k)] / pivot;
        }
        for j in k + 1..n {
            let akj = a[at(k, j)];
            if akj == T::zero() {
                continue;
            }
            for i in k + 1..n {
                a[at(i, j)] = a[at(i, j)] - a[at(i, k)] * akj;
            }
        }
    }
    info
}

/// Solve with the factors from `lu_factor`, overwriting the column-major
/// `n`×`nrhs` right-hand side.
fn lu_solve<T: Float>(n: usize, nrhs: usize, lu: &[T], ipiv: &[i32], b: &mut [T]) {
    let at = |i: usize, j: usize| i + j * n;
    for col in b.chunks_mut(n.max(1)).take(nrhs) {
        for (k, &p) in ipiv.iter().enumerate() {
            let p = p as usize - 1;
            if p != k {
                col.swap(k, p);
            }
        }
        for j in 0..n {
            let bj = col[j];
            for i in j + 1..n {
                col[i] = col[i] - lu[at(i, j)] * bj;
            }
        }
        for j in (0..n).rev() {
            col[j] = col[j] / lu[at(j, j)];
            let bj = col[j];
            for i in 0..j {
                col[i] = col[i] - lu[at(i, j)] * bj;
            }
        }
    }
}
