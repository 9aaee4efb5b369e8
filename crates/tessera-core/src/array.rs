use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::accelerator::{DeviceBuffer, DeviceScope};
use crate::device::Device;
use crate::dispatch_dtype;
use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;
use crate::storage::{HostStorage, Storage};

// Array — a typed, strided view of a device buffer
//
// An Array is the unit every kernel reads and writes. It pairs a shared buffer
// (host memory or a device allocation) with a Layout and a dtype, and records
// the Device the buffer lives on so kernels can check that all their operands
// agree before touching memory.
//
// MEMORY MODEL:
//
//   Cloning an Array clones an Arc. Views such as `t()` share the buffer and
//   differ only in layout. Kernels write into a preallocated output array
//   through `storage_mut()`; an output must never share its buffer with one of
//   the inputs of the same call.

#[derive(Clone)]
pub struct Array {
    storage: Arc<RwLock<Storage>>,
    layout: Layout,
    dtype: DType,
    device: Device,
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Array(shape={}, dtype={}, device={})",
            self.shape(),
            self.dtype,
            self.device
        )
    }
}

impl Array {
    /// Wrap host data in a contiguous array on `device`, uploading it if the
    /// device is an accelerator.
    pub fn from_host_storage(
        host: HostStorage,
        shape: impl Into<Shape>,
        device: &Device,
    ) -> Result<Self> {
        let shape = shape.into();
        if host.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: host.len(),
                shape,
            });
        }
        let dtype = host.dtype();
        let storage = match device {
            Device::Native => Storage::Host(host),
            Device::Accelerator(accel) => {
                let _scope = DeviceScope::enter(accel.as_ref())?;
                Storage::Device(DeviceBuffer::from_host(accel, host.as_bytes())?)
            }
        };
        Ok(Array {
            storage: Arc::new(RwLock::new(storage)),
            layout: Layout::contiguous(shape),
            dtype,
            device: device.clone(),
        })
    }

    pub fn from_vec<T: WithDType>(
        data: Vec<T>,
        shape: impl Into<Shape>,
        device: &Device,
    ) -> Result<Self> {
        Self::from_host_storage(T::into_storage(data), shape, device)
    }

    pub fn from_slice<T: WithDType>(
        data: &[T],
        shape: impl Into<Shape>,
        device: &Device,
    ) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape, device)
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: &Device) -> Result<Self> {
        let shape = shape.into();
        Self::from_host_storage(HostStorage::zeros(dtype, shape.elem_count()), shape, device)
    }

    /// The `n`×`n` identity matrix.
    pub fn identity(n: usize, dtype: DType, device: &Device) -> Result<Self> {
        let host = dispatch_dtype!(dtype, T => {
            let mut data = vec![T::zero(); n * n];
            for i in 0..n {
                data[i * n + i] = T::one();
            }
            T::into_storage(data)
        });
        Self::from_host_storage(host, (n, n), device)
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.layout.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// View with two dimensions swapped. Shares the buffer.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Array> {
        Ok(Array {
            storage: self.storage.clone(),
            layout: self.layout.transpose(dim0, dim1)?,
            dtype: self.dtype,
            device: self.device.clone(),
        })
    }

    /// Matrix transpose view.
    pub fn t(&self) -> Result<Array> {
        if self.rank() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: self.rank(),
            });
        }
        self.transpose(0, 1)
    }

    /// Whether both arrays view the same buffer.
    pub fn shares_storage(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn storage(&self) -> RwLockReadGuard<'_, Storage> {
        self.storage.read()
    }

    pub fn storage_mut(&self) -> RwLockWriteGuard<'_, Storage> {
        self.storage.write()
    }

    /// A host copy of the whole underlying buffer (not just this view).
    fn host_buffer(&self) -> Result<HostStorage> {
        let storage = self.storage.read();
        match &*storage {
            Storage::Host(h) => Ok(h.clone()),
            Storage::Device(buf) => {
                let _scope = DeviceScope::enter(buf.accelerator().as_ref())?;
                HostStorage::from_bytes(self.dtype, &buf.to_host()?)
            }
        }
    }

    /// Elements in logical (row-major) order, copied to the host.
    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        let host = self.host_buffer()?;
        let data = host.as_slice::<T>()?;
        Ok(self.layout.strided_indices().map(|i| data[i]).collect())
    }

    /// Elements converted to f64, for tests and diagnostics.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        dispatch_dtype!(self.dtype, T => {
            Ok(self.to_vec::<T>()?.into_iter().map(|v| v.to_f64()).collect())
        })
    }

    /// A contiguous copy of this array on `device`.
    pub fn to_device(&self, device: &Device) -> Result<Array> {
        let host = dispatch_dtype!(self.dtype, T => T::into_storage(self.to_vec::<T>()?));
        Self::from_host_storage(host, self.shape().clone(), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_checks_count() {
        let err = Array::from_vec(vec![1.0f32, 2.0, 3.0], (2, 2), &Device::Native).unwrap_err();
        assert!(matches!(
            err,
            Error::ElementCountMismatch {
                expected: 4,
                got: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_transpose_view_shares_storage() {
        let a = Array::from_vec(vec![1i32, 2, 3, 4, 5, 6], (2, 3), &Device::Native).unwrap();
        let t = a.t().unwrap();
        assert!(t.shares_storage(&a));
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_identity() {
        let eye = Array::identity(3, DType::F64, &Device::Native).unwrap();
        assert_eq!(
            eye.to_vec::<f64>().unwrap(),
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_to_vec_wrong_type() {
        let a = Array::zeros(3, DType::F32, &Device::Native).unwrap();
        assert!(a.to_vec::<f64>().is_err());
        assert_eq!(a.to_f64_vec().unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_t_requires_matrix() {
        let a = Array::zeros(3, DType::F32, &Device::Native).unwrap();
        assert!(matches!(
            a.t(),
            Err(Error::RankMismatch {
                expected: 2,
                got: 1
            })
        ));
    }
}
