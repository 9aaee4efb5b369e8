use half::{bf16, f16};

use crate::accelerator::DeviceBuffer;
use crate::dispatch_dtype;
use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};

/// Typed host memory, one variant per dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum HostStorage {
    U8(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl HostStorage {
    /// `n` zero elements of `dtype`.
    pub fn zeros(dtype: DType, n: usize) -> Self {
        dispatch_dtype!(dtype, T => T::into_storage(vec![T::zero(); n]))
    }

    /// Reinterpret raw bytes (e.g. copied back from a device) as `dtype`.
    pub fn from_bytes(dtype: DType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % dtype.size_in_bytes() != 0 {
            return Err(Error::msg(format!(
                "{} bytes is not a whole number of {dtype} elements",
                bytes.len()
            )));
        }
        Ok(dispatch_dtype!(dtype, T => {
            T::into_storage(bytemuck::allocation::pod_collect_to_vec::<u8, T>(bytes))
        }))
    }

    pub fn dtype(&self) -> DType {
        match self {
            HostStorage::U8(_) => DType::U8,
            HostStorage::I8(_) => DType::I8,
            HostStorage::I16(_) => DType::I16,
            HostStorage::I32(_) => DType::I32,
            HostStorage::I64(_) => DType::I64,
            HostStorage::F16(_) => DType::F16,
            HostStorage::BF16(_) => DType::BF16,
            HostStorage::F32(_) => DType::F32,
            HostStorage::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostStorage::U8(v) => v.len(),
            HostStorage::I8(v) => v.len(),
            HostStorage::I16(v) => v.len(),
            HostStorage::I32(v) => v.len(),
            HostStorage::I64(v) => v.len(),
            HostStorage::F16(v) => v.len(),
            HostStorage::BF16(v) => v.len(),
            HostStorage::F32(v) => v.len(),
            HostStorage::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw bytes of the elements, in native endianness.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            HostStorage::U8(v) => bytemuck::cast_slice(v),
            HostStorage::I8(v) => bytemuck::cast_slice(v),
            HostStorage::I16(v) => bytemuck::cast_slice(v),
            HostStorage::I32(v) => bytemuck::cast_slice(v),
            HostStorage::I64(v) => bytemuck::cast_slice(v),
            HostStorage::F16(v) => bytemuck::cast_slice(v),
            HostStorage::BF16(v) => bytemuck::cast_slice(v),
            HostStorage::F32(v) => bytemuck::cast_slice(v),
            HostStorage::F64(v) => bytemuck::cast_slice(v),
        }
    }

    /// Typed view, failing with a dtype mismatch if `T` is not the stored type.
    pub fn as_slice<T: WithDType>(&self) -> Result<&[T]> {
        T::storage_slice(self).ok_or(Error::DTypeMismatch {
            expected: T::DTYPE,
            got: self.dtype(),
        })
    }

    pub fn as_mut_slice<T: WithDType>(&mut self) -> Result<&mut [T]> {
        let got = self.dtype();
        T::storage_slice_mut(self).ok_or(Error::DTypeMismatch {
            expected: T::DTYPE,
            got,
        })
    }
}

/// The buffer behind an array: host memory or a device allocation.
#[derive(Debug)]
pub enum Storage {
    Host(HostStorage),
    Device(DeviceBuffer),
}

impl Storage {
    pub fn as_host(&self) -> Result<&HostStorage> {
        match self {
            Storage::Host(h) => Ok(h),
            Storage::Device(buf) => Err(Error::DeviceMismatch {
                expected: "native:0".to_string(),
                got: buf.accelerator().name(),
            }),
        }
    }

    pub fn as_host_mut(&mut self) -> Result<&mut HostStorage> {
        match self {
            Storage::Host(h) => Ok(h),
            Storage::Device(buf) => Err(Error::DeviceMismatch {
                expected: "native:0".to_string(),
                got: buf.accelerator().name(),
            }),
        }
    }

    pub fn as_device(&self) -> Result<&DeviceBuffer> {
        match self {
            Storage::Device(buf) => Ok(buf),
            Storage::Host(_) => Err(Error::DeviceMismatch {
                expected: "an accelerator".to_string(),
                got: "native:0".to_string(),
            }),
        }
    }
}
