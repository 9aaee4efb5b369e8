use std::fmt;
use std::sync::Arc;

use crate::accelerator::Accelerator;
use crate::array::Array;
use crate::error::{Error, Result};

/// Execution target whose kernels are looked up in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// Host CPU.
    Native,
    /// NVIDIA GPUs (and the emulated accelerator standing in for one).
    Cuda,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Cuda => write!(f, "cuda"),
        }
    }
}

/// The device an array's buffer lives on.
#[derive(Clone)]
pub enum Device {
    Native,
    Accelerator(Arc<dyn Accelerator>),
}

impl Device {
    pub fn accelerator(accel: Arc<dyn Accelerator>) -> Self {
        Device::Accelerator(accel)
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self {
            Device::Native => BackendKind::Native,
            Device::Accelerator(a) => a.backend_kind(),
        }
    }

    pub fn ordinal(&self) -> usize {
        match self {
            Device::Native => 0,
            Device::Accelerator(a) => a.ordinal(),
        }
    }

    /// A human-readable name, e.g. "native:0" or "cuda:1".
    pub fn name(&self) -> String {
        match self {
            Device::Native => "native:0".to_string(),
            Device::Accelerator(a) => a.name(),
        }
    }

    /// The accelerator handle, or an error for host arrays.
    pub fn as_accelerator(&self) -> Result<&Arc<dyn Accelerator>> {
        match self {
            Device::Accelerator(a) => Ok(a),
            Device::Native => Err(Error::DeviceMismatch {
                expected: "an accelerator".to_string(),
                got: self.name(),
            }),
        }
    }

    /// Both native, or both the same accelerator instance. Device pointers
    /// only mean something to the accelerator that produced them, so two
    /// handles with equal ordinals are still different devices.
    pub fn is_same(&self, other: &Device) -> bool {
        match (self, other) {
            (Device::Native, Device::Native) => true,
            (Device::Accelerator(a), Device::Accelerator(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }

    /// Fail unless every array is bound to this device.
    pub fn check_compatible(&self, arrays: &[&Array]) -> Result<()> {
        for array in arrays {
            if !self.is_same(array.device()) {
                let expected = self.name();
                let mut got = array.device().name();
                if got == expected {
                    got.push_str(" (another instance)");
                }
                return Err(Error::DeviceMismatch { expected, got });
            }
        }
        Ok(())
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device({})", self.name())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
