use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::device::BackendKind;
use crate::error::{Error, Result};
use crate::kernel::Op;

// KernelRegistry — (operation, backend) → kernel
//
// Registration happens once, through a RegistryBuilder, before any lookup:
// `build()` freezes the table and `install()` publishes it process-wide. The
// published registry is immutable, so lookups from any thread need no locking.
//
// Entries are stored type-erased as `Box<Box<O::Kernel>>` and recovered by
// downcasting with the marker type that keyed them.

struct Entry {
    op: &'static str,
    kernel: Box<dyn Any + Send + Sync>,
}

type Key = (TypeId, BackendKind);

/// Collects kernels before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    kernels: HashMap<Key, Entry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the kernel implementing `O` on `backend`.
    ///
    /// Fails with `AlreadyRegistered` if that pair already has a kernel.
    pub fn register<O: Op>(&mut self, backend: BackendKind, kernel: Box<O::Kernel>) -> Result<()> {
        let key = (TypeId::of::<O>(), backend);
        if self.kernels.contains_key(&key) {
            return Err(Error::AlreadyRegistered {
                op: O::NAME,
                backend,
            });
        }
        log::debug!("registered kernel '{}' for backend '{backend}'", O::NAME);
        self.kernels.insert(
            key,
            Entry {
                op: O::NAME,
                kernel: Box::new(kernel),
            },
        );
        Ok(())
    }

    pub fn build(self) -> KernelRegistry {
        KernelRegistry {
            kernels: self.kernels,
        }
    }
}

/// Immutable table of kernels keyed by operation and backend.
pub struct KernelRegistry {
    kernels: HashMap<Key, Entry>,
}

static GLOBAL: OnceLock<KernelRegistry> = OnceLock::new();

impl KernelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The kernel implementing `O` on `backend`.
    pub fn lookup<O: Op>(&self, backend: BackendKind) -> Result<&O::Kernel> {
        let miss = || Error::UnimplementedForBackend {
            op: O::NAME,
            backend,
        };
        let entry = self.kernels.get(&(TypeId::of::<O>(), backend)).ok_or_else(miss)?;
        entry
            .kernel
            .downcast_ref::<Box<O::Kernel>>()
            .map(|k| k.as_ref())
            .ok_or_else(miss)
    }

    pub fn contains<O: Op>(&self, backend: BackendKind) -> bool {
        self.kernels.contains_key(&(TypeId::of::<O>(), backend))
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Registered (operation, backend) pairs, sorted.
    pub fn entries(&self) -> Vec<(&'static str, BackendKind)> {
        let mut entries: Vec<_> = self
            .kernels
            .iter()
            .map(|((_, backend), entry)| (entry.op, *backend))
            .collect();
        entries.sort();
        entries
    }

    /// Publish this registry process-wide.
    ///
    /// The first call wins. Later calls drop their registry, log a warning and
    /// return the one already installed.
    pub fn install(self) -> &'static KernelRegistry {
        let mut fresh = false;
        let installed = GLOBAL.get_or_init(|| {
            fresh = true;
            self
        });
        if fresh {
            log::info!("installed kernel registry with {} kernels", installed.len());
        } else {
            log::warn!("kernel registry already installed; keeping the existing one");
        }
        installed
    }

    /// The installed registry, if any.
    pub fn try_global() -> Option<&'static KernelRegistry> {
        GLOBAL.get()
    }

    /// The installed registry, or `RegistryNotInitialized`.
    pub fn global() -> Result<&'static KernelRegistry> {
        GLOBAL.get().ok_or(Error::RegistryNotInitialized)
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("entries", &self.entries())
            .finish()
    }
}
