use tessera_native::NativeConfig;

/// Configuration for [`init_with`](crate::init_with).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Native backend tuning.
    pub native: NativeConfig,
    /// Register the solve and inverse kernels for accelerators (default: true).
    pub accelerator_kernels: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            native: NativeConfig::default(),
            accelerator_kernels: true,
        }
    }
}

impl Config {
    /// Set the native backend configuration.
    pub fn with_native(mut self, native: NativeConfig) -> Self {
        self.native = native;
        self
    }

    /// Set the native parallel threshold.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.native.parallel_threshold = threshold;
        self
    }

    pub fn with_accelerator_kernels(mut self, enabled: bool) -> Self {
        self.accelerator_kernels = enabled;
        self
    }
}
