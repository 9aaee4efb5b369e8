/// Tuning knobs for the native backend.
///
/// ```
/// use tessera_native::NativeConfig;
///
/// let config = NativeConfig::default().with_parallel_threshold(1 << 20);
/// assert_eq!(config.parallel_threshold, 1 << 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeConfig {
    /// Minimum number of folded elements (outputs × group size) before a
    /// reduction fans its output positions out over the rayon pool.
    pub parallel_threshold: usize,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 1 << 15,
        }
    }
}

impl NativeConfig {
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Never parallelize.
    pub fn serial() -> Self {
        Self {
            parallel_threshold: usize::MAX,
        }
    }
}
