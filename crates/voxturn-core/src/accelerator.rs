use std::sync::atomic::{AtomicUsize, Ordering};

/// The memory-management surface every accelerator abstraction must offer.
pub trait Accelerator: Send + Sync {
    fn name(&self) -> &str;
    /// Return cached allocator blocks to the device.
    fn clear_cache(&self);
    /// Drop unreachable host-side references to device memory.
    fn collect_garbage(&self);
}

/// Accelerator for hosts without a managed device. Both operations are
/// no-ops; invocations are counted.
pub struct HostAccelerator {
    cache_clears: AtomicUsize,
    collections: AtomicUsize,
}

impl HostAccelerator {
    pub fn new() -> Self {
        Self {
            cache_clears: AtomicUsize::new(0),
            collections: AtomicUsize::new(0),
        }
    }

    pub fn cache_clears(&self) -> usize {
        self.cache_clears.load(Ordering::Relaxed)
    }

    pub fn collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }
}

impl Default for HostAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator for HostAccelerator {
    fn name(&self) -> &str {
        "host"
    }

    fn clear_cache(&self) {
        let n = self.cache_clears.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!("host accelerator cache clear #{n}");
    }

    fn collect_garbage(&self) {
        self.collections.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_accelerator_counts_calls() {
        let acc = HostAccelerator::new();
        acc.clear_cache();
        acc.clear_cache();
        acc.collect_garbage();
        assert_eq!(acc.cache_clears(), 2);
        assert_eq!(acc.collections(), 1);
        assert_eq!(acc.name(), "host");
    }

    #[test]
    fn test_host_accelerator_implements_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HostAccelerator>();
    }
}
