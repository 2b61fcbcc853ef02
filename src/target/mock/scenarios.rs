//! Pre-built mock heaps for testing and demos.
//!
//! These scenarios provide realistic target-process states: a typical JVM-ish
//! heap, a resource-constrained device, and a target without count support.

use std::time::Duration;

use super::debuggee::MockDebuggee;

impl MockDebuggee {
    /// A typical small heap: core classes with plenty of instances, a couple
    /// of application classes, and one class with no live instances.
    pub fn typical_heap() -> Self {
        let target = Self::new();

        let string = target.define_class("java.lang.String");
        target.allocate(string, 120);

        let object = target.define_class("java.lang.Object");
        target.allocate(object, 40);

        let byte_array = target.define_class("byte[]");
        for size in [16, 64, 256, 1024, 4096, 16384] {
            target.allocate_sized(byte_array, size);
        }

        let array_list = target.define_class("java.util.ArrayList");
        target.allocate(array_list, 25);

        let order = target.define_class("com.example.shop.Order");
        target.allocate(order, 3);

        // Loaded but never instantiated.
        target.define_class("com.example.shop.OrderValidator");

        target
    }

    /// A constrained device: few classes, and every count batch carries
    /// noticeable latency, so the poller backs off visibly.
    pub fn constrained_device() -> Self {
        let target = Self::new();
        let string = target.define_class("java.lang.String");
        target.allocate(string, 30);
        let activity = target.define_class("com.example.app.MainActivity");
        target.allocate(activity, 1);
        target.set_count_latency(Duration::from_millis(25));
        target
    }

    /// A target whose runtime cannot report per-class instance counts at
    /// all; the census degrades to a names-only listing.
    pub fn without_count_support() -> Self {
        let target = Self::typical_heap();
        target.set_counts_supported(false);
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{CandidateEnumerator, InstanceCountProvider};

    #[test]
    fn test_typical_heap_shape() {
        let target = MockDebuggee::typical_heap();
        let classes = target.loaded_classes().unwrap();
        assert_eq!(classes.len(), 6);
        assert!(target.supports_instance_counts());

        let tokens: Vec<_> = classes.iter().map(|c| c.token).collect();
        let counts = target.count_instances(&tokens).unwrap();
        assert_eq!(counts[0], 120);
        // The validator class is loaded but has no instances.
        assert_eq!(counts[5], 0);
    }

    #[test]
    fn test_countless_target() {
        let target = MockDebuggee::without_count_support();
        assert!(!target.supports_instance_counts());
        assert!(!target.loaded_classes().unwrap().is_empty());
    }
}
