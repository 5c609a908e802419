//! Time sources read by the capture stage.

/// Clock read from the immediate context.
///
/// Every method must be safe to call from an interrupt handler: no locks,
/// no allocation, bounded time.
pub trait Clock: Send + Sync {
    /// Wall-clock whole seconds since the Unix epoch.
    fn real_seconds(&self) -> i64;

    /// Wall-clock nanoseconds since the Unix epoch.
    fn real_ns(&self) -> u64;

    /// Monotonic nanoseconds since boot.
    fn monotonic_ns(&self) -> u64;
}
