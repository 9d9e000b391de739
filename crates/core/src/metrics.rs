use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Counters for claim/release traffic on one port.
///
/// Clones share the same counters.
///
/// # Example
/// ```rust
/// use stagehand_core::metrics::PortMetrics;
///
/// let metrics = PortMetrics::default();
/// metrics.claimed();
/// metrics.starved();
/// assert_eq!(metrics.claims(), 1);
/// assert_eq!(metrics.starvations(), 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct PortMetrics {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    claims: AtomicU64,
    starved: AtomicU64,
    releases: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
}

impl PortMetrics {
    /// A buffer was handed to the stage.
    pub fn claimed(&self) {
        self.inner.claims.fetch_add(1, Ordering::Relaxed);
    }

    /// A claim found the port empty.
    pub fn starved(&self) {
        self.inner.starved.fetch_add(1, Ordering::Relaxed);
    }

    /// A buffer came back from the stage.
    pub fn released(&self) {
        self.inner.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// A release was refused.
    pub fn rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// The neighbor made a buffer claimable.
    pub fn delivered(&self) {
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claims(&self) -> u64 {
        self.inner.claims.load(Ordering::Relaxed)
    }

    pub fn starvations(&self) -> u64 {
        self.inner.starved.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> u64 {
        self.inner.releases.load(Ordering::Relaxed)
    }

    pub fn rejections(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }

    pub fn deliveries(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }
}
