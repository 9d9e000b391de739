use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

const DEFAULT_WINDOW: usize = 120;

/// Exchange-loop counters and rolling transform timing for one stage.
///
/// Clones share the same counters, so a host can keep a handle while the
/// processor records into it.
///
/// # Example
/// ```rust
/// use stagehand::prelude::StageMetrics;
///
/// let metrics = StageMetrics::default();
/// metrics.record_transform(std::time::Duration::from_millis(4));
/// assert_eq!(metrics.transforms(), 1);
/// assert_eq!(metrics.last_transform_millis(), Some(4.0));
/// ```
#[derive(Default, Clone)]
pub struct StageMetrics {
    inner: Arc<StageCounters>,
}

#[derive(Default)]
struct StageCounters {
    notifications: AtomicU64,
    transforms: AtomicU64,
    inputs_released: AtomicU64,
    outputs_released: AtomicU64,
    eos_propagated: AtomicU64,
    errors: AtomicU64,
    no_progress_stops: AtomicU64,
    step_limit_stops: AtomicU64,
    last_nanos: AtomicU64,
    window: Mutex<VecDeque<u64>>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StageMetrics {
    pub(crate) fn notified(&self) {
        bump(&self.inner.notifications);
    }

    /// Record one engine call and how long it took.
    pub fn record_transform(&self, dur: Duration) {
        let nanos = dur.as_nanos().min(u64::MAX as u128) as u64;
        bump(&self.inner.transforms);
        self.inner.last_nanos.store(nanos, Ordering::Relaxed);
        if let Ok(mut win) = self.inner.window.lock() {
            win.push_back(nanos);
            while win.len() > DEFAULT_WINDOW {
                win.pop_front();
            }
        }
    }

    pub(crate) fn input_released(&self) {
        bump(&self.inner.inputs_released);
    }

    pub(crate) fn output_released(&self) {
        bump(&self.inner.outputs_released);
    }

    pub(crate) fn eos_propagated(&self) {
        bump(&self.inner.eos_propagated);
    }

    pub(crate) fn errored(&self) {
        bump(&self.inner.errors);
    }

    pub(crate) fn stalled(&self) {
        bump(&self.inner.no_progress_stops);
    }

    pub(crate) fn step_limited(&self) {
        bump(&self.inner.step_limit_stops);
    }

    /// Notifications that ran the exchange loop.
    pub fn notifications(&self) -> u64 {
        self.inner.notifications.load(Ordering::Relaxed)
    }

    pub fn transforms(&self) -> u64 {
        self.inner.transforms.load(Ordering::Relaxed)
    }

    pub fn inputs_released(&self) -> u64 {
        self.inner.inputs_released.load(Ordering::Relaxed)
    }

    pub fn outputs_released(&self) -> u64 {
        self.inner.outputs_released.load(Ordering::Relaxed)
    }

    /// Streams that ended with an EOS-marked output.
    pub fn eos_count(&self) -> u64 {
        self.inner.eos_propagated.load(Ordering::Relaxed)
    }

    /// Failed transforms.
    pub fn errors(&self) -> u64 {
        self.inner.errors.load(Ordering::Relaxed)
    }

    pub fn no_progress_stops(&self) -> u64 {
        self.inner.no_progress_stops.load(Ordering::Relaxed)
    }

    pub fn step_limit_stops(&self) -> u64 {
        self.inner.step_limit_stops.load(Ordering::Relaxed)
    }

    /// Rolling average transform time in milliseconds.
    pub fn avg_transform_millis(&self) -> Option<f64> {
        self.inner.window.lock().ok().and_then(|w| {
            if w.is_empty() {
                return None;
            }
            let total: u128 = w.iter().map(|n| *n as u128).sum();
            Some(total as f64 / 1_000_000.0 / w.len() as f64)
        })
    }

    /// Most recent transform time in milliseconds.
    pub fn last_transform_millis(&self) -> Option<f64> {
        match self.inner.last_nanos.load(Ordering::Relaxed) {
            0 => None,
            last => Some(last as f64 / 1_000_000.0),
        }
    }
}

impl std::fmt::Debug for StageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageMetrics")
            .field("notifications", &self.notifications())
            .field("transforms", &self.transforms())
            .field("inputs_released", &self.inputs_released())
            .field("outputs_released", &self.outputs_released())
            .field("eos", &self.eos_count())
            .field("errors", &self.errors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_bounded() {
        let metrics = StageMetrics::default();
        for _ in 0..DEFAULT_WINDOW + 10 {
            metrics.record_transform(Duration::from_millis(2));
        }
        assert_eq!(metrics.transforms(), (DEFAULT_WINDOW + 10) as u64);
        assert_eq!(metrics.inner.window.lock().unwrap().len(), DEFAULT_WINDOW);
        assert_eq!(metrics.avg_transform_millis(), Some(2.0));
    }

    #[test]
    fn clones_share_counters() {
        let metrics = StageMetrics::default();
        let handle = metrics.clone();
        metrics.eos_propagated();
        metrics.stalled();
        assert_eq!(handle.eos_count(), 1);
        assert_eq!(handle.no_progress_stops(), 1);
        assert_eq!(handle.avg_transform_millis(), None);
    }
}
