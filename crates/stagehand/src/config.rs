use std::sync::{Mutex, OnceLock};

/// Default bound on exchange steps within one notification.
pub const DEFAULT_MAX_STEPS: usize = 1024;
/// Default (and minimum) buffers per component port.
pub const DEFAULT_PORT_BUFFER_COUNT: usize = 2;
/// Default (and minimum) bytes per component port buffer.
pub const DEFAULT_PORT_BUFFER_SIZE: usize = 8192;

/// Tunables for the exchange loop and component port sizing.
///
/// # Example
/// ```rust
/// use stagehand::prelude::*;
///
/// set_stage_tunables(StageTunables {
///     max_steps_per_notification: 256,
///     port_buffer_count: 4,
///     port_buffer_size: 64 << 10,
/// });
/// assert_eq!(stage_tunables().port_buffer_count, 4);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StageTunables {
    pub max_steps_per_notification: usize,
    pub port_buffer_count: usize,
    pub port_buffer_size: usize,
}

impl Default for StageTunables {
    fn default() -> Self {
        Self {
            max_steps_per_notification: DEFAULT_MAX_STEPS,
            port_buffer_count: DEFAULT_PORT_BUFFER_COUNT,
            port_buffer_size: DEFAULT_PORT_BUFFER_SIZE,
        }
    }
}

impl StageTunables {
    /// Clamp values to what the components can run with.
    pub fn sanitized(self) -> Self {
        Self {
            max_steps_per_notification: self.max_steps_per_notification.max(1),
            port_buffer_count: self.port_buffer_count.max(DEFAULT_PORT_BUFFER_COUNT),
            port_buffer_size: self.port_buffer_size.max(DEFAULT_PORT_BUFFER_SIZE),
        }
    }
}

static STAGE_TUNABLES: OnceLock<Mutex<StageTunables>> = OnceLock::new();

/// Override stage tunables process-wide. Affects stages built afterwards.
pub fn set_stage_tunables(tunables: StageTunables) {
    let lock = STAGE_TUNABLES.get_or_init(|| Mutex::new(StageTunables::default()));
    let mut guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = tunables.sanitized();
}

/// Current process-wide tunables.
pub fn stage_tunables() -> StageTunables {
    STAGE_TUNABLES
        .get()
        .and_then(|t| t.lock().ok().map(|v| *v))
        .unwrap_or_default()
}

/// Builder for process-wide stage tunables.
///
/// # Example
/// ```rust
/// use stagehand::prelude::*;
///
/// let tunables = StageConfig::new()
///     .max_steps_per_notification(64)
///     .port_buffers(3, 16 << 10)
///     .tunables();
/// assert_eq!(tunables.port_buffer_count, 3);
/// ```
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StageConfig {
    stage: StageTunables,
}

impl StageConfig {
    /// Start building a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-notification step bound.
    pub fn max_steps_per_notification(mut self, steps: usize) -> Self {
        self.stage.max_steps_per_notification = steps;
        self
    }

    /// Override component port sizing.
    pub fn port_buffers(mut self, count: usize, size: usize) -> Self {
        self.stage.port_buffer_count = count;
        self.stage.port_buffer_size = size;
        self
    }

    /// The sanitized tunables this builder describes.
    pub fn tunables(&self) -> StageTunables {
        self.stage.sanitized()
    }

    /// Apply the configuration to global tunables.
    pub fn apply(self) {
        set_stage_tunables(self.stage);
    }
}
