use std::fmt;

use crate::format::{FourCc, Resolution};

/// Index of a stage port. Stages have exactly one input (0) and one output (1).
///
/// # Example
/// ```rust
/// use stagehand_core::prelude::{PortDirection, PortIndex};
///
/// assert_eq!(PortIndex::INPUT.direction(), Some(PortDirection::Input));
/// assert_eq!(PortIndex::new(7).direction(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortIndex(u32);

impl PortIndex {
    /// The input port.
    pub const INPUT: PortIndex = PortIndex(0);
    /// The output port.
    pub const OUTPUT: PortIndex = PortIndex(1);

    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Direction for the two well-known indices, `None` otherwise.
    pub fn direction(self) -> Option<PortDirection> {
        match self {
            PortIndex::INPUT => Some(PortDirection::Input),
            PortIndex::OUTPUT => Some(PortDirection::Output),
            _ => None,
        }
    }
}

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of buffer flow through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PortDirection {
    Input,
    Output,
}

/// Media domain of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PortDomain {
    Video,
    Image,
}

/// Format advertised on a port.
///
/// `coding` names the compression (or [`FourCc::UNUSED`] for raw pixels) and
/// `color` the pixel layout (or [`FourCc::UNUSED`] for compressed streams).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortFormat {
    pub coding: FourCc,
    pub color: FourCc,
    pub resolution: Resolution,
    /// Frames per second; zero for still images.
    pub framerate: u32,
    /// Target bits per second; zero when not applicable.
    pub bitrate: u32,
}

impl PortFormat {
    /// Bytes in one raw frame when the port carries planar 4:2:0 pixels.
    pub fn raw_frame_len(&self) -> Option<usize> {
        (self.coding.is_unused() && self.color == FourCc::I420)
            .then(|| self.resolution.i420_frame_len())
    }
}

/// Static definition of a port: identity, direction and buffer requirements.
///
/// # Example
/// ```rust
/// use stagehand_core::prelude::*;
///
/// let def = PortDefinition {
///     index: PortIndex::INPUT,
///     direction: PortDirection::Input,
///     domain: PortDomain::Video,
///     buffer_count: 2,
///     buffer_size: 8192,
///     format: PortFormat {
///         coding: FourCc::UNUSED,
///         color: FourCc::I420,
///         resolution: Resolution::new(176, 144).unwrap(),
///         framerate: 15,
///         bitrate: 0,
///     },
/// };
/// assert!(def.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortDefinition {
    pub index: PortIndex,
    pub direction: PortDirection,
    pub domain: PortDomain,
    /// Number of buffer headers the pool allocates for this port.
    pub buffer_count: usize,
    /// Bytes per buffer.
    pub buffer_size: usize,
    pub format: PortFormat,
}

impl PortDefinition {
    /// Check that the definition is usable for a stage port.
    pub fn validate(&self) -> Result<(), String> {
        match self.index.direction() {
            Some(dir) if dir == self.direction => {}
            Some(dir) => {
                return Err(format!(
                    "port {} must be {:?}, declared {:?}",
                    self.index, dir, self.direction
                ));
            }
            None => return Err(format!("port index {} is not a stage port", self.index)),
        }
        if self.buffer_count == 0 {
            return Err(format!("port {} declares zero buffers", self.index));
        }
        if self.buffer_size == 0 {
            return Err(format!("port {} declares zero-byte buffers", self.index));
        }
        Ok(())
    }
}
