#![doc = include_str!("../README.md")]

pub use stagehand_codec as codec;
pub use stagehand_core as core;

pub mod component;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod processor;
pub mod session;

pub mod prelude {
    pub use crate::{
        component::{ComponentDescriptor, FramedStage},
        config::{StageConfig, StageTunables, set_stage_tunables, stage_tunables},
        error::StageError,
        lifecycle::{LifecycleOp, StageState},
        metrics::StageMetrics,
        processor::{CycleReport, StageProcessor, StopReason},
        session::StageSession,
    };
    pub use stagehand_codec::prelude::*;
}
