#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod format;
pub mod metrics;
pub mod pool;
pub mod port;
pub mod queue;

pub mod prelude {
    pub use crate::{
        buffer::{BufferCursor, BufferFlags, BufferHeader, BufferId},
        format::{FourCc, Resolution},
        metrics::PortMetrics,
        pool::{PoolError, PortBufferPool, PortPool},
        port::{PortDefinition, PortDirection, PortDomain, PortFormat, PortIndex},
        queue::{PortQueue, RecvOutcome, SendOutcome},
    };
}
