use stagehand_codec::TransformEngine;
use stagehand_core::prelude::{PortBufferPool, PortIndex};
use tracing::{debug, warn};

use crate::{
    error::StageError,
    lifecycle::LifecycleOp,
    processor::{CycleReport, StageProcessor},
};

/// Minimal scheduler: runs the lifecycle hooks in order and forwards
/// buffer-ready notifications.
///
/// # Example
/// ```rust
/// use stagehand::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let (pool, stage) = ComponentDescriptor::webp_encoder()
///     .with_resolution(Resolution::new(2, 2).unwrap())
///     .build("passthrough", Passthrough)?;
/// let mut session = StageSession::start(stage)?;
///
/// let mut raw = pool.take_spare(PortIndex::INPUT).unwrap();
/// raw.fill(&[0; 6]);
/// raw.flags |= BufferFlags::EOS;
/// pool.deliver(raw)?;
/// pool.deliver(pool.take_spare(PortIndex::OUTPUT).unwrap())?;
///
/// assert!(session.notify()?.eos_propagated);
/// let stage = session.shutdown()?;
/// assert_eq!(stage.state(), StageState::Loaded);
/// # Ok(())
/// # }
/// ```
pub struct StageSession<P: PortBufferPool, E: TransformEngine> {
    processor: StageProcessor<P, E>,
}

impl<P: PortBufferPool, E: TransformEngine> StageSession<P, E> {
    /// Allocate, prepare and start both ports.
    ///
    /// On failure the stage is torn down again; buffers are never left claimed.
    pub fn start(mut processor: StageProcessor<P, E>) -> Result<Self, StageError> {
        if let Err(err) = Self::bring_up(&mut processor) {
            warn!(stage = processor.name(), error = %err, "stage failed to start");
            Self::tear_down(&mut processor);
            return Err(err);
        }
        debug!(stage = processor.name(), "session started");
        Ok(Self { processor })
    }

    /// Best-effort unwind after a failed start. The start error is what the
    /// caller sees; teardown faults are only logged.
    fn tear_down(processor: &mut StageProcessor<P, E>) {
        if processor.state().after(LifecycleOp::Stop).is_some()
            && let Err(err) = processor.stop_and_return()
        {
            warn!(stage = processor.name(), error = %err, "stop failed during teardown");
        }
        if let Err(err) = processor.deallocate_resources() {
            warn!(stage = processor.name(), error = %err, "deallocate failed during teardown");
        }
    }

    fn bring_up(processor: &mut StageProcessor<P, E>) -> Result<(), StageError> {
        for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
            processor.allocate_resources(port)?;
        }
        for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
            processor.prepare_to_transfer(port)?;
        }
        for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
            processor.transfer_and_process(port)?;
        }
        Ok(())
    }

    /// Forward a "buffers ready" event.
    pub fn notify(&mut self) -> Result<CycleReport, StageError> {
        self.processor.on_buffers_ready()
    }

    /// Stop, prepare and start again, dropping any half-finished stream.
    pub fn restart(&mut self) -> Result<(), StageError> {
        self.processor.stop_and_return()?;
        for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
            self.processor.prepare_to_transfer(port)?;
        }
        for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
            self.processor.transfer_and_process(port)?;
        }
        debug!(stage = self.processor.name(), "session restarted");
        Ok(())
    }

    pub fn processor(&self) -> &StageProcessor<P, E> {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut StageProcessor<P, E> {
        &mut self.processor
    }

    /// Return all buffers, release codec resources and hand the stage back.
    pub fn shutdown(mut self) -> Result<StageProcessor<P, E>, StageError> {
        self.processor.stop_and_return()?;
        self.processor.deallocate_resources()?;
        debug!(stage = self.processor.name(), "session shut down");
        Ok(self.processor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{component::ComponentDescriptor, lifecycle::StageState, processor::StopReason};
    use stagehand_codec::prelude::*;

    struct Unavailable;

    impl FrameBackend for Unavailable {
        fn open(&mut self) -> Result<(), CodecError> {
            Err(CodecError::ResourceUnavailable("encoder busy".into()))
        }

        fn process(&mut self, _frame: &[u8], _out: &mut Vec<u8>) -> Result<(), CodecError> {
            Ok(())
        }
    }

    #[test]
    fn start_failure_tears_down() {
        let (_pool, stage) = ComponentDescriptor::vp8_encoder()
            .build("busy", Unavailable)
            .unwrap();
        let err = StageSession::start(stage).err().unwrap();
        assert_eq!(err.code(), "resource_allocation");
    }

    #[test]
    fn teardown_unwinds_from_any_started_state() {
        let (_pool, mut stage) = ComponentDescriptor::webp_encoder()
            .build("half", Passthrough)
            .unwrap();
        stage.allocate_resources(PortIndex::INPUT).unwrap();
        StageSession::tear_down(&mut stage);
        assert_eq!(stage.state(), StageState::Loaded);

        let (pool, stage) = ComponentDescriptor::webp_decoder()
            .build("full", Passthrough)
            .unwrap();
        let mut session = StageSession::start(stage).unwrap();
        let mut raw = pool.take_spare(PortIndex::INPUT).unwrap();
        raw.fill(b"RIFF");
        pool.deliver(raw).unwrap();
        pool.deliver(pool.take_spare(PortIndex::OUTPUT).unwrap()).unwrap();
        session.notify().unwrap();
        assert!(session.processor().held_output().is_some());

        let mut stage = session.processor;
        StageSession::tear_down(&mut stage);
        assert_eq!(stage.state(), StageState::Loaded);
        assert_eq!(pool.claimed_len(PortIndex::INPUT), 0);
        assert_eq!(pool.claimed_len(PortIndex::OUTPUT), 0);
    }

    #[test]
    fn restart_discards_partial_stream() {
        let (pool, stage) = ComponentDescriptor::webp_decoder()
            .build("passthrough", Passthrough)
            .unwrap();
        let mut session = StageSession::start(stage).unwrap();

        let mut head = pool.take_spare(PortIndex::INPUT).unwrap();
        head.fill(b"RIFF");
        pool.deliver(head).unwrap();
        pool.deliver(pool.take_spare(PortIndex::OUTPUT).unwrap()).unwrap();
        let report = session.notify().unwrap();
        assert_eq!(report.stop, StopReason::InputStarved);
        assert_eq!(report.inputs_released, 1);
        assert!(session.processor().held_output().is_some());

        session.restart().unwrap();
        assert_eq!(session.processor().state(), StageState::Executing);
        assert_eq!(pool.claimed_len(PortIndex::OUTPUT), 0);
        let returned = pool.collect(PortIndex::OUTPUT).into_option().unwrap();
        assert_eq!(returned.filled_len, 0);

        let stage = session.shutdown().unwrap();
        assert_eq!(stage.state(), StageState::Loaded);
    }
}
