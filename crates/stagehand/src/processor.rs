//! The buffer-exchange core of a stage.
//!
//! A [`StageProcessor`] holds at most one input and one output header at a
//! time. Each "buffers ready" notification claims whatever it is missing,
//! lets the engine move bytes from one to the other and hands buffers back
//! as soon as they are drained (input) or complete (output). End of stream
//! is carried from the input side to exactly one output buffer.

use std::time::Instant;

use stagehand_codec::TransformEngine;
use stagehand_core::prelude::*;
use tracing::{debug, error, trace, warn};

use crate::{
    config::{StageTunables, stage_tunables},
    error::StageError,
    lifecycle::{LifecycleOp, StageState},
    metrics::StageMetrics,
};

/// Why a notification stopped exchanging buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StopReason {
    /// No input buffer could be claimed.
    InputStarved,
    /// No output buffer could be claimed.
    OutputBackpressure,
    /// A step changed nothing.
    NoProgress,
    /// The per-notification step bound was hit; the next notification resumes.
    StepLimit,
    /// The stream ended; EOS went out on the held output.
    EndOfStream,
    /// The stage is idle (prepared or stopped) and did no work.
    Quiescent,
}

/// Outcome of one [`StageProcessor::on_buffers_ready`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CycleReport {
    /// Engine calls made.
    pub steps: usize,
    pub inputs_released: usize,
    pub outputs_released: usize,
    /// An EOS-marked output was released during this call.
    pub eos_propagated: bool,
    pub stop: StopReason,
}

impl CycleReport {
    fn new(stop: StopReason) -> Self {
        Self {
            steps: 0,
            inputs_released: 0,
            outputs_released: 0,
            eos_propagated: false,
            stop,
        }
    }
}

/// Single-input/single-output stage driven by lifecycle hooks and
/// buffer-ready notifications.
///
/// The pool and engine are injected at construction; the processor never
/// blocks, never spawns and never holds more than one header per port.
/// A header whose release the pool rejects stays with the pool; the error is
/// returned and the stage carries on without it.
///
/// # Example
/// ```rust
/// use stagehand::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let component = ComponentDescriptor::webp_decoder();
/// let (pool, mut stage) = component.build("passthrough", Passthrough)?;
/// for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
///     stage.allocate_resources(port)?;
/// }
/// for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
///     stage.prepare_to_transfer(port)?;
///     stage.transfer_and_process(port)?;
/// }
///
/// let mut image = pool.take_spare(PortIndex::INPUT).unwrap();
/// image.fill(b"RIFF....WEBP");
/// image.flags |= BufferFlags::EOS;
/// pool.deliver(image)?;
/// pool.deliver(pool.take_spare(PortIndex::OUTPUT).unwrap())?;
///
/// let report = stage.on_buffers_ready()?;
/// assert!(report.eos_propagated);
/// let out = pool.collect(PortIndex::OUTPUT).into_option().unwrap();
/// assert_eq!(out.payload(), b"RIFF....WEBP");
/// assert!(out.is_eos());
/// # Ok(())
/// # }
/// ```
pub struct StageProcessor<P: PortBufferPool, E: TransformEngine> {
    name: String,
    pool: P,
    engine: E,
    tunables: StageTunables,
    state: StageState,
    allocated: [bool; 2],
    prepared: [bool; 2],
    transferring: [bool; 2],
    input: Option<BufferHeader>,
    output: Option<BufferHeader>,
    eos_pending: bool,
    metrics: StageMetrics,
}

impl<P: PortBufferPool, E: TransformEngine> StageProcessor<P, E> {
    /// Create a stage in the `Loaded` state using the process-wide tunables.
    pub fn new(name: impl Into<String>, pool: P, engine: E) -> Self {
        Self::with_tunables(name, pool, engine, stage_tunables())
    }

    pub fn with_tunables(
        name: impl Into<String>,
        pool: P,
        engine: E,
        tunables: StageTunables,
    ) -> Self {
        Self {
            name: name.into(),
            pool,
            engine,
            tunables: tunables.sanitized(),
            state: StageState::Loaded,
            allocated: [false; 2],
            prepared: [false; 2],
            transferring: [false; 2],
            input: None,
            output: None,
            eos_pending: false,
            metrics: StageMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// The engine reported end of stream and EOS has not gone out yet.
    pub fn eos_pending(&self) -> bool {
        self.eos_pending
    }

    pub fn held_input(&self) -> Option<&BufferHeader> {
        self.input.as_ref()
    }

    pub fn held_output(&self) -> Option<&BufferHeader> {
        self.output.as_ref()
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn tunables(&self) -> StageTunables {
        self.tunables
    }

    /// Shared handle to this stage's counters.
    pub fn metrics(&self) -> StageMetrics {
        self.metrics.clone()
    }

    fn port_slot(port: PortIndex) -> Result<usize, StageError> {
        match port.direction() {
            Some(PortDirection::Input) => Ok(0),
            Some(PortDirection::Output) => Ok(1),
            None => Err(StageError::UnknownPort(port)),
        }
    }

    fn check(&self, op: LifecycleOp) -> Result<StageState, StageError> {
        self.state.after(op).ok_or(StageError::InvalidState {
            op,
            state: self.state,
        })
    }

    fn enter(&mut self, next: StageState) {
        if next != self.state {
            debug!(stage = %self.name, from = %self.state, to = %next, "stage state changed");
            self.state = next;
        }
    }

    /// Acquire codec resources for `port`. The engine is opened on the first call.
    pub fn allocate_resources(&mut self, port: PortIndex) -> Result<(), StageError> {
        let slot = Self::port_slot(port)?;
        let next = self.check(LifecycleOp::Allocate)?;
        if self.allocated[slot] {
            trace!(stage = %self.name, %port, "port already allocated");
            return Ok(());
        }
        if !self.allocated.iter().any(|a| *a) {
            self.engine.open().map_err(|err| {
                error!(stage = %self.name, %port, error = %err, "engine open failed");
                StageError::ResourceAllocation(err)
            })?;
        }
        self.allocated[slot] = true;
        self.enter(next);
        Ok(())
    }

    /// Ready `port` for a transfer session.
    ///
    /// The first port prepared in a session clears both slots and any pending
    /// end of stream and resets the engine; later ports only join the session.
    pub fn prepare_to_transfer(&mut self, port: PortIndex) -> Result<(), StageError> {
        let slot = Self::port_slot(port)?;
        let next = self.check(LifecycleOp::Prepare)?;
        if !self.allocated[slot] {
            return Err(StageError::InvalidState {
                op: LifecycleOp::Prepare,
                state: self.state,
            });
        }
        if self.state != StageState::Prepared {
            self.return_held()?;
            self.eos_pending = false;
            self.prepared = [false; 2];
            self.transferring = [false; 2];
            self.engine.reset();
        }
        self.prepared[slot] = true;
        self.enter(next);
        Ok(())
    }

    /// Start transferring on `port`. The stage executes once both ports have
    /// started; buffer work begins with the next notification.
    pub fn transfer_and_process(&mut self, port: PortIndex) -> Result<(), StageError> {
        let slot = Self::port_slot(port)?;
        let next = self.check(LifecycleOp::Transfer)?;
        if !self.prepared[slot] {
            return Err(StageError::InvalidState {
                op: LifecycleOp::Transfer,
                state: self.state,
            });
        }
        self.transferring[slot] = true;
        if self.transferring.iter().all(|t| *t) {
            self.enter(next);
        } else {
            trace!(stage = %self.name, %port, "waiting for the other port to start");
        }
        Ok(())
    }

    /// Hand every held buffer back unmodified and stop reacting to notifications.
    ///
    /// Partial progress is discarded and no EOS is marked.
    pub fn stop_and_return(&mut self) -> Result<(), StageError> {
        let next = self.check(LifecycleOp::Stop)?;
        let returned = self.return_held();
        self.eos_pending = false;
        self.prepared = [false; 2];
        self.transferring = [false; 2];
        self.enter(next);
        returned
    }

    /// Release codec resources. Calling it again while loaded is a no-op.
    pub fn deallocate_resources(&mut self) -> Result<(), StageError> {
        let next = self.check(LifecycleOp::Deallocate)?;
        if self.state == StageState::Loaded {
            trace!(stage = %self.name, "nothing to deallocate");
            return Ok(());
        }
        let returned = self.return_held();
        self.engine.close();
        self.allocated = [false; 2];
        self.prepared = [false; 2];
        self.transferring = [false; 2];
        self.eos_pending = false;
        self.enter(next);
        returned
    }

    /// Exchange buffers until a port runs dry, the engine stalls or the step
    /// bound is hit, then propagate a pending end of stream if possible.
    pub fn on_buffers_ready(&mut self) -> Result<CycleReport, StageError> {
        self.check(LifecycleOp::BuffersReady)?;
        if self.state.is_idle() {
            trace!(stage = %self.name, state = %self.state, "notification while idle");
            return Ok(CycleReport::new(StopReason::Quiescent));
        }
        self.metrics.notified();

        let mut report = CycleReport::new(StopReason::InputStarved);
        report.stop = loop {
            if report.steps >= self.tunables.max_steps_per_notification {
                self.metrics.step_limited();
                warn!(stage = %self.name, steps = report.steps, "step limit reached");
                break StopReason::StepLimit;
            }
            // The next stream's input waits until EOS has gone out.
            if self.eos_pending && self.input.is_none() {
                if self.output.is_none() {
                    self.output = self.pool.claim(PortIndex::OUTPUT);
                }
                break match self.output {
                    Some(_) => StopReason::EndOfStream,
                    None => StopReason::OutputBackpressure,
                };
            }
            if self.input.is_none() {
                match self.pool.claim(PortIndex::INPUT) {
                    Some(hdr) => self.input = Some(hdr),
                    None => break StopReason::InputStarved,
                }
            }
            if self.output.is_none() {
                match self.pool.claim(PortIndex::OUTPUT) {
                    Some(hdr) => self.output = Some(hdr),
                    None => break StopReason::OutputBackpressure,
                }
            }
            report.steps += 1;
            if !self.step(&mut report)? {
                self.metrics.stalled();
                warn!(stage = %self.name, steps = report.steps, "transform made no progress");
                break StopReason::NoProgress;
            }
        };

        self.propagate_eos(&mut report)?;
        trace!(
            stage = %self.name,
            steps = report.steps,
            inputs = report.inputs_released,
            outputs = report.outputs_released,
            stop = ?report.stop,
            "notification done"
        );
        Ok(report)
    }

    /// One engine call over the held pair. Returns whether anything moved.
    fn step(&mut self, report: &mut CycleReport) -> Result<bool, StageError> {
        let (Some(input), Some(output)) = (self.input.as_mut(), self.output.as_mut()) else {
            return Ok(false);
        };
        let before = (input.cursor(), output.cursor());
        let started = Instant::now();
        let status = match self.engine.transform(input, output) {
            Ok(status) => status,
            Err(err) => {
                self.metrics.errored();
                error!(
                    stage = %self.name,
                    input = %input.id(),
                    output = %output.id(),
                    error = %err,
                    "transform failed"
                );
                return Err(StageError::Transform(err));
            }
        };
        self.metrics.record_transform(started.elapsed());

        let changed = before != (input.cursor(), output.cursor());
        let mut progressed = changed || status.flush_output;
        if status.end_of_stream && !self.eos_pending {
            debug!(stage = %self.name, "input stream ended");
            self.eos_pending = true;
            progressed = true;
        }

        // A drained EOS input stays held while the engine is still emitting
        // the stream's tail, so the next stream cannot start underneath it.
        let drained = input.filled_len == 0;
        let tail_pending = input.is_eos() && !self.eos_pending && changed;
        if drained && !tail_pending && let Some(mut input) = self.input.take() {
            input.offset = 0;
            self.pool.release(PortIndex::INPUT, input)?;
            self.metrics.input_released();
            report.inputs_released += 1;
            progressed = true;
        }

        let keep_for_eos = self.eos_pending && self.input.is_none();
        if status.flush_output && !keep_for_eos && let Some(output) = self.output.take() {
            self.pool.release(PortIndex::OUTPUT, output)?;
            self.metrics.output_released();
            report.outputs_released += 1;
        }
        Ok(progressed)
    }

    fn propagate_eos(&mut self, report: &mut CycleReport) -> Result<(), StageError> {
        if !self.eos_pending || self.input.is_some() {
            return Ok(());
        }
        let Some(mut output) = self.output.take() else {
            trace!(stage = %self.name, "end of stream waiting for an output buffer");
            return Ok(());
        };
        output.flags |= BufferFlags::EOS;
        // On rejection the pool keeps the header; EOS stays pending and goes
        // out on the next output claimed.
        self.pool.release(PortIndex::OUTPUT, output)?;
        self.eos_pending = false;
        self.metrics.output_released();
        self.metrics.eos_propagated();
        report.outputs_released += 1;
        report.eos_propagated = true;
        debug!(stage = %self.name, "end of stream propagated");
        Ok(())
    }

    /// Release held buffers as they are. Both are attempted; the first error wins.
    fn return_held(&mut self) -> Result<(), StageError> {
        let input = self
            .input
            .take()
            .map(|hdr| self.pool.release(PortIndex::INPUT, hdr));
        let output = self
            .output
            .take()
            .map(|hdr| self.pool.release(PortIndex::OUTPUT, hdr));
        if input.is_some() || output.is_some() {
            debug!(stage = %self.name, "returned held buffers");
        }
        input.transpose()?;
        output.transpose()?;
        Ok(())
    }
}

impl<P: PortBufferPool, E: TransformEngine> Drop for StageProcessor<P, E> {
    fn drop(&mut self) {
        if let Err(err) = self.return_held() {
            warn!(stage = %self.name, error = %err, "failed to return buffers on drop");
        }
        if self.allocated.iter().any(|a| *a) {
            self.engine.close();
        }
    }
}

impl<P: PortBufferPool, E: TransformEngine> std::fmt::Debug for StageProcessor<P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageProcessor")
            .field("name", &self.name)
            .field("codec", &self.engine.descriptor().name)
            .field("state", &self.state)
            .field("input", &self.input.as_ref().map(BufferHeader::id))
            .field("output", &self.output.as_ref().map(BufferHeader::id))
            .field("eos_pending", &self.eos_pending)
            .finish()
    }
}
