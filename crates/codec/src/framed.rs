//! Frame-oriented transform engine shared by the encoder and decoder stages.
//!
//! The engine deals with buffer geometry only: it gathers input bytes into
//! whole frames, hands each frame to a [`FrameBackend`] that does the codec
//! work, and spreads the produced packet across as many output buffers as it
//! needs. One output buffer never carries bytes from two packets.

use stagehand_core::prelude::*;
use tracing::{trace, warn};

use crate::{CodecDescriptor, CodecError, TransformEngine, TransformStatus};

/// Codec work for one complete frame.
///
/// Implementations wrap the actual codec library (libvpx, libwebp, ...).
pub trait FrameBackend: Send + 'static {
    /// Create the codec context.
    fn open(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    /// Destroy the codec context. Called even if `open` never ran.
    fn close(&mut self) {}

    /// Forget any per-stream state.
    fn reset(&mut self) {}

    /// Convert `frame`, appending the produced bytes to `out`.
    fn process(&mut self, frame: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Emit anything still buffered inside the codec once the input stream ends.
    fn finish(&mut self, _out: &mut Vec<u8>) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Backend that forwards frames unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl FrameBackend for Passthrough {
    fn process(&mut self, frame: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(frame);
        Ok(())
    }
}

/// How input bytes are cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Framing {
    /// Every frame is exactly this many bytes, regardless of buffer boundaries.
    Fixed(usize),
    /// A frame ends with the input buffer flagged END_OF_FRAME or EOS.
    Delimited { max_len: usize },
}

/// [`TransformEngine`] that frames input, runs a [`FrameBackend`] and chunks output.
///
/// # Example
/// ```rust
/// use stagehand_codec::prelude::*;
///
/// let desc = CodecDescriptor {
///     kind: CodecKind::Encoder,
///     input: FourCc::I420,
///     output: FourCc::VP8,
///     name: "vp8",
///     impl_name: "passthrough",
/// };
/// let mut engine = FramedEngine::new(desc, Framing::Fixed(4), Passthrough);
///
/// let mut input = BufferHeader::new(BufferId::new(0), PortIndex::INPUT, 8);
/// let mut output = BufferHeader::new(BufferId::new(1), PortIndex::OUTPUT, 8);
/// input.fill(b"abcdef");
///
/// let status = engine.transform(&mut input, &mut output)?;
/// assert!(status.flush_output);
/// assert_eq!(output.payload(), b"abcd");
/// assert_eq!(input.payload(), b"ef");
/// # Ok::<(), CodecError>(())
/// ```
pub struct FramedEngine<B> {
    descriptor: CodecDescriptor,
    framing: Framing,
    backend: B,
    frame: Vec<u8>,
    frame_timestamp: Option<i64>,
    pending: Vec<u8>,
    pending_pos: usize,
    pending_timestamp: i64,
    draining: bool,
    frames: u64,
}

impl<B: FrameBackend> FramedEngine<B> {
    pub fn new(descriptor: CodecDescriptor, framing: Framing, backend: B) -> Self {
        let framing = match framing {
            Framing::Fixed(len) => Framing::Fixed(len.max(1)),
            other => other,
        };
        Self {
            descriptor,
            framing,
            backend,
            frame: Vec::new(),
            frame_timestamp: None,
            pending: Vec::new(),
            pending_pos: 0,
            pending_timestamp: 0,
            draining: false,
            frames: 0,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Frames handed to the backend since the last reset.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn has_pending(&self) -> bool {
        self.pending_pos < self.pending.len()
    }

    fn clear_stream_state(&mut self) {
        self.frame.clear();
        self.frame_timestamp = None;
        self.pending.clear();
        self.pending_pos = 0;
        self.pending_timestamp = 0;
        self.draining = false;
        self.frames = 0;
    }

    /// Copy pending packet bytes into `output`; marks END_OF_FRAME when the packet is done.
    fn drain_into(&mut self, output: &mut BufferHeader) {
        if output.filled_len == 0 {
            output.timestamp = self.pending_timestamp;
        }
        let written = output.append(&self.pending[self.pending_pos..]);
        self.pending_pos += written;
        if !self.has_pending() {
            self.pending.clear();
            self.pending_pos = 0;
            output.flags |= BufferFlags::END_OF_FRAME;
        }
    }

    /// Move input bytes into the current frame; returns whether the frame is complete.
    fn gather(&mut self, input: &mut BufferHeader) -> Result<bool, CodecError> {
        if self.frame_timestamp.is_none() && input.filled_len > 0 {
            self.frame_timestamp = Some(input.timestamp);
        }
        match self.framing {
            Framing::Fixed(len) => {
                let take = len.saturating_sub(self.frame.len()).min(input.filled_len);
                self.frame.extend_from_slice(&input.payload()[..take]);
                input.consume(take);
                Ok(self.frame.len() >= len)
            }
            Framing::Delimited { max_len } => {
                let len = self.frame.len() + input.filled_len;
                if len > max_len {
                    return Err(CodecError::FrameTooLarge { len, max: max_len });
                }
                self.frame.extend_from_slice(input.payload());
                input.consume(input.filled_len);
                let delimited =
                    input.flags.contains(BufferFlags::END_OF_FRAME) || input.is_eos();
                Ok(delimited && !self.frame.is_empty())
            }
        }
    }

    fn encode_frame(&mut self) -> Result<(), CodecError> {
        let mut frame = std::mem::take(&mut self.frame);
        let timestamp = self.frame_timestamp.take().unwrap_or_default();
        let result = self.backend.process(&frame, &mut self.pending);
        trace!(
            codec = self.descriptor.name,
            frame_len = frame.len(),
            produced = self.pending.len(),
            "frame processed"
        );
        frame.clear();
        self.frame = frame;
        result?;
        self.pending_timestamp = timestamp;
        self.frames += 1;
        Ok(())
    }

    fn with_stream_end(&mut self, mut status: TransformStatus) -> TransformStatus {
        if self.draining && !self.has_pending() {
            self.draining = false;
            status.end_of_stream = true;
        }
        status
    }
}

impl<B: FrameBackend> TransformEngine for FramedEngine<B> {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn open(&mut self) -> Result<(), CodecError> {
        self.backend.open()
    }

    fn reset(&mut self) {
        self.clear_stream_state();
        self.backend.reset();
    }

    fn close(&mut self) {
        self.clear_stream_state();
        self.backend.close();
    }

    fn transform(
        &mut self,
        input: &mut BufferHeader,
        output: &mut BufferHeader,
    ) -> Result<TransformStatus, CodecError> {
        let mut status = TransformStatus::default();

        // Finish the previous packet before touching more input.
        if self.has_pending() {
            self.drain_into(output);
            status.flush_output = true;
            return Ok(self.with_stream_end(status));
        }

        let complete = self.gather(input)?;
        let input_done = input.is_eos() && input.filled_len == 0;
        if complete {
            self.encode_frame()?;
        } else if input_done && !self.frame.is_empty() {
            warn!(
                codec = self.descriptor.name,
                dropped = self.frame.len(),
                "discarding incomplete frame at end of stream"
            );
            self.frame.clear();
            self.frame_timestamp = None;
        }
        if input_done {
            self.backend.finish(&mut self.pending)?;
            self.draining = true;
        }

        if self.has_pending() {
            self.drain_into(output);
            status.flush_output = true;
        }
        Ok(self.with_stream_end(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CodecKind;

    /// Wraps each frame in angle brackets and emits `!` when the stream ends.
    #[derive(Default)]
    struct Tagger {
        opened: bool,
        finished: u32,
    }

    impl FrameBackend for Tagger {
        fn open(&mut self) -> Result<(), CodecError> {
            self.opened = true;
            Ok(())
        }

        fn close(&mut self) {
            self.opened = false;
        }

        fn process(&mut self, frame: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
            out.push(b'<');
            out.extend_from_slice(frame);
            out.push(b'>');
            Ok(())
        }

        fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), CodecError> {
            self.finished += 1;
            out.push(b'!');
            Ok(())
        }
    }

    fn engine(framing: Framing) -> FramedEngine<Tagger> {
        let desc = CodecDescriptor {
            kind: CodecKind::Encoder,
            input: FourCc::I420,
            output: FourCc::VP8,
            name: "vp8",
            impl_name: "tagger",
        };
        FramedEngine::new(desc, framing, Tagger::default())
    }

    fn input(bytes: &[u8]) -> BufferHeader {
        let mut hdr = BufferHeader::new(BufferId::new(0), PortIndex::INPUT, 32);
        hdr.fill(bytes);
        hdr
    }

    fn output(len: usize) -> BufferHeader {
        BufferHeader::new(BufferId::new(1), PortIndex::OUTPUT, len)
    }

    #[test]
    fn fixed_frames_span_input_buffers() {
        let mut engine = engine(Framing::Fixed(4));
        let mut out = output(16);

        let mut first = input(b"abc");
        let status = engine.transform(&mut first, &mut out).unwrap();
        assert_eq!(status, TransformStatus::default());
        assert_eq!(first.filled_len, 0);
        assert_eq!(out.filled_len, 0);

        let mut second = input(b"defgh");
        let status = engine.transform(&mut second, &mut out).unwrap();
        assert!(status.flush_output);
        assert_eq!(out.payload(), b"<abcd>");
        assert!(out.flags.contains(BufferFlags::END_OF_FRAME));
        assert_eq!(second.payload(), b"efgh");
    }

    #[test]
    fn large_packet_is_chunked_across_outputs() {
        let mut engine = engine(Framing::Fixed(6));
        let mut src = input(b"123456");

        let mut first = output(4);
        let status = engine.transform(&mut src, &mut first).unwrap();
        assert!(status.flush_output);
        assert_eq!(first.payload(), b"<123");
        assert!(!first.flags.contains(BufferFlags::END_OF_FRAME));

        let mut second = output(4);
        let status = engine.transform(&mut src, &mut second).unwrap();
        assert!(status.flush_output);
        assert_eq!(second.payload(), b"456>");
        assert!(second.flags.contains(BufferFlags::END_OF_FRAME));
        assert_eq!(engine.frames(), 1);
    }

    #[test]
    fn empty_eos_buffer_ends_stream_after_finish_bytes() {
        let mut engine = engine(Framing::Fixed(4));
        let mut eos = input(b"");
        eos.flags |= BufferFlags::EOS;
        let mut out = output(8);
        let status = engine.transform(&mut eos, &mut out).unwrap();
        assert!(status.end_of_stream);
        assert!(status.flush_output);
        assert_eq!(out.payload(), b"!");
        assert_eq!(engine.backend().finished, 1);
    }

    #[test]
    fn eos_waits_until_pending_bytes_are_written() {
        let mut engine = engine(Framing::Fixed(2));
        let mut src = input(b"xy");
        src.flags |= BufferFlags::EOS;

        let mut small = output(2);
        let status = engine.transform(&mut src, &mut small).unwrap();
        assert!(!status.end_of_stream);
        assert!(status.flush_output);

        let mut rest = output(8);
        let status = engine.transform(&mut input(b""), &mut rest).unwrap();
        assert!(status.end_of_stream);
        assert_eq!(rest.payload(), b"y>!");
    }

    #[test]
    fn trailing_partial_fixed_frame_is_dropped() {
        let mut engine = engine(Framing::Fixed(4));
        let mut src = input(b"ab");
        src.flags |= BufferFlags::EOS;
        let mut out = output(8);
        let status = engine.transform(&mut src, &mut out).unwrap();
        assert!(status.end_of_stream);
        assert_eq!(out.payload(), b"!");
        assert_eq!(engine.frames(), 0);
    }

    #[test]
    fn delimited_frames_end_on_end_of_frame_flag() {
        let mut engine = engine(Framing::Delimited { max_len: 16 });
        let mut out = output(16);

        let mut head = input(b"RIFF");
        assert_eq!(
            engine.transform(&mut head, &mut out).unwrap(),
            TransformStatus::default()
        );

        let mut tail = input(b"WEBP");
        tail.flags |= BufferFlags::END_OF_FRAME;
        tail.timestamp = 7;
        let status = engine.transform(&mut tail, &mut out).unwrap();
        assert!(status.flush_output);
        assert_eq!(out.payload(), b"<RIFFWEBP>");
        assert_eq!(out.timestamp, 0);
    }

    #[test]
    fn delimited_frame_over_limit_fails() {
        let mut engine = engine(Framing::Delimited { max_len: 3 });
        let mut src = input(b"toolong");
        let err = engine.transform(&mut src, &mut output(8)).unwrap_err();
        assert_eq!(err, CodecError::FrameTooLarge { len: 7, max: 3 });
        assert_eq!(src.filled_len, 7);
    }

    #[test]
    fn lifecycle_reaches_backend() {
        let mut engine = engine(Framing::Fixed(4));
        engine.open().unwrap();
        assert!(engine.backend().opened);
        engine.transform(&mut input(b"ab"), &mut output(8)).unwrap();
        engine.reset();
        assert_eq!(engine.frames(), 0);
        engine.close();
        assert!(!engine.backend().opened);
    }
}
