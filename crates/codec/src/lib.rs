#![doc = include_str!("../README.md")]

use stagehand_core::prelude::*;

pub mod framed;

/// Encoders/decoders share the same entry-point; the kind distinguishes behavior.
///
/// # Example
/// ```rust
/// use stagehand_codec::CodecKind;
///
/// let kind = CodecKind::Encoder;
/// assert_eq!(kind, CodecKind::Encoder);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CodecKind {
    /// Turns raw pixels into a compressed stream.
    Encoder,
    /// Turns a compressed stream into raw pixels.
    Decoder,
}

/// Descriptor for a transform engine.
///
/// # Example
/// ```rust
/// use stagehand_codec::{CodecDescriptor, CodecKind};
/// use stagehand_core::prelude::FourCc;
///
/// let desc = CodecDescriptor {
///     kind: CodecKind::Encoder,
///     input: FourCc::I420,
///     output: FourCc::VP8,
///     name: "vp8",
///     impl_name: "libvpx",
/// };
/// assert_eq!(desc.name, "vp8");
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CodecDescriptor {
    /// Encoder or decoder.
    pub kind: CodecKind,
    /// Format consumed on the input port.
    pub input: FourCc,
    /// Format produced on the output port.
    pub output: FourCc,
    /// Algorithm family (e.g. "vp8", "webp").
    pub name: &'static str,
    /// Implementation/backend identifier (e.g. "libvpx", "libwebp").
    pub impl_name: &'static str,
}

/// What a single transform step reported back to the stage.
///
/// # Example
/// ```rust
/// use stagehand_codec::TransformStatus;
///
/// let status = TransformStatus::default().with_flush();
/// assert!(status.flush_output && !status.end_of_stream);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStatus {
    /// The input stream's EOS has been consumed and all output derived from it
    /// has been written; the stage should propagate EOS downstream.
    pub end_of_stream: bool,
    /// The held output buffer is complete and should be released now.
    pub flush_output: bool,
}

impl TransformStatus {
    pub fn with_flush(mut self) -> Self {
        self.flush_output = true;
        self
    }

    pub fn with_end_of_stream(mut self) -> Self {
        self.end_of_stream = true;
        self
    }
}

/// Codec-specific conversion plugged into a stage.
///
/// The stage pairs one claimed input header with one claimed output header
/// and calls [`transform`](Self::transform). The engine advances the input's
/// `offset`/`filled_len` for what it consumed and appends what it produced to
/// the output. It may keep partial state between calls (an incomplete frame,
/// bytes that did not fit the output).
///
/// The lifecycle methods mirror the stage hooks: `open` on resource
/// allocation, `reset` when a new transfer session is prepared and `close` on
/// deallocation.
///
/// # Example
/// ```rust
/// use stagehand_codec::{CodecDescriptor, CodecError, CodecKind, TransformEngine, TransformStatus};
/// use stagehand_core::prelude::*;
///
/// struct ByteCopy {
///     desc: CodecDescriptor,
/// }
///
/// impl TransformEngine for ByteCopy {
///     fn descriptor(&self) -> &CodecDescriptor {
///         &self.desc
///     }
///
///     fn transform(
///         &mut self,
///         input: &mut BufferHeader,
///         output: &mut BufferHeader,
///     ) -> Result<TransformStatus, CodecError> {
///         let n = output.append(input.payload());
///         input.consume(n);
///         Ok(TransformStatus {
///             end_of_stream: input.is_eos() && input.filled_len == 0,
///             flush_output: output.spare_len() == 0,
///         })
///     }
/// }
/// ```
pub trait TransformEngine: Send + 'static {
    /// Describes what this engine expects and produces.
    fn descriptor(&self) -> &CodecDescriptor;

    /// Acquire codec resources before buffers flow.
    fn open(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    /// Drop per-stream state ahead of a new transfer session.
    fn reset(&mut self) {}

    /// Release codec resources. Must tolerate being called when not open.
    fn close(&mut self) {}

    /// Run one step over a claimed input/output pair.
    fn transform(
        &mut self,
        input: &mut BufferHeader,
        output: &mut BufferHeader,
    ) -> Result<TransformStatus, CodecError>;
}

impl<E: TransformEngine + ?Sized> TransformEngine for Box<E> {
    fn descriptor(&self) -> &CodecDescriptor {
        (**self).descriptor()
    }

    fn open(&mut self) -> Result<(), CodecError> {
        (**self).open()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn transform(
        &mut self,
        input: &mut BufferHeader,
        output: &mut BufferHeader,
    ) -> Result<TransformStatus, CodecError> {
        (**self).transform(input, output)
    }
}

/// Errors emitted by transform engines.
///
/// # Example
/// ```rust
/// use stagehand_codec::CodecError;
///
/// let err = CodecError::FrameTooLarge { len: 10, max: 4 };
/// assert_eq!(err.code(), "frame_too_large");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Codec-specific failure detail.
    #[error("codec error: {0}")]
    Codec(String),
    /// The codec library could not provide a context.
    #[error("codec resources unavailable: {0}")]
    ResourceUnavailable(String),
    /// An input frame grew past the configured bound.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

impl CodecError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            CodecError::Codec(_) => "codec",
            CodecError::ResourceUnavailable(_) => "resource_unavailable",
            CodecError::FrameTooLarge { .. } => "frame_too_large",
        }
    }
}

pub mod prelude {
    pub use crate::framed::{FrameBackend, FramedEngine, Framing, Passthrough};
    pub use crate::{CodecDescriptor, CodecError, CodecKind, TransformEngine, TransformStatus};
    pub use stagehand_core::prelude::*;
}
