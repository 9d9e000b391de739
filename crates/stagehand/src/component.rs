//! Ready-made definitions for the three shipped stages.

use std::num::NonZeroU32;

use stagehand_codec::prelude::*;
use tracing::debug;

use crate::{config::stage_tunables, error::StageError, processor::StageProcessor};

/// Default frame width of the raw ports (QCIF).
pub const DEFAULT_WIDTH: NonZeroU32 = NonZeroU32::new(176).unwrap();
/// Default frame height of the raw ports (QCIF).
pub const DEFAULT_HEIGHT: NonZeroU32 = NonZeroU32::new(144).unwrap();
/// Default video frame rate.
pub const DEFAULT_FRAMERATE: u32 = 15;
/// Default VP8 target bitrate in bits per second.
pub const DEFAULT_VP8_BITRATE: u32 = 64_000;
/// Upper bound for one compressed image on a decoder input.
pub const MAX_COMPRESSED_FRAME_LEN: usize = 8 << 20;

/// A stage wired to a [`FramedEngine`] over a [`PortPool`].
pub type FramedStage<B> = StageProcessor<PortPool, FramedEngine<B>>;

/// Name, role and port layout of a stage.
///
/// # Example
/// ```rust
/// use stagehand::prelude::*;
///
/// let vp8 = ComponentDescriptor::by_role("video_encoder.vp8").unwrap();
/// assert_eq!(vp8.name, "OMX.Aratelia.video_encoder.vp8");
/// assert_eq!(vp8.output.format.bitrate, 64_000);
/// assert_eq!(vp8.framing(), Framing::Fixed(176 * 144 * 3 / 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub name: &'static str,
    pub role: &'static str,
    pub kind: CodecKind,
    /// Codec family handed to the engine descriptor.
    pub codec: &'static str,
    pub input: PortDefinition,
    pub output: PortDefinition,
}

fn qcif() -> Resolution {
    Resolution {
        width: DEFAULT_WIDTH,
        height: DEFAULT_HEIGHT,
    }
}

fn port(
    index: PortIndex,
    direction: PortDirection,
    domain: PortDomain,
    format: PortFormat,
) -> PortDefinition {
    let tunables = stage_tunables();
    PortDefinition {
        index,
        direction,
        domain,
        buffer_count: tunables.port_buffer_count,
        buffer_size: tunables.port_buffer_size,
        format,
    }
}

fn raw(framerate: u32) -> PortFormat {
    PortFormat {
        coding: FourCc::UNUSED,
        color: FourCc::I420,
        resolution: qcif(),
        framerate,
        bitrate: 0,
    }
}

fn compressed(coding: FourCc, framerate: u32, bitrate: u32) -> PortFormat {
    PortFormat {
        coding,
        color: FourCc::UNUSED,
        resolution: qcif(),
        framerate,
        bitrate,
    }
}

/// The format code that identifies what a port carries.
fn carried(def: &PortDefinition) -> FourCc {
    if def.format.coding.is_unused() {
        def.format.color
    } else {
        def.format.coding
    }
}

impl ComponentDescriptor {
    /// Raw I420 video in, VP8 out.
    pub fn vp8_encoder() -> Self {
        Self {
            name: "OMX.Aratelia.video_encoder.vp8",
            role: "video_encoder.vp8",
            kind: CodecKind::Encoder,
            codec: "vp8",
            input: port(
                PortIndex::INPUT,
                PortDirection::Input,
                PortDomain::Video,
                raw(DEFAULT_FRAMERATE),
            ),
            output: port(
                PortIndex::OUTPUT,
                PortDirection::Output,
                PortDomain::Video,
                compressed(FourCc::VP8, DEFAULT_FRAMERATE, DEFAULT_VP8_BITRATE),
            ),
        }
    }

    /// Raw I420 still image in, WebP out.
    pub fn webp_encoder() -> Self {
        Self {
            name: "OMX.Aratelia.image_encoder.webp",
            role: "image_encoder.webp",
            kind: CodecKind::Encoder,
            codec: "webp",
            input: port(PortIndex::INPUT, PortDirection::Input, PortDomain::Image, raw(0)),
            output: port(
                PortIndex::OUTPUT,
                PortDirection::Output,
                PortDomain::Image,
                compressed(FourCc::WEBP, 0, 0),
            ),
        }
    }

    /// WebP in, raw I420 still image out.
    pub fn webp_decoder() -> Self {
        Self {
            name: "OMX.Aratelia.image_decoder.webp",
            role: "image_decoder.webp",
            kind: CodecKind::Decoder,
            codec: "webp",
            input: port(
                PortIndex::INPUT,
                PortDirection::Input,
                PortDomain::Image,
                compressed(FourCc::WEBP, 0, 0),
            ),
            output: port(PortIndex::OUTPUT, PortDirection::Output, PortDomain::Image, raw(0)),
        }
    }

    /// Every shipped component.
    pub fn all() -> [Self; 3] {
        [Self::vp8_encoder(), Self::webp_encoder(), Self::webp_decoder()]
    }

    /// Look up a component by role or full component name.
    pub fn by_role(role: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|c| c.role == role || c.name == role)
    }

    /// Change the frame size on both ports.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.input.format.resolution = resolution;
        self.output.format.resolution = resolution;
        self
    }

    /// Change buffer count and size on both ports.
    pub fn with_buffers(mut self, count: usize, size: usize) -> Self {
        for def in [&mut self.input, &mut self.output] {
            def.buffer_count = count;
            def.buffer_size = size;
        }
        self
    }

    /// Port definitions in index order, as [`PortPool::new`] expects them.
    pub fn ports(&self) -> [PortDefinition; 2] {
        [self.input, self.output]
    }

    /// How input bytes split into frames: whole raw frames for encoders,
    /// buffer-delimited images for the decoder.
    pub fn framing(&self) -> Framing {
        match self.input.format.raw_frame_len() {
            Some(len) => Framing::Fixed(len),
            None => Framing::Delimited {
                max_len: MAX_COMPRESSED_FRAME_LEN,
            },
        }
    }

    pub fn codec_descriptor(&self, impl_name: &'static str) -> CodecDescriptor {
        CodecDescriptor {
            kind: self.kind,
            input: carried(&self.input),
            output: carried(&self.output),
            name: self.codec,
            impl_name,
        }
    }

    /// Allocate the port pool and a stage running `backend` behind a [`FramedEngine`].
    ///
    /// The returned pool is the host side of the same ports the stage claims from.
    pub fn build<B: FrameBackend>(
        &self,
        impl_name: &'static str,
        backend: B,
    ) -> Result<(PortPool, FramedStage<B>), StageError> {
        let pool = PortPool::new(&self.ports())?;
        let engine = FramedEngine::new(self.codec_descriptor(impl_name), self.framing(), backend);
        debug!(
            component = self.name,
            backend = impl_name,
            framing = ?self.framing(),
            "building stage"
        );
        let stage = StageProcessor::new(self.name, pool.clone(), engine);
        Ok((pool, stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_components_match_their_roles() {
        let vp8 = ComponentDescriptor::vp8_encoder();
        assert_eq!(vp8.input.domain, PortDomain::Video);
        assert_eq!(vp8.input.format.framerate, 15);
        assert_eq!(carried(&vp8.output), FourCc::VP8);

        let enc = ComponentDescriptor::webp_encoder();
        assert_eq!(enc.codec_descriptor("x").output, FourCc::WEBP);
        assert_eq!(enc.framing(), Framing::Fixed(38_016));

        let dec = ComponentDescriptor::webp_decoder();
        assert_eq!(dec.kind, CodecKind::Decoder);
        assert_eq!(dec.codec_descriptor("x").input, FourCc::WEBP);
        assert!(matches!(dec.framing(), Framing::Delimited { .. }));

        for c in ComponentDescriptor::all() {
            assert!(c.input.buffer_count >= 2 && c.input.buffer_size >= 8192);
            assert!(c.ports().iter().all(|p| p.validate().is_ok()));
        }
    }

    #[test]
    fn lookup_by_role_or_name() {
        assert_eq!(
            ComponentDescriptor::by_role("OMX.Aratelia.image_decoder.webp").map(|c| c.role),
            Some("image_decoder.webp")
        );
        assert!(ComponentDescriptor::by_role("audio_decoder.mp3").is_none());
    }

    #[test]
    fn encoder_splits_frames_across_packets() {
        let tiny = Resolution::new(4, 2).unwrap();
        let component = ComponentDescriptor::vp8_encoder().with_resolution(tiny);
        assert_eq!(component.framing(), Framing::Fixed(12));
        let (pool, mut stage) = component.build("passthrough", Passthrough).unwrap();
        for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
            stage.allocate_resources(port).unwrap();
        }
        for port in [PortIndex::INPUT, PortIndex::OUTPUT] {
            stage.prepare_to_transfer(port).unwrap();
            stage.transfer_and_process(port).unwrap();
        }

        let frames: Vec<u8> = (0..24).collect();
        let mut input = pool.take_spare(PortIndex::INPUT).unwrap();
        input.fill(&frames);
        input.flags |= BufferFlags::EOS;
        pool.deliver(input).unwrap();
        while let Some(out) = pool.take_spare(PortIndex::OUTPUT) {
            pool.deliver(out).unwrap();
        }

        let report = stage.on_buffers_ready().unwrap();
        assert!(report.eos_propagated);
        assert_eq!(report.outputs_released, 2);
        let packets: Vec<_> =
            std::iter::from_fn(|| pool.collect(PortIndex::OUTPUT).into_option()).collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload(), &frames[..12]);
        assert_eq!(packets[1].payload(), &frames[12..]);
        assert!(packets.iter().all(|p| p.flags.contains(BufferFlags::END_OF_FRAME)));
        assert!(!packets[0].is_eos() && packets[1].is_eos());
        assert_eq!(stage.engine().frames(), 2);
    }
}
