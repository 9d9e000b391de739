use std::{fmt, num::NonZeroU32, str::FromStr};

/// Four-character code naming a port coding or color format.
///
/// # Example
/// ```rust
/// use stagehand_core::prelude::FourCc;
///
/// let fcc = FourCc::new(*b"VP80");
/// assert_eq!(fcc.to_string(), "VP80");
/// assert_eq!(fcc, FourCc::VP8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// Planar YUV 4:2:0.
    pub const I420: FourCc = FourCc::new(*b"I420");
    /// VP8 elementary stream.
    pub const VP8: FourCc = FourCc::new(*b"VP80");
    /// WebP still image.
    pub const WEBP: FourCc = FourCc::new(*b"WEBP");
    /// Placeholder for a port that carries no pixel layout or no compression.
    pub const UNUSED: FourCc = FourCc::new(*b"    ");

    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The code as text when all four bytes are ASCII.
    pub fn as_str(&self) -> Option<&str> {
        self.0
            .is_ascii()
            .then(|| std::str::from_utf8(&self.0).ok())
            .flatten()
    }

    /// Whether this is the [`FourCc::UNUSED`] placeholder.
    pub fn is_unused(&self) -> bool {
        *self == Self::UNUSED
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(code) => f.write_str(code),
            None => write!(f, "{:02x?}", self.0),
        }
    }
}

impl FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("format code {s:?} is not four bytes"))?;
        if !bytes.is_ascii() {
            return Err(format!("format code {s:?} is not ASCII"));
        }
        Ok(FourCc(bytes))
    }
}

/// Frame geometry advertised on a port.
///
/// # Example
/// ```rust
/// use stagehand_core::prelude::Resolution;
///
/// let res = Resolution::new(176, 144).unwrap();
/// assert_eq!(res.i420_frame_len(), 176 * 144 * 3 / 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution, returning `None` if width or height are zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    /// Bytes in one planar 4:2:0 frame at this size (chroma planes rounded up).
    pub fn i420_frame_len(&self) -> usize {
        let w = self.width.get() as usize;
        let h = self.height.get() as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);
        w * h + 2 * cw * ch
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for FourCc {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for FourCc {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        code.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_ascii_codes_display_as_bytes() {
        assert_eq!(FourCc::new([0xff, 0, 1, 2]).to_string(), "[ff, 00, 01, 02]");
        assert_eq!(FourCc::UNUSED.as_str(), Some("    "));
    }

    #[test]
    fn odd_sizes_round_chroma_up() {
        let res = Resolution::new(3, 3).unwrap();
        // 9 luma + 2 * (2 * 2) chroma
        assert_eq!(res.i420_frame_len(), 17);
    }

    #[test]
    fn fourcc_rejects_wrong_length() {
        assert!("VP8".parse::<FourCc>().is_err());
        assert!("VP8\u{e9}".parse::<FourCc>().is_err());
        assert_eq!("WEBP".parse::<FourCc>().unwrap(), FourCc::WEBP);
    }
}
