use std::{fmt, ops};

use crate::port::PortIndex;

/// Stable identity of a buffer header within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bit-set of per-buffer flags, using the OpenMAX IL bit assignments.
///
/// # Example
/// ```rust
/// use stagehand_core::prelude::BufferFlags;
///
/// let mut flags = BufferFlags::END_OF_FRAME;
/// flags |= BufferFlags::EOS;
/// assert!(flags.contains(BufferFlags::EOS));
/// assert_eq!(flags.bits(), 0x11);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const EMPTY: BufferFlags = BufferFlags(0);
    /// Final buffer of the stream.
    pub const EOS: BufferFlags = BufferFlags(0x0000_0001);
    /// Buffer ends a complete frame or packet.
    pub const END_OF_FRAME: BufferFlags = BufferFlags(0x0000_0010);
    /// Buffer starts a key frame.
    pub const SYNC_FRAME: BufferFlags = BufferFlags(0x0000_0020);
    /// Buffer carries codec configuration rather than media.
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(0x0000_0080);

    const NAMED: [(BufferFlags, &'static str); 4] = [
        (Self::EOS, "EOS"),
        (Self::END_OF_FRAME, "END_OF_FRAME"),
        (Self::SYNC_FRAME, "SYNC_FRAME"),
        (Self::CODEC_CONFIG, "CODEC_CONFIG"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BufferFlags) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        BufferFlags(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("BufferFlags(EMPTY)");
        }
        let mut rest = self.0;
        let mut list = f.debug_tuple("BufferFlags");
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                list.field(&format_args!("{name}"));
                rest &= !flag.0;
            }
        }
        if rest != 0 {
            list.field(&format_args!("{rest:#x}"));
        }
        list.finish()
    }
}

/// A buffer slot: a fixed byte region plus length, cursor and flag metadata.
///
/// Headers move by value: the pool hands one out on claim and takes it back
/// on release, so whoever holds the value has exclusive access.
///
/// The valid bytes are `data[offset..offset + filled_len]`. On an input buffer
/// `offset` is the read cursor; on an output buffer new bytes are written at
/// `offset + filled_len`.
///
/// # Example
/// ```rust
/// use stagehand_core::prelude::*;
///
/// let mut hdr = BufferHeader::new(BufferId::new(0), PortIndex::INPUT, 8);
/// hdr.fill(b"abcdef");
/// assert_eq!(hdr.consume(4), 4);
/// assert_eq!(hdr.payload(), b"ef");
/// assert_eq!(hdr.offset, 4);
/// ```
pub struct BufferHeader {
    id: BufferId,
    port: PortIndex,
    data: Box<[u8]>,
    /// Bytes currently valid.
    pub filled_len: usize,
    /// Start of the valid bytes.
    pub offset: usize,
    pub flags: BufferFlags,
    /// Presentation timestamp in caller-defined ticks.
    pub timestamp: i64,
}

impl BufferHeader {
    /// Allocate a zeroed header of `alloc_len` bytes bound to `port`.
    pub fn new(id: BufferId, port: PortIndex, alloc_len: usize) -> Self {
        Self {
            id,
            port,
            data: vec![0; alloc_len].into_boxed_slice(),
            filled_len: 0,
            offset: 0,
            flags: BufferFlags::EMPTY,
            timestamp: 0,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Port this header belongs to.
    pub fn port(&self) -> PortIndex {
        self.port
    }

    /// Capacity of the byte region.
    pub fn alloc_len(&self) -> usize {
        self.data.len()
    }

    /// Valid bytes, clamped to the allocation.
    pub fn payload(&self) -> &[u8] {
        let start = self.offset.min(self.data.len());
        let end = self.offset.saturating_add(self.filled_len).min(self.data.len());
        &self.data[start..end]
    }

    /// Bytes still writable after the valid region.
    pub fn spare_len(&self) -> usize {
        self.data
            .len()
            .saturating_sub(self.offset.saturating_add(self.filled_len))
    }

    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }

    /// Advance the read cursor by up to `n` bytes, returning how many were consumed.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.filled_len);
        self.offset += n;
        self.filled_len -= n;
        n
    }

    /// Write as much of `bytes` as fits after the valid region, returning the count written.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.spare_len());
        if n > 0 {
            let start = self.offset + self.filled_len;
            self.data[start..start + n].copy_from_slice(&bytes[..n]);
            self.filled_len += n;
        }
        n
    }

    /// Replace the contents with `bytes` starting at offset zero; excess is truncated.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        self.offset = 0;
        self.filled_len = 0;
        self.append(bytes)
    }

    /// Reset cursors, flags and timestamp so the header can be handed out again.
    pub fn recycle(&mut self) {
        self.filled_len = 0;
        self.offset = 0;
        self.flags = BufferFlags::EMPTY;
        self.timestamp = 0;
    }

    /// Snapshot of the fields a transform may change.
    pub fn cursor(&self) -> BufferCursor {
        BufferCursor {
            filled_len: self.filled_len,
            offset: self.offset,
            flags: self.flags,
        }
    }
}

impl fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHeader")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("alloc_len", &self.data.len())
            .field("filled_len", &self.filled_len)
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Length, cursor and flags of a header at one instant; used to detect progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCursor {
    pub filled_len: usize,
    pub offset: usize,
    pub flags: BufferFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(len: usize) -> BufferHeader {
        BufferHeader::new(BufferId::new(1), PortIndex::OUTPUT, len)
    }

    #[test]
    fn append_stops_at_capacity() {
        let mut hdr = header(4);
        assert_eq!(hdr.append(b"abc"), 3);
        assert_eq!(hdr.append(b"def"), 1);
        assert_eq!(hdr.payload(), b"abcd");
        assert_eq!(hdr.spare_len(), 0);
    }

    #[test]
    fn consume_never_underflows() {
        let mut hdr = header(4);
        hdr.fill(b"ab");
        assert_eq!(hdr.consume(10), 2);
        assert_eq!(hdr.filled_len, 0);
        assert_eq!(hdr.offset, 2);
    }

    #[test]
    fn payload_clamps_bogus_cursor() {
        let mut hdr = header(4);
        hdr.offset = 3;
        hdr.filled_len = 10;
        assert_eq!(hdr.payload().len(), 1);
    }

    #[test]
    fn recycle_clears_metadata() {
        let mut hdr = header(4);
        hdr.fill(b"ab");
        hdr.flags |= BufferFlags::EOS;
        hdr.timestamp = 9;
        hdr.recycle();
        assert_eq!(hdr.cursor(), BufferCursor {
            filled_len: 0,
            offset: 0,
            flags: BufferFlags::EMPTY,
        });
        assert_eq!(hdr.timestamp, 0);
    }

    #[test]
    fn debug_lists_named_flags() {
        let flags = BufferFlags::EOS | BufferFlags::from_bits(0x100);
        assert_eq!(format!("{flags:?}"), "BufferFlags(EOS, 0x100)");
    }
}
