use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::{
    buffer::{BufferHeader, BufferId},
    metrics::PortMetrics,
    port::{PortDefinition, PortIndex},
    queue::{PortQueue, RecvOutcome, SendOutcome},
};

/// Errors surfaced by a port pool.
///
/// # Example
/// ```rust
/// use stagehand_core::prelude::{PoolError, PortIndex};
///
/// let err = PoolError::UnknownPort(PortIndex::new(3));
/// assert_eq!(err.code(), "unknown_port");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("port {0} is not managed by this pool")]
    UnknownPort(PortIndex),
    #[error("buffer {id} belongs to port {owner}, not port {port}")]
    PortMismatch {
        id: BufferId,
        owner: PortIndex,
        port: PortIndex,
    },
    #[error("buffer {id} on port {port} was not claimed")]
    NotClaimed { id: BufferId, port: PortIndex },
    #[error("port {0} queue is full")]
    Full(PortIndex),
    #[error("invalid port definition: {0}")]
    InvalidDefinition(String),
}

impl PoolError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::UnknownPort(_) => "unknown_port",
            PoolError::PortMismatch { .. } => "port_mismatch",
            PoolError::NotClaimed { .. } => "not_claimed",
            PoolError::Full(_) => "queue_full",
            PoolError::InvalidDefinition(_) => "invalid_definition",
        }
    }
}

/// Source of buffers for a stage.
///
/// `claim` never blocks: `None` means the port currently has nothing to hand
/// out, which is ordinary starvation or back-pressure rather than a fault.
/// Every header returned by `claim` must come back through exactly one
/// `release` on the same port. A rejected release still transfers ownership:
/// the pool keeps the header rather than handing it back.
pub trait PortBufferPool {
    /// Borrow the next available header on `port`.
    fn claim(&self, port: PortIndex) -> Option<BufferHeader>;

    /// Return a previously claimed header to `port`.
    fn release(&self, port: PortIndex, header: BufferHeader) -> Result<(), PoolError>;
}

impl<T: PortBufferPool + ?Sized> PortBufferPool for Arc<T> {
    fn claim(&self, port: PortIndex) -> Option<BufferHeader> {
        (**self).claim(port)
    }

    fn release(&self, port: PortIndex, header: BufferHeader) -> Result<(), PoolError> {
        (**self).release(port, header)
    }
}

impl<T: PortBufferPool + ?Sized> PortBufferPool for &T {
    fn claim(&self, port: PortIndex) -> Option<BufferHeader> {
        (**self).claim(port)
    }

    fn release(&self, port: PortIndex, header: BufferHeader) -> Result<(), PoolError> {
        (**self).release(port, header)
    }
}

/// Two-sided buffer pool for the ports of one stage.
///
/// The stage side claims and releases through [`PortBufferPool`]. The host
/// side (the pipeline neighbors) takes idle headers with
/// [`take_spare`](Self::take_spare), makes them claimable with
/// [`deliver`](Self::deliver) and picks up released ones with
/// [`collect`](Self::collect).
///
/// Every header is in exactly one place at a time: spare, ready, claimed or
/// released. Queues are sized to the port's buffer count so hand-offs never
/// overflow.
///
/// # Example
/// ```rust
/// use stagehand_core::prelude::*;
///
/// let format = PortFormat {
///     coding: FourCc::UNUSED,
///     color: FourCc::I420,
///     resolution: Resolution::new(16, 16).unwrap(),
///     framerate: 15,
///     bitrate: 0,
/// };
/// let input = PortDefinition {
///     index: PortIndex::INPUT,
///     direction: PortDirection::Input,
///     domain: PortDomain::Video,
///     buffer_count: 2,
///     buffer_size: 64,
///     format,
/// };
/// let pool = PortPool::new(&[input])?;
///
/// let mut hdr = pool.take_spare(PortIndex::INPUT).unwrap();
/// hdr.fill(b"raw");
/// pool.deliver(hdr)?;
///
/// let claimed = pool.claim(PortIndex::INPUT).unwrap();
/// pool.release(PortIndex::INPUT, claimed)?;
/// assert!(matches!(pool.collect(PortIndex::INPUT), RecvOutcome::Data(_)));
/// # Ok::<(), PoolError>(())
/// ```
#[derive(Clone)]
pub struct PortPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    ports: SmallVec<[PortSlot; 2]>,
}

struct PortSlot {
    definition: PortDefinition,
    spare: Mutex<Vec<BufferHeader>>,
    ready: PortQueue<BufferHeader>,
    released: PortQueue<BufferHeader>,
    claimed: Mutex<HashSet<BufferId>>,
    metrics: PortMetrics,
}

impl PortPool {
    /// Allocate `buffer_count` headers of `buffer_size` bytes for each definition.
    ///
    /// Definitions must be listed in port-index order starting at zero.
    pub fn new(definitions: &[PortDefinition]) -> Result<Self, PoolError> {
        let mut ports = SmallVec::new();
        let mut next_id = 0u32;
        for (pos, def) in definitions.iter().enumerate() {
            def.validate().map_err(PoolError::InvalidDefinition)?;
            if def.index.get() as usize != pos {
                return Err(PoolError::InvalidDefinition(format!(
                    "port {} listed at position {pos}",
                    def.index
                )));
            }
            let spare: Vec<BufferHeader> = (0..def.buffer_count)
                .map(|_| {
                    let id = BufferId::new(next_id);
                    next_id += 1;
                    BufferHeader::new(id, def.index, def.buffer_size)
                })
                .collect();
            ports.push(PortSlot {
                definition: *def,
                spare: Mutex::new(spare),
                ready: PortQueue::new(def.buffer_count),
                released: PortQueue::new(def.buffer_count),
                claimed: Mutex::new(HashSet::with_capacity(def.buffer_count)),
                metrics: PortMetrics::default(),
            });
        }
        Ok(Self {
            inner: Arc::new(PoolInner { ports }),
        })
    }

    fn slot(&self, port: PortIndex) -> Result<&PortSlot, PoolError> {
        self.inner
            .ports
            .get(port.get() as usize)
            .ok_or(PoolError::UnknownPort(port))
    }

    /// Definition the port was built from.
    pub fn definition(&self, port: PortIndex) -> Result<&PortDefinition, PoolError> {
        self.slot(port).map(|s| &s.definition)
    }

    /// Counters for one port.
    pub fn metrics(&self, port: PortIndex) -> Result<PortMetrics, PoolError> {
        self.slot(port).map(|s| s.metrics.clone())
    }

    /// Take an idle header, reset and ready to be filled or offered.
    pub fn take_spare(&self, port: PortIndex) -> Option<BufferHeader> {
        let slot = self.slot(port).ok()?;
        let mut hdr = slot.spare.lock().pop()?;
        hdr.recycle();
        Some(hdr)
    }

    /// Put a header back into the idle set without making it claimable.
    pub fn recycle(&self, header: BufferHeader) -> Result<(), PoolError> {
        let slot = self.slot(header.port())?;
        slot.spare.lock().push(header);
        Ok(())
    }

    /// Make a header claimable by the stage on its own port.
    pub fn deliver(&self, header: BufferHeader) -> Result<(), PoolError> {
        let port = header.port();
        let slot = self.slot(port)?;
        match slot.ready.send(header) {
            SendOutcome::Ok => {
                slot.metrics.delivered();
                Ok(())
            }
            SendOutcome::Full(header) => {
                slot.spare.lock().push(header);
                Err(PoolError::Full(port))
            }
        }
    }

    /// Pick up the oldest header the stage released on `port`.
    pub fn collect(&self, port: PortIndex) -> RecvOutcome<BufferHeader> {
        match self.slot(port) {
            Ok(slot) => slot.released.recv(),
            Err(_) => RecvOutcome::Empty,
        }
    }

    /// Headers currently claimable on `port`.
    pub fn ready_len(&self, port: PortIndex) -> usize {
        self.slot(port).map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Headers currently held by the stage on `port`.
    pub fn claimed_len(&self, port: PortIndex) -> usize {
        self.slot(port).map(|s| s.claimed.lock().len()).unwrap_or(0)
    }

    /// Headers currently idle on `port`.
    pub fn spare_len(&self, port: PortIndex) -> usize {
        self.slot(port).map(|s| s.spare.lock().len()).unwrap_or(0)
    }

    /// Return a rejected header to its owning port's idle set and drop any
    /// claim recorded for it there.
    fn park(&self, header: BufferHeader) {
        match self.slot(header.port()) {
            Ok(owner) => {
                owner.claimed.lock().remove(&header.id());
                owner.spare.lock().push(header);
            }
            Err(_) => {
                warn!(id = %header.id(), owner = %header.port(), "discarding header from a foreign port");
            }
        }
    }
}

impl PortBufferPool for PortPool {
    fn claim(&self, port: PortIndex) -> Option<BufferHeader> {
        let slot = self.slot(port).ok()?;
        match slot.ready.recv() {
            RecvOutcome::Data(hdr) => {
                slot.claimed.lock().insert(hdr.id());
                slot.metrics.claimed();
                trace!(%port, id = %hdr.id(), filled = hdr.filled_len, "claimed buffer");
                Some(hdr)
            }
            RecvOutcome::Empty => {
                slot.metrics.starved();
                None
            }
        }
    }

    fn release(&self, port: PortIndex, header: BufferHeader) -> Result<(), PoolError> {
        let slot = match self.slot(port) {
            Ok(slot) => slot,
            Err(err) => {
                warn!(%port, id = %header.id(), "release on unknown port");
                self.park(header);
                return Err(err);
            }
        };
        if header.port() != port {
            slot.metrics.rejected();
            warn!(%port, id = %header.id(), owner = %header.port(), "release on wrong port");
            let err = PoolError::PortMismatch {
                id: header.id(),
                owner: header.port(),
                port,
            };
            self.park(header);
            return Err(err);
        }
        if !slot.claimed.lock().remove(&header.id()) {
            slot.metrics.rejected();
            warn!(%port, id = %header.id(), "release without claim");
            let err = PoolError::NotClaimed {
                id: header.id(),
                port,
            };
            self.park(header);
            return Err(err);
        }
        trace!(
            %port,
            id = %header.id(),
            filled = header.filled_len,
            flags = ?header.flags,
            "released buffer"
        );
        match slot.released.send(header) {
            SendOutcome::Ok => {
                slot.metrics.released();
                Ok(())
            }
            SendOutcome::Full(header) => {
                slot.spare.lock().push(header);
                Err(PoolError::Full(port))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferFlags,
        format::{FourCc, Resolution},
        port::{PortDirection, PortDomain, PortFormat},
    };

    fn definition(index: PortIndex, direction: PortDirection, count: usize) -> PortDefinition {
        PortDefinition {
            index,
            direction,
            domain: PortDomain::Video,
            buffer_count: count,
            buffer_size: 16,
            format: PortFormat {
                coding: FourCc::UNUSED,
                color: FourCc::I420,
                resolution: Resolution::new(2, 2).unwrap(),
                framerate: 15,
                bitrate: 0,
            },
        }
    }

    fn pool() -> PortPool {
        PortPool::new(&[
            definition(PortIndex::INPUT, PortDirection::Input, 2),
            definition(PortIndex::OUTPUT, PortDirection::Output, 1),
        ])
        .expect("pool")
    }

    #[test]
    fn empty_port_claims_none_and_counts_starvation() {
        let pool = pool();
        assert!(pool.claim(PortIndex::INPUT).is_none());
        assert_eq!(pool.metrics(PortIndex::INPUT).unwrap().starvations(), 1);
    }

    #[test]
    fn claims_follow_delivery_order() {
        let pool = pool();
        let mut first = pool.take_spare(PortIndex::INPUT).unwrap();
        let mut second = pool.take_spare(PortIndex::INPUT).unwrap();
        first.fill(b"1");
        second.fill(b"2");
        let (a, b) = (first.id(), second.id());
        pool.deliver(first).unwrap();
        pool.deliver(second).unwrap();
        assert_eq!(pool.claim(PortIndex::INPUT).unwrap().id(), a);
        assert_eq!(pool.claim(PortIndex::INPUT).unwrap().id(), b);
    }

    #[test]
    fn release_requires_prior_claim() {
        let pool = pool();
        let hdr = pool.take_spare(PortIndex::INPUT).unwrap();
        let id = hdr.id();
        let err = pool.release(PortIndex::INPUT, hdr).unwrap_err();
        assert_eq!(err, PoolError::NotClaimed {
            id,
            port: PortIndex::INPUT
        });
        assert_eq!(pool.metrics(PortIndex::INPUT).unwrap().rejections(), 1);
        assert_eq!(pool.spare_len(PortIndex::INPUT), 2);
    }

    #[test]
    fn release_on_wrong_port_is_rejected() {
        let pool = pool();
        pool.deliver(pool.take_spare(PortIndex::INPUT).unwrap())
            .unwrap();
        let hdr = pool.claim(PortIndex::INPUT).unwrap();
        let id = hdr.id();
        let err = pool.release(PortIndex::OUTPUT, hdr).unwrap_err();
        assert_eq!(err.code(), "port_mismatch");

        // The header lands back in its own port's idle set, unclaimed.
        assert_eq!(pool.claimed_len(PortIndex::INPUT), 0);
        assert_eq!(pool.spare_len(PortIndex::INPUT), 2);
        assert_eq!(pool.spare_len(PortIndex::OUTPUT), 1);
        let idle: Vec<_> = std::iter::from_fn(|| pool.take_spare(PortIndex::INPUT))
            .map(|h| h.id())
            .collect();
        assert!(idle.contains(&id));
    }

    #[test]
    fn released_headers_reach_the_neighbor_with_flags() {
        let pool = pool();
        pool.deliver(pool.take_spare(PortIndex::OUTPUT).unwrap())
            .unwrap();
        let mut hdr = pool.claim(PortIndex::OUTPUT).unwrap();
        assert_eq!(pool.claimed_len(PortIndex::OUTPUT), 1);
        hdr.append(b"xyz");
        hdr.flags |= BufferFlags::EOS;
        pool.release(PortIndex::OUTPUT, hdr).unwrap();
        assert_eq!(pool.claimed_len(PortIndex::OUTPUT), 0);
        let out = pool.collect(PortIndex::OUTPUT).into_option().unwrap();
        assert_eq!(out.payload(), b"xyz");
        assert!(out.is_eos());
    }

    #[test]
    fn definitions_must_be_in_index_order() {
        let err = PortPool::new(&[definition(PortIndex::OUTPUT, PortDirection::Output, 1)])
            .err()
            .unwrap();
        assert_eq!(err.code(), "invalid_definition");
    }

    #[test]
    fn release_on_unknown_port_keeps_the_header() {
        let pool = pool();
        pool.deliver(pool.take_spare(PortIndex::OUTPUT).unwrap())
            .unwrap();
        let hdr = pool.claim(PortIndex::OUTPUT).unwrap();
        let err = pool.release(PortIndex::new(9), hdr).unwrap_err();
        assert_eq!(err, PoolError::UnknownPort(PortIndex::new(9)));
        assert_eq!(pool.claimed_len(PortIndex::OUTPUT), 0);
        assert_eq!(pool.spare_len(PortIndex::OUTPUT), 1);
    }

    #[test]
    fn unknown_port_is_starved_not_fatal() {
        let pool = pool();
        assert!(pool.claim(PortIndex::new(5)).is_none());
        assert!(pool.take_spare(PortIndex::new(5)).is_none());
    }
}
