use crossbeam_queue::ArrayQueue;

/// Result of offering a value to a [`PortQueue`].
///
/// A rejected value is handed back so buffers are never silently dropped.
///
/// # Example
/// ```rust
/// use stagehand_core::queue::{PortQueue, SendOutcome};
///
/// let queue = PortQueue::new(1);
/// assert!(matches!(queue.send(1u8), SendOutcome::Ok));
/// assert!(matches!(queue.send(2u8), SendOutcome::Full(2)));
/// ```
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome<T> {
    /// Value was accepted.
    Ok,
    /// Queue is full; the value is returned.
    Full(T),
}

/// Result of attempting to take a value from a [`PortQueue`].
///
/// # Example
/// ```rust
/// use stagehand_core::queue::{PortQueue, RecvOutcome};
///
/// let queue = PortQueue::<u8>::new(1);
/// assert!(matches!(queue.recv(), RecvOutcome::Empty));
/// ```
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome<T> {
    /// Received value.
    Data(T),
    /// Queue currently empty.
    Empty,
}

impl<T> RecvOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            RecvOutcome::Data(value) => Some(value),
            RecvOutcome::Empty => None,
        }
    }
}

/// Bounded, lock-free FIFO used for each direction of buffer hand-off on a port.
///
/// Neither side ever blocks: an empty queue is reported as [`RecvOutcome::Empty`]
/// and a full one as [`SendOutcome::Full`].
pub struct PortQueue<T> {
    queue: ArrayQueue<T>,
}

impl<T> PortQueue<T> {
    /// Create a queue holding at most `capacity` values (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Attempt to enqueue without blocking.
    pub fn send(&self, value: T) -> SendOutcome<T> {
        match self.queue.push(value) {
            Ok(()) => SendOutcome::Ok,
            Err(value) => SendOutcome::Full(value),
        }
    }

    /// Attempt to dequeue without blocking.
    pub fn recv(&self) -> RecvOutcome<T> {
        match self.queue.pop() {
            Some(value) => RecvOutcome::Data(value),
            None => RecvOutcome::Empty,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_fifo_order() {
        let queue = PortQueue::new(3);
        for v in 0..3 {
            assert_eq!(queue.send(v), SendOutcome::Ok);
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.recv().into_option()).collect();
        assert_eq!(drained, vec![0, 1, 2]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let queue = PortQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.send(1), SendOutcome::Ok);
    }
}
