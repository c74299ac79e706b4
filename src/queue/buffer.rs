//! Per-key ordered accumulation of patches awaiting flush.
//!
//! The buffer is owned exclusively by the coalescing queue and is only
//! touched while the owning key's lock is held, which is what makes
//! `append_all` atomic with respect to concurrent single appends and
//! makes drain/append mutually exclusive for a key without blocking
//! offers for other keys.

use crate::patch::Patch;

/// Ordered sequence of patches for one file key, append-only until drained.
///
/// Invariant: the sequence order equals the linearized append order across
/// all callers for that key.
#[derive(Debug, Default)]
pub struct BatchBuffer {
    patches: Vec<Patch>,
    total_appended: u64,
    total_drained: u64,
    total_requeued: u64,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single patch at the tail.
    pub fn append(&mut self, patch: Patch) {
        self.patches.push(patch);
        self.total_appended += 1;
    }

    /// Append a batch of patches at the tail, preserving their order.
    pub fn append_all(&mut self, patches: Vec<Patch>) {
        self.total_appended += patches.len() as u64;
        self.patches.extend(patches);
    }

    /// Atomically remove and return the entire current contents as a
    /// detached sequence, leaving the buffer logically empty.
    ///
    /// The caller receives an owned snapshot; later appends cannot touch
    /// a batch that is already being applied.
    pub fn drain(&mut self) -> Vec<Patch> {
        let drained = std::mem::take(&mut self.patches);
        self.total_drained += drained.len() as u64;
        drained
    }

    /// Put a previously drained batch back at the head of the buffer,
    /// ahead of anything appended since the drain. Used by the retry
    /// policy so a failed batch keeps its position in the offer order.
    pub fn requeue_front(&mut self, mut batch: Vec<Patch>) {
        self.total_requeued += batch.len() as u64;
        batch.append(&mut self.patches);
        self.patches = batch;
    }

    /// Number of patches currently buffered.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Whether the buffer is logically empty.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Total patches appended since creation.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Total patches drained since creation.
    pub fn total_drained(&self) -> u64 {
        self.total_drained
    }

    /// Total patches re-queued by the retry policy since creation.
    pub fn total_requeued(&self) -> u64 {
        self.total_requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(byte: u8) -> Patch {
        Patch::new(vec![byte])
    }

    #[test]
    fn test_append_preserves_order() {
        let mut buffer = BatchBuffer::new();
        buffer.append(patch(1));
        buffer.append(patch(2));
        buffer.append(patch(3));

        assert_eq!(buffer.len(), 3);
        let drained = buffer.drain();
        assert_eq!(drained, vec![patch(1), patch(2), patch(3)]);
    }

    #[test]
    fn test_append_all_preserves_order() {
        let mut buffer = BatchBuffer::new();
        buffer.append(patch(1));
        buffer.append_all(vec![patch(2), patch(3)]);
        buffer.append(patch(4));

        let drained = buffer.drain();
        assert_eq!(drained, vec![patch(1), patch(2), patch(3), patch(4)]);
    }

    #[test]
    fn test_drain_leaves_buffer_empty() {
        let mut buffer = BatchBuffer::new();
        buffer.append_all(vec![patch(1), patch(2)]);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);

        // A second drain returns nothing.
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_drain_returns_detached_snapshot() {
        let mut buffer = BatchBuffer::new();
        buffer.append(patch(1));

        let drained = buffer.drain();
        buffer.append(patch(2));

        // The snapshot is unaffected by appends after the drain.
        assert_eq!(drained, vec![patch(1)]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_requeue_front_goes_ahead_of_new_patches() {
        let mut buffer = BatchBuffer::new();
        buffer.append_all(vec![patch(1), patch(2)]);
        let failed = buffer.drain();

        // Patches arrive while the failed batch was in flight.
        buffer.append(patch(3));

        buffer.requeue_front(failed);
        let drained = buffer.drain();
        assert_eq!(drained, vec![patch(1), patch(2), patch(3)]);
    }

    #[test]
    fn test_empty_append_all_is_noop() {
        let mut buffer = BatchBuffer::new();
        buffer.append_all(Vec::new());
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_appended(), 0);
    }

    #[test]
    fn test_counters() {
        let mut buffer = BatchBuffer::new();
        buffer.append(patch(1));
        buffer.append_all(vec![patch(2), patch(3)]);
        assert_eq!(buffer.total_appended(), 3);

        let batch = buffer.drain();
        assert_eq!(buffer.total_drained(), 3);

        buffer.requeue_front(batch);
        assert_eq!(buffer.total_requeued(), 3);
        assert_eq!(buffer.len(), 3);
    }
}
