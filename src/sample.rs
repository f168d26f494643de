//! Sample ring buffer (§4.4).
//!
//! `SampleStore` is accessed only from the scheduler's control thread
//! (one poll or upload task runs at a time), so no internal locking is
//! needed — the scheduler boundary is the synchronization point (§5).

use std::collections::VecDeque;

use crate::modbus::registers::RegisterId;

/// One poll's worth of register values, timestamped in monotonic
/// wall-clock seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: u64,
    pub values: Vec<(RegisterId, u16)>,
}

impl Sample {
    #[must_use]
    pub fn new(timestamp: u64, values: Vec<(RegisterId, u16)>) -> Self {
        Self { timestamp, values }
    }

    /// The value for `id`, if this sample covers it.
    #[must_use]
    pub fn get(&self, id: RegisterId) -> Option<u16> {
        self.values.iter().find(|(r, _)| *r == id).map(|(_, v)| *v)
    }
}

/// Outcome of [`SampleStore::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The buffer was full; the oldest sample (now dropped) is carried
    /// here for diagnostics purposes.
    Dropped,
}

/// Bounded FIFO ring buffer of capacity `N`, drop-oldest on overflow.
pub struct SampleStore {
    capacity: usize,
    buf: VecDeque<Sample>,
    dropped_count: u64,
}

impl SampleStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buf: VecDeque::with_capacity(capacity),
            dropped_count: 0,
        }
    }

    /// Push a sample. Drops the oldest entry when the buffer is full.
    pub fn push(&mut self, sample: Sample) -> PushOutcome {
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
            self.buf.push_back(sample);
            self.dropped_count += 1;
            PushOutcome::Dropped
        } else {
            self.buf.push_back(sample);
            PushOutcome::Pushed
        }
    }

    /// Atomically remove and return every buffered sample, oldest
    /// first.
    pub fn drain_all(&mut self) -> Vec<Sample> {
        self.buf.drain(..).collect()
    }

    /// Restore a previously-drained batch at the head, preserving its
    /// original order. Used to requeue a batch whose upload failed.
    pub fn push_batch_front(&mut self, batch: Vec<Sample>) {
        for sample in batch.into_iter().rev() {
            self.buf.push_front(sample);
        }
        while self.buf.len() > self.capacity {
            self.buf.pop_back();
            self.dropped_count += 1;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::registers::RegisterId::Pac;

    fn sample(ts: u64) -> Sample {
        Sample::new(ts, vec![(Pac, ts as u16)])
    }

    #[test]
    fn drop_oldest_on_overflow() {
        let mut store = SampleStore::new(2);
        assert_eq!(store.push(sample(1)), PushOutcome::Pushed);
        assert_eq!(store.push(sample(2)), PushOutcome::Pushed);
        assert_eq!(store.push(sample(3)), PushOutcome::Dropped);
        let drained = store.drain_all();
        assert_eq!(drained.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(store.dropped_count(), 1);
    }

    #[test]
    fn drain_all_is_fifo_and_empties() {
        let mut store = SampleStore::new(4);
        for i in 1..=3 {
            store.push(sample(i));
        }
        let drained = store.drain_all();
        assert_eq!(drained.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(store.is_empty());
    }

    #[test]
    fn push_batch_front_preserves_order_ahead_of_new_pushes() {
        let mut store = SampleStore::new(10);
        store.push(sample(10));
        let failed_batch = vec![sample(1), sample(2), sample(3)];
        store.push_batch_front(failed_batch);
        let drained = store.drain_all();
        assert_eq!(
            drained.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![1, 2, 3, 10]
        );
    }

    #[test]
    fn push_batch_front_respects_capacity() {
        let mut store = SampleStore::new(2);
        store.push_batch_front(vec![sample(1), sample(2), sample(3)]);
        assert!(store.len() <= 2);
    }
}
