use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use delay_api::{EventRecord, Payload};

use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  DelayBuffer
// ═══════════════════════════════════════════════════════════════

/// Pending events ordered by release time.
///
/// Invariant: `release_at` is non-decreasing from head to tail. With a fixed
/// delay this follows from arrival order, so `enqueue` is a plain append; an
/// event that would break the order is placed by upper-bound search instead.
/// The ready set is therefore always a prefix and is found by binary search.
///
/// The lock covers only the append/extract bookkeeping and is never held
/// while a sink does I/O.
pub struct DelayBuffer {
    delay: Duration,
    events: Mutex<VecDeque<EventRecord>>,
}

impl DelayBuffer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Hold `payload` until `now + delay`. Returns the number of pending
    /// events after the append.
    pub fn enqueue(&self, payload: Payload, now: Instant, received_ms: i64) -> usize {
        let record = EventRecord::new(payload, now + self.delay, received_ms);
        self.insert(record)
    }

    /// Insert a record with an arbitrary release time, keeping the order.
    ///
    /// Appends when the record is not earlier than the tail (the fixed-delay
    /// case, O(1)); otherwise inserts after every record with a release time
    /// `<=` its own so that equal times stay in arrival order.
    pub fn insert(&self, record: EventRecord) -> usize {
        let mut events = self.lock();
        let in_order = events
            .back()
            .is_none_or(|tail| tail.release_at() <= record.release_at());
        if in_order {
            events.push_back(record);
        } else {
            let at = events.partition_point(|e| e.release_at() <= record.release_at());
            events.insert(at, record);
        }
        events.len()
    }

    /// Remove and return the maximal prefix with `release_at <= now`.
    ///
    /// O(log n + k) for k ready events. Empty when nothing is due.
    pub fn extract_ready(&self, now: Instant) -> Vec<EventRecord> {
        let mut events = self.lock();
        let ready = events.partition_point(|e| e.release_at() <= now);
        if ready == 0 {
            return Vec::new();
        }
        events.drain(..ready).collect()
    }

    /// Remove everything, due or not.
    pub fn drain_all(&self) -> Vec<EventRecord> {
        let mut events = self.lock();
        events.drain(..).collect()
    }

    /// Put previously extracted events back in front of the pending ones.
    ///
    /// Extracted events were due before anything still buffered, so they go
    /// to the head unchanged. Anything that would break the order falls back
    /// to an ordered insert.
    pub fn requeue_front(&self, requeued: Vec<EventRecord>) {
        if requeued.is_empty() {
            return;
        }
        let mut events = self.lock();
        let fits_head = match (requeued.last(), events.front()) {
            (Some(last), Some(head)) => last.release_at() <= head.release_at(),
            _ => true,
        };
        if fits_head {
            for record in requeued.into_iter().rev() {
                events.push_front(record);
            }
        } else {
            drop(events);
            for record in requeued {
                self.insert(record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The buffer holds plain records, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<EventRecord>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Check that `events` is in release order. O(len), needs no lock: the
/// scheduler runs it on each extracted prefix.
pub(crate) fn verify_order(events: &[EventRecord]) -> Result<(), PipelineError> {
    match events.windows(2).position(|w| w[0].release_at() > w[1].release_at()) {
        Some(at) => Err(PipelineError::InvariantViolation { index: at + 1 }),
        None => Ok(()),
    }
}
