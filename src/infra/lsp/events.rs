//! Registry-wide FIFO of server-initiated events
//!
//! Reader tasks push, the host pulls. Nothing here ever calls back into the
//! host. The queue is bounded: once `capacity` events are buffered the oldest
//! one is dropped for each new arrival and counted in [`EventQueue::dropped`].

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::event::{Event, EventKind};

struct QueueState {
    events: VecDeque<Event>,
    next_seq: u64,
    dropped: u64,
}

pub struct EventQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                next_seq: 0,
                dropped: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A panicking pusher cannot leave the deque half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event, stamping it with the next arrival sequence number.
    pub fn push(&self, language_id: &str, kind: EventKind) -> u64 {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;

        if state.events.len() >= self.capacity {
            state.events.pop_front();
            state.dropped += 1;
            if state.dropped == 1 || state.dropped.is_power_of_two() {
                tracing::warn!(
                    "Event queue full ({} events), {} dropped so far",
                    self.capacity,
                    state.dropped
                );
            }
        }

        tracing::trace!("Queued event {} from {}: {}", seq, language_id, kind.method());
        state.events.push_back(Event {
            seq,
            language_id: language_id.to_string(),
            kind,
        });
        seq
    }

    /// Pop the oldest buffered event. Never blocks beyond the lock.
    pub fn pop(&self) -> Option<Event> {
        self.lock().events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.events.len();
        state.events.clear();
        count
    }
}
