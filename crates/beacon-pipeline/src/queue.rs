use parking_lot::Mutex;

use beacon_core::events::Event;

/// Fixed-capacity ring buffer with drop-oldest semantics.
///
/// Slots are allocated once. `head` is the index of the oldest item.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    /// Append at the tail, evicting and returning the oldest item when full.
    pub fn push_back(&mut self, item: T) -> Option<T> {
        let evicted = if self.is_full() { self.pop_front() } else { None };
        let idx = self.slot(self.len);
        self.slots[idx] = Some(item);
        self.len += 1;
        evicted
    }

    /// Insert at the head. Returns the item back if there is no room.
    pub fn push_front(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.head = (self.head + self.capacity() - 1) % self.capacity();
        self.slots[self.head] = Some(item);
        self.len += 1;
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    /// Items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |offset| self.slots[self.slot(offset)].as_ref())
    }
}

/// Result of one enqueue, observed under the queue lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Queue length after the append.
    pub len: usize,
    /// Events evicted to make room (0 or 1).
    pub evicted: usize,
}

/// Bounded FIFO of events shared between producers and the uploader.
///
/// Every operation takes the single internal lock for its whole duration, so
/// each one is atomic with respect to the others. The lock is never held
/// across I/O.
#[derive(Debug)]
pub struct EventQueue {
    inner: Mutex<RingBuffer<Event>>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    pub fn enqueue(&self, event: Event) -> EnqueueOutcome {
        let mut buf = self.inner.lock();
        let evicted = usize::from(buf.push_back(event).is_some());
        EnqueueOutcome {
            len: buf.len(),
            evicted,
        }
    }

    /// Remove and return up to `max` events from the head.
    pub fn drain_batch(&self, max: usize) -> Vec<Event> {
        let mut buf = self.inner.lock();
        let take = max.min(buf.len());
        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            match buf.pop_front() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        batch
    }

    /// Put a batch back at the head, keeping its order ahead of anything
    /// enqueued since it was drained.
    ///
    /// If the result would exceed capacity, the oldest events of `events`
    /// are dropped first. Returns how many were dropped.
    pub fn requeue_front(&self, events: Vec<Event>) -> usize {
        let mut buf = self.inner.lock();
        let room = buf.capacity() - buf.len();
        let overflow = events.len().saturating_sub(room);

        for event in events.into_iter().skip(overflow).rev() {
            // Cannot fail: only `room` events remain after the skip.
            let _ = buf.push_front(event);
        }
        overflow
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Drop everything queued. Returns how many events were discarded.
    pub fn clear(&self) -> usize {
        let mut buf = self.inner.lock();
        let n = buf.len();
        buf.clear();
        n
    }

    /// Copy of the queued events, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.inner.lock().iter().cloned().collect()
    }
}
