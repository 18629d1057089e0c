use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Result of offering an item to a `HandoffSlot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// The slot was empty and now holds the item.
    Accepted,
    /// The slot already held an item; the offered one was dropped.
    Occupied,
    /// The slot was closed; the offered one was dropped.
    Closed,
}

impl Offer {
    pub fn is_accepted(self) -> bool {
        matches!(self, Offer::Accepted)
    }
}

/// Capacity-1 hand-off between a producer and a single consumer.
///
/// Offers never block and never overwrite: when the slot is occupied the new
/// item is dropped. The emptiness check and the fill happen under one lock, so
/// the slot can never hold more than one item. Takes wake up as soon as an
/// item is offered.
pub struct HandoffSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    pending: Option<T>,
    closed: bool,
}

impl<T> HandoffSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Offer an item built by `make`. `make` only runs when the slot accepts.
    pub fn offer_with(&self, make: impl FnOnce() -> T) -> Offer {
        let mut state = self.lock();
        if state.closed {
            return Offer::Closed;
        }
        if state.pending.is_some() {
            return Offer::Occupied;
        }
        state.pending = Some(make());
        drop(state);
        self.ready.notify_one();
        Offer::Accepted
    }

    pub fn offer(&self, item: T) -> Offer {
        self.offer_with(|| item)
    }

    /// Remove the pending item, waiting up to `wait` for one to arrive.
    ///
    /// Returns `None` on timeout or once the slot is closed.
    pub fn take(&self, wait: Duration) -> Option<T> {
        let mut state = self.lock();
        if state.pending.is_none() && !state.closed {
            state = match self
                .ready
                .wait_timeout_while(state, wait, |s| s.pending.is_none() && !s.closed)
            {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        if state.closed {
            return None;
        }
        state.pending.take()
    }

    /// Close the slot. Drops any pending item and wakes a waiting consumer.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.pending = None;
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // A panic while holding the lock cannot leave the slot half-written:
    // every mutation is a single field assignment.
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T> Default for HandoffSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn second_offer_is_dropped_while_occupied() {
        let slot = HandoffSlot::new();
        assert_eq!(slot.offer(1), Offer::Accepted);
        assert_eq!(slot.offer(2), Offer::Occupied);
        assert!(slot.is_occupied());

        assert_eq!(slot.take(Duration::ZERO), Some(1));
        assert!(!slot.is_occupied());
        assert_eq!(slot.take(Duration::ZERO), None);
    }

    #[test]
    fn offer_with_skips_copy_when_occupied() {
        let slot = HandoffSlot::new();
        slot.offer(1);

        let mut built = false;
        let offer = slot.offer_with(|| {
            built = true;
            2
        });
        assert_eq!(offer, Offer::Occupied);
        assert!(!built);
    }

    #[test]
    fn closed_slot_drops_offers_and_pending_item() {
        let slot = HandoffSlot::new();
        slot.offer("pending");
        slot.close();

        assert!(slot.is_closed());
        assert!(!slot.is_occupied());
        assert_eq!(slot.offer("late"), Offer::Closed);
        assert_eq!(slot.take(Duration::from_millis(10)), None);
    }

    #[test]
    fn take_wakes_on_offer() {
        let slot = Arc::new(HandoffSlot::new());
        let producer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.offer(7u32)
        });

        let started = Instant::now();
        let item = slot.take(Duration::from_secs(5));
        assert_eq!(item, Some(7));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.join().unwrap(), Offer::Accepted);
    }

    #[test]
    fn concurrent_offers_never_fill_twice() {
        let slot = Arc::new(HandoffSlot::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let slot = slot.clone();
                std::thread::spawn(move || slot.offer(i))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|offer| offer.is_accepted())
            .count();

        assert_eq!(accepted, 1);
        assert!(slot.take(Duration::ZERO).is_some());
        assert!(slot.take(Duration::ZERO).is_none());
    }
}
