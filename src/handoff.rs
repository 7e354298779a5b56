//! Single-slot handoff between the bus and processing domains.
//!
//! A [`Publisher`] overwrites the slot and bumps its sequence number; a
//! [`Subscriber`] only takes the value when the sequence number differs from
//! the last one it consumed. There is no queue: a value published before the
//! previous one was taken replaces it, and the subscriber learns how many
//! values it missed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    sequence: u64,
}

fn lock<T>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    // slot updates are never left half-written
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates a connected publisher/subscriber pair.
pub fn mailbox<T: Copy>() -> (Publisher<T>, Subscriber<T>) {
    let slot = Arc::new(Mutex::new(Slot {
        value: None,
        sequence: 0,
    }));
    (
        Publisher { slot: slot.clone() },
        Subscriber {
            slot,
            last: 0,
            dropped: 0,
        },
    )
}

/// Producer side of a [`mailbox`].
#[derive(Debug)]
pub struct Publisher<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T: Copy> Publisher<T> {
    /// Replaces the slot contents, returning the new sequence number.
    pub fn publish(&self, value: T) -> u64 {
        let mut slot = lock(&self.slot);
        slot.value = Some(value);
        slot.sequence = slot.sequence.wrapping_add(1);
        slot.sequence
    }
}

/// A value taken out of a [`mailbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery<T> {
    pub value: T,
    pub sequence: u64,

    /// Values published and overwritten since the previous delivery.
    pub dropped: u64,
}

/// Consumer side of a [`mailbox`].
#[derive(Debug)]
pub struct Subscriber<T> {
    slot: Arc<Mutex<Slot<T>>>,
    last: u64,
    dropped: u64,
}

impl<T: Copy> Subscriber<T> {
    /// Takes the current value if it has not been seen yet.
    pub fn poll(&mut self) -> Option<Delivery<T>> {
        let slot = lock(&self.slot);
        if slot.sequence == self.last {
            return None;
        }

        let value = slot.value?;
        let dropped = slot.sequence.wrapping_sub(self.last).wrapping_sub(1);
        self.last = slot.sequence;
        self.dropped += dropped;

        Some(Delivery {
            value,
            sequence: slot.sequence,
            dropped,
        })
    }

    /// Whether a value is waiting to be polled.
    pub fn pending(&self) -> bool {
        lock(&self.slot).sequence != self.last
    }

    /// Total number of values overwritten before they could be polled.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mailbox() {
        let (_tx, mut rx) = mailbox::<u32>();
        assert!(!rx.pending());
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn value_is_delivered_once() {
        let (tx, mut rx) = mailbox();
        assert_eq!(tx.publish(7u32), 1);
        assert!(rx.pending());
        assert_eq!(
            rx.poll(),
            Some(Delivery {
                value: 7,
                sequence: 1,
                dropped: 0
            })
        );
        assert_eq!(rx.poll(), None);

        // same value again is still a new delivery
        tx.publish(7);
        assert_eq!(rx.poll().map(|d| d.value), Some(7));
    }

    #[test]
    fn newest_value_overwrites() {
        let (tx, mut rx) = mailbox();
        tx.publish(1u8);
        tx.publish(2);
        tx.publish(3);

        let delivery = rx.poll().unwrap();
        assert_eq!(delivery.value, 3);
        assert_eq!(delivery.dropped, 2);
        assert_eq!(rx.dropped(), 2);
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn crosses_threads() {
        let (tx, mut rx) = mailbox();
        std::thread::spawn(move || {
            tx.publish(0xabu8);
        })
        .join()
        .unwrap();

        assert_eq!(rx.poll().map(|d| d.value), Some(0xab));
    }
}
