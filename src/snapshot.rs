//! Single-writer single-reader latest-value channel.
//!
//! A triple buffer: the publisher owns one slot, the reader owns another and
//! the third sits in the middle. Publishing writes the publisher's slot and
//! swaps it with the middle one; reading swaps the middle slot in if it holds
//! something newer. Neither side ever waits on the other, and a value is only
//! handed across once it has been completely written.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const INDEX_MASK: u8 = 0b011;
const FRESH: u8 = 0b100;

struct Shared<T> {
    slots: [UnsafeCell<T>; 3],
    /// Index of the middle slot, plus [`FRESH`] when it holds an unread value
    middle: AtomicU8,
}

// Each slot is accessed by at most one side at a time; ownership of a slot
// only changes hands through the atomic swap on `middle`.
unsafe impl<T: Send> Sync for Shared<T> {}

/// Constructor for a snapshot channel, in the manner of `rtrb::RingBuffer`.
///
/// ```
/// use taktgeber::SnapshotBuffer;
///
/// let (mut publisher, mut reader) = SnapshotBuffer::new(0u32);
/// publisher.publish(7);
/// publisher.publish(8);
/// assert_eq!(reader.read(), 8);
/// ```
pub struct SnapshotBuffer<T> {
    _marker: PhantomData<T>,
}

impl<T: Copy + Send> SnapshotBuffer<T> {
    /// Create a channel whose reader sees `initial` until the first publish.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(initial: T) -> (SnapshotPublisher<T>, SnapshotReader<T>) {
        let shared = Arc::new(Shared {
            slots: [
                UnsafeCell::new(initial),
                UnsafeCell::new(initial),
                UnsafeCell::new(initial),
            ],
            middle: AtomicU8::new(1),
        });
        (
            SnapshotPublisher {
                shared: shared.clone(),
                back: 0,
            },
            SnapshotReader { shared, front: 2 },
        )
    }
}

/// Writing half of a [`SnapshotBuffer`].
pub struct SnapshotPublisher<T> {
    shared: Arc<Shared<T>>,
    back: u8,
}

impl<T: Copy + Send> SnapshotPublisher<T> {
    /// Make `value` the latest snapshot, replacing any unread one.
    #[inline]
    pub fn publish(&mut self, value: T) {
        // SAFETY: `back` is owned by this publisher until it is swapped into
        // the middle below.
        unsafe {
            *self.shared.slots[self.back as usize].get() = value;
        }
        let previous = self.shared.middle.swap(self.back | FRESH, Ordering::AcqRel);
        self.back = previous & INDEX_MASK;
    }
}

/// Reading half of a [`SnapshotBuffer`].
pub struct SnapshotReader<T> {
    shared: Arc<Shared<T>>,
    front: u8,
}

impl<T: Copy + Send> SnapshotReader<T> {
    /// Whether a value has been published since the last read.
    #[inline]
    pub fn has_update(&self) -> bool {
        self.shared.middle.load(Ordering::Acquire) & FRESH != 0
    }

    /// Copy of the most recently published value.
    #[inline]
    pub fn read(&mut self) -> T {
        if self.has_update() {
            let previous = self.shared.middle.swap(self.front, Ordering::AcqRel);
            self.front = previous & INDEX_MASK;
        }
        // SAFETY: `front` is owned by this reader until it is swapped back.
        unsafe { *self.shared.slots[self.front as usize].get() }
    }
}
