//! Fixed-capacity single-producer/single-consumer byte queue.
//!
//! The queue is allocated once and split into a [`QueueWriter`] owned by the
//! audio driver's thread and a [`QueueReader`] owned by the consumer thread.
//! Only the two indices inside the ring are shared; neither half ever blocks
//! or allocates after construction.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::models::error::CaptureError;

/// Bounded circular buffer of raw sample bytes.
pub struct BoundedByteQueue {
    rb: HeapRb<u8>,
}

impl BoundedByteQueue {
    pub fn new(capacity: usize) -> Result<Self, CaptureError> {
        if capacity == 0 {
            return Err(CaptureError::config("queue capacity must be positive"));
        }
        Ok(Self {
            rb: HeapRb::<u8>::new(capacity),
        })
    }

    /// Size the queue to hold exactly `frames` frames of `bytes_per_frame` bytes.
    pub fn for_frames(frames: usize, bytes_per_frame: usize) -> Result<Self, CaptureError> {
        let capacity = frames
            .checked_mul(bytes_per_frame)
            .ok_or_else(|| CaptureError::config("queue capacity overflows usize"))?;
        Self::new(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity().get()
    }

    /// Split into the producer and consumer halves.
    pub fn split(self) -> (QueueWriter, QueueReader) {
        let (producer, consumer) = self.rb.split();
        (
            QueueWriter { inner: producer },
            QueueReader { inner: consumer },
        )
    }
}

/// Producer half. Lives on the real-time thread.
pub struct QueueWriter {
    inner: HeapProd<u8>,
}

impl QueueWriter {
    /// Write as many of `bytes` as fit and return the count.
    ///
    /// Never blocks. A short count means the queue was full; the caller
    /// decides how to account for the shortfall.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        self.inner.push_slice(bytes)
    }

    pub fn available_to_write(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}

/// Consumer half. Lives on the worker thread.
pub struct QueueReader {
    inner: HeapCons<u8>,
}

impl QueueReader {
    /// Fill `out` completely or fail without consuming anything.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(), CaptureError> {
        let available = self.inner.occupied_len();
        if available < out.len() {
            return Err(CaptureError::Underrun {
                requested: out.len(),
                available,
            });
        }
        let read = self.inner.pop_slice(out);
        debug_assert_eq!(read, out.len());
        Ok(())
    }

    pub fn available_to_read(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}
