//! Fixed-capacity circular sample store with overwrite-oldest semantics.
//!
//! Backs the far-end reference history. One writer (the playout thread
//! feeding the reference) and one reader (the capture thread) may use a
//! buffer concurrently; all access goes through an internal lock. Read
//! order is always oldest-first FIFO over whatever samples survived.

use parking_lot::Mutex;

pub struct RingBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    data: Vec<f32>,
    capacity: usize,
    head: usize, // next write position
    tail: usize, // oldest retained sample
    size: usize,
}

impl RingBuffer {
    /// Create a buffer holding up to `capacity` samples. Not resizable.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be nonzero");
        Self {
            inner: Mutex::new(Inner {
                data: vec![0.0; capacity],
                capacity,
                head: 0,
                tail: 0,
                size: 0,
            }),
        }
    }

    /// Append samples, silently overwriting the oldest entries once full.
    pub fn write(&self, samples: &[f32]) {
        let mut guard = self.inner.lock();
        let b = &mut *guard;
        for &s in samples {
            b.data[b.head] = s;
            b.head = (b.head + 1) % b.capacity;
            if b.size < b.capacity {
                b.size += 1;
            } else {
                b.tail = (b.tail + 1) % b.capacity;
            }
        }
    }

    /// Up to `n` oldest-retained samples in write order. `n` is clamped to
    /// the current size.
    pub fn read(&self, n: usize) -> Vec<f32> {
        let b = self.inner.lock();
        let n = n.min(b.size);
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(b.data[(b.tail + i) % b.capacity]);
        }
        out
    }

    /// The most recent `n` samples in write order, zero-padded at the front
    /// when fewer than `n` are held.
    pub fn latest(&self, n: usize) -> Vec<f32> {
        let b = self.inner.lock();
        let mut out = vec![0.0; n];
        let have = n.min(b.size);
        for i in 0..have {
            let idx = (b.head + b.capacity - have + i) % b.capacity;
            out[n - have + i] = b.data[idx];
        }
        out
    }

    /// Raw indexed access into the backing store. Test hook; returns an
    /// empty vec when the request does not fit the current content.
    pub fn peek(&self, start: usize, n: usize) -> Vec<f32> {
        let b = self.inner.lock();
        if b.size == 0 || n > b.size {
            return Vec::new();
        }
        (0..n).map(|i| b.data[(start + i) % b.capacity]).collect()
    }

    /// Drop all content without reallocating.
    pub fn clear(&self) {
        let mut b = self.inner.lock();
        b.head = 0;
        b.tail = 0;
        b.size = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_keeps_second_half_in_order() {
        let rb = RingBuffer::new(8);
        let vals: Vec<f32> = (0..16).map(|i| i as f32).collect();
        rb.write(&vals);
        assert_eq!(rb.len(), 8);
        assert_eq!(rb.read(8), vals[8..].to_vec());
    }

    #[test]
    fn read_clamps_to_size() {
        let rb = RingBuffer::new(8);
        rb.write(&[1.0, 2.0, 3.0]);
        assert_eq!(rb.read(100), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn latest_pads_front_with_zeros() {
        let rb = RingBuffer::new(8);
        rb.write(&[1.0, 2.0]);
        assert_eq!(rb.latest(4), vec![0.0, 0.0, 1.0, 2.0]);
        rb.write(&[3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(rb.latest(3), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn clear_resets_without_realloc() {
        let rb = RingBuffer::new(4);
        rb.write(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.capacity(), 4);
        rb.write(&[9.0]);
        assert_eq!(rb.read(1), vec![9.0]);
    }

    #[test]
    fn peek_rejects_oversized_requests() {
        let rb = RingBuffer::new(4);
        assert!(rb.peek(0, 1).is_empty());
        rb.write(&[1.0, 2.0]);
        assert!(rb.peek(0, 3).is_empty());
        assert_eq!(rb.peek(0, 2), vec![1.0, 2.0]);
    }
}
