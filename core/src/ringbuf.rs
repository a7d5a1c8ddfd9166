//! Bounded byte ring buffer backing each engine's inbound path.
//!
//! Single producer, single consumer by construction: the owning engine
//! writes from `clock` and drains from its read methods on the same
//! thread. `peek` supports the FM engine's look-before-dequeue framing.

pub struct RingBuffer {
    data: Vec<u8>,
    head: usize,
    used: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            head: 0,
            used: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn free(&self) -> usize {
        self.data.len() - self.used
    }

    /// Enqueue `bytes`, refusing the whole block if it doesn't fit.
    pub fn add(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free() {
            return false;
        }

        let capacity = self.data.len();
        let mut tail = (self.head + self.used) % capacity;
        for &byte in bytes {
            self.data[tail] = byte;
            tail = (tail + 1) % capacity;
        }
        self.used += bytes.len();

        true
    }

    /// Dequeue up to `out.len()` bytes, returning the count moved.
    pub fn get(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.used);
        let capacity = self.data.len();
        for slot in out.iter_mut().take(n) {
            *slot = self.data[self.head];
            self.head = (self.head + 1) % capacity;
        }
        self.used -= n;
        n
    }

    /// Copy up to `out.len()` bytes starting `offset` bytes past the read
    /// position, without consuming anything.
    pub fn peek(&self, out: &mut [u8], offset: usize) -> usize {
        if offset >= self.used {
            return 0;
        }

        let n = out.len().min(self.used - offset);
        let capacity = self.data.len();
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = self.data[(self.head + offset + i) % capacity];
        }
        n
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.used = 0;
    }
}
