//! Fixed-capacity FIFO ring buffer.

/// A fixed-capacity, non-overwriting FIFO of `Copy` elements.
///
/// `RingBuffer<T>` is the staging area for PCM samples waiting to fill a
/// codec frame and for packets waiting on reordering. All storage is
/// allocated in [`RingBuffer::new`]; reads and writes never allocate.
///
/// # Semantics
///
/// - **Write**: Copies as many elements as fit and returns the count. Never
///   overwrites unread data.
/// - **Read**: Copies up to `out.len()` elements in FIFO order.
///
/// A ring buffer is owned by a single stream and is not synchronized; wrap it
/// in a lock if it must be shared.
///
/// # Example
///
/// ```
/// use opuskit_buffer::RingBuffer;
///
/// let mut buf = RingBuffer::<i16>::new(4);
/// assert_eq!(buf.write(&[1, 2, 3, 4, 5]), 4);
///
/// let mut out = [0i16; 3];
/// assert_eq!(buf.read(&mut out), 3);
/// assert_eq!(out, [1, 2, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: Box<[T]>,
    // Slot of the oldest element and the number of buffered elements.
    head: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates a new RingBuffer with the specified capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        RingBuffer {
            buf: vec![T::default(); capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Returns the number of elements currently in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the buffer capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the number of elements that can be written without reading.
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if no more elements can be written.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Discards all buffered elements.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Writes as many elements of `data` as fit; returns the count written.
    pub fn write(&mut self, data: &[T]) -> usize {
        let n = data.len().min(self.free());
        if n == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let start = (self.head + self.len) % capacity;
        let first = n.min(capacity - start);
        self.buf[start..start + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);

        self.len += n;
        n
    }

    /// Copies up to `out.len()` of the oldest elements without consuming them.
    pub fn peek(&self, out: &mut [T]) -> usize {
        let n = out.len().min(self.len());
        if n == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let start = self.head;
        let first = n.min(capacity - start);
        out[..first].copy_from_slice(&self.buf[start..start + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        n
    }

    /// Reads up to `out.len()` elements in FIFO order; returns the count read.
    pub fn read(&mut self, out: &mut [T]) -> usize {
        let n = self.peek(out);
        self.advance(n);
        n
    }

    /// Discards the next `n` elements (or all of them, if fewer are buffered).
    pub fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        self.advance(n);
        n
    }

    fn advance(&mut self, n: usize) {
        self.head = (self.head + n) % self.capacity();
        self.len -= n;
        if self.len == 0 {
            self.head = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_write_read() {
        let mut buf = RingBuffer::<i32>::new(4);
        assert_eq!(buf.write(&[1, 2, 3]), 3);

        let mut data = vec![0; 3];
        let n = buf.read(&mut data);
        assert_eq!(n, 3);
        assert_eq!(data, vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_write_never_overwrites() {
        let mut buf = RingBuffer::<i32>::new(3);
        assert_eq!(buf.write(&[1, 2, 3, 4, 5]), 3);
        assert!(buf.is_full());
        assert_eq!(buf.write(&[6]), 0);

        let mut data = [0; 3];
        buf.read(&mut data);
        assert_eq!(data, [1, 2, 3]);
    }

    #[test]
    fn test_wrap_around() {
        let mut buf = RingBuffer::<i16>::new(4);
        buf.write(&[1, 2, 3]);
        let mut two = [0i16; 2];
        buf.read(&mut two);
        assert_eq!(two, [1, 2]);

        // Tail wraps past the end of storage.
        assert_eq!(buf.write(&[4, 5, 6]), 3);
        assert_eq!(buf.len(), 4);

        let mut out = [0i16; 4];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = RingBuffer::<u8>::new(8);
        buf.write(&[9, 8, 7]);

        let mut out = [0u8; 2];
        assert_eq!(buf.peek(&mut out), 2);
        assert_eq!(out, [9, 8]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_discard() {
        let mut buf = RingBuffer::<u8>::new(4);
        buf.write(&[1, 2, 3]);
        assert_eq!(buf.discard(2), 2);
        assert_eq!(buf.discard(5), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_capacity_len_free() {
        let mut buf = RingBuffer::<f32>::new(4);
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.free(), 4);

        buf.write(&[0.5, 0.25]);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.free(), 2);

        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.free(), 4);
    }

    #[test]
    fn test_interleaved_traffic_keeps_order() {
        let mut buf = RingBuffer::<u32>::new(5);
        let mut next_in = 0u32;
        let mut next_out = 0u32;

        for round in 0..50 {
            let chunk: Vec<u32> = (next_in..next_in + (round % 4) + 1).collect();
            next_in += buf.write(&chunk) as u32;

            let mut out = vec![0u32; (round % 3) as usize + 1];
            let n = buf.read(&mut out);
            for v in &out[..n] {
                assert_eq!(*v, next_out);
                next_out += 1;
            }
        }
        assert_eq!(next_in - next_out, buf.len() as u32);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _ = RingBuffer::<u8>::new(0);
    }
}
