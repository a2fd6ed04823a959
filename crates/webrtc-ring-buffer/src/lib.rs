//! Sample ring buffer for the mobile echo canceller.
//!
//! A fixed-capacity FIFO of audio samples whose read cursor can move in
//! either direction:
//! - forward drops buffered samples ("flush")
//! - backward re-exposes samples that were already read ("stuff")
//!
//! The far-end buffer uses both moves to follow the device latency; the
//! frame-to-block FIFOs use stuffing to emit zeros before the first block.

#![deny(unsafe_code)]

use std::num::NonZero;

/// A fixed-capacity ring of samples.
///
/// # Invariants
///
/// - `read_pos < capacity`
/// - `available_read() + available_write() == capacity()`
///
/// Stuffing on a buffer that was never written to exposes the
/// zero-initialized storage.
#[derive(Debug, Clone)]
pub struct RingBuffer<T = i16> {
    data: Vec<T>,
    read_pos: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates an empty buffer holding up to `capacity` samples.
    pub fn new(capacity: NonZero<usize>) -> Self {
        Self {
            data: vec![T::default(); capacity.get()],
            read_pos: 0,
            len: 0,
        }
    }

    /// Returns the total capacity in samples.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Samples that can be read.
    pub fn available_read(&self) -> usize {
        self.len
    }

    /// Samples that can be written before the buffer is full.
    pub fn available_write(&self) -> usize {
        self.capacity() - self.len
    }

    fn write_pos(&self) -> usize {
        (self.read_pos + self.len) % self.capacity()
    }

    /// Appends as much of `samples` as fits.
    ///
    /// Returns the number of samples written.
    pub fn write(&mut self, samples: &[T]) -> usize {
        let count = samples.len().min(self.available_write());
        let start = self.write_pos();
        let first = count.min(self.capacity() - start);
        self.data[start..start + first].copy_from_slice(&samples[..first]);
        self.data[..count - first].copy_from_slice(&samples[first..count]);
        self.len += count;
        count
    }

    /// Reads up to `out.len()` samples.
    ///
    /// Returns the number of samples read; the rest of `out` is untouched.
    pub fn read(&mut self, out: &mut [T]) -> usize {
        let count = out.len().min(self.len);
        let first = count.min(self.capacity() - self.read_pos);
        out[..first].copy_from_slice(&self.data[self.read_pos..self.read_pos + first]);
        out[first..count].copy_from_slice(&self.data[..count - first]);
        self.read_pos = (self.read_pos + count) % self.capacity();
        self.len -= count;
        count
    }

    /// Moves the read cursor by `offset` samples.
    ///
    /// Positive offsets flush, negative offsets stuff. The offset is clamped
    /// to `[-available_write, available_read]`.
    ///
    /// Returns the applied offset.
    pub fn move_read_ptr(&mut self, offset: isize) -> isize {
        let clamped = offset.clamp(
            -(self.available_write() as isize),
            self.available_read() as isize,
        );
        let cap = self.capacity() as isize;
        self.read_pos = (self.read_pos as isize + clamped).rem_euclid(cap) as usize;
        self.len = (self.len as isize - clamped) as usize;
        clamped
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_strategy::proptest;

    use super::*;

    fn rb(capacity: usize) -> RingBuffer {
        RingBuffer::new(NonZero::new(capacity).unwrap())
    }

    /// Random interleaving of writes and reads of a counting sequence,
    /// checking occupancy and order after every operation.
    fn random_stress_test(seed: u64) {
        let mut state = seed;
        let mut next = || -> usize {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as usize
        };

        for _ in 0..10 {
            let capacity = (next() % 1000).max(1);
            let mut buffer = rb(capacity);
            let mut scratch = vec![0i16; capacity];
            let mut held = 0usize;
            let mut write_value = 0i16;
            let mut read_value = 0i16;

            for _ in 0..1000 {
                let count = next() % capacity;
                if next() % 2 == 0 {
                    assert_eq!(buffer.available_write(), capacity - held);
                    let expected = count.min(capacity - held);
                    for s in &mut scratch[..count] {
                        *s = write_value;
                        write_value = write_value.wrapping_add(1);
                    }
                    write_value = write_value.wrapping_sub((count - expected) as i16);
                    assert_eq!(buffer.write(&scratch[..count]), expected);
                    held += expected;
                } else {
                    assert_eq!(buffer.available_read(), held);
                    let expected = count.min(held);
                    assert_eq!(buffer.read(&mut scratch[..count]), expected);
                    for (i, &s) in scratch[..expected].iter().enumerate() {
                        assert_eq!(s, read_value, "mismatch at index {i}");
                        read_value = read_value.wrapping_add(1);
                    }
                    held -= expected;
                }
            }
        }
    }

    #[test]
    fn stress_test() {
        random_stress_test(12345);
    }

    #[test]
    fn write_then_read() {
        let mut buf = rb(8);
        assert_eq!(buf.write(&[1, 2, 3]), 3);
        assert_eq!(buf.available_read(), 3);
        assert_eq!(buf.available_write(), 5);
        let mut out = [0; 3];
        assert_eq!(buf.read(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(buf.available_read(), 0);
    }

    #[test]
    fn write_limited_by_capacity() {
        let mut buf = rb(4);
        assert_eq!(buf.write(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(buf.available_write(), 0);
        assert_eq!(buf.write(&[7]), 0);
    }

    #[test]
    fn wraps_around() {
        let mut buf = rb(5);
        buf.write(&[1, 2, 3, 4]);
        let mut out = [0; 3];
        buf.read(&mut out);
        buf.write(&[5, 6, 7]);
        let mut out = [0; 4];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(out, [4, 5, 6, 7]);
    }

    #[test]
    fn short_read_leaves_tail() {
        let mut buf = rb(8);
        buf.write(&[9, 8]);
        let mut out = [-1; 5];
        assert_eq!(buf.read(&mut out), 2);
        assert_eq!(out, [9, 8, -1, -1, -1]);
    }

    #[test]
    fn flush_drops_samples() {
        let mut buf = rb(8);
        buf.write(&[1, 2, 3, 4, 5]);
        assert_eq!(buf.move_read_ptr(2), 2);
        let mut out = [0; 3];
        buf.read(&mut out);
        assert_eq!(out, [3, 4, 5]);
    }

    #[test]
    fn stuff_reexposes_read_samples() {
        let mut buf = rb(8);
        buf.write(&[1, 2, 3, 4]);
        let mut out = [0; 4];
        buf.read(&mut out);
        assert_eq!(buf.move_read_ptr(-2), -2);
        let mut out = [0; 2];
        buf.read(&mut out);
        assert_eq!(out, [3, 4]);
    }

    #[test]
    fn stuff_across_wrap() {
        let mut buf = rb(4);
        buf.write(&[1, 2, 3, 4]);
        let mut out = [0; 3];
        buf.read(&mut out);
        buf.write(&[5, 6, 7]);
        let mut out = [0; 2];
        buf.read(&mut out);
        assert_eq!(out, [4, 5]);
        assert_eq!(buf.move_read_ptr(-1), -1);
        let mut out = [0; 3];
        buf.read(&mut out);
        assert_eq!(out, [5, 6, 7]);
    }

    #[test]
    fn stuff_on_fresh_buffer_yields_zeros() {
        let mut buf = rb(6);
        assert_eq!(buf.move_read_ptr(-4), -4);
        let mut out = [7; 4];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn move_is_clamped() {
        let mut buf = rb(6);
        buf.write(&[1, 2]);
        assert_eq!(buf.move_read_ptr(10), 2);
        assert_eq!(buf.available_read(), 0);
        assert_eq!(buf.move_read_ptr(-10), -6);
        assert_eq!(buf.available_read(), 6);
    }

    #[derive(Debug, Clone, test_strategy::Arbitrary)]
    enum Op {
        Write(#[strategy(0usize..40)] usize),
        Read(#[strategy(0usize..40)] usize),
        Move(#[strategy(-40isize..40)] isize),
    }

    #[proptest]
    fn occupancy_invariant(
        #[strategy(1usize..64)] capacity: usize,
        #[strategy(prop::collection::vec(any::<Op>(), 0..50))] ops: Vec<Op>,
    ) {
        let mut buf = rb(capacity);
        for op in ops {
            let before = buf.available_read();
            match op {
                Op::Write(n) => {
                    let written = buf.write(&vec![1; n]);
                    prop_assert_eq!(written, n.min(capacity - before));
                    prop_assert_eq!(buf.available_read(), before + written);
                }
                Op::Read(n) => {
                    let read = buf.read(&mut vec![0; n]);
                    prop_assert_eq!(read, n.min(before));
                    prop_assert_eq!(buf.available_read(), before - read);
                }
                Op::Move(offset) => {
                    let moved = buf.move_read_ptr(offset);
                    prop_assert_eq!(buf.available_read() as isize, before as isize - moved);
                }
            }
            prop_assert_eq!(buf.available_read() + buf.available_write(), capacity);
        }
    }

    #[proptest]
    fn preserves_order(
        #[strategy(prop::collection::vec(any::<i16>(), 0..30))] first: Vec<i16>,
        #[strategy(prop::collection::vec(any::<i16>(), 0..30))] second: Vec<i16>,
        #[strategy(0usize..30)] skip: usize,
    ) {
        let mut buf = rb(40);
        buf.write(&first);
        let skip = skip.min(first.len());
        buf.read(&mut vec![0; skip]);
        let accepted = buf.write(&second);
        let mut out = vec![0; buf.available_read()];
        buf.read(&mut out);
        let expected: Vec<i16> = first[skip..]
            .iter()
            .chain(&second[..accepted])
            .copied()
            .collect();
        prop_assert_eq!(out, expected);
    }

    #[proptest]
    fn stress_random_seed(#[strategy(1..=100_000u64)] seed: u64) {
        random_stress_test(seed);
    }
}
