//! Single producer, single consumer rings of halfwords.
//!
//! A ring is owned by two sides at once: the producer `P` advances the write cursor and the
//! consumer `C` advances the read cursor. Neither side ever waits for the other. One halfword is
//! always kept free, so that a full ring can be told apart from an empty one.
use core::cell::UnsafeCell;

use crate::{control::Cursor, WiFiError, WiFiResult};

/// A ring of `N` halfwords.
pub struct RingBuffer<P, C, const N: usize> {
    write_cursor: Cursor<P>,
    read_cursor: Cursor<C>,
    storage: UnsafeCell<[u16; N]>,
}
// SAFETY:
// The producer only writes halfwords in the free region and the consumer only reads the pending
// region. A region changes hands only through a cursor store with release ordering, which the
// other side observes with acquire ordering.
unsafe impl<P, C, const N: usize> Sync for RingBuffer<P, C, N> {}
impl<P, C, const N: usize> RingBuffer<P, C, N> {
    pub const fn new() -> Self {
        Self {
            write_cursor: Cursor::new(),
            read_cursor: Cursor::new(),
            storage: UnsafeCell::new([0u16; N]),
        }
    }
    /// The capacity in halfwords.
    pub const fn capacity(&self) -> usize {
        N
    }
    fn storage(&self) -> *mut u16 {
        self.storage.get().cast()
    }
    fn wrap(position: usize) -> usize {
        if position >= N {
            position - N
        } else {
            position
        }
    }
    /// The position of the write cursor in halfwords.
    pub fn write_position(&self) -> usize {
        self.write_cursor.load()
    }
    /// The position of the read cursor in halfwords.
    pub fn read_position(&self) -> usize {
        self.read_cursor.load()
    }
    /// Halfwords that can be written without overwriting unread data.
    pub fn free_halfwords(&self) -> usize {
        (self.read_position() + N - self.write_position() - 1) % N
    }
    /// Bytes that can be written without overwriting unread data.
    pub fn bytes_available(&self) -> usize {
        self.free_halfwords() * 2
    }
    /// Halfwords that were written, but not read yet.
    pub fn pending_halfwords(&self) -> usize {
        (self.write_position() + N - self.read_position()) % N
    }
    pub fn is_empty(&self) -> bool {
        self.pending_halfwords() == 0
    }

    /// Write `halfwords` halfwords pulled from `next` and publish them at once.
    ///
    /// If there isn't enough space, nothing is written and [WiFiError::QueueFull] is returned.
    pub fn push_with(
        &self,
        owner: &P,
        halfwords: usize,
        mut next: impl FnMut() -> u16,
    ) -> WiFiResult<()> {
        if halfwords * 2 > self.bytes_available() {
            return Err(WiFiError::QueueFull);
        }
        let start = self.write_position();
        // Everything up to the end of the storage first, then the remainder from the start.
        let first_segment = halfwords.min(N - start);
        for position in start..start + first_segment {
            unsafe { self.storage().add(position).write_volatile(next()) };
        }
        for position in 0..halfwords - first_segment {
            unsafe { self.storage().add(position).write_volatile(next()) };
        }
        self.write_cursor
            .store(owner, Self::wrap(start + halfwords));
        Ok(())
    }
    /// Write a frame descriptor followed by the frame body.
    ///
    /// An odd body is padded with a zero byte.
    pub fn push_frame(&self, owner: &P, descriptor: &[u16], body: &[u8]) -> WiFiResult<()> {
        let mut halfwords = descriptor.iter().copied().chain(halfwords_of(body));
        self.push_with(owner, descriptor.len() + body.len().div_ceil(2), || {
            halfwords.next().unwrap_or_default()
        })
    }

    /// Read the halfword `offset` halfwords past the read cursor.
    pub fn read_halfword(&self, offset: usize) -> u16 {
        let position = (self.read_position() + offset) % N;
        unsafe { self.storage().add(position).read_volatile() }
    }
    /// Copy bytes starting `offset` bytes past the read cursor into `buffer`.
    pub fn read_bytes(&self, offset: usize, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            let offset = offset + i;
            let [low, high] = self.read_halfword(offset / 2).to_le_bytes();
            *byte = if offset % 2 == 0 { low } else { high };
        }
    }
    /// Release `halfwords` halfwords to the producer.
    ///
    /// This never moves the read cursor past the write cursor.
    pub fn advance(&self, owner: &C, halfwords: usize) {
        let halfwords = halfwords.min(self.pending_halfwords());
        self.read_cursor
            .store(owner, Self::wrap(self.read_position() + halfwords));
    }
    /// Drop everything, that is pending.
    pub fn discard_all(&self, owner: &C) {
        self.read_cursor.store(owner, self.write_position());
    }
}
impl<P, C, const N: usize> Default for RingBuffer<P, C, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack bytes into little endian halfwords, padding the last one with zero.
pub fn halfwords_of(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes
        .chunks(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk.get(1).copied().unwrap_or_default()]))
}
