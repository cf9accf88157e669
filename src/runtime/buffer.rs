//! Fixed-size buffer pool.
//!
//! Buffers are pre-allocated once and handed out by value, so a buffer is
//! owned by exactly one context while its operation is in flight. The heap
//! storage never moves while a `Buffer` is alive, which is what lets the
//! kernel hold a raw pointer into it across the submission/completion gap.

use std::borrow::Cow;

/// An owned byte buffer with fixed capacity and a logical length.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
}

impl Buffer {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            len: 0,
        }
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the number of valid bytes after the kernel filled the buffer.
    ///
    /// Clamped to the capacity.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len(), "length exceeds buffer capacity");
        self.len = len.min(self.data.len());
    }

    /// Copy `bytes` into the buffer, truncating at capacity.
    pub fn fill(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The valid bytes as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_slice())
    }

    /// Pointer to the start of the storage, for the kernel to write into.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// Pointer to the start of the storage, for the kernel to read from.
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }
}

/// Pool of fixed-size buffers.
///
/// Tracks every allocation and release so leaks show up as a non-zero
/// `outstanding()` count.
pub struct BufferPool {
    /// Stack of idle buffers (LIFO for cache locality).
    free_list: Vec<Buffer>,
    /// Size of each buffer.
    buffer_size: usize,
    /// Number of buffers the pool was created with.
    count: usize,
    allocations: u64,
    releases: u64,
}

impl BufferPool {
    /// Create a new buffer pool.
    ///
    /// # Arguments
    /// * `count` - Number of buffers to pre-allocate
    /// * `size` - Size of each buffer in bytes
    pub fn new(count: usize, size: usize) -> Self {
        let free_list = (0..count).map(|_| Buffer::new(size)).collect();

        Self {
            free_list,
            buffer_size: size,
            count,
            allocations: 0,
            releases: 0,
        }
    }

    /// Take a buffer from the pool.
    ///
    /// Returns `None` if no buffers are available.
    pub fn alloc(&mut self) -> Option<Buffer> {
        let mut buf = self.free_list.pop()?;
        buf.len = 0;
        self.allocations += 1;
        Some(buf)
    }

    /// Return a buffer to the pool.
    pub fn free(&mut self, buf: Buffer) {
        debug_assert_eq!(buf.capacity(), self.buffer_size, "foreign buffer");
        debug_assert!(self.free_list.len() < self.count, "buffer freed twice");
        self.free_list.push(buf);
        self.releases += 1;
    }

    /// Get the number of available buffers.
    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// Buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.count - self.free_list.len()
    }

    /// Total number of successful `alloc` calls.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Total number of `free` calls.
    pub fn releases(&self) -> u64 {
        self.releases
    }
}
