//! Split input/output buffer backing the stream's `Read`/`Write` impls.
//!
//! One allocation, split in half: the front half holds data received from
//! the socket and not yet handed to the caller, the back half holds caller
//! writes not yet flushed to the socket. A refill of the input half first
//! flushes the output half, so request/response protocols never deadlock on
//! an unflushed request.

pub(crate) const MIN_BUFFER_SIZE: usize = 128;
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 8192;

#[derive(Debug)]
pub(crate) struct SplitBuffer {
    storage: Vec<u8>,
    half: usize,
    in_start: usize,
    in_end: usize,
    out_len: usize,
}

impl SplitBuffer {
    /// Allocate with `size` bytes total. Sizes below the minimum fall back
    /// to the default.
    pub(crate) fn new(size: usize) -> Self {
        let size = if size < MIN_BUFFER_SIZE {
            DEFAULT_BUFFER_SIZE
        } else {
            size
        };
        let half = size / 2;
        Self {
            storage: vec![0; half * 2],
            half,
            in_start: 0,
            in_end: 0,
            out_len: 0,
        }
    }

    /// Zero-capacity placeholder used while the real buffer is moved out
    /// for a split borrow. Does not allocate.
    pub(crate) const fn placeholder() -> Self {
        Self {
            storage: Vec::new(),
            half: 0,
            in_start: 0,
            in_end: 0,
            out_len: 0,
        }
    }

    /// Bytes buffered on the input side, readable without touching the
    /// socket.
    pub(crate) fn available(&self) -> usize {
        self.in_end - self.in_start
    }

    /// Copy buffered input into `dst`, consuming it. Returns bytes copied.
    pub(crate) fn take(&mut self, dst: &mut [u8]) -> usize {
        let n = self.available().min(dst.len());
        dst[..n].copy_from_slice(&self.storage[self.in_start..self.in_start + n]);
        self.in_start += n;
        if self.in_start == self.in_end {
            self.in_start = 0;
            self.in_end = 0;
        }
        n
    }

    /// The whole input half, for the socket to read into. Valid only when
    /// `available() == 0`.
    pub(crate) fn input_slot(&mut self) -> &mut [u8] {
        debug_assert_eq!(self.available(), 0);
        &mut self.storage[..self.half]
    }

    /// Record that `n` bytes of the input slot now hold received data.
    pub(crate) fn commit_input(&mut self, n: usize) {
        debug_assert!(n <= self.half);
        self.in_start = 0;
        self.in_end = n;
    }

    /// Free space on the output side.
    pub(crate) fn output_space(&self) -> usize {
        self.half - self.out_len
    }

    /// Append as much of `src` as fits on the output side. Returns bytes
    /// accepted.
    pub(crate) fn push_output(&mut self, src: &[u8]) -> usize {
        let n = self.output_space().min(src.len());
        let at = self.half + self.out_len;
        self.storage[at..at + n].copy_from_slice(&src[..n]);
        self.out_len += n;
        n
    }

    /// Buffered output not yet flushed to the socket.
    pub(crate) fn pending_output(&self) -> &[u8] {
        &self.storage[self.half..self.half + self.out_len]
    }

    /// Discard the first `n` bytes of pending output after a flush.
    pub(crate) fn consume_output(&mut self, n: usize) {
        debug_assert!(n <= self.out_len);
        self.storage
            .copy_within(self.half + n..self.half + self.out_len, self.half);
        self.out_len -= n;
    }

    pub(crate) fn has_output(&self) -> bool {
        self.out_len > 0
    }

    /// Drop all buffered data in both halves.
    pub(crate) fn reset(&mut self) {
        self.in_start = 0;
        self.in_end = 0;
        self.out_len = 0;
    }

    /// Total capacity across both halves.
    pub(crate) fn capacity(&self) -> usize {
        self.half * 2
    }
}
