//! Host byte buffers.

use std::collections::VecDeque;
use std::fmt;
use std::io::IoSlice;

/// A view over memory the buffer does not own, with a release callback that
/// runs once the view is dropped.
pub struct BufferFragment {
    data: *const u8,
    len: usize,
    release: Option<Box<dyn FnOnce()>>,
}

impl BufferFragment {
    /// Create a fragment over `len` bytes at `data`.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads of `len` bytes, and must not be
    /// mutated, until `release` has run.
    pub unsafe fn from_raw_parts(data: *const u8, len: usize, release: impl FnOnce() + 'static) -> Self {
        Self {
            data,
            len,
            release: Some(Box::new(release)),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.data.is_null() || self.len == 0 {
            return &[];
        }
        // SAFETY: valid for `len` bytes until release, which runs on drop
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

impl Drop for BufferFragment {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for BufferFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferFragment")
            .field("data", &self.data)
            .field("len", &self.len)
            .finish()
    }
}

/// Byte buffer owned by the host.
pub trait Buffer {
    /// Append a fragment. The buffer owns it until its bytes are drained.
    fn add_fragment(&mut self, fragment: BufferFragment);

    /// Readable data as at most `max_slices` slices, front first.
    fn raw_slices(&self, max_slices: usize) -> Vec<IoSlice<'_>>;

    /// Discard `n` bytes from the front.
    fn drain(&mut self, n: usize);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
enum Slice {
    Owned(Vec<u8>),
    Fragment(BufferFragment),
}

impl Slice {
    fn bytes(&self) -> &[u8] {
        match self {
            Slice::Owned(data) => data,
            Slice::Fragment(fragment) => fragment.as_slice(),
        }
    }
}

/// A buffer made of a chain of slices. Appending never copies fragments.
#[derive(Debug, Default)]
pub struct ChainBuffer {
    /// Each slice with the number of its bytes already drained.
    slices: VecDeque<(Slice, usize)>,
    len: usize,
}

impl ChainBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a copy of `data`.
    pub fn add(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.slices.push_back((Slice::Owned(data.to_vec()), 0));
    }

    /// Number of slices currently held.
    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// Copy the readable data out.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for (slice, consumed) in &self.slices {
            out.extend_from_slice(&slice.bytes()[*consumed..]);
        }
        out
    }
}

impl Buffer for ChainBuffer {
    fn add_fragment(&mut self, fragment: BufferFragment) {
        self.len += fragment.len();
        self.slices.push_back((Slice::Fragment(fragment), 0));
    }

    fn raw_slices(&self, max_slices: usize) -> Vec<IoSlice<'_>> {
        self.slices
            .iter()
            .map(|(slice, consumed)| &slice.bytes()[*consumed..])
            .filter(|bytes| !bytes.is_empty())
            .take(max_slices)
            .map(IoSlice::new)
            .collect()
    }

    fn drain(&mut self, mut n: usize) {
        assert!(
            n <= self.len,
            "drain({}) exceeds buffer length ({})",
            n,
            self.len
        );
        self.len -= n;
        while let Some((slice, consumed)) = self.slices.front_mut() {
            let remaining = slice.bytes().len() - *consumed;
            if n < remaining {
                *consumed += n;
                break;
            }
            n -= remaining;
            // dropping a fragment releases its memory
            self.slices.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fragment(data: &'static [u8], released: &Rc<Cell<usize>>) -> BufferFragment {
        let released = released.clone();
        // SAFETY: static data
        unsafe {
            BufferFragment::from_raw_parts(data.as_ptr(), data.len(), move || {
                released.set(released.get() + 1)
            })
        }
    }

    #[test]
    fn test_add_and_drain() {
        let mut buf = ChainBuffer::new();
        buf.add(b"hello ");
        buf.add(b"world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.to_vec(), b"hello world");

        buf.drain(3);
        assert_eq!(buf.to_vec(), b"lo world");
        assert_eq!(buf.slice_count(), 2);

        buf.drain(3);
        assert_eq!(buf.to_vec(), b"world");
        assert_eq!(buf.slice_count(), 1);

        buf.drain(5);
        assert!(buf.is_empty());
        assert_eq!(buf.slice_count(), 0);
    }

    #[test]
    fn test_fragment_released_when_fully_drained() {
        let released = Rc::new(Cell::new(0));
        let mut buf = ChainBuffer::new();
        buf.add_fragment(fragment(b"abcd", &released));
        buf.add_fragment(fragment(b"efgh", &released));

        buf.drain(3);
        assert_eq!(released.get(), 0);

        buf.drain(1);
        assert_eq!(released.get(), 1);
        assert_eq!(buf.to_vec(), b"efgh");

        drop(buf);
        assert_eq!(released.get(), 2);
    }

    #[test]
    fn test_raw_slices() {
        let mut buf = ChainBuffer::new();
        buf.add(b"ab");
        buf.add(b"cd");
        buf.add(b"ef");
        buf.drain(1);

        let slices = buf.raw_slices(2);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"b");
        assert_eq!(&*slices[1], b"cd");
    }

    #[test]
    #[should_panic(expected = "exceeds buffer length")]
    fn test_drain_past_end() {
        let mut buf = ChainBuffer::new();
        buf.add(b"ab");
        buf.drain(3);
    }
}
