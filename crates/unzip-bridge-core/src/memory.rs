//! Views over the guest's linear memory.
//!
//! A view is only meaningful for the backing buffer it was taken from.
//! Guest `memory.grow` may replace that buffer, so [`MemoryViews`] records
//! the identity (base address and length) each view was bound to and rebinds
//! whenever the current buffer differs. Callers must [`MemoryViews::invalidate`]
//! after any guest call that could have grown memory; the codecs do so after
//! every allocator call.

use tracing::trace;

use unzip_bridge_common::MarshalError;

/// Width in bytes of one word-view element.
pub const WORD_SIZE: u32 = 4;

/// Identity of one backing buffer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackingBuffer {
    base: usize,
    len: usize,
}

impl BackingBuffer {
    fn of(data: &[u8]) -> Self {
        Self {
            base: data.as_ptr() as usize,
            len: data.len(),
        }
    }

    /// Length of the buffer in bytes when it was bound.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a detached (zero-length) buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Cached bindings for the byte view and the word view.
#[derive(Debug, Default)]
pub struct MemoryViews {
    bytes: Option<BackingBuffer>,
    words: Option<BackingBuffer>,
    rebinds: u64,
}

impl MemoryViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte view over `data`.
    pub fn bytes<'m>(&mut self, data: &'m [u8]) -> ByteView<'m> {
        Self::bind(&mut self.bytes, &mut self.rebinds, data, "byte");
        ByteView { data }
    }

    /// Writable byte view over `data`.
    pub fn bytes_mut<'m>(&mut self, data: &'m mut [u8]) -> ByteViewMut<'m> {
        Self::bind(&mut self.bytes, &mut self.rebinds, data, "byte");
        ByteViewMut { data }
    }

    /// Word view over `data`.
    pub fn words<'m>(&mut self, data: &'m [u8]) -> WordView<'m> {
        Self::bind(&mut self.words, &mut self.rebinds, data, "word");
        WordView { data }
    }

    /// Writable word view over `data`.
    pub fn words_mut<'m>(&mut self, data: &'m mut [u8]) -> WordViewMut<'m> {
        Self::bind(&mut self.words, &mut self.rebinds, data, "word");
        WordViewMut { data }
    }

    /// Drop both bindings.
    pub fn invalidate(&mut self) {
        self.bytes = None;
        self.words = None;
    }

    /// Buffer the byte view is bound to, if any.
    pub fn byte_binding(&self) -> Option<BackingBuffer> {
        self.bytes
    }

    /// Buffer the word view is bound to, if any.
    pub fn word_binding(&self) -> Option<BackingBuffer> {
        self.words
    }

    /// How many times a view had to be rebound.
    pub fn rebinds(&self) -> u64 {
        self.rebinds
    }

    fn bind(slot: &mut Option<BackingBuffer>, rebinds: &mut u64, data: &[u8], view: &str) {
        let current = BackingBuffer::of(data);
        match slot {
            Some(bound) if *bound == current && !bound.is_empty() => {}
            _ => {
                trace!(view, len = current.len, "Binding memory view");
                *slot = Some(current);
                *rebinds += 1;
            }
        }
    }
}

/// Read-only byte view.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'m> {
    data: &'m [u8],
}

impl<'m> ByteView<'m> {
    /// `len` bytes starting at `ptr`.
    pub fn read(&self, ptr: u32, len: u32) -> Result<&'m [u8], MarshalError> {
        let range = checked_range(self.data.len(), ptr, len)?;
        Ok(&self.data[range])
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Writable byte view.
#[derive(Debug)]
pub struct ByteViewMut<'m> {
    data: &'m mut [u8],
}

impl ByteViewMut<'_> {
    /// Copy `bytes` to `ptr`.
    pub fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), MarshalError> {
        let len = u32::try_from(bytes.len()).map_err(|_| MarshalError::OutOfBounds {
            ptr,
            len: u32::MAX,
            size: self.data.len(),
        })?;
        let range = checked_range(self.data.len(), ptr, len)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

/// Read-only view of little-endian 32-bit words, indexed by word.
#[derive(Debug, Clone, Copy)]
pub struct WordView<'m> {
    data: &'m [u8],
}

impl WordView<'_> {
    /// Word at `index` (byte offset `index * 4`).
    pub fn read_u32(&self, index: u32) -> Result<u32, MarshalError> {
        let range = checked_range(self.data.len(), word_offset(index)?, WORD_SIZE)?;
        let mut word = [0; WORD_SIZE as usize];
        word.copy_from_slice(&self.data[range]);
        Ok(u32::from_le_bytes(word))
    }
}

/// Writable view of little-endian 32-bit words, indexed by word.
#[derive(Debug)]
pub struct WordViewMut<'m> {
    data: &'m mut [u8],
}

impl WordViewMut<'_> {
    /// Store `value` at word `index` (byte offset `index * 4`).
    pub fn write_u32(&mut self, index: u32, value: u32) -> Result<(), MarshalError> {
        let range = checked_range(self.data.len(), word_offset(index)?, WORD_SIZE)?;
        self.data[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

fn word_offset(index: u32) -> Result<u32, MarshalError> {
    index
        .checked_mul(WORD_SIZE)
        .ok_or(MarshalError::OutOfBounds {
            ptr: u32::MAX,
            len: WORD_SIZE,
            size: 0,
        })
}

fn checked_range(size: usize, ptr: u32, len: u32) -> Result<std::ops::Range<usize>, MarshalError> {
    let start = ptr as usize;
    start
        .checked_add(len as usize)
        .filter(|end| *end <= size)
        .map(|end| start..end)
        .ok_or(MarshalError::OutOfBounds { ptr, len, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_access_binds() {
        let mut views = MemoryViews::new();
        let data = vec![1u8, 2, 3, 4];

        assert!(views.byte_binding().is_none());
        let view = views.bytes(&data);

        assert_eq!(view.read(1, 2).unwrap(), &[2, 3]);
        assert_eq!(views.byte_binding().map(|b| b.len()), Some(4));
        assert_eq!(views.rebinds(), 1);
    }

    #[test]
    fn test_same_buffer_keeps_binding() {
        let mut views = MemoryViews::new();
        let data = vec![0u8; 16];

        views.bytes(&data);
        views.bytes(&data);
        views.words(&data);
        views.words(&data);

        assert_eq!(views.rebinds(), 2);
    }

    #[test]
    fn test_replaced_buffer_rebinds() {
        let mut views = MemoryViews::new();
        let old = vec![0xAAu8; 8];
        views.bytes(&old);
        let old_binding = views.byte_binding().unwrap();

        // Growth: a new, larger backing buffer replaces the old one.
        let mut grown = vec![0u8; 64];
        grown[..8].copy_from_slice(&old);
        grown[40] = 0x55;
        drop(old);

        let view = views.bytes(&grown);

        assert_eq!(view.read(40, 1).unwrap(), &[0x55]);
        let binding = views.byte_binding().unwrap();
        assert_ne!(binding, old_binding);
        assert_eq!(binding.len(), 64);
        assert_eq!(views.rebinds(), 2);
    }

    #[test]
    fn test_empty_buffer_always_rebinds() {
        let mut views = MemoryViews::new();
        let detached: Vec<u8> = Vec::new();

        views.bytes(&detached);
        views.bytes(&detached);

        assert_eq!(views.rebinds(), 2);
    }

    #[test]
    fn test_invalidate_clears_both_views() {
        let mut views = MemoryViews::new();
        let data = vec![0u8; 8];
        views.bytes(&data);
        views.words(&data);

        views.invalidate();

        assert!(views.byte_binding().is_none());
        assert!(views.word_binding().is_none());
        views.bytes(&data);
        assert_eq!(views.rebinds(), 3);
    }

    #[test]
    fn test_byte_view_bounds() {
        let mut views = MemoryViews::new();
        let mut data = vec![0u8; 8];

        assert!(views.bytes(&data).read(6, 2).is_ok());
        assert_eq!(
            views.bytes(&data).read(7, 2).unwrap_err(),
            MarshalError::OutOfBounds {
                ptr: 7,
                len: 2,
                size: 8
            }
        );
        assert!(views.bytes(&data).read(u32::MAX, 2).is_err());
        assert!(views.bytes_mut(&mut data).write(5, &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_word_view_little_endian() {
        let mut views = MemoryViews::new();
        let mut data = vec![0u8; 16];

        views.words_mut(&mut data).write_u32(2, 0x0102_0304).unwrap();

        assert_eq!(&data[8..12], &[4, 3, 2, 1]);
        assert_eq!(views.words(&data).read_u32(2).unwrap(), 0x0102_0304);
        assert!(views.words(&data).read_u32(4).is_err());
        assert!(views.words(&data).read_u32(u32::MAX).is_err());
    }
}
