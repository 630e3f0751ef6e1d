//! Marshalling codecs: copy bytes and text across the boundary.
//!
//! Passing data into the guest means asking the guest allocator for a
//! region and writing into it; the allocator may grow memory, so views are
//! invalidated after every allocator call. Every pass routine returns the
//! region it wrote as one [`Marshalled`] value.

use tracing::trace;

use unzip_bridge_common::{BridgeError, MarshalError};

use crate::memory::MemoryViews;

/// Upper bound of UTF-8 bytes per `char`.
pub const MAX_UTF8_WIDTH: u32 = 4;

/// A region just written into guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marshalled {
    pub ptr: u32,
    pub len: u32,
}

/// The guest-side allocator and memory a codec writes through.
pub trait GuestHeap {
    /// Allocate `size` bytes aligned to `align`.
    fn malloc(&mut self, size: u32, align: u32) -> Result<u32, BridgeError>;

    /// Resize the region at `ptr` from `old_size` to `new_size` bytes.
    fn realloc(
        &mut self,
        ptr: u32,
        old_size: u32,
        new_size: u32,
        align: u32,
    ) -> Result<u32, BridgeError>;

    /// Current linear memory and the view cache that tracks it.
    fn memory(&mut self) -> (&mut [u8], &mut MemoryViews);
}

/// Copy `bytes` into a fresh guest region.
pub fn pass_bytes<H: GuestHeap + ?Sized>(heap: &mut H, bytes: &[u8]) -> Result<Marshalled, BridgeError> {
    let len = region_len(bytes.len())?;
    let ptr = heap.malloc(len, 1)?;

    let (data, views) = heap.memory();
    views.invalidate();
    views.bytes_mut(data).write(ptr, bytes)?;

    trace!(ptr, len, "Passed bytes to guest");
    Ok(Marshalled { ptr, len })
}

/// Copy `s` into a fresh guest region as UTF-8.
///
/// The region is first sized to the character count and filled with the
/// ASCII prefix. If a multi-byte character follows, it is resized to hold
/// the worst case for the remaining characters, the suffix is copied, and
/// the region is shrunk to the exact encoded length.
pub fn pass_string<H: GuestHeap + ?Sized>(heap: &mut H, s: &str) -> Result<Marshalled, BridgeError> {
    let ascii = s.bytes().take_while(u8::is_ascii).count();
    let rest = &s[ascii..];
    let rest_chars = region_len(rest.chars().count())?;
    let ascii_len = region_len(ascii)?;
    let char_count = ascii_len + rest_chars;

    let mut ptr = heap.malloc(char_count, 1)?;
    {
        let (data, views) = heap.memory();
        views.invalidate();
        views.bytes_mut(data).write(ptr, &s.as_bytes()[..ascii])?;
    }

    if rest.is_empty() {
        trace!(ptr, len = ascii_len, "Passed ASCII string to guest");
        return Ok(Marshalled { ptr, len: ascii_len });
    }

    let reserved = rest_chars
        .checked_mul(MAX_UTF8_WIDTH)
        .and_then(|n| n.checked_add(ascii_len))
        .ok_or_else(|| too_large(s.len()))?;
    ptr = heap.realloc(ptr, char_count, reserved, 1)?;

    let len = ascii_len + region_len(rest.len())?;
    {
        let (data, views) = heap.memory();
        views.invalidate();
        let suffix = ptr.checked_add(ascii_len).ok_or(MarshalError::OutOfBounds {
            ptr,
            len: reserved,
            size: data.len(),
        })?;
        views.bytes_mut(data).write(suffix, rest.as_bytes())?;
    }

    ptr = heap.realloc(ptr, reserved, len, 1)?;
    heap.memory().1.invalidate();

    trace!(ptr, len, reserved, "Passed UTF-8 string to guest");
    Ok(Marshalled { ptr, len })
}

/// Copy `len` bytes at `ptr` out of guest memory.
pub fn read_bytes(views: &mut MemoryViews, data: &[u8], ptr: u32, len: u32) -> Result<Vec<u8>, MarshalError> {
    Ok(views.bytes(data).read(ptr, len)?.to_vec())
}

/// Decode `len` bytes at `ptr` as strict UTF-8.
pub fn read_string(views: &mut MemoryViews, data: &[u8], ptr: u32, len: u32) -> Result<String, MarshalError> {
    let bytes = views.bytes(data).read(ptr, len)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|source| MarshalError::InvalidUtf8 { ptr, len, source })
}

fn region_len(len: usize) -> Result<u32, BridgeError> {
    u32::try_from(len).map_err(|_| too_large(len))
}

fn too_large(len: usize) -> BridgeError {
    BridgeError::conversion(format!(
        "{len} bytes do not fit in 32-bit guest memory"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bump allocator over a `Vec` that replaces its buffer on every growth,
    /// the way a grown wasm memory may move.
    #[derive(Debug, Default)]
    struct TestHeap {
        data: Vec<u8>,
        views: MemoryViews,
        next: u32,
        reallocs: Vec<(u32, u32, u32)>,
    }

    impl TestHeap {
        fn new() -> Self {
            Self {
                data: vec![0; 16],
                next: 8,
                ..Self::default()
            }
        }

        fn grow_to(&mut self, end: usize) {
            if end > self.data.len() {
                let mut grown = vec![0; end.next_power_of_two()];
                grown[..self.data.len()].copy_from_slice(&self.data);
                self.data = grown;
            }
        }
    }

    impl GuestHeap for TestHeap {
        fn malloc(&mut self, size: u32, _align: u32) -> Result<u32, BridgeError> {
            let ptr = self.next;
            self.next += size;
            self.grow_to(self.next as usize);
            Ok(ptr)
        }

        fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32, BridgeError> {
            self.reallocs.push((ptr, old_size, new_size));
            if ptr + old_size == self.next {
                self.next = ptr + new_size;
                self.grow_to(self.next as usize);
                return Ok(ptr);
            }
            let moved = self.malloc(new_size, align)?;
            let keep = old_size.min(new_size) as usize;
            self.data
                .copy_within(ptr as usize..ptr as usize + keep, moved as usize);
            Ok(moved)
        }

        fn memory(&mut self) -> (&mut [u8], &mut MemoryViews) {
            (&mut self.data, &mut self.views)
        }
    }

    fn round_trip_string(s: &str) -> (String, Marshalled, TestHeap) {
        let mut heap = TestHeap::new();
        let region = pass_string(&mut heap, s).unwrap();
        let text = read_string(&mut heap.views, &heap.data, region.ptr, region.len).unwrap();
        (text, region, heap)
    }

    #[test]
    fn test_bytes_round_trip_across_growth() {
        for len in [0usize, 1, 7, 300, 70_000] {
            let mut heap = TestHeap::new();
            #[allow(clippy::cast_possible_truncation)]
            let bytes: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();

            let region = pass_bytes(&mut heap, &bytes).unwrap();

            assert_eq!(region.len as usize, len);
            let copy = read_bytes(&mut heap.views, &heap.data, region.ptr, region.len).unwrap();
            assert_eq!(copy, bytes);
        }
    }

    #[test]
    fn test_ascii_string_takes_fast_path() {
        let (text, region, heap) = round_trip_string("artifact.json");

        assert_eq!(text, "artifact.json");
        assert_eq!(region.len, 13);
        assert!(heap.reallocs.is_empty());
    }

    #[test]
    fn test_empty_string() {
        let (text, region, heap) = round_trip_string("");

        assert_eq!(text, "");
        assert_eq!(region.len, 0);
        assert!(heap.reallocs.is_empty());
    }

    #[test]
    fn test_multibyte_strings_round_trip() {
        for s in ["café", "日本語", "naïve résumé", "emoji 🦀 crab", "𝄞"] {
            let (text, region, _) = round_trip_string(s);
            assert_eq!(text, s);
            assert_eq!(region.len as usize, s.len());
        }
    }

    #[test]
    fn test_multibyte_reserves_worst_case_then_shrinks() {
        let (_, region, heap) = round_trip_string("ab🦀🦀");

        // 2 ASCII bytes, 2 remaining chars of up to 4 bytes each.
        assert_eq!(heap.reallocs.len(), 2);
        assert_eq!(heap.reallocs[0].1, 4);
        assert_eq!(heap.reallocs[0].2, 2 + 2 * MAX_UTF8_WIDTH);
        assert_eq!(heap.reallocs[1].1, 10);
        assert_eq!(heap.reallocs[1].2, 10);
        assert_eq!(region.len, 10);
    }

    /// Heap whose allocator hands back a region at the top of the address space.
    #[derive(Debug, Default)]
    struct WrappingHeap {
        data: Vec<u8>,
        views: MemoryViews,
    }

    impl GuestHeap for WrappingHeap {
        fn malloc(&mut self, _size: u32, _align: u32) -> Result<u32, BridgeError> {
            Ok(0)
        }

        fn realloc(&mut self, _ptr: u32, _old: u32, _new: u32, _align: u32) -> Result<u32, BridgeError> {
            Ok(u32::MAX - 1)
        }

        fn memory(&mut self) -> (&mut [u8], &mut MemoryViews) {
            (&mut self.data, &mut self.views)
        }
    }

    #[test]
    fn test_realloc_near_address_space_end_fails() {
        let mut heap = WrappingHeap {
            data: vec![0; 64],
            ..WrappingHeap::default()
        };

        let err = pass_string(&mut heap, "ab🦀").unwrap_err();

        assert!(matches!(
            err,
            BridgeError::Marshal(MarshalError::OutOfBounds { ptr, .. }) if ptr == u32::MAX - 1
        ));
        // Nothing was written at a wrapped-around address.
        assert_eq!(&heap.data[..2], b"ab");
        assert!(heap.data[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_string_is_strict() {
        let mut heap = TestHeap::new();
        let region = pass_bytes(&mut heap, &[b'o', b'k', 0xC3, 0x28]).unwrap();

        let err = read_string(&mut heap.views, &heap.data, region.ptr, region.len).unwrap_err();

        assert!(matches!(err, MarshalError::InvalidUtf8 { len: 4, .. }));
    }

    #[test]
    fn test_read_out_of_bounds() {
        let mut heap = TestHeap::new();
        let size = heap.data.len();

        let err = read_bytes(&mut heap.views, &heap.data, 4, 64).unwrap_err();

        assert_eq!(err, MarshalError::OutOfBounds { ptr: 4, len: 64, size });
    }

    #[test]
    fn test_views_follow_replaced_buffer() {
        let mut heap = TestHeap::new();
        heap.views.bytes(&heap.data);
        let before = heap.views.byte_binding().unwrap();

        pass_bytes(&mut heap, &[7; 1000]).unwrap();

        let after = heap.views.byte_binding().unwrap();
        assert_ne!(before, after);
        assert_eq!(after.len(), heap.data.len());
    }
}
