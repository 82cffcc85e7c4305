use core::cell::UnsafeCell;
use core::mem;
use core::ptr::{self, NonNull};

/// How many bytes one boundary tag occupies in the backing buffer.
pub const TAG_SIZE: usize = mem::size_of::<i32>();

/// How many bytes a block spends on bookkeeping (its begin-tag and end-tag).
pub const TAGS_SIZE: usize = 2 * TAG_SIZE;

/// Whether a block is allocated or free
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum BlockState {
    Free,
    Allocated,
}

/// A boundary tag as it is stored at both ends of a block.
///
/// The magnitude is the payload length of the block in bytes, the sign encodes its state:
/// positive means free, negative means allocated.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub(crate) struct Tag(i32);

impl Tag {
    pub fn new(payload_len: usize, state: BlockState) -> Self {
        debug_assert!(payload_len > 0, "blocks must carry a payload");
        debug_assert!(payload_len <= i32::MAX as usize);
        let len = payload_len as i32;
        match state {
            BlockState::Free => Self(len),
            BlockState::Allocated => Self(-len),
        }
    }

    /// The length of the payload that is governed by this tag.
    pub fn payload_len(self) -> usize {
        self.0.unsigned_abs() as usize
    }

    /// The length of the whole block including both of its tags.
    pub fn span(self) -> usize {
        self.payload_len() + TAGS_SIZE
    }

    pub fn state(self) -> BlockState {
        if self.0 > 0 {
            BlockState::Free
        } else {
            BlockState::Allocated
        }
    }

    pub fn is_free(self) -> bool {
        self.state() == BlockState::Free
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

/// The backing buffer of an arena.
///
/// All byte reinterpretation of the arena happens here. Blocks are addressed by their byte offset from the start
/// of the buffer; typed pointers only exist at the boundary to the caller.
///
/// The bytes live inside an [`UnsafeCell`] so that payload pointers which were handed out earlier stay valid while
/// the arena keeps rewriting tags through a shared reference.
#[repr(C)]
pub(crate) struct Storage<T, const N: usize> {
    // aligns the start of `bytes` for `T`
    _align: [T; 0],
    bytes: UnsafeCell<[u8; N]>,
}

impl<T, const N: usize> Storage<T, N> {
    pub fn new() -> Self {
        Self {
            _align: [],
            bytes: UnsafeCell::new([0u8; N]),
        }
    }

    fn base(&self) -> *mut u8 {
        self.bytes.get().cast()
    }

    /// Read the tag located at the given byte offset.
    pub fn read_tag(&self, offset: usize) -> Tag {
        assert!(
            offset + TAG_SIZE <= N,
            "tag at offset {offset} does not lie inside the backing buffer"
        );
        // Safety: the range is inside the buffer and tags are accessed unaligned
        Tag(unsafe { ptr::read_unaligned(self.base().add(offset).cast::<i32>()) })
    }

    /// Write a tag to the given byte offset.
    pub fn write_tag(&self, offset: usize, tag: Tag) {
        assert!(
            offset + TAG_SIZE <= N,
            "tag at offset {offset} does not lie inside the backing buffer"
        );
        // Safety: the range is inside the buffer and tags are accessed unaligned
        unsafe { ptr::write_unaligned(self.base().add(offset).cast::<i32>(), tag.0) }
    }

    /// Write begin-tag and end-tag of the block starting at `offset`.
    pub fn write_block(&self, offset: usize, payload_len: usize, state: BlockState) {
        let tag = Tag::new(payload_len, state);
        self.write_tag(offset, tag);
        self.write_tag(offset + TAG_SIZE + payload_len, tag);
    }

    /// A pointer to the payload of the block whose begin-tag is located at `offset`.
    pub fn payload_ptr(&self, offset: usize) -> NonNull<T> {
        assert!(offset + TAG_SIZE <= N);
        // Safety: the offset is inside the buffer so the resulting pointer is derived from a non-null base
        unsafe { NonNull::new_unchecked(self.base().add(offset + TAG_SIZE).cast()) }
    }

    /// The byte offset of `ptr` if it points into the buffer.
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let start = self.base() as usize;
        let addr = ptr as usize;
        if addr >= start && addr < start + N {
            Some(addr - start)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tag_sign_encodes_state() {
        let free = Tag::new(12, BlockState::Free);
        let used = Tag::new(12, BlockState::Allocated);

        assert_eq!(free.raw(), 12);
        assert_eq!(used.raw(), -12);
        assert_eq!(free.payload_len(), used.payload_len());
        assert_eq!(free.state(), BlockState::Free);
        assert_eq!(used.state(), BlockState::Allocated);
        assert_eq!(free.span(), 12 + TAGS_SIZE);
    }

    #[test]
    fn test_storage_tags_at_unaligned_offsets() {
        let storage = Storage::<u8, 16>::new();
        storage.write_tag(1, Tag::new(3, BlockState::Allocated));
        storage.write_tag(8, Tag::new(3, BlockState::Free));

        assert_eq!(storage.read_tag(1), Tag::new(3, BlockState::Allocated));
        assert_eq!(storage.read_tag(8), Tag::new(3, BlockState::Free));
    }

    #[test]
    fn test_write_block_sets_both_tags() {
        let storage = Storage::<u32, 24>::new();
        storage.write_block(0, 16, BlockState::Free);

        assert_eq!(storage.read_tag(0), Tag::new(16, BlockState::Free));
        assert_eq!(storage.read_tag(20), Tag::new(16, BlockState::Free));
    }

    #[test]
    fn test_offset_of() {
        let storage = Storage::<u32, 24>::new();
        let payload = storage.payload_ptr(0);

        assert_eq!(storage.offset_of(payload.as_ptr().cast()), Some(TAG_SIZE));
        assert_eq!(
            storage.offset_of(storage.base().wrapping_add(24)),
            None,
            "one past the end is outside of the buffer"
        );
        assert_eq!(storage.offset_of(core::ptr::null()), None);
    }

    #[test]
    fn test_storage_is_aligned_for_element() {
        let storage = Storage::<u64, 32>::new();
        assert_eq!(storage.base() as usize % mem::align_of::<u64>(), 0);
    }

    #[test]
    #[should_panic]
    fn test_read_tag_out_of_bounds() {
        let storage = Storage::<u8, 8>::new();
        storage.read_tag(5);
    }
}
