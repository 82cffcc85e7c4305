use crate::tagged_arena::tags::{BlockState, Storage, Tag, TAGS_SIZE, TAG_SIZE};
use crate::{ArenaError, ElementAllocator};
use core::fmt::{self, Debug, Formatter};
use core::mem;
use core::ptr::{self, NonNull};

/// A snapshot of one block in the arena's tag chain.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct BlockInfo {
    /// Byte offset of the block's begin-tag inside the backing buffer.
    pub offset: usize,
    /// Usable bytes between the two tags.
    pub payload_len: usize,
    pub state: BlockState,
}

impl BlockInfo {
    /// The number of bytes the block occupies including both of its tags.
    pub fn span(&self) -> usize {
        self.payload_len + TAGS_SIZE
    }
}

/// Iterator over the blocks of a [`TaggedArena`] in buffer order.
pub struct Blocks<'arena, T, const N: usize> {
    storage: &'arena Storage<T, N>,
    offset: usize,
}

impl<'arena, T, const N: usize> Iterator for Blocks<'arena, T, N> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + TAG_SIZE > N {
            return None;
        }

        let tag = self.storage.read_tag(self.offset);
        let block = BlockInfo {
            offset: self.offset,
            payload_len: tag.payload_len(),
            state: tag.state(),
        };
        self.offset += tag.span();
        Some(block)
    }
}

/// A fixed-capacity allocator for elements of type `T` which attaches boundary tags to every block of its `N` byte
/// backing buffer.
///
/// ```text
///   ┌──────────────────────────── N bytes ─────────────────────────────┐
///   │                                                                  │
///   [-8][ 8 bytes used ][-8][+12][   12 bytes free   ][+12][-4][ .. ][-4]
///    ^                   ^
///    begin-tag           end-tag
/// ```
///
/// Each tag is an `i32` whose magnitude is the payload length of its block. Free blocks carry positive tags,
/// allocated blocks negative ones. Free blocks are never adjacent to each other because every deallocation merges
/// the freed block with all of its free neighbours.
///
/// The backing buffer is embedded in the arena itself so no memory is ever requested from elsewhere.
/// Pointers handed out by the arena point into that buffer which means that the arena must not be moved while
/// allocations are live.
pub struct TaggedArena<T, const N: usize> {
    pub(super) storage: Storage<T, N>,
}

impl<T, const N: usize> TaggedArena<T, N> {
    const ELEM_SIZE: usize = {
        assert!(
            mem::size_of::<T>() > 0,
            "zero-sized types cannot be tracked with boundary tags"
        );
        assert!(
            N <= i32::MAX as usize,
            "backing memory is too large for the tags to describe"
        );
        mem::size_of::<T>()
    };

    /// The smallest block which is still able to hold a single element.
    const MIN_BLOCK_SIZE: usize = Self::ELEM_SIZE + TAGS_SIZE;

    /// Create a new arena whose whole buffer is one free block.
    ///
    /// Fails with [`ArenaError::OutOfMemory`] if `N` cannot hold at least one `T` and the two tags around it.
    pub fn new() -> Result<Self, ArenaError> {
        if N < Self::MIN_BLOCK_SIZE {
            return Err(ArenaError::OutOfMemory);
        }

        let storage = Storage::new();
        storage.write_block(0, N - TAGS_SIZE, BlockState::Free);
        log::debug!(
            "created tagged arena with {} bytes for elements of {} bytes",
            N,
            Self::ELEM_SIZE
        );

        let arena = Self { storage };
        debug_assert!(arena.is_valid(), "freshly created arena is not valid");
        Ok(arena)
    }

    /// The size of the backing buffer in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Iterate over all blocks in buffer order.
    pub fn blocks(&self) -> Blocks<'_, T, N> {
        Blocks {
            storage: &self.storage,
            offset: 0,
        }
    }

    /// The summed payload of all free blocks.
    pub fn free_bytes(&self) -> usize {
        self.blocks()
            .filter(|block| block.state == BlockState::Free)
            .map(|block| block.payload_len)
            .sum()
    }

    /// The payload of the largest free block or `0` if everything is allocated.
    pub fn largest_free_block(&self) -> usize {
        self.blocks()
            .filter(|block| block.state == BlockState::Free)
            .map(|block| block.payload_len)
            .max()
            .unwrap_or(0)
    }

    /// Read the raw tag value stored at the given byte offset.
    ///
    /// Returns `None` if no tag fits at that offset.
    pub fn tag_at(&self, offset: usize) -> Option<i32> {
        (offset + TAG_SIZE <= N).then(|| self.storage.read_tag(offset).raw())
    }

    /// Check the consistency of the tag chain.
    ///
    /// The chain is walked from offset `0`. Every begin-tag must be matched by an identical end-tag, no two adjacent
    /// blocks may both be free and the last block must end exactly at the end of the buffer.
    ///
    /// O(1) in space, O(blocks) in time.
    pub fn is_valid(&self) -> bool {
        let mut offset = 0;
        let mut prev_free = false;

        while offset < N {
            if offset + TAG_SIZE > N {
                return false;
            }

            let begin_tag = self.storage.read_tag(offset);
            if begin_tag.raw() == 0 {
                return false;
            }

            let end_offset = offset + TAG_SIZE + begin_tag.payload_len();
            if end_offset + TAG_SIZE > N || self.storage.read_tag(end_offset) != begin_tag {
                return false;
            }

            if prev_free && begin_tag.is_free() {
                return false;
            }

            prev_free = begin_tag.is_free();
            offset = end_offset + TAG_SIZE;
        }

        offset == N
    }

    /// Merge adjacent free blocks until none are left.
    ///
    /// After each merge the scan starts over at the beginning of the buffer because the merged block may now border
    /// another free block.
    fn coalesce(&self) {
        'scan: loop {
            let mut prev: Option<BlockInfo> = None;
            for block in self.blocks() {
                if let Some(left) = prev {
                    if left.state == BlockState::Free && block.state == BlockState::Free {
                        let merged_len = left.payload_len + block.payload_len + TAGS_SIZE;
                        self.storage
                            .write_block(left.offset, merged_len, BlockState::Free);
                        log::trace!(
                            "merged free blocks at offsets {} and {} into {} bytes",
                            left.offset,
                            block.offset,
                            merged_len
                        );
                        continue 'scan;
                    }
                }
                prev = Some(block);
            }
            break;
        }
    }

    /// Read the end-tag of a block if the block lies inside the buffer.
    fn end_tag(&self, block: &BlockInfo) -> Option<Tag> {
        let end_offset = block.offset + TAG_SIZE + block.payload_len;
        (end_offset + TAG_SIZE <= N).then(|| self.storage.read_tag(end_offset))
    }
}

impl<T, const N: usize> ElementAllocator<T> for TaggedArena<T, N> {
    fn allocate(&self, n: usize) -> Result<NonNull<T>, ArenaError> {
        debug_assert!(self.is_valid());
        if n == 0 {
            return Err(ArenaError::InvalidRequest);
        }

        let requested = n
            .checked_mul(Self::ELEM_SIZE)
            .ok_or(ArenaError::OutOfMemory)?;
        let needed = requested
            .checked_add(TAGS_SIZE)
            .ok_or(ArenaError::OutOfMemory)?;

        // first fit
        let block = self
            .blocks()
            .find(|block| block.state == BlockState::Free && block.span() >= needed)
            .ok_or_else(|| {
                log::trace!("no free block can hold {} bytes", requested);
                ArenaError::OutOfMemory
            })?;

        let remainder = block.span() - needed;
        if remainder < Self::MIN_BLOCK_SIZE {
            // the rest could never hold another element so the whole block is handed out
            self.storage
                .write_block(block.offset, block.payload_len, BlockState::Allocated);
            log::trace!(
                "allocated whole block of {} bytes at offset {} for {} requested bytes",
                block.payload_len,
                block.offset,
                requested
            );
        } else {
            self.storage
                .write_block(block.offset, requested, BlockState::Allocated);
            self.storage.write_block(
                block.offset + needed,
                remainder - TAGS_SIZE,
                BlockState::Free,
            );
            log::trace!(
                "allocated {} bytes at offset {}, {} bytes remain free at offset {}",
                requested,
                block.offset,
                remainder - TAGS_SIZE,
                block.offset + needed
            );
        }

        debug_assert!(self.is_valid(), "arena is invalid after allocation");
        Ok(self.storage.payload_ptr(block.offset))
    }

    unsafe fn deallocate(&self, p: NonNull<T>, n: usize) -> Result<(), ArenaError> {
        debug_assert!(self.is_valid());

        let payload_offset = self
            .storage
            .offset_of(p.as_ptr().cast())
            .ok_or(ArenaError::InvalidArgument)?;
        let offset = payload_offset
            .checked_sub(TAG_SIZE)
            .ok_or(ArenaError::InvalidArgument)?;

        // the pointer must be the start of a block that is currently allocated
        let block = self
            .blocks()
            .take_while(|block| block.offset <= offset)
            .find(|block| block.offset == offset)
            .ok_or(ArenaError::InvalidArgument)?;
        if block.state != BlockState::Allocated
            || block.payload_len < n.saturating_mul(Self::ELEM_SIZE)
        {
            return Err(ArenaError::InvalidArgument);
        }

        self.storage
            .write_block(block.offset, block.payload_len, BlockState::Free);
        log::trace!(
            "freed block of {} bytes at offset {}",
            block.payload_len,
            block.offset
        );
        self.coalesce();

        debug_assert!(self.is_valid(), "arena is invalid after deallocation");
        Ok(())
    }

    unsafe fn construct(&self, p: NonNull<T>, value: T) {
        debug_assert!(self.is_valid());
        ptr::write_unaligned(p.as_ptr(), value);
        debug_assert!(self.is_valid());
    }

    unsafe fn destroy(&self, p: NonNull<T>) {
        debug_assert!(self.is_valid());
        drop(ptr::read_unaligned(p.as_ptr()));
        debug_assert!(self.is_valid());
    }
}

/// Two arenas never compare equal, not even an arena with itself.
///
/// Every arena is its own memory pool and storage allocated from one can never be released to another, so generic
/// containers that ask whether two allocators are interchangeable must always be told no.
impl<T, const N: usize> PartialEq for TaggedArena<T, N> {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

struct BlockChain<'arena, T, const N: usize>(&'arena TaggedArena<T, N>);

impl<T, const N: usize> Debug for BlockChain<'_, T, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, block) in self.0.blocks().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let state = match block.state {
                BlockState::Free => "Free",
                BlockState::Allocated => "Used",
            };
            match self.0.end_tag(&block) {
                Some(end_tag) => write!(
                    f,
                    "[<{} {}> ... <{}>]",
                    block.payload_len,
                    state,
                    end_tag.payload_len()
                )?,
                None => write!(f, "[<{} {}> ... <?>]", block.payload_len, state)?,
            }
        }
        Ok(())
    }
}

impl<T, const N: usize> Debug for TaggedArena<T, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match f.alternate() {
            false => f
                .debug_struct("TaggedArena")
                .field("capacity", &N)
                .field("free_bytes", &self.free_bytes())
                .finish(),
            true => f
                .debug_struct("TaggedArena")
                .field("capacity", &N)
                .field("blocks", &BlockChain(self))
                .finish(),
        }
    }
}
