//! Implementation of the boundary tagged arena.
//!
//! The main type is the [`TaggedArena`] which implements the [`ElementAllocator`](crate::ElementAllocator) trait
//! for a single element type `T` on top of a buffer of `N` bytes that is embedded in the arena itself.
//!
//! The buffer is partitioned, without any gaps, into blocks of the form `[begin-tag][payload][end-tag]`.
//! Both tags are `i32` values holding the payload length, positive for free blocks and negative for allocated ones.
//!
//! - Allocation picks the *first* free block that is large enough. If the part of that block which is not needed
//!   could hold at least one more element together with its tags, the block is split. Otherwise the whole block is
//!   handed out.
//! - Deallocation marks the block free and then merges adjacent free blocks until no two free blocks border each
//!   other anymore.
//!
//! # Example
//!
//! ## Perform a raw allocation and deallocation
//!
//! ```rust
//! # use tag_arena::{ElementAllocator, TaggedArena};
//! #
//! let arena = TaggedArena::<u64, 128>::new().unwrap();
//!
//! let p = arena.allocate(2).unwrap();
//! unsafe {
//!     arena.construct(p, 42);
//!     arena.destroy(p);
//!     arena.deallocate(p, 2).unwrap();
//! }
//! assert_eq!(arena.free_bytes(), 128 - 8);
//! ```
//!
//! ## Use the arena with a box
//! ```rust
//! # use tag_arena::{ArenaBox, TaggedArena};
//! #
//! let arena = TaggedArena::<u32, 64>::new().unwrap();
//! let b = ArenaBox::new(0x55, &arena).unwrap();
//! assert_eq!(*b, 0x55);
//! ```
//!
mod arena;
mod tags;


pub use arena::{BlockInfo, Blocks, TaggedArena};
pub use tags::{BlockState, TAGS_SIZE, TAG_SIZE};
