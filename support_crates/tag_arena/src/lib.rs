#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

mod arena_box;
mod traits;
pub mod tagged_arena;

pub use arena_box::ArenaBox;
pub use tagged_arena::{BlockInfo, BlockState, TaggedArena};
pub use traits::{ArenaError, ElementAllocator};
