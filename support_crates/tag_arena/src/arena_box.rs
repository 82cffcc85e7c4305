use crate::traits::{ArenaError, ElementAllocator};
use core::fmt::{Debug, Display, Formatter};
use core::marker::PhantomData;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

/// A box that keeps its value in storage taken from an [`ElementAllocator`].
///
/// # Generic Arguments
/// - `'alloc` is the lifetime of the allocator from which the storage was taken.
/// - `T` is the type of the boxed value.
/// - `A` is the [`ElementAllocator`] implementation.
pub struct ArenaBox<'alloc, T, A: ElementAllocator<T>> {
    /// The value managed by this box
    inner: NonNull<T>,
    /// The allocator from which the storage was taken
    source_alloc: &'alloc A,
    _value: PhantomData<T>,
}

impl<'alloc, T, A: ElementAllocator<T>> ArenaBox<'alloc, T, A> {
    /// Move the given value into storage allocated from `allocator`.
    ///
    /// Fails with [`ArenaError::Unaligned`] if the allocator returned storage that is not suitably aligned to hand out
    /// references to `T`. The storage is given back to the allocator in that case.
    pub fn new(value: T, allocator: &'alloc A) -> Result<Self, ArenaError> {
        let p = allocator.allocate(1)?;

        let align = mem::align_of::<T>();
        if p.as_ptr() as usize % align != 0 {
            log::trace!("storage at {:p} is not aligned to {} bytes", p, align);
            // Safety: p was just allocated with n = 1 and holds no value
            unsafe { allocator.deallocate(p, 1)? };
            return Err(ArenaError::Unaligned { align });
        }

        // Safety: p is freshly allocated and aligned
        unsafe { allocator.construct(p, value) };
        Ok(Self {
            inner: p,
            source_alloc: allocator,
            _value: PhantomData,
        })
    }

    /// Consume the box and leak the held value.
    ///
    /// The storage is never returned to the allocator.
    pub fn leak(self) -> &'alloc mut T {
        let result = self.inner;
        mem::forget(self);
        unsafe { &mut *result.as_ptr() }
    }

    /// Consume the box, returning its raw parts.
    ///
    /// After calling this function, the caller is responsible for destroying `T` and releasing the storage back to
    /// the allocator.
    /// The easiest way to to this is to construct another box using [`from_raw()`](ArenaBox::from_raw) and then
    /// dropping it.
    pub fn into_raw(self) -> (NonNull<T>, &'alloc A) {
        let result = (self.inner, self.source_alloc);
        mem::forget(self);
        result
    }

    /// Construct a box from raw parts.
    ///
    /// # Safety
    /// `data` must hold a live, aligned value in storage that was allocated from `source_alloc` for exactly one
    /// element, e.g. as returned by [`into_raw()`](ArenaBox::into_raw).
    pub unsafe fn from_raw(data: NonNull<T>, source_alloc: &'alloc A) -> Self {
        Self {
            inner: data,
            source_alloc,
            _value: PhantomData,
        }
    }
}

impl<'alloc, T, A: ElementAllocator<T>> Drop for ArenaBox<'alloc, T, A> {
    fn drop(&mut self) {
        unsafe {
            self.source_alloc.destroy(self.inner);
            if let Err(e) = self.source_alloc.deallocate(self.inner, 1) {
                log::warn!("could not return storage of a box to its allocator: {}", e);
            }
        }
    }
}

impl<'alloc, T, A: ElementAllocator<T>> Deref for ArenaBox<'alloc, T, A> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { self.inner.as_ref() }
    }
}

impl<'alloc, T, A: ElementAllocator<T>> DerefMut for ArenaBox<'alloc, T, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.inner.as_mut() }
    }
}

impl<'alloc, T: Display, A: ElementAllocator<T>> Display for ArenaBox<'alloc, T, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Display::fmt(&**self, f)
    }
}

impl<'alloc, T: Debug, A: ElementAllocator<T>> Debug for ArenaBox<'alloc, T, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::TaggedArena;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::format;

    static DROPPED: AtomicUsize = AtomicUsize::new(0);

    struct DropCounter(u32);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            DROPPED.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_box_value_roundtrip() {
        let arena = TaggedArena::<u32, 64>::new().unwrap();
        let mut b = ArenaBox::new(0x11, &arena).unwrap();
        assert_eq!(*b, 0x11);
        *b = 0x22;
        assert_eq!(*b, 0x22);
        assert_eq!(format!("{}", b), "34");
        assert_eq!(format!("{:?}", b), "34");
    }

    #[test]
    fn test_box_drop_releases_storage() {
        let arena = TaggedArena::<u32, 64>::new().unwrap();
        let initial_free = arena.free_bytes();
        {
            let _b1 = ArenaBox::new(1, &arena).unwrap();
            let _b2 = ArenaBox::new(2, &arena).unwrap();
            assert!(arena.free_bytes() < initial_free);
        }
        assert_eq!(arena.free_bytes(), initial_free);
        assert_eq!(arena.blocks().count(), 1);
    }

    #[test]
    fn test_box_runs_destructor() {
        let arena = TaggedArena::<DropCounter, 64>::new().unwrap();
        let b = ArenaBox::new(DropCounter(3), &arena).unwrap();
        assert_eq!(b.0, 3);
        assert_eq!(DROPPED.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(DROPPED.load(Ordering::SeqCst), 1);
        assert!(arena.is_valid());
        assert_eq!(arena.free_bytes(), 64 - 8);
    }

    #[test]
    fn test_box_fails_when_arena_is_full() {
        let arena = TaggedArena::<u32, 12>::new().unwrap();
        let _b = ArenaBox::new(1, &arena).unwrap();
        assert_eq!(
            ArenaBox::new(2, &arena).unwrap_err(),
            ArenaError::OutOfMemory
        );
    }

    #[test]
    fn test_box_rejects_unaligned_storage() {
        // u64 payloads start 4 bytes past the 8 byte aligned buffer start
        let arena = TaggedArena::<u64, 64>::new().unwrap();
        assert_eq!(
            ArenaBox::new(7u64, &arena).unwrap_err(),
            ArenaError::Unaligned { align: 8 }
        );
        assert_eq!(arena.free_bytes(), 64 - 8);
    }

    #[test]
    fn test_into_raw_and_from_raw() {
        let arena = TaggedArena::<u16, 32>::new().unwrap();
        let b = ArenaBox::new(0x55, &arena).unwrap();
        let (raw, alloc) = b.into_raw();
        assert_eq!(unsafe { raw.as_ptr().read() }, 0x55);

        let b = unsafe { ArenaBox::from_raw(raw, alloc) };
        assert_eq!(*b, 0x55);
        drop(b);
        assert_eq!(arena.blocks().count(), 1);
    }

    #[test]
    fn test_leak_keeps_block_allocated() {
        let arena = TaggedArena::<u32, 64>::new().unwrap();
        let value = ArenaBox::new(9, &arena).unwrap().leak();
        *value += 1;
        assert_eq!(*value, 10);
        assert_eq!(arena.blocks().next().unwrap().state, crate::BlockState::Allocated);
    }
}
