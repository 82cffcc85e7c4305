use core::ptr::NonNull;
use thiserror_no_std::Error;

/// The error returned when an arena operation fails
#[derive(Debug, Error, Eq, PartialEq, Copy, Clone)]
pub enum ArenaError {
    #[error("the arena has no free block large enough to satisfy the request")]
    OutOfMemory,
    #[error("at least one element must be requested")]
    InvalidRequest,
    #[error("the given pointer does not refer to an allocation of this arena")]
    InvalidArgument,
    #[error("the allocated storage is not aligned to {align} bytes")]
    Unaligned { align: usize },
}

/// An implementation of `ElementAllocator` hands out storage for `T` values and takes it back again.
///
/// This is the contract a container is written against when it wants to keep its elements in memory that is
/// not obtained from the global allocator.
pub trait ElementAllocator<T> {
    /// Attempt to allocate storage for `n` consecutive elements of `T`.
    ///
    /// The returned storage is uninitialized.
    fn allocate(&self, n: usize) -> Result<NonNull<T>, ArenaError>;

    /// Return storage to the allocator.
    ///
    /// # Safety
    /// The given storage must be *currently allocated* from this allocator.
    ///
    /// This means that:
    /// - it was previously returned by [`allocate`](ElementAllocator::allocate) with the same `n`
    /// - it has not yet been deallocated
    ///
    /// Any value that was constructed in the storage must already have been destroyed.
    unsafe fn deallocate(&self, p: NonNull<T>, n: usize) -> Result<(), ArenaError>;

    /// Move `value` into the storage at `p`.
    ///
    /// # Safety
    /// `p` must point into storage that is currently allocated from this allocator and does not hold a live value.
    unsafe fn construct(&self, p: NonNull<T>, value: T);

    /// Run the destructor of the value stored at `p`.
    ///
    /// # Safety
    /// `p` must hold a value previously placed there with [`construct`](ElementAllocator::construct) which has not
    /// yet been destroyed.
    unsafe fn destroy(&self, p: NonNull<T>);
}
