//! Raw memory sources the heap grows into.

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};
use tracing::debug;

use crate::DSIZE;

/// Default capacity of an [`ArenaSource`]: 20 MiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 20 * (1 << 20);

/// Largest arena a layout can describe; bigger requests are clamped and then
/// fail in the global allocator.
const MAX_ARENA_CAPACITY: usize = isize::MAX as usize & !(DSIZE - 1);

/// The single growth primitive the allocator relies on.
///
/// # Safety
///
/// A successful `grow(n)` must return a pointer to `n` readable and writable
/// bytes that stay valid, and are not handed out again, for as long as the
/// source lives. The allocator checks contiguity itself.
pub unsafe trait HeapSource {
  /// Extends the region by `increment` bytes and returns the start of the new
  /// bytes (the old break), or `None` when the memory cannot be provided.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>>;
}

/// Grows the process data segment with `sbrk(2)`.
///
/// Only one `SbrkSource` should be active per process, and nothing else may
/// move the program break while it is in use; a growth that does not continue
/// the previous break is rejected by the heap.
#[derive(Debug, Default)]
pub struct SbrkSource;

impl SbrkSource {
  pub fn new() -> Self {
    Self
  }
}

unsafe impl HeapSource for SbrkSource {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let increment = intptr_t::try_from(increment).ok()?;

    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return None;
    }

    NonNull::new(address as *mut u8)
  }
}

/// A fixed-capacity region reserved up front, grown by bumping a break offset.
///
/// The region never moves, so pointers into it stay valid until the source is
/// dropped. Independent arenas give independent heaps.
#[derive(Debug)]
pub struct ArenaSource {
  start: NonNull<u8>,
  layout: Layout,
  brk: usize,
}

impl ArenaSource {
  pub fn new() -> Self {
    Self::with_capacity(DEFAULT_ARENA_CAPACITY)
  }

  /// Reserves `capacity` zeroed bytes aligned to the allocator's alignment unit.
  ///
  /// Aborts through [`alloc::handle_alloc_error`] if the reservation itself fails.
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = capacity.clamp(DSIZE, MAX_ARENA_CAPACITY);
    // SAFETY: DSIZE is a power of two, and the clamped capacity rounded up to
    // DSIZE stays within isize::MAX.
    let layout = unsafe { Layout::from_size_align_unchecked(capacity, DSIZE) };

    let start = unsafe { alloc::alloc_zeroed(layout) };
    let Some(start) = NonNull::new(start) else {
      alloc::handle_alloc_error(layout);
    };

    debug!("Reserved {} byte arena at {:?}", capacity, start);

    Self {
      start,
      layout,
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.brk
  }
}

impl Default for ArenaSource {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl HeapSource for ArenaSource {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let end = self.brk.checked_add(increment)?;

    if end > self.capacity() {
      return None;
    }

    let old_brk = unsafe { self.start.add(self.brk) };
    self.brk = end;

    Some(old_brk)
  }
}

impl Drop for ArenaSource {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.start.as_ptr(), self.layout) };
  }
}
