//! The contiguous heap region and the raw accessors every other layer goes through.
//!
//! Everything above this module addresses memory by byte offsets from the heap
//! base. Translation to and from real addresses, and every raw read or write,
//! happens here.

use std::ptr::{self, NonNull};

use tracing::warn;

use crate::{
  DSIZE,
  error::{AllocError, AllocResult},
  source::HeapSource,
};

pub(crate) struct Heap<S: HeapSource> {
  source: S,
  base: NonNull<u8>,
  /// Offset one past the last byte of the heap.
  brk: usize,
}

impl<S: HeapSource> Heap<S> {
  /// Takes the first `initial` bytes from `source`, padding the start so the
  /// heap base lands on the alignment unit.
  pub(crate) fn new(
    mut source: S,
    initial: usize,
  ) -> AllocResult<Self> {
    let start = source
      .grow(initial)
      .ok_or(AllocError::OutOfMemory { requested: initial })?;

    let lead = start.as_ptr().align_offset(DSIZE);
    if lead != 0 {
      let found = source
        .grow(lead)
        .ok_or(AllocError::OutOfMemory { requested: lead })?;
      let expected = start.as_ptr() as usize + initial;
      if found.as_ptr() as usize != expected {
        return Err(AllocError::Discontiguous {
          expected,
          found: found.as_ptr() as usize,
        });
      }
    }

    Ok(Self {
      source,
      base: unsafe { start.add(lead) },
      brk: initial,
    })
  }

  /// Extends the heap by `bytes` and returns the offset where the new bytes begin.
  pub(crate) fn grow(
    &mut self,
    bytes: usize,
  ) -> AllocResult<usize> {
    let old_brk = self.brk;

    // Links are stored as 32-bit offsets, so the heap cannot outgrow them.
    let fits = old_brk
      .checked_add(bytes)
      .is_some_and(|end| end <= u32::MAX as usize);
    if !fits {
      return Err(AllocError::OutOfMemory { requested: bytes });
    }

    let found = self
      .source
      .grow(bytes)
      .ok_or(AllocError::OutOfMemory { requested: bytes })?;

    let expected = self.base.as_ptr() as usize + old_brk;
    if found.as_ptr() as usize != expected {
      warn!(
        "Heap source returned {:?} instead of continuing the heap at {:#x}",
        found, expected
      );
      return Err(AllocError::Discontiguous {
        expected,
        found: found.as_ptr() as usize,
      });
    }

    self.brk += bytes;
    Ok(old_brk)
  }

  pub(crate) fn size(&self) -> usize {
    self.brk
  }

  pub(crate) fn base_addr(&self) -> usize {
    self.base.as_ptr() as usize
  }

  pub(crate) fn word(
    &self,
    offset: usize,
  ) -> u32 {
    debug_assert!(offset % 4 == 0 && offset + 4 <= self.brk, "word {offset:#x} out of heap");
    // SAFETY: offsets come from the allocator's own bookkeeping and stay inside
    // [0, brk); the base is 8-aligned so a 4-aligned offset is word-aligned.
    unsafe { self.base.as_ptr().add(offset).cast::<u32>().read() }
  }

  pub(crate) fn set_word(
    &mut self,
    offset: usize,
    value: u32,
  ) {
    debug_assert!(offset % 4 == 0 && offset + 4 <= self.brk, "word {offset:#x} out of heap");
    // SAFETY: see `word`.
    unsafe { self.base.as_ptr().add(offset).cast::<u32>().write(value) }
  }

  pub(crate) fn ptr_at(
    &self,
    offset: usize,
  ) -> *mut u8 {
    unsafe { self.base.as_ptr().add(offset) }
  }

  /// Offset of a pointer previously produced by [`Heap::ptr_at`].
  pub(crate) fn offset_of(
    &self,
    ptr: *const u8,
  ) -> usize {
    (ptr as usize).wrapping_sub(self.base_addr())
  }

  pub(crate) fn copy(
    &mut self,
    src: usize,
    dst: usize,
    len: usize,
  ) {
    debug_assert!(src + len <= self.brk && dst + len <= self.brk);
    // SAFETY: both ranges lie inside the heap and belong to distinct blocks.
    unsafe { ptr::copy_nonoverlapping(self.ptr_at(src), self.ptr_at(dst), len) }
  }

  pub(crate) fn fill_zero(
    &mut self,
    offset: usize,
    len: usize,
  ) {
    debug_assert!(offset + len <= self.brk);
    unsafe { ptr::write_bytes(self.ptr_at(offset), 0, len) }
  }
}
