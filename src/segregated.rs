use std::ptr;

use tracing::{debug, trace, warn};

use crate::{
  CHUNK_SIZE, DSIZE, MIN_BLOCK_SIZE, WSIZE, align,
  block::{Block, Tag},
  chain::FreeLists,
  class::{FIRST_FIT_CLASSES, FREE_LIST_NUM, class_of},
  error::AllocResult,
  heap::Heap,
  source::{ArenaSource, HeapSource},
};

/// Bytes in front of the first block: one padding word and the prologue header.
pub(crate) const PROLOGUE_SIZE: usize = DSIZE;

/// Payload offset of the first real block.
pub(crate) const FIRST_BLOCK: usize = PROLOGUE_SIZE;

/// Totals gathered by walking the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_size: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
}

/// A segregated-fit allocator over one growable heap.
///
/// Free blocks are kept in [`FREE_LIST_NUM`] LIFO chains by size class. Small
/// classes are searched first-fit, large ones best-fit. Freed blocks are
/// coalesced with their neighbours immediately.
pub struct SegregatedAllocator<S: HeapSource = ArenaSource> {
  pub(crate) heap: Heap<S>,
  pub(crate) free_lists: FreeLists,
}

impl SegregatedAllocator<ArenaSource> {
  /// Creates an allocator over a private arena of `capacity` bytes.
  pub fn with_arena(capacity: usize) -> AllocResult<Self> {
    Self::new(ArenaSource::with_capacity(capacity))
  }
}

impl<S: HeapSource> SegregatedAllocator<S> {
  /// Lays down the prologue and the first free chunk.
  pub fn new(source: S) -> AllocResult<Self> {
    let mut heap = Heap::new(source, PROLOGUE_SIZE)?;

    heap.set_word(0, 0);
    heap.set_header(FIRST_BLOCK, Tag::new(0, true, true));

    let mut allocator = Self {
      heap,
      free_lists: FreeLists::new(),
    };
    allocator.extend(CHUNK_SIZE)?;

    debug!("Initialized heap at {:#x}", allocator.heap.base_addr());

    Ok(allocator)
  }

  /// Bytes obtained from the heap source so far.
  pub fn heap_size(&self) -> usize {
    self.heap.size()
  }

  /// Allocates a block with at least `size` bytes of payload, aligned to 8 bytes.
  ///
  /// Returns null for a zero-sized request or when the heap cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let Some(asize) = adjusted_size(size) else {
      warn!("Request of {} bytes cannot be represented", size);
      return ptr::null_mut();
    };

    match self.allocate_block(asize) {
      Ok(bp) => {
        trace!("Allocated {} bytes at offset {:#x} (block {})", size, bp, asize);
        self.heap.ptr_at(bp)
      }
      Err(err) => {
        warn!("Allocation of {} bytes failed: {}", size, err);
        ptr::null_mut()
      }
    }
  }

  /// Allocates `count * size` zeroed bytes. Returns null if the product is
  /// zero or overflows.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
      return ptr::null_mut();
    };

    let address = self.allocate(total);
    if !address.is_null() {
      let bp = self.heap.offset_of(address);
      self.heap.fill_zero(bp, total);
    }
    address
  }

  /// Returns a block to the heap. A null pointer is ignored.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn free(
    &mut self,
    address: *mut u8,
  ) {
    if address.is_null() {
      return;
    }

    let bp = self.heap.offset_of(address);
    let tag = self.heap.tag(bp);

    self.heap.write_free(bp, tag.size, tag.pred_allocated);

    let next = self.heap.next_block(bp);
    self.heap.set_pred_allocated(next, false);

    trace!("Freed block {:#x} of {} bytes", bp, tag.size);

    self.coalesce(bp);
  }

  /// Moves an allocation to a fresh block of `size` bytes, keeping its contents.
  ///
  /// A zero `size` frees `address` and returns null; a null `address`
  /// allocates. On failure null is returned and the old block is untouched.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn reallocate(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if size == 0 {
        self.free(address);
        return ptr::null_mut();
      }

      if address.is_null() {
        return self.allocate(size);
      }

      let new_address = self.allocate(size);
      if new_address.is_null() {
        return ptr::null_mut();
      }

      let old_bp = self.heap.offset_of(address);
      let new_bp = self.heap.offset_of(new_address);
      let copied = self.usable_size(address).min(size);
      self.heap.copy(old_bp, new_bp, copied);

      trace!("Reallocated {:#x} -> {:#x}, copied {} bytes", old_bp, new_bp, copied);

      self.free(address);

      new_address
    }
  }

  /// Payload capacity of the block at `address`; 0 for null.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn usable_size(
    &self,
    address: *const u8,
  ) -> usize {
    if address.is_null() {
      return 0;
    }

    self.heap.block_size(self.heap.offset_of(address)) - WSIZE
  }

  /// Walks every block and sums allocated and free space.
  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_size: self.heap.size(),
      ..HeapStats::default()
    };

    for (_, block) in self.blocks() {
      if block.is_free() {
        stats.free_blocks += 1;
        stats.free_bytes += block.size();
      } else {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += block.size();
      }
    }

    stats
  }

  /// Every block between the prologue and the epilogue, in address order.
  pub(crate) fn blocks(&self) -> impl Iterator<Item = (usize, Block)> + '_ {
    let mut bp = FIRST_BLOCK;

    std::iter::from_fn(move || {
      let block = self.heap.block(bp);
      if block.size() == 0 {
        return None;
      }
      let current = bp;
      bp += block.size();
      Some((current, block))
    })
  }

  fn allocate_block(
    &mut self,
    asize: usize,
  ) -> AllocResult<usize> {
    if let Some(bp) = self.find_fit(asize) {
      self.place(bp, asize);
      return Ok(bp);
    }

    let bp = self.extend(asize.max(CHUNK_SIZE))?;
    self.place(bp, asize);
    Ok(bp)
  }

  /// Grows the heap by at least `bytes`, returning the coalesced free block
  /// that now ends at the epilogue.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> AllocResult<usize> {
    let size = align!(bytes);

    // The old epilogue header becomes the header of the new block.
    let bp = self.heap.grow(size)?;
    let pred_allocated = self.heap.tag(bp).pred_allocated;

    self.heap.write_free(bp, size, pred_allocated);
    self.heap.set_header(bp + size, Tag::new(0, true, false));

    debug!("Extended heap by {} bytes to {}", size, self.heap.size());

    Ok(self.coalesce(bp))
  }

  /// Merges the free block `bp` with free neighbours and chains the result.
  fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let tag = self.heap.tag(bp);
    let next = self.heap.next_block(bp);
    let next_allocated = self.heap.is_allocated(next);

    match (tag.pred_allocated, next_allocated) {
      (true, true) => {
        self.free_lists.push_front(&mut self.heap, bp);
        bp
      }
      (true, false) => {
        let size = tag.size + self.heap.block_size(next);
        self.free_lists.remove(&mut self.heap, next);
        self.heap.write_free(bp, size, true);
        self.free_lists.push_front(&mut self.heap, bp);
        bp
      }
      (false, true) => {
        let prev = self.heap.prev_block(bp);
        let prev_tag = self.heap.tag(prev);
        let size = tag.size + prev_tag.size;
        self.free_lists.remove(&mut self.heap, prev);
        self.heap.write_free(prev, size, prev_tag.pred_allocated);
        self.free_lists.push_front(&mut self.heap, prev);
        prev
      }
      (false, false) => {
        let prev = self.heap.prev_block(bp);
        let prev_tag = self.heap.tag(prev);
        let size = tag.size + prev_tag.size + self.heap.block_size(next);
        self.free_lists.remove(&mut self.heap, prev);
        self.free_lists.remove(&mut self.heap, next);
        self.heap.write_free(prev, size, prev_tag.pred_allocated);
        self.free_lists.push_front(&mut self.heap, prev);
        prev
      }
    }
  }

  /// Searches the free lists from the class of `asize` upwards.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<usize> {
    for class in class_of(asize)..FREE_LIST_NUM {
      let mut candidates = self
        .free_lists
        .iter(&self.heap, class)
        .filter(|&bp| self.heap.block_size(bp) >= asize);

      let found = if class < FIRST_FIT_CLASSES {
        candidates.next()
      } else {
        // Scan the whole chain; ties keep the earliest candidate.
        candidates.min_by_key(|&bp| self.heap.block_size(bp))
      };

      if found.is_some() {
        return found;
      }
    }

    None
  }

  /// Marks `asize` bytes of the free block `bp` allocated, splitting off the
  /// remainder when it can hold a block of its own.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let tag = self.heap.tag(bp);
    self.free_lists.remove(&mut self.heap, bp);

    let remainder = tag.size - asize;
    if remainder >= MIN_BLOCK_SIZE {
      self.heap.set_header(bp, Tag::new(asize, true, tag.pred_allocated));
      let rest = bp + asize;
      self.heap.write_free(rest, remainder, true);
      self.free_lists.push_front(&mut self.heap, rest);
    } else {
      self.heap.set_header(bp, Tag::new(tag.size, true, tag.pred_allocated));
      let next = self.heap.next_block(bp);
      self.heap.set_pred_allocated(next, true);
    }
  }
}

/// Block size for a payload of `size` bytes: header included, rounded to the
/// alignment unit, never below the minimum block.
fn adjusted_size(size: usize) -> Option<usize> {
  if size <= MIN_BLOCK_SIZE - WSIZE {
    return Some(MIN_BLOCK_SIZE);
  }

  let asize = size.checked_add(WSIZE + DSIZE - 1)? & !(DSIZE - 1);
  (asize <= u32::MAX as usize).then_some(asize)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn allocator() -> SegregatedAllocator {
    SegregatedAllocator::with_arena(1 << 20).unwrap()
  }

  #[test]
  fn test_adjusted_size() {
    assert_eq!(adjusted_size(1), Some(16));
    assert_eq!(adjusted_size(12), Some(16));
    assert_eq!(adjusted_size(13), Some(24));
    assert_eq!(adjusted_size(100), Some(104));
    assert_eq!(adjusted_size(usize::MAX), None);
  }

  #[test]
  fn test_fresh_heap_is_one_chunk() {
    let allocator = allocator();

    assert_eq!(
      allocator.stats(),
      HeapStats {
        heap_size: PROLOGUE_SIZE + CHUNK_SIZE,
        allocated_blocks: 0,
        allocated_bytes: 0,
        free_blocks: 1,
        free_bytes: CHUNK_SIZE,
      }
    );
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_zero_size_changes_nothing() {
    let mut allocator = allocator();
    let before = allocator.stats();

    assert!(allocator.allocate(0).is_null());
    assert!(allocator.allocate_zeroed(0, 8).is_null());
    assert_eq!(allocator.stats(), before);
  }

  #[test]
  fn test_free_null_is_noop() {
    let mut allocator = allocator();
    let before = allocator.stats();

    unsafe { allocator.free(ptr::null_mut()) };

    assert_eq!(allocator.stats(), before);
  }

  #[test]
  fn test_two_allocations_do_not_overlap() {
    let mut allocator = allocator();

    let first = allocator.allocate(100);
    let second = allocator.allocate(100);

    assert!(!first.is_null() && !second.is_null());
    assert_ne!(first, second);
    unsafe {
      assert!(allocator.usable_size(first) >= 100);
      assert!(allocator.usable_size(second) >= 100);
      let (low, high) = if first < second { (first, second) } else { (second, first) };
      assert!(low.add(100) <= high);

      ptr::write_bytes(first, 0xAA, 100);
      ptr::write_bytes(second, 0x55, 100);
      assert_eq!(*first.add(99), 0xAA);
      assert_eq!(*second, 0x55);
    }
    assert_eq!(first as usize % DSIZE, 0);
    assert_eq!(second as usize % DSIZE, 0);
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_freed_block_is_reused() {
    let mut allocator = allocator();

    let first = allocator.allocate(200);
    let heap_size = allocator.heap_size();
    unsafe { allocator.free(first) };
    let second = allocator.allocate(150);

    assert_eq!(first, second);
    assert_eq!(allocator.heap_size(), heap_size);
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_coalesced_neighbours_satisfy_larger_request() {
    let mut allocator = allocator();

    let a = allocator.allocate(100);
    let b = allocator.allocate(100);
    // Pins the tail so only the coalesced pair can serve the next request.
    let guard = allocator.allocate(CHUNK_SIZE - 2 * 104 - WSIZE);
    assert!(!guard.is_null());
    let heap_size = allocator.heap_size();

    unsafe {
      allocator.free(a);
      allocator.free(b);
    }
    assert_eq!(allocator.stats().free_blocks, 1);

    let merged = allocator.allocate(200);

    assert_eq!(merged, a);
    assert_eq!(allocator.heap_size(), heap_size);
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_coalesce_both_sides() {
    let mut allocator = allocator();

    let a = allocator.allocate(40);
    let b = allocator.allocate(40);
    let c = allocator.allocate(40);
    let d = allocator.allocate(40);

    unsafe {
      allocator.free(a);
      allocator.free(c);
      assert_eq!(allocator.stats().free_blocks, 3);

      allocator.free(b);
    }

    let stats = allocator.stats();
    assert_eq!(stats.free_blocks, 2);
    assert_eq!(stats.allocated_blocks, 1);
    assert_eq!(allocator.heap.block_size(allocator.heap.offset_of(a)), 3 * 48);
    assert!(allocator.heap.is_allocated(allocator.heap.offset_of(d)));
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_small_classes_reuse_most_recent_free() {
    let mut allocator = allocator();

    let a = allocator.allocate(60);
    let _guard_a = allocator.allocate(8);
    let b = allocator.allocate(60);
    let _guard_b = allocator.allocate(8);

    unsafe {
      allocator.free(a);
      allocator.free(b);
    }

    assert_eq!(allocator.allocate(60), b);
    assert_eq!(allocator.allocate(60), a);
  }

  #[test]
  fn test_large_classes_pick_tightest_fit() {
    let mut allocator = allocator();

    let a1 = allocator.allocate(1996);
    let _g1 = allocator.allocate(8);
    let a2 = allocator.allocate(1096);
    let _g2 = allocator.allocate(8);
    let a3 = allocator.allocate(1496);
    let _g3 = allocator.allocate(8);

    unsafe {
      allocator.free(a1);
      allocator.free(a2);
      allocator.free(a3);
    }
    let heap_size = allocator.heap_size();

    // The chain holds a3, a2, a1 in that order; a3 fits first but a2 fits best.
    assert_eq!(allocator.allocate(1000), a2);
    assert_eq!(allocator.heap_size(), heap_size);
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_growth_for_large_request() {
    let mut allocator = allocator();

    let big = allocator.allocate(3 * CHUNK_SIZE);

    assert!(!big.is_null());
    assert!(allocator.heap_size() >= PROLOGUE_SIZE + 3 * CHUNK_SIZE);
    unsafe { assert!(allocator.usable_size(big) >= 3 * CHUNK_SIZE) };
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_out_of_memory_returns_null() {
    let mut allocator = SegregatedAllocator::with_arena(16 * 1024).unwrap();
    let before = allocator.stats();

    assert!(allocator.allocate(100_000).is_null());
    assert_eq!(allocator.stats(), before);
    assert!(!allocator.allocate(64).is_null());
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_init_fails_without_room() {
    assert!(SegregatedAllocator::with_arena(CHUNK_SIZE).is_err());
  }

  #[test]
  fn test_reallocate_preserves_contents() {
    let mut allocator = allocator();

    unsafe {
      let old = allocator.allocate(50);
      for i in 0..50 {
        old.add(i).write(i as u8);
      }

      let new = allocator.reallocate(old, 500);
      assert!(!new.is_null());
      assert_ne!(new, old);
      for i in 0..50 {
        assert_eq!(new.add(i).read(), i as u8);
      }

      let shrunk = allocator.reallocate(new, 10);
      for i in 0..10 {
        assert_eq!(shrunk.add(i).read(), i as u8);
      }
    }
    assert_eq!(allocator.stats().allocated_blocks, 1);
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_reallocate_edge_cases() {
    let mut allocator = allocator();

    unsafe {
      let fresh = allocator.reallocate(ptr::null_mut(), 32);
      assert!(!fresh.is_null());
      assert_eq!(allocator.stats().allocated_blocks, 1);

      assert!(allocator.reallocate(fresh, 0).is_null());
      assert_eq!(allocator.stats().allocated_blocks, 0);
    }
  }

  #[test]
  fn test_failed_reallocate_keeps_block() {
    let mut allocator = SegregatedAllocator::with_arena(16 * 1024).unwrap();

    unsafe {
      let old = allocator.allocate(16);
      ptr::write_bytes(old, 0x7E, 16);

      assert!(allocator.reallocate(old, 1 << 20).is_null());

      assert!(allocator.heap.is_allocated(allocator.heap.offset_of(old)));
      for i in 0..16 {
        assert_eq!(old.add(i).read(), 0x7E);
      }
    }
    assert_eq!(allocator.verify(), Ok(()));
  }

  #[test]
  fn test_allocate_zeroed() {
    let mut allocator = allocator();

    unsafe {
      let dirty = allocator.allocate(64);
      ptr::write_bytes(dirty, 0xFF, 64);
      allocator.free(dirty);

      let zeroed = allocator.allocate_zeroed(8, 8);
      assert_eq!(zeroed, dirty);
      for i in 0..64 {
        assert_eq!(zeroed.add(i).read(), 0);
      }
    }
    assert!(allocator.allocate_zeroed(usize::MAX, 2).is_null());
  }

  #[test]
  fn test_exact_fit_is_not_split() {
    let mut allocator = allocator();

    let a = allocator.allocate(20);
    let _guard = allocator.allocate(8);
    unsafe { allocator.free(a) };

    // 24-byte hole; a 16-byte block would leave an 8-byte sliver.
    let b = allocator.allocate(12);
    assert_eq!(b, a);
    unsafe { assert_eq!(allocator.usable_size(b), 20) };
    assert_eq!(allocator.verify(), Ok(()));
  }
}
