//! Error types for heap growth and heap validation

use std::fmt;

use thiserror::Error;

/// Failures that can surface while growing the heap.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// The heap source refused to grow, or the heap would outgrow 32-bit link offsets
  #[error("Out of memory: could not extend the heap by {requested} bytes")]
  OutOfMemory { requested: usize },

  /// The heap source returned memory that does not continue the current heap
  #[error("Heap source returned {found:#x}, expected the heap to continue at {expected:#x}")]
  Discontiguous { expected: usize, found: usize },
}

pub type AllocResult<T> = Result<T, AllocError>;

/// Snapshot of one block's metadata, taken when the heap validator rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload offset from the heap base
  pub offset: usize,
  pub header: u32,
  /// Raw footer word; `None` for allocated blocks, which keep no footer
  pub footer: Option<u32>,
  pub size: usize,
  pub allocated: bool,
  pub pred_allocated: bool,
  /// Chain links of a free block, as payload offsets
  pub links: Option<(Option<usize>, Option<usize>)>,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "block {:#x} [header {:#010x}, size {}, alloc {}, pred alloc {}",
      self.offset, self.header, self.size, self.allocated as u8, self.pred_allocated as u8
    )?;
    if let Some(footer) = self.footer {
      write!(f, ", footer {footer:#010x}")?;
    }
    if let Some((pred, succ)) = self.links {
      write!(f, ", pred {pred:x?}, succ {succ:x?}")?;
    }
    write!(f, "]")
  }
}

/// Invariant breaches reported by the heap validator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapViolation {
  #[error("Block payload is not {alignment}-byte aligned: {block}")]
  Misaligned { block: BlockInfo, alignment: usize },

  #[error("Block lies outside the heap (0, {heap_size:#x}): {block}")]
  OutOfBounds { block: BlockInfo, heap_size: usize },

  #[error("Header and footer of free block do not match: {block}")]
  TagMismatch { block: BlockInfo },

  #[error("Block is smaller than the minimum block size {minimum}: {block}")]
  Undersized { block: BlockInfo, minimum: usize },

  #[error("Predecessor-allocated bit does not match {previous}: {block}")]
  PredAllocMismatch { block: BlockInfo, previous: BlockInfo },

  #[error("Adjacent free blocks were not coalesced: {previous} then {block}")]
  Uncoalesced { block: BlockInfo, previous: BlockInfo },

  #[error("Epilogue at {found:#x} is not at the end of the heap {expected:#x}")]
  MisplacedEpilogue { found: usize, expected: usize },

  #[error("Free-list {class}: predecessor link does not point back to {previous}: {block}")]
  BrokenLink {
    class: usize,
    block: BlockInfo,
    previous: BlockInfo,
  },

  #[error("Free-list {class}: head has a predecessor link: {block}")]
  HeadHasPredecessor { class: usize, block: BlockInfo },

  #[error("Free-list {class}: member lies outside the heap (0, {heap_size:#x}) at {offset:#x}")]
  ChainOutOfBounds {
    class: usize,
    offset: usize,
    heap_size: usize,
  },

  #[error("Free-list {class}: allocated block is chained: {block}")]
  AllocatedInChain { class: usize, block: BlockInfo },

  #[error("Free-list {class}: block belongs to class {expected}: {block}")]
  WrongClass {
    class: usize,
    expected: usize,
    block: BlockInfo,
  },

  #[error("Free-list {class}: chain is longer than the number of free blocks, likely a cycle")]
  Cycle { class: usize },

  #[error("Heap holds {in_heap} free blocks but the free lists hold {in_lists}")]
  FreeCountMismatch { in_heap: usize, in_lists: usize },
}
