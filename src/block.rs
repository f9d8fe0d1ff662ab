//! Boundary-tag block layout.
//!
//! ```text
//!   Allocated block:                    Free block:
//!   ┌──────────────┐ bp - 4             ┌──────────────┐ bp - 4
//!   │ header       │                    │ header       │
//!   ├──────────────┤ bp                 ├──────────────┤ bp
//!   │              │                    │ pred offset  │
//!   │   payload    │                    ├──────────────┤ bp + 4
//!   │              │                    │ succ offset  │
//!   │              │                    ├──────────────┤
//!   │              │                    │     ...      │
//!   │              │                    ├──────────────┤ bp + size - 8
//!   │              │                    │ footer       │
//!   └──────────────┘ bp + size - 4      └──────────────┘ bp + size - 4
//!
//!   header/footer word:  size (bits 3..) | pred_alloc (bit 1) | alloc (bit 0)
//! ```
//!
//! Blocks are named by their payload offset `bp`. Chain links are offsets from
//! the heap base, with 0 meaning "none".

use crate::{DSIZE, WSIZE, heap::Heap, source::HeapSource};

const ALLOC_BIT: u32 = 0x1;
const PRED_ALLOC_BIT: u32 = 0x2;
const SIZE_MASK: u32 = !0x7;

/// The three fields packed into a header or footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag {
  pub size: usize,
  pub allocated: bool,
  pub pred_allocated: bool,
}

impl Tag {
  pub fn new(
    size: usize,
    allocated: bool,
    pred_allocated: bool,
  ) -> Self {
    Self {
      size,
      allocated,
      pred_allocated,
    }
  }

  pub fn pack(self) -> u32 {
    debug_assert!(self.size % DSIZE == 0 && self.size <= u32::MAX as usize);
    let mut word = self.size as u32;
    if self.allocated {
      word |= ALLOC_BIT;
    }
    if self.pred_allocated {
      word |= PRED_ALLOC_BIT;
    }
    word
  }

  pub fn unpack(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOC_BIT != 0,
      pred_allocated: word & PRED_ALLOC_BIT != 0,
    }
  }
}

/// Decoded view of a block. Allocated blocks keep no footer and no links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Block {
  Allocated {
    size: usize,
    pred_allocated: bool,
  },
  Free {
    size: usize,
    pred_allocated: bool,
    pred: Option<usize>,
    succ: Option<usize>,
  },
}

impl Block {
  pub fn size(&self) -> usize {
    match *self {
      Block::Allocated { size, .. } | Block::Free { size, .. } => size,
    }
  }

  pub fn is_free(&self) -> bool {
    matches!(self, Block::Free { .. })
  }
}

fn encode_link(link: Option<usize>) -> u32 {
  match link {
    Some(offset) => {
      debug_assert!(offset != 0 && offset <= u32::MAX as usize);
      offset as u32
    }
    None => 0,
  }
}

fn decode_link(word: u32) -> Option<usize> {
  match word {
    0 => None,
    offset => Some(offset as usize),
  }
}

impl<S: HeapSource> Heap<S> {
  pub(crate) fn header_of(bp: usize) -> usize {
    bp - WSIZE
  }

  pub(crate) fn footer_of(
    &self,
    bp: usize,
  ) -> usize {
    bp + self.tag(bp).size - DSIZE
  }

  pub(crate) fn tag(
    &self,
    bp: usize,
  ) -> Tag {
    Tag::unpack(self.word(Self::header_of(bp)))
  }

  pub(crate) fn block_size(
    &self,
    bp: usize,
  ) -> usize {
    self.tag(bp).size
  }

  pub(crate) fn is_allocated(
    &self,
    bp: usize,
  ) -> bool {
    self.tag(bp).allocated
  }

  pub(crate) fn set_header(
    &mut self,
    bp: usize,
    tag: Tag,
  ) {
    self.set_word(Self::header_of(bp), tag.pack());
  }

  /// Writes matching header and footer for a free block of `size` bytes at `bp`.
  pub(crate) fn write_free(
    &mut self,
    bp: usize,
    size: usize,
    pred_allocated: bool,
  ) {
    let tag = Tag::new(size, false, pred_allocated).pack();
    self.set_word(Self::header_of(bp), tag);
    self.set_word(bp + size - DSIZE, tag);
  }

  pub(crate) fn set_pred_allocated(
    &mut self,
    bp: usize,
    pred_allocated: bool,
  ) {
    let mut tag = self.tag(bp);
    tag.pred_allocated = pred_allocated;
    self.set_header(bp, tag);
  }

  pub(crate) fn next_block(
    &self,
    bp: usize,
  ) -> usize {
    bp + self.block_size(bp)
  }

  /// Only meaningful when the previous block is free, since only free blocks keep a footer.
  pub(crate) fn prev_block(
    &self,
    bp: usize,
  ) -> usize {
    bp - Tag::unpack(self.word(bp - DSIZE)).size
  }

  pub(crate) fn pred_link(
    &self,
    bp: usize,
  ) -> Option<usize> {
    decode_link(self.word(bp))
  }

  pub(crate) fn succ_link(
    &self,
    bp: usize,
  ) -> Option<usize> {
    decode_link(self.word(bp + WSIZE))
  }

  pub(crate) fn set_pred_link(
    &mut self,
    bp: usize,
    link: Option<usize>,
  ) {
    self.set_word(bp, encode_link(link));
  }

  pub(crate) fn set_succ_link(
    &mut self,
    bp: usize,
    link: Option<usize>,
  ) {
    self.set_word(bp + WSIZE, encode_link(link));
  }

  pub(crate) fn block(
    &self,
    bp: usize,
  ) -> Block {
    let tag = self.tag(bp);

    if tag.allocated {
      Block::Allocated {
        size: tag.size,
        pred_allocated: tag.pred_allocated,
      }
    } else {
      Block::Free {
        size: tag.size,
        pred_allocated: tag.pred_allocated,
        pred: self.pred_link(bp),
        succ: self.succ_link(bp),
      }
    }
  }
}
