//! Heap consistency checker.
//!
//! Walks every block from the prologue to the epilogue, then every free list,
//! and reports the first broken invariant. Meant for debugging and tests; the
//! allocation paths never call it.

use tracing::error;

use crate::{
  DSIZE, MIN_BLOCK_SIZE, WSIZE,
  block::Tag,
  class::{FREE_LIST_NUM, class_of},
  error::{BlockInfo, HeapViolation},
  segregated::{FIRST_BLOCK, SegregatedAllocator},
  source::HeapSource,
};

impl<S: HeapSource> SegregatedAllocator<S> {
  /// Checks every heap and free-list invariant.
  pub fn verify(&self) -> Result<(), HeapViolation> {
    let free_in_heap = self.verify_blocks()?;
    let in_lists = self.verify_free_lists(free_in_heap)?;

    if in_lists != free_in_heap {
      return Err(HeapViolation::FreeCountMismatch {
        in_heap: free_in_heap,
        in_lists,
      });
    }

    Ok(())
  }

  /// Runs [`verify`](Self::verify) and aborts the process on the first violation.
  ///
  /// `site` tags the log line, e.g. with the caller's location.
  pub fn check_heap(
    &self,
    site: Option<&str>,
  ) {
    if let Err(violation) = self.verify() {
      error!(site = site.unwrap_or("unknown"), "Heap check failed: {}", violation);
      std::process::abort();
    }
  }

  /// Returns the number of free blocks met on the way.
  fn verify_blocks(&self) -> Result<usize, HeapViolation> {
    let heap_size = self.heap.size();
    let mut previous = self.prologue_info();
    let mut free_blocks = 0;
    let mut bp = FIRST_BLOCK;

    loop {
      let tag = self.heap.tag(bp);

      if tag.size == 0 && tag.allocated {
        if bp != heap_size {
          return Err(HeapViolation::MisplacedEpilogue {
            found: bp,
            expected: heap_size,
          });
        }
        if tag.pred_allocated != previous.allocated {
          return Err(HeapViolation::PredAllocMismatch {
            block: self.block_info(bp),
            previous,
          });
        }
        break;
      }

      let block = self.block_info(bp);

      if (self.heap.base_addr() + bp) % DSIZE != 0 {
        return Err(HeapViolation::Misaligned {
          block,
          alignment: DSIZE,
        });
      }

      if tag.size < MIN_BLOCK_SIZE || tag.size % DSIZE != 0 {
        return Err(HeapViolation::Undersized {
          block,
          minimum: MIN_BLOCK_SIZE,
        });
      }

      // The block plus the epilogue header after it must fit.
      if bp + tag.size > heap_size {
        return Err(HeapViolation::OutOfBounds { block, heap_size });
      }

      if !tag.allocated && block.footer != Some(block.header) {
        return Err(HeapViolation::TagMismatch { block });
      }

      if tag.pred_allocated != previous.allocated {
        return Err(HeapViolation::PredAllocMismatch { block, previous });
      }

      if !tag.allocated && !previous.allocated {
        return Err(HeapViolation::Uncoalesced { block, previous });
      }

      if !tag.allocated {
        free_blocks += 1;
      }

      previous = block;
      bp += tag.size;
    }

    Ok(free_blocks)
  }

  /// Returns the number of chained blocks. Chains are cut off once they hold
  /// more members than the heap has free blocks.
  fn verify_free_lists(
    &self,
    free_in_heap: usize,
  ) -> Result<usize, HeapViolation> {
    let heap_size = self.heap.size();
    let mut in_lists = 0;

    for class in 0..FREE_LIST_NUM {
      let mut previous: Option<usize> = None;
      let mut next = self.free_lists.head(class);

      while let Some(bp) = next {
        if bp < FIRST_BLOCK || bp + DSIZE > heap_size {
          return Err(HeapViolation::ChainOutOfBounds {
            class,
            offset: bp,
            heap_size,
          });
        }

        in_lists += 1;
        if in_lists > free_in_heap {
          return Err(HeapViolation::Cycle { class });
        }

        let block = self.block_info(bp);

        if block.allocated {
          return Err(HeapViolation::AllocatedInChain { class, block });
        }

        match previous {
          None if self.heap.pred_link(bp).is_some() => {
            return Err(HeapViolation::HeadHasPredecessor { class, block });
          }
          Some(previous) if self.heap.pred_link(bp) != Some(previous) => {
            return Err(HeapViolation::BrokenLink {
              class,
              block,
              previous: self.block_info(previous),
            });
          }
          _ => {}
        }

        if block.size < MIN_BLOCK_SIZE {
          return Err(HeapViolation::Undersized {
            block,
            minimum: MIN_BLOCK_SIZE,
          });
        }

        let expected = class_of(block.size);
        if expected != class {
          return Err(HeapViolation::WrongClass {
            class,
            expected,
            block,
          });
        }

        previous = Some(bp);
        next = self.heap.succ_link(bp);
      }
    }

    Ok(in_lists)
  }

  /// The prologue is a fixed, zero-size allocated marker. Its header word is
  /// reused as the first block's header, so it is never read back.
  fn prologue_info(&self) -> BlockInfo {
    let tag = Tag::new(0, true, true);

    BlockInfo {
      offset: 0,
      header: tag.pack(),
      footer: None,
      size: tag.size,
      allocated: tag.allocated,
      pred_allocated: tag.pred_allocated,
      links: None,
    }
  }

  fn block_info(
    &self,
    bp: usize,
  ) -> BlockInfo {
    let heap_size = self.heap.size();
    let header = self.heap.word(bp - WSIZE);
    let tag = Tag::unpack(header);
    let free = !tag.allocated;

    let footer = (free && tag.size >= DSIZE && bp + tag.size - WSIZE <= heap_size)
      .then(|| self.heap.word(self.heap.footer_of(bp)));
    let links = (free && bp + DSIZE <= heap_size)
      .then(|| (self.heap.pred_link(bp), self.heap.succ_link(bp)));

    BlockInfo {
      offset: bp,
      header,
      footer,
      size: tag.size,
      allocated: tag.allocated,
      pred_allocated: tag.pred_allocated,
      links,
    }
  }
}
