//! LIFO free chains, one per size class, linked through the free blocks themselves.

use crate::{
  class::{FREE_LIST_NUM, class_of},
  heap::Heap,
  source::HeapSource,
};

#[derive(Debug, Default)]
pub(crate) struct FreeLists {
  heads: [Option<usize>; FREE_LIST_NUM],
}

impl FreeLists {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn head(
    &self,
    class: usize,
  ) -> Option<usize> {
    self.heads[class]
  }

  /// Inserts the free block `bp` at the head of its size class.
  pub fn push_front<S: HeapSource>(
    &mut self,
    heap: &mut Heap<S>,
    bp: usize,
  ) {
    debug_assert!(!heap.is_allocated(bp), "pushing allocated block {bp:#x}");

    let class = class_of(heap.block_size(bp));
    let head = self.heads[class];

    heap.set_succ_link(bp, head);
    heap.set_pred_link(bp, None);
    if let Some(head) = head {
      heap.set_pred_link(head, Some(bp));
    }

    self.heads[class] = Some(bp);
  }

  /// Unlinks the free block `bp` from its size class, wherever it sits.
  pub fn remove<S: HeapSource>(
    &mut self,
    heap: &mut Heap<S>,
    bp: usize,
  ) {
    if heap.is_allocated(bp) {
      return;
    }

    let class = class_of(heap.block_size(bp));
    let pred = heap.pred_link(bp);
    let succ = heap.succ_link(bp);

    match pred {
      Some(pred) => heap.set_succ_link(pred, succ),
      None => self.heads[class] = succ,
    }
    if let Some(succ) = succ {
      heap.set_pred_link(succ, pred);
    }
  }

  /// Walks the chain of `class` from its head.
  pub fn iter<'a, S: HeapSource>(
    &self,
    heap: &'a Heap<S>,
    class: usize,
  ) -> Chain<'a, S> {
    Chain {
      heap,
      next: self.heads[class],
    }
  }
}

pub(crate) struct Chain<'a, S: HeapSource> {
  heap: &'a Heap<S>,
  next: Option<usize>,
}

impl<S: HeapSource> Iterator for Chain<'_, S> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    let bp = self.next?;
    self.next = self.heap.succ_link(bp);
    Some(bp)
  }
}
