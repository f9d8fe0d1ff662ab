//! Size classes of the segregated free lists.
//!
//! ```text
//!   class   0    1    2   ...  13  │  14        15        ...   26
//!   size    16   24   32  ...  120 │  128-255   256-511   ...   512K+
//!           └── exact sizes ───────┘  └── one power of two each ───┘
//! ```

use crate::{DSIZE, MIN_BLOCK_SIZE};

/// Number of segregated free lists.
pub const FREE_LIST_NUM: usize = 27;

/// Classes below this index are searched first-fit, the rest best-fit.
pub const FIRST_FIT_CLASSES: usize = 13;

/// Largest block size that gets its own exact-size class.
const EXACT_CLASS_LIMIT: usize = 127;

/// Offset added to the bit length of sizes above the exact classes.
const POW2_CLASS_BASE: usize = 6;

/// Maps a block size (at least [`MIN_BLOCK_SIZE`]) to its free-list index.
pub fn class_of(size: usize) -> usize {
  debug_assert!(size >= MIN_BLOCK_SIZE);

  if size <= EXACT_CLASS_LIMIT {
    return (size - MIN_BLOCK_SIZE) / DSIZE;
  }

  let bit_length = (usize::BITS - size.leading_zeros()) as usize;
  (POW2_CLASS_BASE + bit_length).min(FREE_LIST_NUM - 1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_exact_classes() {
    for (index, size) in (MIN_BLOCK_SIZE..=120).step_by(DSIZE).enumerate() {
      assert_eq!(class_of(size), index);
    }
  }

  #[test]
  fn test_power_of_two_classes() {
    assert_eq!(class_of(128), 14);
    assert_eq!(class_of(248), 14);
    assert_eq!(class_of(256), 15);
    assert_eq!(class_of(1008), 16);
    assert_eq!(class_of(1104), 17);
    assert_eq!(class_of(4096), 19);
  }

  #[test]
  fn test_saturates_at_last_class() {
    assert_eq!(class_of(1 << 18), 25);
    assert_eq!(class_of(1 << 19), FREE_LIST_NUM - 1);
    assert_eq!(class_of(1 << 30), FREE_LIST_NUM - 1);
    assert_eq!(class_of(usize::MAX & !0x7), FREE_LIST_NUM - 1);
  }

  #[test]
  fn test_classes_are_monotonic() {
    let mut previous = 0;

    for size in (MIN_BLOCK_SIZE..1 << 21).step_by(DSIZE) {
      let class = class_of(size);
      assert!(class >= previous && class < FREE_LIST_NUM);
      assert!(class <= previous + 1);
      previous = class;
    }
  }
}
