/// Rounds the given size up to the allocator's alignment unit (8 bytes).
///
/// Every block size and every payload address handed out by the allocator is
/// a multiple of this unit, regardless of the machine word size.
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 24);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::DSIZE)
  };
}

/// Rounds the given size up to a multiple of `$unit`, which must be a power of two.
///
/// ```rust
/// use segalloc::align_to;
///
/// assert_eq!(align_to!(5, 4), 8);
/// assert_eq!(align_to!(4096, 4096), 4096);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $unit:expr) => {
    ($value + $unit - 1) & !($unit - 1)
  };
}
