//! # segalloc - A Segregated Free-List Memory Allocator
//!
//! This crate provides a general-purpose `malloc`/`free`/`realloc` style
//! allocator that carves one contiguous, growable heap into boundary-tagged
//! blocks and keeps free blocks in segregated, size-classed free lists.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   base                                                           break
//!   ┌──────┬──────┬───────────┬─────────┬───────────┬───────┬──────┐
//!   │ pad  │ pro- │  block A  │ block B │  block C  │  ...  │ epi- │
//!   │      │logue │ allocated │  free   │ allocated │       │logue │
//!   └──────┴──────┴───────────┴─────────┴───────────┴───────┴──────┘
//!     4 B    4 B                                              4 B
//!
//!   Free Lists (one LIFO chain per size class):
//!
//!   class  0 (16 B)   ──► ◻ ──► ◻
//!   class  1 (24 B)   ──► ◻
//!   ...
//!   class 19 (4-8 KiB)──► ◻ ──► ◻ ──► ◻
//!   ...
//!   class 26 (512 KiB+)
//! ```
//!
//! Chain links are stored inside the free blocks as 32-bit offsets from the
//! heap base, so a free block needs only 16 bytes: header, two links, footer.
//! Allocated blocks keep only a header; the next block's header caches
//! whether its predecessor is allocated.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align       - Alignment macros (align!, align_to!)
//!   ├── source      - HeapSource trait, sbrk and arena sources
//!   ├── heap        - Raw word access to the heap region (internal)
//!   ├── block       - Boundary tag codec (internal)
//!   ├── class       - Size class index
//!   ├── chain       - Free chain insert/remove (internal)
//!   ├── segregated  - SegregatedAllocator: allocate, free, reallocate
//!   ├── check       - Heap validator
//!   └── error       - AllocError, HeapViolation
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::SegregatedAllocator;
//!
//! let mut allocator = SegregatedAllocator::with_arena(1 << 20).unwrap();
//!
//! let ptr = allocator.allocate(64);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write_bytes(0xAB, 64);
//!     let ptr = allocator.reallocate(ptr, 256);
//!     assert_eq!(*ptr.add(63), 0xAB);
//!     allocator.free(ptr);
//! }
//!
//! assert!(allocator.verify().is_ok());
//! ```
//!
//! ## How It Works
//!
//! - **allocate**: the request is padded to a block size, the free lists are
//!   searched from its class upwards (first-fit in small classes, best-fit in
//!   large ones), and the heap grows by at least [`CHUNK_SIZE`] on a miss.
//!   Oversized remainders are split off and chained.
//! - **free**: the block is marked free and merged with free neighbours right
//!   away, so no two free blocks are ever adjacent.
//! - **reallocate**: always moves to a fresh block and copies the payload.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization; callers must serialize access
//! - **Grow-only**: Memory is never returned to the source
//! - **Trusts its callers**: Double frees and foreign pointers are undefined
//!   behaviour; [`SegregatedAllocator::verify`] can detect the damage afterwards
//! - **4 GiB heaps**: Links are 32-bit offsets
//!
//! ## Safety
//!
//! The heap is raw memory. Freeing and reallocating take caller-supplied
//! pointers and are therefore `unsafe`.

pub mod align;
mod block;
mod chain;
mod check;
pub mod class;
pub mod error;
mod heap;
mod segregated;
pub mod source;

pub use error::{AllocError, BlockInfo, HeapViolation};
pub use segregated::{HeapStats, SegregatedAllocator};
pub use source::{ArenaSource, HeapSource, SbrkSource};

/// Word size in bytes: headers, footers and chain links are one word each.
pub const WSIZE: usize = 4;

/// Alignment unit in bytes. Block sizes and payload addresses are multiples of it.
pub const DSIZE: usize = 8;

/// Smallest block: header, predecessor link, successor link and footer.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Minimum number of bytes requested from the source per heap extension.
pub const CHUNK_SIZE: usize = 1 << 12;
