//! # rallocator: a user-space general-purpose allocator
//!
//! This crate implements the free-list management and placement policy of a
//! `malloc`/`calloc`/`free`/`realloc`-style allocator: an intrusive,
//! address-ordered, doubly-linked list of block headers living in the
//! program break, best-fit placement with splitting and coalescing, in-place
//! tail growth, and a large-request fallback to independent anonymous
//! mappings.
//!
//! ## Overview
//!
//! ```text
//!   Two backing sources, selected by request size:
//!
//!     small/medium  ──► break region (sbrk-extended, linked, reused)
//!     large         ──► anonymous mapping (mmap'd, never linked)
//!
//!   Break region, address-ordered:
//!
//!   ┌─────────┬──────────┬─────────┬──────────┬─────────┬───────────────┐
//!   │ Header  │ payload  │ Header  │ payload  │ Header  │  payload (tail│
//!   │ ALLOC   │          │ FREE    │          │ ALLOC   │  grows via    │
//!   │         │          │         │          │         │  the break)   │
//!   └─────────┴──────────┴─────────┴──────────┴─────────┴───────────────┘
//!   ▲                                                                   ▲
//!   anchor                                                      program break
//! ```
//!
//! ## Crate structure
//!
//! ```text
//!   rallocator
//!   ├── align       - align8(): round a size up to a multiple of 8
//!   ├── primitives  - sbrk/mmap/munmap/sysconf adapters (crate-private)
//!   ├── block       - Header, Status, alloc_block/split/merge/coalesce (crate-private)
//!   ├── placement   - best_fit, tail_extend (crate-private)
//!   ├── heap        - Heap: the four dispatch operations (crate-private)
//!   └── lib         - Rallocator: the public surface + GlobalAlloc impl
//! ```
//!
//! Everything below `heap` is crate-private: there is no public diagnostics
//! API or handle into the block list (that's an explicit non-goal, the only
//! public surface is the four operations below, plus the `GlobalAlloc` impl).
//!
//! ## Quick start
//!
//! As a drop-in global allocator:
//!
//! ```rust,ignore
//! use rallocator::Rallocator;
//!
//! #[global_allocator]
//! static ALLOCATOR: Rallocator = Rallocator::new();
//!
//! fn main() {
//!     let v: Vec<u64> = (0..1000).collect(); // routed through Rallocator
//!     println!("{}", v.iter().sum::<u64>());
//! }
//! ```
//!
//! Or directly, for C-style malloc/calloc/free/realloc semantics:
//!
//! ```rust
//! use rallocator::Rallocator;
//!
//! let a = Rallocator::new();
//!
//! unsafe {
//!     let p = a.allocate(100);
//!     assert!(!p.is_null());
//!     *p = 42;
//!
//!     let q = a.reallocate(p, 200);
//!     assert_eq!(*q, 42); // contents preserved across growth
//!
//!     a.free(q);
//! }
//! ```
//!
//! ## Placement policy
//!
//! Every allocating call coalesces adjacent `FREE` blocks, then searches the
//! whole break-region list for the smallest `FREE` block that fits (best
//! fit, ties broken by address), splitting off any leftover worth keeping.
//! On a miss, the heap grows: a `FREE` tail absorbs the deficit in place,
//! otherwise a fresh block is appended. Requests whose total footprint
//! exceeds `MMAP_THRESHOLD` skip all of this and go straight to an
//! independent mapping, released directly on `free`, never linked, never
//! searched, never split.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no internal synchronization. Using one
//!   `Rallocator` instance (or `#[global_allocator]`) from more than one
//!   thread is undefined behavior, see [`Rallocator`]'s docs.
//! - **8-byte alignment ceiling**: requests needing stronger alignment than
//!   8 bytes are not supported; `GlobalAlloc::alloc` does not check this.
//! - **No size classes, no tunables**: one best-fit list, one pair of fixed
//!   thresholds (`MMAP_THRESHOLD`, `INIT_MEM_ALLOC`).
//!
//! ## Safety
//!
//! This crate is inherently unsafe: it manages raw memory outside Rust's
//! ownership model by construction. Every allocating/freeing operation is
//! `unsafe` to call, matching the style of `malloc`/`free` themselves.

mod block;
mod heap;
mod placement;
mod primitives;

pub mod align;

pub use heap::{INIT_MEM_ALLOC, MMAP_THRESHOLD};

use heap::Heap;
use std::alloc::{GlobalAlloc, Layout};

/// The process-wide allocator: a best-fit free list over the program break,
/// with a large-request fallback to anonymous mappings.
///
/// # Thread safety
///
/// `Rallocator` carries no internal locking: it is built for single-threaded
/// use only. `unsafe impl Sync` is required to use it as
/// a `#[global_allocator]`, but calling any of its methods (directly or via
/// `GlobalAlloc`) from more than one thread, or interleaving it with another
/// allocator that also adjusts the program break, is undefined behavior.
/// Callers own establishing single-threaded/single-allocator use; this type
/// does not enforce it.
pub struct Rallocator {
  heap: Heap,
}

impl Rallocator {
  /// Creates an allocator with an empty heap (no break-region reservation
  /// has happened yet; the first allocating call performs it).
  pub const fn new() -> Self {
    Self { heap: Heap::new() }
  }

  /// `malloc(size)`: returns a pointer to at least `size` usable, 8-aligned
  /// bytes, or null if `size == 0`.
  ///
  /// # Safety
  /// The returned pointer must be passed to [`Rallocator::free`] or
  /// [`Rallocator::reallocate`] on this same allocator, at most once each,
  /// and never used afterward.
  pub unsafe fn allocate(&self, size: usize) -> *mut u8 {
    self.heap.allocate(size)
  }

  /// `calloc(nmemb, size)`: returns a pointer to at least `nmemb * size`
  /// zeroed bytes, or null if either factor is zero or the product
  /// overflows.
  ///
  /// # Safety
  /// Same obligations as [`Rallocator::allocate`].
  pub unsafe fn allocate_zeroed(&self, nmemb: usize, size: usize) -> *mut u8 {
    self.heap.allocate_zeroed(nmemb, size)
  }

  /// `free(ptr)`: releases a pointer previously returned by this allocator.
  /// Null is a no-op; freeing an already-freed break-region block is
  /// tolerated silently (freeing an already-freed mapped block is not).
  ///
  /// # Safety
  /// `ptr` must be null or a pointer previously returned by this allocator's
  /// `allocate`/`allocate_zeroed`/`reallocate` and not already freed (unless
  /// it was a break-region block).
  pub unsafe fn free(&self, ptr: *mut u8) {
    self.heap.free(ptr)
  }

  /// `realloc(ptr, size)`: resizes the allocation at `ptr` to `size` bytes,
  /// preserving the first `min(old_size, size)` bytes; may return a
  /// different pointer. `ptr == null` behaves like `allocate(size)`;
  /// `size == 0` frees `ptr` and returns null; reallocating an
  /// already-freed break-region pointer returns null.
  ///
  /// # Safety
  /// `ptr` must be null or a pointer previously returned by this allocator
  /// and not already freed.
  pub unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
    self.heap.reallocate(ptr, size)
  }
}

impl Default for Rallocator {
  fn default() -> Self {
    Self::new()
  }
}

// SAFETY: see the "Thread safety" section on `Rallocator` above, this
// asserts no more than callers already need to uphold themselves.
unsafe impl Sync for Rallocator {}

/// Maps `GlobalAlloc`'s `Layout`-based contract directly onto the four
/// byte-count/pointer operations above. Only 8-byte-or-weaker alignment is
/// supported; `Layout::align()` is not otherwise consulted.
unsafe impl GlobalAlloc for Rallocator {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    unsafe { self.allocate(layout.size()) }
  }

  unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
    unsafe { self.allocate_zeroed(1, layout.size()) }
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    unsafe { self.free(ptr) }
  }

  unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
    unsafe { self.reallocate(ptr, new_size) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inherent_roundtrip() {
    let a = Rallocator::new();

    unsafe {
      let p = a.allocate(64) as *mut u64;
      assert!(!p.is_null());
      p.write(0xDEAD_BEEF_DEAD_BEEF);
      assert_eq!(p.read(), 0xDEAD_BEEF_DEAD_BEEF);
      a.free(p as *mut u8);
    }
  }

  #[test]
  fn global_alloc_roundtrip() {
    let a = Rallocator::new();
    let layout = Layout::new::<[u64; 16]>();

    unsafe {
      let p = GlobalAlloc::alloc(&a, layout) as *mut u64;
      assert!(!p.is_null());
      for i in 0..16 {
        p.add(i).write(i as u64);
      }
      for i in 0..16 {
        assert_eq!(p.add(i).read(), i as u64);
      }
      GlobalAlloc::dealloc(&a, p as *mut u8, layout);
    }
  }

  #[test]
  fn global_alloc_zeroed_is_actually_zero() {
    let a = Rallocator::new();
    let layout = Layout::new::<[u8; 256]>();

    unsafe {
      let p = GlobalAlloc::alloc_zeroed(&a, layout);
      assert!(!p.is_null());
      for i in 0..256 {
        assert_eq!(*p.add(i), 0);
      }
      GlobalAlloc::dealloc(&a, p, layout);
    }
  }
}
