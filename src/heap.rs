//! Request dispatch: the four public operations, each normalizing its size,
//! branching on the mapped-vs-break-region threshold, and otherwise
//! delegating to [`crate::placement`] and [`crate::block`].

use crate::align::align8;
use crate::block::{self, Header, Status};
use crate::placement;
use crate::primitives::{extend_break, query_pagesize, set_break, unmap};
use std::cell::Cell;
use std::ptr;

/// Requests whose total footprint (aligned payload + header) exceeds this
/// are satisfied by an anonymous mapping instead of the break region
/// (`malloc`/`realloc`).
pub const MMAP_THRESHOLD: usize = 131_072;

/// Size of the single break extension performed on the first break-region
/// allocation of a given entry point.
pub const INIT_MEM_ALLOC: usize = 131_072;

/// Owns the process-wide heap anchor. `Heap` itself carries no locking,
/// it's built for single-threaded use; callers that need a process-wide
/// singleton wrap it in something `Sync`, as [`crate::Rallocator`] does.
pub(crate) struct Heap {
  anchor: Cell<*mut Header>,
}

impl Heap {
  pub(crate) const fn new() -> Self {
    Self { anchor: Cell::new(ptr::null_mut()) }
  }

  /// `malloc(size)`.
  pub(crate) fn allocate(&self, size: usize) -> *mut u8 {
    let size = align8(size);
    if size == 0 {
      return ptr::null_mut();
    }

    let total = size + block::HEADER_SIZE;

    unsafe {
      if total > MMAP_THRESHOLD {
        let header = block::alloc_block(ptr::null_mut(), total, MMAP_THRESHOLD);
        return block::payload_of(header);
      }

      if self.anchor.get().is_null() {
        let header = self.reserve_initial(total);
        return block::payload_of(header);
      }

      block::coalesce(self.anchor.get());
      let found = placement::best_fit(self.anchor.get(), total);
      if !found.is_null() {
        return block::payload_of(found);
      }

      let grown = placement::tail_extend(self.anchor.get(), size, total);
      block::payload_of(grown)
    }
  }

  /// `calloc(nmemb, size)`.
  pub(crate) fn allocate_zeroed(&self, nmemb: usize, size: usize) -> *mut u8 {
    if nmemb == 0 || size == 0 {
      return ptr::null_mut();
    }

    // Guard against the nmemb*size product overflowing usize.
    let Some(raw) = nmemb.checked_mul(size) else {
      return ptr::null_mut();
    };
    let new_size = align8(raw);
    let pagesize = query_pagesize();
    let total = new_size + block::HEADER_SIZE;

    unsafe {
      if total > pagesize {
        // A fresh anonymous mapping is already zero-filled by the OS.
        let header = block::alloc_block(ptr::null_mut(), total, pagesize);
        return block::payload_of(header);
      }

      if self.anchor.get().is_null() {
        let header = self.reserve_initial(total);
        zero(block::payload_of(header), new_size);
        return block::payload_of(header);
      }

      block::coalesce(self.anchor.get());
      let found = placement::best_fit(self.anchor.get(), total);
      let landed = if !found.is_null() {
        found
      } else {
        placement::tail_extend(self.anchor.get(), new_size, total)
      };

      zero(block::payload_of(landed), new_size);
      block::payload_of(landed)
    }
  }

  /// `free(ptr)`.
  pub(crate) fn free(&self, ptr: *mut u8) {
    if ptr.is_null() {
      return;
    }

    unsafe {
      let header = block::header_of(ptr);
      match (*header).status {
        Status::Free => {} // double free on a break-region block tolerated silently
        Status::Mapped => unmap(header as *mut u8, (*header).size + block::HEADER_SIZE),
        Status::Alloc => (*header).status = Status::Free, // coalescing deferred to next allocation
      }
    }
  }

  /// `realloc(ptr, size)`.
  pub(crate) fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
    let size = align8(size);

    if size == 0 {
      self.free(ptr);
      return ptr::null_mut();
    }
    if ptr.is_null() {
      return self.allocate(size);
    }

    unsafe {
      let header = block::header_of(ptr);

      if (*header).status == Status::Free {
        return ptr::null_mut(); // reallocating a freed pointer is defined as failure
      }

      if (*header).status == Status::Mapped {
        return self.relocate(ptr, header, size);
      }

      if size == (*header).size {
        return ptr;
      }

      if size < (*header).size {
        if (*header).next.is_null() {
          self.shrink_tail(header, size);
        } else {
          block::split(header, size + block::HEADER_SIZE);
        }
        return ptr;
      }

      self.grow(ptr, header, size)
    }
  }

  /// Mapped blocks can't be resized in place: allocate fresh, copy, free the
  /// old mapping.
  unsafe fn relocate(&self, ptr: *mut u8, header: *mut Header, size: usize) -> *mut u8 {
    unsafe {
      let new_ptr = self.allocate(size);
      if !new_ptr.is_null() {
        let copy_len = (*header).size.min(size);
        ptr::copy_nonoverlapping(ptr, new_ptr, copy_len);
      }
      self.free(ptr);
      new_ptr
    }
  }

  /// Shrinks the list tail in place by rewinding the break to the new
  /// payload end, the inverse of the tail-grow path in `grow`. Used instead
  /// of `split` when the shrinking block has no successor: splitting would
  /// leave a trailing `FREE` block that just sits at the end of the break
  /// region until freed again, rewinding the break returns the memory to
  /// the OS immediately.
  unsafe fn shrink_tail(&self, header: *mut Header, size: usize) {
    unsafe {
      let new_break = (header as *mut u8).add(block::HEADER_SIZE + size);
      log::debug!("rallocator: realloc tail-shrink rewinding break to {new_break:?}");
      set_break(new_break);
      (*header).size = size;
    }
  }

  /// Grows a break-region block: tail extension if it's the list tail,
  /// otherwise forward merges with `FREE` neighbors, falling back to
  /// allocate-copy-free if no combination of merges suffices.
  unsafe fn grow(&self, ptr: *mut u8, header: *mut Header, size: usize) -> *mut u8 {
    unsafe {
      if (*header).next.is_null() {
        let delta = size - (*header).size;
        log::debug!("rallocator: realloc tail-grow extending break by {delta} bytes");
        extend_break(delta as isize);
        (*header).size += delta;
        return ptr;
      }

      loop {
        if (*header).size >= size {
          block::split(header, size + block::HEADER_SIZE);
          return ptr;
        }

        let next = (*header).next;
        if next.is_null() || (*next).status != Status::Free {
          break;
        }
        block::merge(header, next);
      }

      // No combination of forward merges sufficed: allocate-copy-free.
      let new_ptr = self.allocate(size);
      if !new_ptr.is_null() {
        let copy_len = (*header).size.min(size);
        ptr::copy_nonoverlapping(ptr, new_ptr, copy_len);
      }
      self.free(ptr);
      new_ptr
    }
  }

  /// First break-region allocation of a given entry point: reserves
  /// `INIT_MEM_ALLOC` bytes in one extension (unless `total` is already
  /// larger), splits off the excess as a trailing `FREE` block, and sets the
  /// anchor.
  unsafe fn reserve_initial(&self, total: usize) -> *mut Header {
    unsafe {
      let reserve = total.max(INIT_MEM_ALLOC);
      log::debug!("rallocator: initial break reservation of {reserve} bytes");
      let header = block::alloc_block(ptr::null_mut(), reserve, usize::MAX);
      self.anchor.set(header);
      block::split(header, total);
      header
    }
  }
}

unsafe fn zero(payload: *mut u8, len: usize) {
  unsafe {
    ptr::write_bytes(payload, 0, len);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::{header_of, HEADER_SIZE};

  fn fresh() -> Heap {
    Heap::new()
  }

  #[test]
  fn small_initial_alloc_triggers_reservation() {
    let heap = fresh();
    let p = heap.allocate(100);
    assert!(!p.is_null());

    unsafe {
      let first = header_of(p);
      assert_eq!((*first).status, Status::Alloc);
      assert_eq!((*first).size, 104);

      let second = (*first).next;
      assert!(!second.is_null());
      assert_eq!((*second).status, Status::Free);
      assert_eq!((*second).size, INIT_MEM_ALLOC - HEADER_SIZE - 136);
      assert!((*second).next.is_null());
    }

    heap.free(p);
  }

  #[test]
  fn split_leaves_no_block_smaller_than_header() {
    let heap = fresh();
    let p = heap.allocate(1); // aligned payload = 8, total = 40
    assert!(!p.is_null());

    unsafe {
      let first = header_of(p);
      assert_eq!((*first).size, 8);
      let second = (*first).next;
      assert_eq!((*second).size, INIT_MEM_ALLOC - HEADER_SIZE - 40);
    }

    heap.free(p);
  }

  #[test]
  fn coalesce_merges_adjacent_frees_before_next_alloc() {
    let heap = fresh();
    let a = heap.allocate(100);
    let b = heap.allocate(100);
    assert!(!a.is_null() && !b.is_null());

    heap.free(a);
    heap.free(b);

    let c = heap.allocate(180);
    assert!(!c.is_null());

    // The coalesced block sits at the lower of the two freed addresses.
    assert_eq!(c as usize, a as usize);

    heap.free(c);
  }

  #[test]
  fn large_request_uses_mapping_and_frees_via_unmap() {
    let heap = fresh();
    let p = heap.allocate(200_000);
    assert!(!p.is_null());

    unsafe {
      let header = header_of(p);
      assert_eq!((*header).status, Status::Mapped);
      assert_eq!((*header).size, 200_000);
      assert!((*header).prev.is_null());
      assert!((*header).next.is_null());
    }

    heap.free(p); // exercises the unmap path; no crash == success
  }

  #[test]
  fn realloc_tail_grow_extends_break_and_collapses_to_one_block() {
    let heap = fresh();

    // Request exactly the initial reservation so the split is a no-op and
    // the resulting block genuinely has no successor (the literal tail).
    let a = heap.allocate(INIT_MEM_ALLOC - HEADER_SIZE);
    assert!(!a.is_null());
    unsafe {
      assert!((*header_of(a)).next.is_null());
    }

    let grown = heap.reallocate(a, INIT_MEM_ALLOC);
    assert!(!grown.is_null());
    assert_eq!(grown, a, "growing the sole tail block must not move it");

    unsafe {
      let header = header_of(grown);
      assert_eq!((*header).status, Status::Alloc);
      assert_eq!((*header).size, INIT_MEM_ALLOC);
      assert!((*header).next.is_null(), "grown block is still the tail");
    }

    heap.free(grown);
  }

  #[test]
  fn realloc_tail_shrink_rewinds_break() {
    let heap = fresh();

    // Same trick as the tail-grow test: request exactly the initial
    // reservation so the block has no successor and genuinely is the tail.
    let a = heap.allocate(INIT_MEM_ALLOC - HEADER_SIZE);
    assert!(!a.is_null());
    unsafe {
      assert!((*header_of(a)).next.is_null());
    }

    let shrunk = heap.reallocate(a, 64);
    assert!(!shrunk.is_null());
    assert_eq!(shrunk, a, "shrinking the sole tail block must not move it");

    unsafe {
      let header = header_of(shrunk);
      assert_eq!((*header).status, Status::Alloc);
      assert_eq!((*header).size, 64);
      assert!((*header).next.is_null(), "shrunk block is still the tail");
    }

    heap.free(shrunk);
  }

  #[test]
  fn realloc_of_mapped_block_relocates_and_preserves_prefix() {
    let heap = fresh();
    let p = heap.allocate(200_000);
    assert!(!p.is_null());

    unsafe {
      ptr::write_bytes(p, 0xAB, 100);
    }

    let q = heap.reallocate(p, 100);
    assert!(!q.is_null());

    unsafe {
      let header = header_of(q);
      assert_ne!((*header).status, Status::Mapped);
      for i in 0..100 {
        assert_eq!(*q.add(i), 0xAB);
      }
    }

    heap.free(q);
  }

  #[test]
  fn realloc_of_freed_pointer_fails() {
    let heap = fresh();
    let p = heap.allocate(64);
    heap.free(p);

    let result = heap.reallocate(p, 128);
    assert!(result.is_null());
  }

  #[test]
  fn calloc_zeroes_region_even_in_recycled_block() {
    let heap = fresh();
    let a = heap.allocate(1000);
    unsafe { ptr::write_bytes(a, 0xFF, 1000) };
    heap.free(a);

    let p = heap.allocate_zeroed(1000, 1);
    assert!(!p.is_null());

    unsafe {
      for i in 0..1000 {
        assert_eq!(*p.add(i), 0);
      }
    }

    heap.free(p);
  }

  #[test]
  fn calloc_overflow_returns_null() {
    let heap = fresh();
    let p = heap.allocate_zeroed(usize::MAX, 2);
    assert!(p.is_null());
  }

  #[test]
  fn zero_size_requests_return_null() {
    let heap = fresh();
    assert!(heap.allocate(0).is_null());
    assert!(heap.allocate_zeroed(0, 8).is_null());
    assert!(heap.allocate_zeroed(8, 0).is_null());
  }

  #[test]
  fn free_of_null_is_noop() {
    let heap = fresh();
    heap.free(ptr::null_mut()); // must not panic/crash
  }

  #[test]
  fn realloc_same_size_is_identity() {
    let heap = fresh();
    let p = heap.allocate(64);
    let q = heap.reallocate(p, 64);
    assert_eq!(p, q);
    heap.free(q);
  }

  #[test]
  fn realloc_null_delegates_to_allocate() {
    let heap = fresh();
    let p = heap.reallocate(ptr::null_mut(), 64);
    assert!(!p.is_null());
    heap.free(p);
  }

  #[test]
  fn realloc_zero_size_frees_and_returns_null() {
    let heap = fresh();
    let p = heap.allocate(64);
    let q = heap.reallocate(p, 0);
    assert!(q.is_null());
  }
}
