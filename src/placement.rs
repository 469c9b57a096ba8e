//! Best-fit search and tail-extension: the placement policy that decides
//! *where* a break-region request lands once coalescing has run.

use crate::block::{self, Header, Status};
use crate::primitives::extend_break;

/// Scans the whole list for the smallest `FREE` block whose total capacity
/// (`size + H`) covers `requested_total`; ties go to the earliest address.
/// On a hit, splits the block to size and marks it `ALLOC` before returning
/// it.
///
/// Callers must run [`block::coalesce`] first so no adjacent `FREE` pair can
/// hide a larger combined candidate.
pub(crate) unsafe fn best_fit(anchor: *mut Header, requested_total: usize) -> *mut Header {
  unsafe {
    let mut best: *mut Header = std::ptr::null_mut();
    let mut best_size = usize::MAX;

    let mut current = anchor;
    while !current.is_null() {
      if (*current).status == Status::Free && (*current).size + block::HEADER_SIZE >= requested_total {
        if (*current).size < best_size {
          best = current;
          best_size = (*current).size;
        }
      }
      current = (*current).next;
    }

    if !best.is_null() {
      block::split(best, requested_total);
      (*best).status = Status::Alloc;
    }

    best
  }
}

/// Grows the heap when best-fit finds nothing: either absorbs the deficit
/// into a `FREE` tail block, or appends a brand-new block after an `ALLOC`
/// tail.
///
/// `requested_payload` and `requested_total` are both already 8-aligned;
/// `anchor` must be non-null (tail-extend only runs once the heap has been
/// initially reserved).
pub(crate) unsafe fn tail_extend(
  anchor: *mut Header,
  requested_payload: usize,
  requested_total: usize,
) -> *mut Header {
  unsafe {
    let tail = block::tail_of(anchor);
    debug_assert!(!tail.is_null());

    if (*tail).status == Status::Free {
      // The deficit omits H on purpose: we're growing an existing header's
      // payload in place, not allocating a new header.
      let deficit = requested_payload - (*tail).size;
      log::debug!("rallocator: tail-extending break by {deficit} bytes");
      extend_break(deficit as isize);
      (*tail).size += deficit;
      (*tail).status = Status::Alloc;
      tail
    } else {
      log::debug!("rallocator: appending new break block of {requested_total} bytes after tail");
      // Force the break path: tail-extend only runs within the break region,
      // the mmap decision for this request was already made by the caller.
      block::alloc_block(tail, requested_total, usize::MAX)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::ptr;

  unsafe fn header_at(buf: &mut [u8], offset: usize) -> *mut Header {
    unsafe { (buf.as_mut_ptr().add(offset)) as *mut Header }
  }

  #[test]
  fn best_fit_picks_smallest_sufficient_block_ties_to_earliest() {
    // Three FREE blocks of sizes 100, 40, 40 laid out in address order.
    // Request fits all three; the winner should be the smaller-sized (40),
    // and among the two 40-sized blocks, the earlier address wins.
    let h = block::HEADER_SIZE;
    let sizes = [100usize, 40, 40];
    let total_len: usize = sizes.iter().map(|s| h + s).sum();
    let mut buf = vec![0u8; total_len];

    let mut offset = 0;
    let mut headers = Vec::new();
    for &size in &sizes {
      let hdr = unsafe { header_at(&mut buf, offset) };
      headers.push(hdr);
      offset += h + size;
    }

    unsafe {
      for (i, &hdr) in headers.iter().enumerate() {
        (*hdr).size = sizes[i];
        (*hdr).status = Status::Free;
        (*hdr).prev = if i == 0 { ptr::null_mut() } else { headers[i - 1] };
        (*hdr).next = if i + 1 < headers.len() { headers[i + 1] } else { ptr::null_mut() };
      }

      let requested_total = h + 8; // fits any of the three after split
      let chosen = best_fit(headers[0], requested_total);

      assert_eq!(chosen, headers[1], "should pick the first 40-byte block, not the 100-byte one");
      assert_eq!((*chosen).status, Status::Alloc);
    }
  }

  #[test]
  fn best_fit_returns_null_when_nothing_fits() {
    let h = block::HEADER_SIZE;
    let mut buf = vec![0u8; h + 8];
    let hdr = unsafe { header_at(&mut buf, 0) };

    unsafe {
      (*hdr).size = 8;
      (*hdr).status = Status::Free;
      (*hdr).prev = ptr::null_mut();
      (*hdr).next = ptr::null_mut();

      let result = best_fit(hdr, h + 1000);
      assert!(result.is_null());
    }
  }
}
