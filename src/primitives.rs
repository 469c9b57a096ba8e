//! Thin adapters over the three syscalls this allocator is built on:
//! break adjustment, anonymous mapping, and page-size query.
//!
//! These are treated as primitives with a fixed contract: the allocator
//! never inspects *how* the OS satisfies them, only their return values.
//! Failure here is defined as fatal, the allocator has no channel for
//! reporting "out of memory" distinct from a successful zero-size request,
//! so an OS refusal aborts the process instead of propagating a `Result`
//! callers of `malloc`/`calloc`/`realloc`/`free` don't expect.

use std::ffi::c_void;
use std::sync::OnceLock;

/// Extends the program break by `n_bytes`, returning the start address of
/// the newly added region (the *old* break).
///
/// `n_bytes` is negative only when `reallocate`'s tail-shrink path calls in
/// with a shrink amount expressed as a negative extension.
pub(crate) fn extend_break(n_bytes: isize) -> *mut u8 {
  let old_break = unsafe { libc::sbrk(n_bytes) };
  if old_break == usize::MAX as *mut c_void {
    fatal("sbrk", n_bytes as i64);
  }
  old_break as *mut u8
}

/// Sets the program break to an absolute address. Used only by
/// `reallocate`'s tail-shrink: growing the tail block in place moves the
/// break forward; shrinking moves it back.
pub(crate) fn set_break(address: *mut u8) {
  let rc = unsafe { libc::brk(address as *mut c_void) };
  if rc != 0 {
    fatal("brk", address as usize as i64);
  }
}

/// Returns a fresh, zero-filled, private anonymous mapping of exactly
/// `n_bytes`. Used for the large-request path of `allocate`/`allocate_zeroed`
/// and for any `reallocate` whose old block was itself mapped.
pub(crate) fn map_anonymous(n_bytes: usize) -> *mut u8 {
  let addr = unsafe {
    libc::mmap(
      std::ptr::null_mut(),
      n_bytes,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };
  if addr == libc::MAP_FAILED {
    fatal("mmap", n_bytes as i64);
  }
  addr as *mut u8
}

/// Releases a mapping previously obtained from [`map_anonymous`].
pub(crate) fn unmap(address: *mut u8, n_bytes: usize) {
  let rc = unsafe { libc::munmap(address as *mut c_void, n_bytes) };
  if rc != 0 {
    fatal("munmap", address as usize as i64);
  }
}

static PAGESIZE: OnceLock<usize> = OnceLock::new();

/// Returns the OS page size, querying and caching it on first use.
pub(crate) fn query_pagesize() -> usize {
  *PAGESIZE.get_or_init(|| {
    let rc = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if rc <= 0 {
      fatal("sysconf(_SC_PAGESIZE)", rc as i64);
    }
    rc as usize
  })
}

/// Logs the failing syscall and aborts. There is no recovery path: the
/// allocator's public entry points are infallible (they return pointers,
/// never `Result`), so a refused break extension or mapping cannot be
/// reported any other way.
fn fatal(syscall: &str, detail: i64) -> ! {
  log::error!(
    "rallocator: {syscall} failed (arg/addr = {detail}, errno = {}), aborting",
    std::io::Error::last_os_error()
  );
  std::process::abort();
}
