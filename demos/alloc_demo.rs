use std::io::Read;
use std::ptr;

use libc::sbrk;
use rallocator::Rallocator;

/// Waits until the user presses ENTER. Useful for inspecting memory state
/// with tools like `pmap`, `htop`, or `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  env_logger::init();

  let allocator = Rallocator::new();

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) A small allocate() triggers the initial break reservation
    //    (INIT_MEM_ALLOC bytes), far larger than the 100 bytes requested.
    // --------------------------------------------------------------------
    println!("\n[1] allocate(100)");
    let p1 = allocator.allocate(100);
    println!("[1] p1 = {:?}", p1);
    print_program_break("after [1]");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) A second small allocate() is satisfied from the leftover FREE
    //    block the initial reservation created, no new break extension.
    // --------------------------------------------------------------------
    println!("\n[2] allocate(200)");
    let p2 = allocator.allocate(200);
    println!("[2] p2 = {:?}", p2);
    print_program_break("after [2]");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Freeing both and re-allocating something that fits their combined
    //    size demonstrates coalescing: the new block lands at p1's address.
    // --------------------------------------------------------------------
    allocator.free(p1);
    allocator.free(p2);
    println!("\n[3] freed p1 and p2, now allocate(250)");
    let p3 = allocator.allocate(250);
    println!(
      "[3] p3 = {:?} (== p1? {})",
      p3,
      p3 == p1
    );
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) A large request skips the break entirely and goes straight to an
    //    anonymous mapping.
    // --------------------------------------------------------------------
    println!("\n[4] allocate(200_000), exceeds MMAP_THRESHOLD ({} bytes)", rallocator::MMAP_THRESHOLD);
    print_program_break("before [4]");
    let big = allocator.allocate(200_000);
    println!("[4] big = {:?}", big);
    print_program_break("after [4] (unchanged: this went to mmap, not the break)");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) reallocate() on the mapped block relocates into the break region
    //    and preserves the leading bytes.
    // --------------------------------------------------------------------
    ptr::write_bytes(big, 0xAB, 64);
    let relocated = allocator.reallocate(big, 64);
    println!(
      "\n[5] reallocate(big, 64) -> {:?}, first byte preserved = 0x{:X}",
      relocated,
      *relocated
    );
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) allocate_zeroed() always returns zeroed memory, including memory
    //    recycled from a previously written-to, freed block.
    // --------------------------------------------------------------------
    allocator.free(p3);
    let z = allocator.allocate_zeroed(1000, 1);
    let all_zero = (0..1000).all(|i| *z.add(i) == 0);
    println!("\n[6] allocate_zeroed(1000, 1) -> {:?}, all zero = {}", z, all_zero);

    allocator.free(relocated);
    allocator.free(z);

    println!("\n[7] End of demo. The OS reclaims everything on exit.");
  }
}
