use std::{io::Read, ptr};

use libc::sbrk;
use segalloc::{SbrkSource, SegregatedAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb`, or just watch how the program break moves as the heap grows.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_stats(allocator: &SegregatedAllocator<SbrkSource>) {
  let stats = allocator.stats();
  println!(
    "    heap = {} bytes, {} allocated blocks ({} bytes), {} free blocks ({} bytes)",
    stats.heap_size, stats.allocated_blocks, stats.allocated_bytes, stats.free_blocks, stats.free_bytes
  );
}

fn main() {
  unsafe { print_program_break("start") };

  // The allocator reserves a small prologue plus one 4 KiB chunk up front.
  let mut allocator = match SegregatedAllocator::new(SbrkSource::new()) {
    Ok(allocator) => allocator,
    Err(err) => {
      eprintln!("could not initialize the heap: {err}");
      return;
    }
  };

  unsafe {
    print_program_break("after init");
    print_stats(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Two small allocations are carved from the front of the first chunk.
    // --------------------------------------------------------------------
    let first = allocator.allocate(4);
    let second = allocator.allocate(100);
    println!("\n[1] allocate(4) = {:?}, allocate(100) = {:?}", first, second);
    println!("    usable sizes: {} and {}", allocator.usable_size(first), allocator.usable_size(second));
    first.cast::<u32>().write(0xDEADBEEF);
    ptr::write_bytes(second, 0xAB, 100);
    print_stats(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Freeing the first block puts it on the 16-byte free list; the next
    //    request of that class reuses it.
    // --------------------------------------------------------------------
    allocator.free(first);
    let third = allocator.allocate(2);
    println!(
      "\n[2] freed {:?}, allocate(2) = {:?} ({})",
      first,
      third,
      if third == first { "reused" } else { "not reused" }
    );
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Growing the second block moves it and keeps its bytes.
    // --------------------------------------------------------------------
    let moved = allocator.reallocate(second, 1000);
    println!("\n[3] reallocate({:?}, 1000) = {:?}, first byte = {:#X}", second, moved, moved.read());
    print_stats(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) A 64 KiB request misses every free list and extends the heap.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = allocator.allocate(64 * 1024);
    println!("\n[4] allocate(64 KiB) = {:?}", big);
    print_program_break("after large alloc");
    print_stats(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Freeing everything coalesces the heap back into one free block.
    //    The break never moves down again.
    // --------------------------------------------------------------------
    allocator.free(big);
    allocator.free(moved);
    allocator.free(third);
    println!("\n[5] freed everything");
    print_stats(&allocator);
    allocator.check_heap(Some("demo end"));
    print_program_break("end");
  }
}
