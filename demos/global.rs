//! This example is designed to test the implementation of
//! the trait `GlobalAlloc` on our allocator. See [`BrkAlloc`] to
//! see the actual trait implementation.

use brkalloc::BrkAlloc;
use std::thread;

#[global_allocator]
static ALLOCATOR: BrkAlloc = BrkAlloc::new();

fn main() {
    // Box example
    let val_box = Box::new(22);
    println!("Box Value: {}, At: {:p}", val_box, val_box);

    // Vec example
    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
    }

    // String example
    let msg = String::from("Heap Testing");
    println!("\nString '{}' - At: {:p}", msg, msg.as_ptr());

    // Merge example
    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();

    drop(a);
    drop(b);

    let c = Box::new([0u8; 128]);
    let ptr_c = c.as_ptr();

    if ptr_a == ptr_c {
        println!("Correctly reused at {:p}", ptr_c);
    } else {
        println!("Not reused. A was at {:p} and C is at {:p}", ptr_a, ptr_c);
    }

    // Thread example test
    let t1 = thread::spawn(|| {
        let _ = Box::new(222);
    });

    let t2 = thread::spawn(|| {
        let _ = Box::new(222);
    });

    t1.join().unwrap();
    t2.join().unwrap();

    let stats = ALLOCATOR.stats();
    println!(
        "Outstanding: {} bytes, peak: {} bytes, {} allocations",
        stats.current, stats.peak, stats.events
    );
}
