//! Two independent allocator contexts, each over its own private break.
//! Run with `RUST_LOG=debug` to see the heap grow and shrink.

use brkalloc::{Allocator, ArenaBreak, Policy, Stats};

fn main() {
    env_logger::init();

    let policy = Policy {
        bulk_size: 64 << 10,
        trim_threshold: 256 << 10,
        ..Policy::general()
    };

    let mut small = Allocator::new(ArenaBreak::new(1 << 20).unwrap(), Stats::new(), policy);
    let mut large = Allocator::new(ArenaBreak::new(16 << 20).unwrap(), Stats::new(), policy);

    let ptrs: Vec<_> = (1..=32).map(|i| small.allocate(i * 24).unwrap()).collect();
    let big = large.allocate(4 << 20).unwrap();

    for ptr in ptrs.iter().step_by(2) {
        unsafe { small.release(Some(*ptr)) };
    }
    println!("small heap: {:#?}", small.report());

    let big = unsafe { large.resize(Some(big), 8 << 20) }.unwrap();
    println!("large heap after growing in place: {} bytes used", large.brk().used());

    unsafe { large.release(big) };
    println!("large heap after release: {} bytes used", large.brk().used());

    match small.allocate(2 << 20) {
        Ok(_) => println!("unexpected: the small arena grew past its capacity"),
        Err(error) => println!("small arena refused: {error}"),
    }

    println!("small stats: {:?}", small.hook().snapshot());
    println!("large stats: {:?}", large.hook().snapshot());
}
