use brkalloc::Allocator;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    // Grows through the real process break, next to the system allocator
    // used by `println!`.
    let mut allocator = Allocator::system();

    let addr1 = allocator.allocate(8).unwrap();
    log_alloc(addr1.as_ptr(), 8);

    let addr2 = allocator.allocate(100).unwrap();
    log_alloc(addr2.as_ptr(), 100);

    let addr3 = allocator.allocate(16).unwrap();
    log_alloc(addr3.as_ptr(), 16);

    let addr2 = unsafe { allocator.resize(Some(addr2), 4000) }.unwrap();
    println!("Resized to 4000 bytes at: {addr2:?}");

    unsafe {
        allocator.release(Some(addr1));
        allocator.release(addr2);
        allocator.release(Some(addr3));
    }

    println!("{:#?}", allocator.report());
}
