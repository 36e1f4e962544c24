// Physical memory allocator based on a buddy heap.
//
// Doubles as the global allocator on the real machine (Box, Arc,
// String) and hands out page-grained runs for kernel stacks and
// page-table frames. Host builds route the page interface through
// the host allocator so the core stays testable.

use core::alloc::Layout;
#[cfg(target_os = "none")]
use core::alloc::GlobalAlloc;
#[cfg(target_os = "none")]
use core::ptr;

use buddy_system_allocator::Heap;

use crate::riscv::PGSIZE;
use crate::spinlock::Mutex;

#[cfg(target_os = "none")]
unsafe extern "C" {
    // first address after kernel.
    // defined by kernel.ld
    static mut end: [u8; 0];
}

#[cfg_attr(target_os = "none", global_allocator)]
pub static KMEM: Kmem = Kmem(Mutex::new(Heap::new(), "kmem"));

pub struct Kmem(Mutex<Heap<32>>);

#[cfg(target_os = "none")]
unsafe impl GlobalAlloc for Kmem {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0
            .lock()
            .alloc(layout)
            .map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(p) = ptr::NonNull::new(ptr) {
            self.0.lock().dealloc(p, layout)
        }
    }
}

#[cfg(target_os = "none")]
#[allow(static_mut_refs)]
pub fn init() {
    unsafe {
        let start = end.as_ptr() as usize;
        KMEM.0
            .lock()
            .init(start, crate::memlayout::PHYSTOP - start);
    }
}

#[cfg(not(target_os = "none"))]
pub fn init() {}

fn page_layout(npages: usize) -> Layout {
    Layout::from_size_align(npages * PGSIZE, PGSIZE).unwrap()
}

// allocate npages of zeroed, page-aligned memory. Fallible: the
// caller rolls back (e.g. allocproc returns the slot to the free
// list) instead of panicking.
pub fn kalloc(npages: usize) -> Option<*mut u8> {
    let layout = page_layout(npages);
    #[cfg(target_os = "none")]
    let ptr = KMEM.0.lock().alloc(layout).ok().map(|p| p.as_ptr());
    #[cfg(not(target_os = "none"))]
    let ptr = {
        let p = unsafe { alloc::alloc::alloc(layout) };
        if p.is_null() { None } else { Some(p) }
    };
    let ptr = ptr?;
    unsafe { core::ptr::write_bytes(ptr, 0, npages * PGSIZE) };
    Some(ptr)
}

pub fn kfree(ptr: *mut u8, npages: usize) {
    let layout = page_layout(npages);
    #[cfg(target_os = "none")]
    KMEM.0
        .lock()
        .dealloc(core::ptr::NonNull::new(ptr).unwrap(), layout);
    #[cfg(not(target_os = "none"))]
    unsafe {
        alloc::alloc::dealloc(ptr, layout)
    };
}
