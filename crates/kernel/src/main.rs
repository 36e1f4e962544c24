#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_os = "none")]
use kernel::{
    console, kalloc, logger, println,
    proc::{self, Cpus},
    trap, vm,
};

#[cfg(target_os = "none")]
static STARTED: AtomicBool = AtomicBool::new(false);

#[cfg(target_os = "none")]
kernel::kmain!(main);

#[cfg(target_os = "none")]
extern "C" fn main() -> ! {
    let cpuid = unsafe { Cpus::cpu_id() };
    if cpuid == 0 {
        console::init(); // console output
        logger::init(); // log facade over the console
        println!();
        println!("stride-os kernel is booting");
        kalloc::init(); // physical memory allocator
        vm::kinit(); // create the kernel page table
        vm::kinithart(); // turn on paging
        proc::init(); // process table
        trap::inithart(); // install the kernel trap vector
        proc::user_init(); // first user process
        STARTED.store(true, Ordering::SeqCst);
    } else {
        while !STARTED.load(Ordering::SeqCst) {
            core::hint::spin_loop()
        }
        vm::kinithart(); // turn on paging
        trap::inithart(); // install the kernel trap vector
        log::info!("hart {} starting", cpuid);
    }
    proc::scheduler()
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    kernel::printf::panic_inner(info)
}

#[cfg(not(target_os = "none"))]
fn main() {}
