// Thin layer over the riscv CSR crate: the interrupt switches the
// spinlock discipline is built on, page-size helpers, and the CSR
// module re-exports the trap and vm code use. Host builds (tests)
// get a software interrupt flag so push_off/pop_off bookkeeping
// still runs.

#[cfg(target_os = "none")]
pub use ::riscv::{asm, register};

pub const PGSIZE: usize = 4096;
pub const PGSHIFT: usize = 12;

pub const fn pgroundup(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

pub const fn pgrounddown(a: usize) -> usize {
    a & !(PGSIZE - 1)
}

#[cfg(target_os = "none")]
mod imp {
    use core::arch::asm;

    use ::riscv::register::sstatus;

    // enable device interrupts
    #[inline]
    pub fn intr_on() {
        unsafe { sstatus::set_sie() }
    }

    // disable device interrupts
    #[inline]
    pub fn intr_off() {
        unsafe { sstatus::clear_sie() }
    }

    // are device interrupts enabled?
    #[inline]
    pub fn intr_get() -> bool {
        sstatus::read().sie()
    }

    // hart id lives in tp while in the kernel.
    #[inline]
    pub fn r_tp() -> usize {
        let tp;
        unsafe { asm!("mv {0}, tp", out(reg) tp) };
        tp
    }

    // raw sstatus bits; kerneltrap saves and restores them around
    // a nested yield.
    #[inline]
    pub fn r_sstatus() -> usize {
        let bits;
        unsafe { asm!("csrr {0}, sstatus", out(reg) bits) };
        bits
    }

    #[inline]
    pub unsafe fn sstatus_write(bits: usize) {
        unsafe { asm!("csrw sstatus, {0}", in(reg) bits) };
    }

    // supervisor address translation and protection;
    // holds the address of the page table.
    #[inline]
    pub fn r_satp() -> usize {
        let bits;
        unsafe { asm!("csrr {0}, satp", out(reg) bits) };
        bits
    }

    #[inline]
    pub unsafe fn w_satp(bits: usize) {
        unsafe { asm!("csrw satp, {0}", in(reg) bits) };
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use core::sync::atomic::{AtomicBool, Ordering};

    // one virtual CPU with a software interrupt-enable flag, so
    // the noff/intena accounting is exercised under test.
    static INTR: AtomicBool = AtomicBool::new(true);

    pub fn intr_on() {
        INTR.store(true, Ordering::Relaxed);
    }

    pub fn intr_off() {
        INTR.store(false, Ordering::Relaxed);
    }

    pub fn intr_get() -> bool {
        INTR.load(Ordering::Relaxed)
    }

    pub fn r_tp() -> usize {
        0
    }

    pub fn r_sstatus() -> usize {
        0
    }

    pub unsafe fn sstatus_write(_bits: usize) {}

    pub fn r_satp() -> usize {
        0
    }

    pub unsafe fn w_satp(_bits: usize) {}
}

pub use imp::*;
