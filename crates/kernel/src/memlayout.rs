// Physical memory layout
use crate::riscv::PGSIZE;

// qemu -machine virt is set up like this,
// based on qemu's hw/riscv/virt.c:
//
// 00001000 -- boot ROM, provided by qemu
// 02000000 -- CLINT
// 10000000 -- uart0
// 80000000 -- boot ROM jumps here in machine mode
//             -kernel loads the kernel here
// unused RAM after 80000000.

// qemu puts UART registers here in physical memory.
pub const UART0: usize = 0x1000_0000;

// core local interrupter (CLINT), which contains the timer
pub const CLINT: usize = 0x200_0000;
pub const fn clint_mtimecmp(hartid: usize) -> usize {
    CLINT + 0x4000 + 8 * hartid
}
pub const CLINT_MTIME: usize = CLINT + 0xBFF8; // Cycles since boot.

// the kernel expects there to be RAM
// for use by the kernel and user pages
// from physical address 0x80000000 to PHYSTOP.
pub const KERNBASE: usize = 0x8000_0000;
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

// one beyond the highest possible Sv39 virtual address; one bit
// less than the full 39 to avoid sign-extended addresses.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + 12 - 1);

// map the trampoline page to the highest address,
// in both user and kernel space.
pub const TRAMPOLINE: usize = MAXVA - PGSIZE;

// the trapframe sits just below the trampoline in user space.
pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;

// boot stack pages per CPU.
pub const STACK_PAGE_NUM: usize = 4;
