// Sv39 page tables: the kernel direct map and per-process user
// address spaces. Only what the process layer consumes — create,
// copy for fork, grow/shrink for sbrk, teardown for reaping, and
// the trampoline/trapframe mappings user trap entry relies on.
// No demand paging, no copy-on-write.

use crate::error::{Error::*, Result};
use crate::kalloc::{kalloc, kfree};
use crate::memlayout::{MAXVA, TRAMPOLINE, TRAPFRAME};
use crate::riscv::{PGSHIFT, PGSIZE, pgrounddown, pgroundup};

pub const PTE_V: usize = 1 << 0;
pub const PTE_R: usize = 1 << 1;
pub const PTE_W: usize = 1 << 2;
pub const PTE_X: usize = 1 << 3;
pub const PTE_U: usize = 1 << 4;

const SATP_SV39: usize = 8 << 60;

pub const fn make_satp(root: usize) -> usize {
    SATP_SV39 | (root >> 12)
}

const fn pa2pte(pa: usize) -> usize {
    (pa >> PGSHIFT) << 10
}

const fn pte2pa(pte: usize) -> usize {
    (pte >> 10) << PGSHIFT
}

const fn pte_flags(pte: usize) -> usize {
    pte & 0x3FF
}

// the 9-bit index for `va` at the given level of the tree.
const fn px(level: usize, va: usize) -> usize {
    (va >> (PGSHIFT + 9 * level)) & 0x1FF
}

// Return a pointer to the leaf PTE for va, allocating intermediate
// tables on the way down when asked to.
fn walk(root: usize, va: usize, alloc: bool) -> Result<*mut usize> {
    assert!(va < MAXVA, "walk");

    let mut pagetable = root as *mut usize;
    for level in [2, 1] {
        let pte = unsafe { pagetable.add(px(level, va)) };
        let v = unsafe { *pte };
        if v & PTE_V != 0 {
            pagetable = pte2pa(v) as *mut usize;
        } else {
            if !alloc {
                return Err(NotFound);
            }
            let page = kalloc(1).ok_or(OutOfMemory)? as usize;
            unsafe { *pte = pa2pte(page) | PTE_V };
            pagetable = page as *mut usize;
        }
    }
    Ok(unsafe { pagetable.add(px(0, va)) })
}

// Install mappings for [va, va+size); va and pa must be aligned.
fn map_pages(root: usize, va: usize, size: usize, mut pa: usize, perm: usize) -> Result<()> {
    assert!(size > 0, "map_pages: zero size");
    assert!(va % PGSIZE == 0 && pa % PGSIZE == 0, "map_pages: unaligned");

    let mut a = va;
    let last = pgrounddown(va + size - 1);
    loop {
        let pte = walk(root, a, true)?;
        assert!(unsafe { *pte } & PTE_V == 0, "map_pages: remap");
        unsafe { *pte = pa2pte(pa) | perm | PTE_V };
        if a == last {
            break;
        }
        a += PGSIZE;
        pa += PGSIZE;
    }
    Ok(())
}

// Remove npages of mappings starting at va, optionally freeing
// the frames. Every page must currently be mapped.
fn unmap(root: usize, va: usize, npages: usize, free: bool) {
    assert!(va % PGSIZE == 0, "unmap: unaligned");

    for a in (va..va + npages * PGSIZE).step_by(PGSIZE) {
        let pte = walk(root, a, false).expect("unmap: walk");
        let v = unsafe { *pte };
        assert!(v & PTE_V != 0, "unmap: not mapped");
        assert!(pte_flags(v) != PTE_V, "unmap: not a leaf");
        if free {
            kfree(pte2pa(v) as *mut u8, 1);
        }
        unsafe { *pte = 0 };
    }
}

// Recursively free page-table pages; all leaf mappings must
// already have been removed.
fn freewalk(pagetable: usize) {
    let pt = pagetable as *mut usize;
    for i in 0..512 {
        let pte = unsafe { *pt.add(i) };
        if pte & PTE_V != 0 && pte & (PTE_R | PTE_W | PTE_X) == 0 {
            freewalk(pte2pa(pte));
            unsafe { *pt.add(i) = 0 };
        } else {
            assert!(pte & PTE_V == 0, "freewalk: leaf");
        }
    }
    kfree(pagetable as *mut u8, 1);
}

fn trampoline_pa() -> usize {
    // host builds never enter user space; any aligned frame keeps
    // create/free symmetric.
    #[cfg(not(target_os = "none"))]
    return crate::memlayout::KERNBASE;
    #[cfg(target_os = "none")]
    {
        unsafe extern "C" {
            fn trampoline();
        }
        trampoline as usize
    }
}

// A user address space: the root of its page-table tree. The user
// image occupies [0, sz) (sz lives in ProcData); the trampoline
// and the process's trapframe sit at the top.
#[derive(Debug)]
pub struct Uvm {
    root: usize,
}

impl Uvm {
    pub fn create(trapframe_pa: usize) -> Result<Self> {
        let root = kalloc(1).ok_or(OutOfMemory)? as usize;
        let uvm = Self { root };

        // trampoline, for trap entry/exit; not PTE_U: it runs in
        // supervisor mode on the user page table.
        if let Err(e) = map_pages(root, TRAMPOLINE, PGSIZE, trampoline_pa(), PTE_R | PTE_X) {
            freewalk(root);
            return Err(e);
        }
        if let Err(e) = map_pages(
            root,
            TRAPFRAME,
            PGSIZE,
            pgrounddown(trapframe_pa),
            PTE_R | PTE_W,
        ) {
            unmap(root, TRAMPOLINE, 1, false);
            freewalk(root);
            return Err(e);
        }
        Ok(uvm)
    }

    // Load the embedded initcode into address 0. Used only for
    // the very first process.
    pub fn init_code(&mut self, code: &[u8]) -> Result<()> {
        assert!(code.len() <= PGSIZE, "init_code: more than a page");
        let mem = kalloc(1).ok_or(OutOfMemory)?;
        unsafe { core::ptr::copy_nonoverlapping(code.as_ptr(), mem, code.len()) };
        if let Err(e) = map_pages(
            self.root,
            0,
            PGSIZE,
            mem as usize,
            PTE_R | PTE_W | PTE_X | PTE_U,
        ) {
            kfree(mem, 1);
            return Err(e);
        }
        Ok(())
    }

    // Grow the image from oldsz to newsz, zeroed. Returns the new
    // size; on failure everything allocated here is rolled back.
    pub fn alloc(&mut self, oldsz: usize, newsz: usize) -> Result<usize> {
        if newsz < oldsz {
            return Ok(oldsz);
        }
        let mut a = pgroundup(oldsz);
        while a < newsz {
            let Some(mem) = kalloc(1) else {
                self.dealloc(a, oldsz);
                return Err(OutOfMemory);
            };
            if let Err(e) = map_pages(
                self.root,
                a,
                PGSIZE,
                mem as usize,
                PTE_R | PTE_W | PTE_X | PTE_U,
            ) {
                kfree(mem, 1);
                self.dealloc(a, oldsz);
                return Err(e);
            }
            a += PGSIZE;
        }
        Ok(newsz)
    }

    // Shrink the image from oldsz down to newsz. Returns newsz.
    pub fn dealloc(&mut self, oldsz: usize, newsz: usize) -> usize {
        if newsz >= oldsz {
            return oldsz;
        }
        if pgroundup(newsz) < pgroundup(oldsz) {
            let npages = (pgroundup(oldsz) - pgroundup(newsz)) / PGSIZE;
            unmap(self.root, pgroundup(newsz), npages, true);
            flush_tlb();
        }
        newsz
    }

    // Duplicate the user image into child, for fork.
    pub fn copy(&self, child: &mut Uvm, sz: usize) -> Result<()> {
        for va in (0..sz).step_by(PGSIZE) {
            let pte = walk(self.root, va, false).expect("uvm copy: walk");
            let v = unsafe { *pte };
            assert!(v & PTE_V != 0, "uvm copy: page not present");
            let pa = pte2pa(v);
            let flags = pte_flags(v);

            let rollback = |child: &mut Uvm| {
                if va > 0 {
                    unmap(child.root, 0, va / PGSIZE, true);
                }
            };
            let Some(mem) = kalloc(1) else {
                rollback(child);
                return Err(OutOfMemory);
            };
            unsafe { core::ptr::copy_nonoverlapping(pa as *const u8, mem, PGSIZE) };
            if let Err(e) = map_pages(child.root, va, PGSIZE, mem as usize, flags) {
                kfree(mem, 1);
                rollback(child);
                return Err(e);
            }
        }
        Ok(())
    }

    // Tear the whole address space down: user frames, the borrowed
    // trampoline/trapframe mappings, then the table pages.
    pub fn free(self, sz: usize) {
        if sz > 0 {
            unmap(self.root, 0, pgroundup(sz) / PGSIZE, true);
        }
        unmap(self.root, TRAMPOLINE, 1, false);
        unmap(self.root, TRAPFRAME, 1, false);
        freewalk(self.root);
    }

    pub fn as_satp(&self) -> usize {
        make_satp(self.root)
    }
}

// kernel page table root; built once on cpu 0.
#[cfg(target_os = "none")]
static KVM: crate::sync::OnceLock<usize> = crate::sync::OnceLock::new();

#[cfg(target_os = "none")]
pub fn kinit() {
    use crate::memlayout::{CLINT, KERNBASE, PHYSTOP, UART0};

    unsafe extern "C" {
        // end of kernel text, defined by kernel.ld
        static etext: [u8; 0];
    }
    let etext = unsafe { etext.as_ptr() as usize };

    let root = kalloc(1).expect("kinit: no memory") as usize;

    // uart registers
    map_pages(root, UART0, PGSIZE, UART0, PTE_R | PTE_W).unwrap();
    // CLINT, for the machine-mode timer
    map_pages(root, CLINT, 0x10000, CLINT, PTE_R | PTE_W).unwrap();
    // kernel text, executable and read-only
    map_pages(root, KERNBASE, etext - KERNBASE, KERNBASE, PTE_R | PTE_X).unwrap();
    // kernel data and the physical RAM the allocator hands out
    map_pages(root, etext, PHYSTOP - etext, etext, PTE_R | PTE_W).unwrap();
    // trampoline page at the top of the kernel address space too
    map_pages(root, TRAMPOLINE, PGSIZE, trampoline_pa(), PTE_R | PTE_X).unwrap();

    KVM.set(root).expect("kinit: twice");
}

// switch this hart to the kernel page table.
#[cfg(target_os = "none")]
pub fn kinithart() {
    unsafe {
        crate::riscv::w_satp(make_satp(*KVM.get().unwrap()));
        crate::riscv::asm::sfence_vma_all();
    }
}

fn flush_tlb() {
    #[cfg(target_os = "none")]
    unsafe {
        crate::riscv::asm::sfence_vma_all();
    }
}
