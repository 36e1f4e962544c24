// Process table, lifecycle and the per-CPU scheduler.
//
// One spinlock ("ptable") protects everything the scheduler
// arbitrates over: the slot array, the link arenas, the MLFQ
// queues and pins, the stride heap and run list, the sleep and
// free lists, and both pass clocks. Per-process private state
// (kernel stack, context, trapframe, address space, open files)
// lives outside the lock; only its owner touches it.
//
// Two disciplines share the machine. Processes of type MLFQ are
// scheduled by the feedback queues; a process that reserved a CPU
// share via set_cpu_share becomes type STRIDE and is scheduled by
// pass value against the MLFQ side's aggregate pass. A stride
// process is always in exactly one place: the heap while RUNNABLE
// and off-CPU, the run list while a CPU runs it, the sleep list
// while SLEEPING.

use alloc::boxed::Box;
use alloc::string::String;
use core::cell::UnsafeCell;

use crate::error::{Error::*, Result};
use crate::file::File;
use crate::kalloc::{kalloc, kfree};
use crate::list::Links;
use crate::mlfq::Mlfq;
use crate::param::{
    BARRIER, KSTACK_PAGES, KSTACKSIZE, NCPU, NOFILE, NPROC, QSIZE, RESERVE, strd,
};
use crate::riscv::{PGSIZE, intr_get, intr_off, intr_on, r_tp};
use crate::spinlock::{Mutex, MutexGuard};
use crate::stride::Stride;
use crate::swtch::swtch;
use crate::sync::{LazyLock, OnceLock};
use crate::vm::Uvm;
use crate::array;

pub static CPUS: Cpus = Cpus::new();

pub static PTABLE: Mutex<ProcTable> = Mutex::new(ProcTable::new(), "ptable");

#[allow(clippy::redundant_closure)]
pub static PROCS: LazyLock<Procs> = LazyLock::new(|| Procs::new());

pub static INITPROC: OnceLock<usize> = OnceLock::new();

// layout of the shared link arena: one queue node per process,
// then the sentinel heads.
pub const NLINK: usize = NPROC + QSIZE + 3;
pub const RUN_HEAD: usize = NPROC + QSIZE;
pub const SLEEP_HEAD: usize = NPROC + QSIZE + 1;
pub const FREE_HEAD: usize = NPROC + QSIZE + 2;

// the family arena: one sibling node per process, then one
// children head per process.
pub const NFAM: usize = 2 * NPROC;

pub const fn children(p: usize) -> usize {
    NPROC + p
}

pub struct Cpus([UnsafeCell<Cpu>; NCPU]);
unsafe impl Sync for Cpus {}

// Per-CPU state
#[derive(Debug)]
pub struct Cpu {
    pub proc: Option<usize>, // index of the process running on this cpu, or None.
    pub context: Context,    // swtch() here to enter scheduler().
    pub noff: isize,         // depth of interrupt disabling.
    pub intena: bool,        // were interrupts enabled before the first push?
}

impl Cpus {
    const fn new() -> Self {
        Self(array![UnsafeCell::new(Cpu::new()); NCPU])
    }

    // # Safety
    // Must be called with interrupts disabled,
    // to prevent race with process being moved
    // to a different CPU.
    #[inline]
    pub unsafe fn cpu_id() -> usize {
        r_tp()
    }

    // Return the pointer to this CPU's Cpu struct.
    // # Safety
    // interrupts must be disabled.
    pub unsafe fn mycpu(&self) -> *mut Cpu {
        let id = unsafe { Self::cpu_id() };
        self.0[id].get()
    }

    // Index of the current process, or None if none.
    pub fn myproc() -> Option<usize> {
        let _intr_lock = Self::lock_mycpu("myproc");
        let c;
        unsafe {
            c = &*CPUS.mycpu();
        }
        c.proc
    }

    // disable interrupts on mycpu().
    // if all `IntrLock`s are dropped, interrupts may recover
    // to the previous state.
    pub fn lock_mycpu(_name: &str) -> IntrLock {
        let old = intr_get();
        intr_off();
        unsafe { (*CPUS.mycpu()).locked(old) }
    }
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: None,
            context: Context::new(),
            noff: 0,
            intena: false,
        }
    }

    fn locked(&mut self, old: bool) -> IntrLock {
        if self.noff == 0 {
            self.intena = old;
        }
        self.noff += 1;
        IntrLock
    }

    pub fn unlock(&mut self) {
        assert!(!intr_get(), "cpu unlock - interruptible");
        assert!(self.noff >= 1, "cpu unlock");
        self.noff -= 1;
        if self.noff == 0 && self.intena {
            intr_on()
        }
    }
}

#[derive(Debug)]
pub struct IntrLock;

impl Drop for IntrLock {
    fn drop(&mut self) {
        unsafe { (*CPUS.mycpu()).unlock() }
    }
}

// Saved registers for kernel context switches.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,

    // callee-saved
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }

    pub fn write_zero(&mut self) {
        *self = Self::new();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// Per-process data for the trap handling code in trampoline.rs.
// uservec saves user registers here and loads the kernel_* slots;
// the usertrap_ret/userret pair restores them on the way out. The
// layout is shared with the assembly, hence the offsets.
#[derive(Clone, Copy, Default, Debug)]
#[repr(C, align(4096))]
pub struct Trapframe {
    pub kernel_satp: usize,   //   0 kernel page table
    pub kernel_sp: usize,     //   8 top of process's kernel stack
    pub kernel_trap: usize,   //  16 usertrap()
    pub epc: usize,           //  24 saved user program counter
    pub kernel_hartid: usize, //  32 saved kernel tp
    pub ra: usize,            //  40
    pub sp: usize,            //  48
    pub gp: usize,            //  56
    pub tp: usize,            //  64
    pub t0: usize,            //  72
    pub t1: usize,            //  80
    pub t2: usize,            //  88
    pub s0: usize,            //  96
    pub s1: usize,            // 104
    pub a0: usize,            // 112
    pub a1: usize,            // 120
    pub a2: usize,            // 128
    pub a3: usize,            // 136
    pub a4: usize,            // 144
    pub a5: usize,            // 152
    pub a6: usize,            // 160
    pub a7: usize,            // 168
    pub s2: usize,            // 176
    pub s3: usize,            // 184
    pub s4: usize,            // 192
    pub s5: usize,            // 200
    pub s6: usize,            // 208
    pub s7: usize,            // 216
    pub s8: usize,            // 224
    pub s9: usize,            // 232
    pub s10: usize,           // 240
    pub s11: usize,           // 248
    pub t3: usize,            // 256
    pub t4: usize,            // 264
    pub t5: usize,            // 272
    pub t6: usize,            // 280
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum ProcState {
    UNUSED,
    EMBRYO,
    SLEEPING,
    RUNNABLE,
    RUNNING,
    ZOMBIE,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum ProcType {
    MLFQ,
    STRIDE,
}

// The shared slice of a process: everything the scheduler reads
// or writes under the ptable lock.
#[derive(Clone, Copy, Debug)]
pub struct Proc {
    pub state: ProcState,
    pub ptype: ProcType,
    pub pid: usize,
    pub parent: Option<usize>,
    pub killed: bool,
    pub chan: usize, // if non-zero, sleeping on chan
    // MLFQ accounting
    pub privlevel: usize, // 0 is the highest priority
    pub ticks: usize,     // ticks consumed at the current level
    // stride accounting
    pub tickets: usize,
    pub pass: usize,
}

impl Proc {
    pub const fn new() -> Self {
        Self {
            state: ProcState::UNUSED,
            ptype: ProcType::MLFQ,
            pid: 0,
            parent: None,
            killed: false,
            chan: 0,
            privlevel: 0,
            ticks: 0,
            tickets: 0,
            pass: 0,
        }
    }
}

// These are private to the process, so the ptable lock need not
// be held.
#[derive(Debug, Default)]
pub struct ProcData {
    pub kstack: usize,                     // bottom of the kernel stack
    pub sz: usize,                         // size of the user image
    pub uvm: Option<Uvm>,                  // user page table
    pub trapframe: Option<Box<Trapframe>>, // data page for trampoline.rs
    pub context: Context,                  // swtch() here to run the process
    pub name: String,                      // process name (debugging)
    pub ofile: [Option<File>; NOFILE],     // open files
}

impl ProcData {
    fn new() -> Self {
        Self::default()
    }
}

pub struct Procs {
    data: [UnsafeCell<ProcData>; NPROC],
}
unsafe impl Sync for Procs {}

impl Procs {
    fn new() -> Self {
        Self {
            data: core::array::from_fn(|_| UnsafeCell::new(ProcData::new())),
        }
    }

    // the private half of slot p. Callers must be the owning
    // process (or reaping a ZOMBIE under the ptable lock).
    #[allow(clippy::mut_from_ref)]
    pub fn data(p: usize) -> &'static mut ProcData {
        unsafe { &mut *PROCS.data[p].get() }
    }
}

// sleep channel naming a process: used by wait()/exit().
pub fn proc_chan(p: usize) -> usize {
    PROCS.data[p].get() as usize
}

// Everything the ptable lock protects.
#[derive(Debug)]
pub struct ProcTable {
    pub procs: [Proc; NPROC],
    pub links: Links<NLINK>,
    pub family: Links<NFAM>,
    pub mlfq: Mlfq,
    pub stride: Stride,
    pub nextpid: usize,
}

impl ProcTable {
    pub const fn new() -> Self {
        let mut links = Links::new();
        let mut i = 0;
        while i < NPROC {
            links.add_tail(i, FREE_HEAD);
            i += 1;
        }
        Self {
            procs: [Proc::new(); NPROC],
            links,
            family: Links::new(),
            mlfq: Mlfq::new(),
            stride: Stride::new(),
            nextpid: 1,
        }
    }

    // Pop a free slot into EMBRYO with a fresh pid. EMBRYO
    // processes belong to no structure until make_runnable.
    pub fn alloc_slot(&mut self) -> Option<usize> {
        let p = self.links.first(FREE_HEAD)?;
        self.links.del(p);
        self.procs[p].state = ProcState::EMBRYO;
        self.procs[p].pid = self.nextpid;
        self.nextpid += 1;
        self.family.init_head(children(p));
        Some(p)
    }

    // Clear a slot and return it to the free list.
    pub fn release_slot(&mut self, p: usize) {
        let pr = &mut self.procs[p];
        pr.pid = 0;
        pr.parent = None;
        pr.killed = false;
        pr.chan = 0;
        pr.tickets = 0;
        pr.pass = 0;
        pr.ticks = 0;
        pr.privlevel = 0;
        pr.ptype = ProcType::MLFQ;
        pr.state = ProcState::UNUSED;
        self.links.add(p, FREE_HEAD);
    }

    // Enter an MLFQ process into the queue of its level.
    pub fn make_runnable(&mut self, p: usize) {
        assert!(
            self.procs[p].ptype == ProcType::MLFQ,
            "make_runnable: stride proc"
        );
        self.procs[p].state = ProcState::RUNNABLE;
        let level = self.procs[p].privlevel;
        let Self { mlfq, links, .. } = self;
        mlfq.enqueue(links, level, p);
    }

    // the current virtual-time frontier; new and waking stride
    // processes join here so they neither bank credit nor starve.
    pub fn frontier(&self) -> usize {
        self.stride.min_pass(&self.procs).min(self.mlfq.pass)
    }

    // Arbitrate: the stride heap wins only with a strictly smaller
    // pass, so ties go to the MLFQ side.
    pub fn select(&mut self) -> Option<usize> {
        let Self {
            stride,
            mlfq,
            links,
            procs,
            ..
        } = self;
        if stride.min_pass(procs) < mlfq.pass {
            Some(stride.pop(procs))
        } else {
            mlfq.select(links, procs)
        }
    }

    // MLFQ time accounting for the process that just left the CPU.
    pub fn mlfq_logic(&mut self, p: usize) {
        let Self {
            mlfq, links, procs, ..
        } = self;
        mlfq.logic(links, procs, p);
    }

    // Runs at the end of every scheduler iteration, whichever side
    // was selected (p is None when nothing ran).
    pub fn stride_logic(&mut self, p: Option<usize>) {
        // pass overflow handling
        let minpass = match p {
            Some(p) if self.procs[p].ptype == ProcType::STRIDE => self.procs[p].pass,
            _ => self.mlfq.pass,
        };
        if minpass > BARRIER {
            self.renormalize(minpass);
        }

        // pass increases by stride
        match p {
            Some(p) if self.procs[p].ptype == ProcType::STRIDE => {
                let inc = strd(self.procs[p].tickets);
                match self.procs[p].state {
                    ProcState::RUNNABLE => {
                        self.procs[p].pass += inc;
                        let Self { stride, procs, .. } = self;
                        stride.push(procs, p);
                    }
                    ProcState::SLEEPING => {
                        // it is on the sleep list; wakeup pushes it
                        // back into the heap.
                        self.procs[p].pass += inc;
                    }
                    ProcState::ZOMBIE => {}
                    _ => panic!("stride wrong state"),
                }
            }
            _ => self.mlfq.pass += strd(self.mlfq.tickets),
        }
    }

    // Shift every clock down by the observed minimum. Ordering is
    // preserved; saturation only matters for processes whose pass
    // sits below the minimum (run-list peers mid-dispatch and long
    // sleepers), which the clamp-on-wake rule tolerates.
    fn renormalize(&mut self, minpass: usize) {
        let Self {
            stride,
            links,
            procs,
            mlfq,
            ..
        } = self;
        for i in 1..=stride.len() {
            let q = stride.at(i);
            procs[q].pass = procs[q].pass.saturating_sub(minpass);
        }
        for q in links.iter(RUN_HEAD) {
            procs[q].pass = procs[q].pass.saturating_sub(minpass);
        }
        for q in links.iter(SLEEP_HEAD) {
            if procs[q].ptype == ProcType::STRIDE {
                procs[q].pass = procs[q].pass.saturating_sub(minpass);
            }
        }
        mlfq.pass -= minpass;
    }

    // Take p off whichever runnable structure owns it.
    fn remove_from_run(&mut self, p: usize) {
        match self.procs[p].ptype {
            ProcType::MLFQ => {
                let level = self.procs[p].privlevel;
                let Self { mlfq, links, .. } = self;
                mlfq.dequeue(links, level, p);
            }
            ProcType::STRIDE => self.links.del(p),
        }
    }

    // The structural half of sleep(): move the caller from its
    // runnable structure to the head of the sleep list.
    pub fn suspend(&mut self, p: usize, chan: usize) {
        assert!(chan != 0, "sleep without chan");
        self.procs[p].chan = chan;
        self.remove_from_run(p);
        self.procs[p].state = ProcState::SLEEPING;
        self.links.add(p, SLEEP_HEAD);
    }

    // Wake one sleeper: back into its level queue (MLFQ) or into
    // the heap at the virtual-time frontier (stride).
    fn wake_move(&mut self, p: usize) {
        self.links.del(p);
        self.procs[p].state = ProcState::RUNNABLE;
        match self.procs[p].ptype {
            ProcType::MLFQ => {
                let level = self.procs[p].privlevel;
                let Self { mlfq, links, .. } = self;
                mlfq.enqueue(links, level, p);
            }
            ProcType::STRIDE => {
                let frontier = self.frontier();
                let pr = &mut self.procs[p];
                if pr.pass < frontier {
                    pr.pass = frontier;
                }
                let Self { stride, procs, .. } = self;
                stride.push(procs, p);
            }
        }
    }

    // Wake up all processes sleeping on chan.
    // The ptable lock must be held.
    pub fn wakeup1(&mut self, chan: usize) {
        let mut itr = self.links.next(SLEEP_HEAD);
        while itr != SLEEP_HEAD {
            let next = self.links.next(itr);
            if self.procs[itr].chan == chan {
                self.wake_move(itr);
            }
            itr = next;
        }
    }

    // Mark pid killed; a sleeping victim is made RUNNABLE so it
    // reaches its next user-boundary crossing and exits there.
    pub fn kill1(&mut self, pid: usize) -> Result<()> {
        for p in 0..NPROC {
            if self.procs[p].pid == pid && self.procs[p].state != ProcState::UNUSED {
                self.procs[p].killed = true;
                if self.procs[p].state == ProcState::SLEEPING {
                    self.wake_move(p);
                }
                return Ok(());
            }
        }
        Err(NotFound)
    }

    // Reserve `share` tickets for p. Fails unless the MLFQ side
    // keeps at least RESERVE afterwards; a current stride holder's
    // tickets count toward the budget, so reassignment is atomic.
    pub fn set_share(&mut self, p: usize, share: usize) -> Result<()> {
        if share < 1 || share > 100 - RESERVE {
            return Err(InvalidArgument);
        }
        let mut remain = self.mlfq.tickets;
        if self.procs[p].ptype == ProcType::STRIDE {
            remain += self.procs[p].tickets;
        }
        if remain < share + RESERVE {
            return Err(InvalidArgument);
        }

        if self.procs[p].ptype == ProcType::MLFQ {
            let level = self.procs[p].privlevel;
            {
                let Self { mlfq, links, .. } = self;
                mlfq.dequeue(links, level, p);
            }
            self.procs[p].pass = self.frontier();
            self.procs[p].ptype = ProcType::STRIDE;
            // the caller is the running process, so it belongs on
            // the run list, not in the heap.
            self.links.add(p, RUN_HEAD);
        }
        self.mlfq.tickets = remain - share;
        self.procs[p].tickets = share;
        Ok(())
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn init() {
    // force the private data array into existence before the
    // first process is created.
    let _ = &*PROCS;
    log::info!("process table ready, {} slots", NPROC);
}

// Look for a free slot and initialize the parts every process
// needs to run in the kernel. Rolls the slot back on kstack
// exhaustion.
fn allocproc() -> Option<usize> {
    let p = PTABLE.lock().alloc_slot()?;
    let data = Procs::data(p);

    let Some(kstack) = kalloc(KSTACK_PAGES) else {
        PTABLE.lock().release_slot(p);
        return None;
    };
    data.kstack = kstack as usize;
    data.trapframe = Some(Box::new(Trapframe::default()));

    // new context: start executing at fork_ret, which returns to
    // user space.
    data.context.write_zero();
    data.context.ra = fork_ret as usize;
    data.context.sp = data.kstack + KSTACKSIZE;

    Some(p)
}

// Undo allocproc for a process that never became RUNNABLE.
fn unalloc(p: usize) {
    let data = Procs::data(p);
    if data.kstack != 0 {
        kfree(data.kstack as *mut u8, KSTACK_PAGES);
        data.kstack = 0;
    }
    data.trapframe = None;
    PTABLE.lock().release_slot(p);
}

// Free a ZOMBIE's resources and return its slot to the free list.
// The ptable lock is held; nothing else can run p anymore.
pub fn freeproc(table: &mut ProcTable, p: usize) {
    let data = Procs::data(p);
    if data.kstack != 0 {
        kfree(data.kstack as *mut u8, KSTACK_PAGES);
        data.kstack = 0;
    }
    if let Some(uvm) = data.uvm.take() {
        uvm.free(data.sz);
    }
    data.trapframe = None;
    data.sz = 0;
    data.name.clear();
    table.release_slot(p);
}

// The first user program: reap orphans forever. Hand-assembled
// riscv64, loaded at user address 0.
//   start:
//     li  a0, 10
//     li  a7, 7        # sleep
//     ecall
//     li  a7, 3        # wait
//     ecall
//     j   start
static INITCODE: [u8; 24] = [
    0x13, 0x05, 0xa0, 0x00, // li a0, 10
    0x93, 0x08, 0x70, 0x00, // li a7, 7
    0x73, 0x00, 0x00, 0x00, // ecall
    0x93, 0x08, 0x30, 0x00, // li a7, 3
    0x73, 0x00, 0x00, 0x00, // ecall
    0x6f, 0xf0, 0xdf, 0xfe, // j start
];

// Set up the first user process.
pub fn user_init() {
    let p = allocproc().expect("user_init: out of procs");
    INITPROC.set(p).expect("user_init: already initialized");
    let data = Procs::data(p);

    let tf_pa = data.trapframe.as_ref().unwrap().as_ref() as *const Trapframe as usize;
    let mut uvm = Uvm::create(tf_pa).expect("user_init: uvm");
    uvm.init_code(&INITCODE).expect("user_init: initcode");
    data.uvm = Some(uvm);
    data.sz = PGSIZE;

    let tf = data.trapframe.as_mut().unwrap();
    tf.epc = 0; // beginning of initcode
    tf.sp = PGSIZE;

    data.name = String::from("initcode");
    for fd in data.ofile.iter_mut().take(3) {
        *fd = Some(File::console());
    }

    // this assignment to state lets other cores run this process.
    let mut table = PTABLE.lock();
    table.make_runnable(p);
    log::info!("init is pid {}", table.procs[p].pid);
}

// Create a new process copying the caller. Returns the child's
// pid in the parent; the child returns 0 out of the duplicated
// trapframe.
pub fn fork() -> Result<usize> {
    let p = Cpus::myproc().unwrap();
    let pdata = Procs::data(p);

    let np = allocproc().ok_or(OutOfMemory)?;
    let ndata = Procs::data(np);

    // copy the address space.
    let tf_pa = ndata.trapframe.as_ref().unwrap().as_ref() as *const Trapframe as usize;
    let mut uvm = match Uvm::create(tf_pa) {
        Ok(uvm) => uvm,
        Err(e) => {
            unalloc(np);
            return Err(e);
        }
    };
    if let Err(e) = pdata.uvm.as_ref().unwrap().copy(&mut uvm, pdata.sz) {
        uvm.free(0);
        unalloc(np);
        return Err(e);
    }
    ndata.uvm = Some(uvm);
    ndata.sz = pdata.sz;

    // clear a0 so that fork returns 0 in the child.
    **ndata.trapframe.as_mut().unwrap() = **pdata.trapframe.as_ref().unwrap();
    ndata.trapframe.as_mut().unwrap().a0 = 0;

    for (nf, f) in ndata.ofile.iter_mut().zip(pdata.ofile.iter()) {
        *nf = f.as_ref().map(File::dup);
    }
    ndata.name = pdata.name.clone();

    let mut table = PTABLE.lock();
    let pid = table.procs[np].pid;
    table.procs[np].parent = Some(p);
    table.family.add_tail(np, children(p));
    table.procs[np].ptype = ProcType::MLFQ;
    table.make_runnable(np);

    Ok(pid)
}

// Exit the current process. Does not return; the process stays a
// ZOMBIE until its parent reaps it via wait().
pub fn exit() -> ! {
    let p = Cpus::myproc().unwrap();
    assert!(INITPROC.get().copied() != Some(p), "init exiting");

    // close all open files.
    let data = Procs::data(p);
    for fd in data.ofile.iter_mut() {
        let _file = fd.take();
    }

    let mut table = PTABLE.lock();

    // parent might be sleeping in wait().
    let parent = table.procs[p].parent.expect("exit: no parent");
    table.wakeup1(proc_chan(parent));

    // pass abandoned children to init.
    let init = *INITPROC.get().unwrap();
    let ch = children(p);
    let mut itr = table.family.next(ch);
    while itr != ch {
        table.procs[itr].parent = Some(init);
        if table.procs[itr].state == ProcState::ZOMBIE {
            table.wakeup1(proc_chan(init));
        }
        itr = table.family.next(itr);
    }
    table.family.bulk_move_tail(ch, children(init));

    // leave the runnable structures; a stride share flows back to
    // the MLFQ side.
    table.remove_from_run(p);
    if table.procs[p].ptype == ProcType::STRIDE {
        let tickets = table.procs[p].tickets;
        table.mlfq.tickets += tickets;
    }
    table.procs[p].state = ProcState::ZOMBIE;

    // jump into the scheduler, never to return.
    sched(table, p);
    panic!("zombie exit");
}

// Wait for a child process to exit and return its pid.
// Returns an error if this process has no children.
pub fn wait() -> Result<usize> {
    let p = Cpus::myproc().unwrap();
    let mut table = PTABLE.lock();
    loop {
        // scan the children for zombies.
        let ch = children(p);
        let mut zombie = None;
        let mut itr = table.family.next(ch);
        while itr != ch {
            if table.procs[itr].state == ProcState::ZOMBIE {
                zombie = Some(itr);
                break;
            }
            itr = table.family.next(itr);
        }
        if let Some(z) = zombie {
            let pid = table.procs[z].pid;
            table.family.del(z);
            freeproc(&mut table, z);
            return Ok(pid);
        }

        // no point waiting if we don't have any children.
        if table.family.is_empty(ch) {
            return Err(NoChild);
        }
        if table.procs[p].killed {
            return Err(Interrupted);
        }

        // wait for a child to exit. (see wakeup1 in exit.)
        table = sleep1(table, p, proc_chan(p));
    }
}

// Enter the scheduler. Must hold only the ptable lock and have
// changed the caller's state. Saves and restores intena because
// it is a property of this kernel thread, not this CPU.
fn sched<'a>(guard: MutexGuard<'a, ProcTable>, p: usize) -> MutexGuard<'a, ProcTable> {
    unsafe {
        let c = &mut *CPUS.mycpu();
        assert!(guard.holding(), "sched ptable lock");
        assert!(c.noff == 1, "sched locks");
        assert!(guard.procs[p].state != ProcState::RUNNING, "sched running");
        assert!(!intr_get(), "sched interruptible");

        let intena = c.intena;
        swtch(&mut Procs::data(p).context, &c.context);
        // this kernel thread may resume on another cpu.
        (*CPUS.mycpu()).intena = intena;
    }
    guard
}

// Give up the CPU for one scheduling round.
pub fn yielding() {
    let p = Cpus::myproc().unwrap();
    let mut table = PTABLE.lock();
    if table.procs[p].ptype == ProcType::STRIDE {
        // off the run list, so stride_logic pushes us back into
        // the heap with an advanced pass.
        table.links.del(p);
    }
    table.procs[p].state = ProcState::RUNNABLE;
    let table = sched(table, p);
    drop(table);
}

// A fork child's very first scheduling by scheduler()
// will swtch here. "Return" to user space.
pub unsafe extern "C" fn fork_ret() -> ! {
    // still holding the ptable lock from scheduler(); this stack
    // never saw the guard, so release by hand.
    unsafe { PTABLE.force_unlock() };

    #[cfg(not(target_os = "none"))]
    loop {
        core::hint::spin_loop();
    }
    #[cfg(target_os = "none")]
    {
        unsafe { crate::trap::usertrap_ret() }
    }
}

// Atomically release the condition lock and sleep on chan.
// Reacquires the lock when awakened.
pub fn sleep<T>(chan: usize, guard: MutexGuard<'_, T>) -> MutexGuard<'_, T> {
    let p = Cpus::myproc().expect("sleep");

    // Must acquire the ptable lock in order to change state and
    // call sched. Once it is held no wakeup can be missed (wakeup
    // runs with the ptable lock held), so the condition lock can
    // be released.
    let mutex;
    {
        let mut table = PTABLE.lock();
        mutex = Mutex::unlock(guard);

        table.suspend(p, chan);
        let mut table = sched(table, p);

        // tidy up.
        table.procs[p].chan = 0;
    }
    // reacquire the original lock.
    mutex.lock()
}

// sleep for callers that already hold the ptable lock (wait()).
fn sleep1<'a>(
    mut table: MutexGuard<'a, ProcTable>,
    p: usize,
    chan: usize,
) -> MutexGuard<'a, ProcTable> {
    table.suspend(p, chan);
    let mut table = sched(table, p);
    table.procs[p].chan = 0;
    table
}

// Wake up all processes sleeping on chan.
pub fn wakeup(chan: usize) {
    PTABLE.lock().wakeup1(chan);
}

// Kill the process with the given pid. The victim won't exit
// until it returns to user space (see usertrap).
pub fn kill(pid: usize) -> Result<()> {
    PTABLE.lock().kill1(pid)
}

// Reserve a guaranteed CPU share for the calling process.
pub fn set_cpu_share(share: usize) -> Result<()> {
    let p = Cpus::myproc().unwrap();
    PTABLE.lock().set_share(p, share)
}

// Charge the current process one tick of consumed time. The
// tick-sleep syscall calls this so sleeping off the end of a
// quantum still pays for it.
pub fn inctick() {
    let p = Cpus::myproc().unwrap();
    PTABLE.lock().procs[p].ticks += 1;
}

// Grow or shrink the current process's memory by n bytes.
pub fn grow(n: isize) -> Result<()> {
    let p = Cpus::myproc().unwrap();
    let data = Procs::data(p);
    let uvm = data.uvm.as_mut().unwrap();
    let sz = data.sz;
    let newsz = if n >= 0 {
        uvm.alloc(sz, sz + n as usize)?
    } else {
        uvm.dealloc(sz, sz.saturating_sub(n.unsigned_abs()))
    };
    data.sz = newsz;
    Ok(())
}

// Per-CPU process scheduler.
// Each CPU calls scheduler() after setting itself up.
// Scheduler never returns. It loops, doing:
//  - choose a process: the stride heap if its minimum pass beats
//    the MLFQ side's pass, otherwise the MLFQ pin rotation.
//  - swtch to start running that process.
//  - eventually that process transfers control back via swtch,
//    and the tick is accounted to whichever discipline ran.
pub fn scheduler() -> ! {
    let c = unsafe { CPUS.mycpu() };
    unsafe { (*c).proc = None };

    loop {
        // avoid deadlock by ensuring that devices can interrupt.
        intr_on();

        let mut table = PTABLE.lock();
        let p = table.select();
        if let Some(p) = p {
            if table.procs[p].state == ProcState::RUNNABLE {
                if table.procs[p].ptype == ProcType::STRIDE {
                    // mark it as running out of the heap.
                    table.links.add(p, RUN_HEAD);
                }
                unsafe { (*c).proc = Some(p) };
                table.procs[p].state = ProcState::RUNNING;

                unsafe {
                    swtch(&mut (*c).context, &Procs::data(p).context);
                }

                // the process is done for now; it changed its
                // state before coming back.
                if table.procs[p].ptype == ProcType::MLFQ {
                    table.mlfq_logic(p);
                }
                unsafe { (*c).proc = None };
            }
        }
        table.stride_logic(p);
        drop(table);
    }
}
