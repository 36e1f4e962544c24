// Scheduler and process-table tunables.

use crate::riscv::PGSIZE;

// maximum number of processes
pub const NPROC: usize = 64;
// maximum number of CPUs
pub const NCPU: usize = 8;
// open files per process
pub const NOFILE: usize = 16;
// size of a process's kernel stack
pub const KSTACKSIZE: usize = 4 * PGSIZE;
pub const KSTACK_PAGES: usize = KSTACKSIZE / PGSIZE;

// number of MLFQ levels; 0 is the highest priority.
pub const QSIZE: usize = 3;

// time quantum: ticks between forced rotations within a level.
pub const fn tq(level: usize) -> usize {
    match level {
        0 => 1,
        1 => 2,
        _ => 4,
    }
}

// time allotment: total ticks at a level before demotion.
// the base level never demotes.
pub const fn ta(level: usize) -> usize {
    match level {
        0 => 5,
        1 => 10,
        _ => usize::MAX,
    }
}

// global MLFQ ticks between priority boosts.
pub const BOOSTINTERVAL: usize = 100;

// ticket share the MLFQ side may never drop below.
pub const RESERVE: usize = 20;

// stride numerator: a process holding t tickets advances its
// pass by strd(t) per scheduling tick. tickets stay in 1..=100,
// so strides stay in 100..=10_000 and BARRIER leaves plenty of
// headroom before renormalization.
pub const STRIDE1: usize = 10_000;

pub const fn strd(tickets: usize) -> usize {
    STRIDE1 / tickets
}

// renormalize all pass values once the minimum crosses this.
pub const BARRIER: usize = (i32::MAX / 2) as usize;
