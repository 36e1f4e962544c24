// System call numbers, dispatch table and implementations.
// Arguments arrive in the trapframe's a0..a5, the number in a7,
// the result goes back in a0; kernel errors become negative
// values there.

#[cfg(all(target_os = "none", feature = "kernel"))]
use crate::error::Error::*;
use crate::error::Result;
#[cfg(all(target_os = "none", feature = "kernel"))]
use crate::println;
#[cfg(all(target_os = "none", feature = "kernel"))]
use crate::proc::{self, Cpus, PTABLE, Procs};
#[cfg(all(target_os = "none", feature = "kernel"))]
use crate::trap::TICKS;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum SysCalls {
    Invalid = 0,
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Kill = 4,
    Getpid = 5,
    Sbrk = 6,
    Sleep = 7,
    Uptime = 8,
    Yield = 9,
    SetCpuShare = 10,
}

pub const NSYSCALL: usize = 11;

#[derive(Debug, Clone, Copy)]
pub enum Fn {
    U(fn() -> Result<()>),    // return unit type
    I(fn() -> Result<usize>), // return integer
    N(fn() -> !),             // no return
}

impl Fn {
    pub fn call(self) -> isize {
        match self {
            Fn::U(uni) => uni().map(|_| 0).unwrap_or_else(|err| err as isize),
            Fn::I(int) => int().map(|i| i as isize).unwrap_or_else(|err| err as isize),
            Fn::N(nev) => nev(),
        }
    }
}

impl SysCalls {
    pub const TABLE: [(Fn, &'static str); NSYSCALL] = [
        (Fn::N(Self::invalid), ""),
        (Fn::I(Self::fork), "()"), // Create a process, return child's pid.
        (Fn::N(Self::exit), "()"), // Terminate the current process. No return.
        (Fn::I(Self::wait), "()"), // Wait for a child to exit; returns its pid.
        (Fn::U(Self::kill), "(pid: usize)"), // Flag pid killed; it exits at its next trap return.
        (Fn::I(Self::getpid), "()"), // Return the current process's pid.
        (Fn::I(Self::sbrk), "(n: isize)"), /* Grow process's memory by n bytes.
                                            * Returns start of new memory. */
        (Fn::U(Self::sleep), "(n: usize)"), // Pause for n clock ticks.
        (Fn::I(Self::uptime), "()"),        // Clock ticks since boot.
        (Fn::U(Self::yield_), "()"),        // Give up the CPU for one round.
        (Fn::U(Self::set_cpu_share), "(share: usize)"), /* Reserve a guaranteed CPU share,
                                                         * 1..=100-RESERVE. */
    ];

    pub fn from_usize(n: usize) -> Self {
        match n {
            1 => Self::Fork,
            2 => Self::Exit,
            3 => Self::Wait,
            4 => Self::Kill,
            5 => Self::Getpid,
            6 => Self::Sbrk,
            7 => Self::Sleep,
            8 => Self::Uptime,
            9 => Self::Yield,
            10 => Self::SetCpuShare,
            _ => Self::Invalid,
        }
    }
}

#[cfg(all(target_os = "none", feature = "kernel"))]
fn argraw(n: usize) -> usize {
    let tf = Procs::data(Cpus::myproc().unwrap())
        .trapframe
        .as_ref()
        .unwrap();
    match n {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => panic!("arg"),
    }
}

// Process related system calls
impl SysCalls {
    fn invalid() -> ! {
        panic!("invalid syscall dispatched")
    }

    pub fn fork() -> Result<usize> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(0);
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            proc::fork()
        }
    }

    pub fn exit() -> ! {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        loop {
            core::hint::spin_loop();
        }
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            proc::exit()
            // not reached
        }
    }

    pub fn wait() -> Result<usize> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(0);
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            proc::wait()
        }
    }

    pub fn kill() -> Result<()> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(());
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            proc::kill(argraw(0))
        }
    }

    pub fn getpid() -> Result<usize> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(0);
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            Ok(PTABLE.lock().procs[Cpus::myproc().unwrap()].pid)
        }
    }

    pub fn sbrk() -> Result<usize> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(0);
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            let n = argraw(0) as isize;
            let addr = Procs::data(Cpus::myproc().unwrap()).sz;
            proc::grow(n).and(Ok(addr))
        }
    }

    pub fn sleep() -> Result<()> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(());
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            let p = Cpus::myproc().unwrap();
            let n = argraw(0);
            let mut ticks = TICKS.lock();
            let ticks0 = *ticks;
            while *ticks - ticks0 < n {
                if PTABLE.lock().procs[p].killed {
                    return Err(Interrupted);
                }
                // a tick spent sleeping still counts against the
                // caller's MLFQ allotment; without this, sleeping
                // just before quantum expiry would reset the bill.
                proc::inctick();
                ticks = proc::sleep(&(*ticks) as *const usize as usize, ticks);
            }
            Ok(())
        }
    }

    pub fn uptime() -> Result<usize> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(0);
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            Ok(*TICKS.lock())
        }
    }

    pub fn yield_() -> Result<()> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(());
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            proc::yielding();
            Ok(())
        }
    }

    pub fn set_cpu_share() -> Result<()> {
        #[cfg(not(all(target_os = "none", feature = "kernel")))]
        return Ok(());
        #[cfg(all(target_os = "none", feature = "kernel"))]
        {
            proc::set_cpu_share(argraw(0))
        }
    }
}

#[cfg(all(target_os = "none", feature = "kernel"))]
pub fn syscall() {
    let p = Cpus::myproc().unwrap();
    let tf = Procs::data(p).trapframe.as_mut().unwrap();
    let n = tf.a7;

    match SysCalls::from_usize(n) {
        SysCalls::Invalid => {
            let pid = PTABLE.lock().procs[p].pid;
            println!("{} {}: unknown sys call {}", pid, Procs::data(p).name, n);
            tf.a0 = -1isize as usize;
        }
        sc => {
            tf.a0 = SysCalls::TABLE[sc as usize].0.call() as usize;
        }
    }
}
