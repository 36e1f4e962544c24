// Trap handling: system calls and timer interrupts from user
// space, timer interrupts from kernel space. The machine-mode
// timer (see start.rs / kernelvec.rs) arrives here as a
// supervisor software interrupt.

use core::arch::asm;

use crate::memlayout::{TRAMPOLINE, TRAPFRAME};
use crate::param::KSTACKSIZE;
use crate::proc::{self, Cpus, PTABLE, ProcState, Procs};
use crate::println;
use crate::riscv::register::{
    mtvec::TrapMode,
    scause::{self, Exception, Interrupt, Trap},
    sepc, sip, sstatus, stval, stvec,
};
use crate::riscv::{intr_get, intr_off, intr_on, r_satp, r_sstatus, sstatus_write};
use crate::spinlock::Mutex;
use crate::syscall::syscall;

unsafe extern "C" {
    fn kernelvec();
    fn uservec();
    fn userret();
    fn trampoline();
}

pub static TICKS: Mutex<usize> = Mutex::new(0, "time");

#[derive(Debug, PartialEq, Eq)]
pub enum Intr {
    Timer,
}

// set up to take exceptions and traps while in the kernel.
pub fn inithart() {
    unsafe {
        stvec::write(kernelvec as usize, TrapMode::Direct);
    }
}

// handle an interrupt, exception, or system call from user space.
// called from trampoline.rs.
#[unsafe(no_mangle)]
pub extern "C" fn usertrap() -> ! {
    assert!(
        sstatus::read().spp() == sstatus::SPP::User,
        "usertrap: not from user mode"
    );
    assert!(!intr_get(), "usertrap: interrupts enabled");

    // we're in the kernel now, so interrupts and exceptions go to
    // kerneltrap().
    unsafe {
        stvec::write(kernelvec as usize, TrapMode::Direct);
    }

    let p = Cpus::myproc().unwrap();
    let data = Procs::data(p);

    // save user program counter.
    data.trapframe.as_mut().unwrap().epc = sepc::read();

    let mut which_dev = None;
    match scause::read().cause() {
        Trap::Exception(Exception::UserEnvCall) => {
            // system call

            if PTABLE.lock().procs[p].killed {
                proc::exit()
            }

            // sepc points to the ecall instruction, but we want to
            // return to the next instruction.
            data.trapframe.as_mut().unwrap().epc += 4;

            // an interrupt will change sepc, scause and sstatus,
            // so don't enable until done with those registers.
            intr_on();

            syscall();
        }
        Trap::Interrupt(intr)
            if {
                which_dev = devintr(intr);
                which_dev.is_some()
            } => {}
        _ => {
            println!(
                "usertrap(): unexpected scause {:?}, pid={}",
                scause::read().cause(),
                PTABLE.lock().procs[p].pid
            );
            println!(
                "            sepc={:x}, stval={:x}",
                sepc::read(),
                stval::read()
            );
            PTABLE.lock().procs[p].killed = true;
        }
    }

    if PTABLE.lock().procs[p].killed {
        proc::exit()
    }

    // give up the CPU if this was a timer interrupt.
    if which_dev == Some(Intr::Timer) {
        proc::yielding()
    }

    unsafe { usertrap_ret() }
}

// return to user space.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usertrap_ret() -> ! {
    let p = Cpus::myproc().unwrap();

    // about to switch the destination of traps from kerneltrap to
    // usertrap; disable interrupts until back in user space where
    // usertrap is correct.
    intr_off();

    // send syscalls, interrupts, and exceptions to trampoline.rs.
    unsafe {
        stvec::write(
            TRAMPOLINE + (uservec as usize - trampoline as usize),
            TrapMode::Direct,
        );
    }

    let data = Procs::data(p);

    // set up the trapframe values uservec needs the next time the
    // process traps into the kernel.
    let tf = data.trapframe.as_mut().unwrap();
    tf.kernel_satp = r_satp();
    tf.kernel_sp = data.kstack + KSTACKSIZE;
    tf.kernel_trap = usertrap as usize;
    tf.kernel_hartid = unsafe { Cpus::cpu_id() };

    unsafe {
        // tell trampoline.rs where this process's trapframe lives.
        asm!("csrw sscratch, {0}", in(reg) TRAPFRAME);

        // set up the registers trampoline.rs's sret will use to
        // reach user space: previous privilege User, interrupts
        // enabled there, resume at the saved pc.
        sstatus::set_spp(sstatus::SPP::User);
        sstatus::set_spie();
        sepc::write(tf.epc);
    }

    // jump to userret in trampoline.rs at the top of memory; it
    // switches to the user page table, restores user registers,
    // and switches to user mode with sret.
    let satp = data.uvm.as_ref().unwrap().as_satp();
    let dst = TRAMPOLINE + (userret as usize - trampoline as usize);
    let dst: extern "C" fn(usize) -> ! = unsafe { core::mem::transmute(dst) };
    dst(satp)
}

// interrupts and exceptions from kernel code come here via
// kernelvec, on whatever the current kernel stack is.
#[unsafe(no_mangle)]
pub extern "C" fn kerneltrap() {
    let which_dev;
    let sepc_saved = sepc::read();
    let sstatus_saved = r_sstatus();
    let scause = scause::read();

    assert!(
        sstatus::read().spp() == sstatus::SPP::Supervisor,
        "kerneltrap: not from supervisor mode"
    );
    assert!(!intr_get(), "kerneltrap: interrupts enabled");

    match scause.cause() {
        Trap::Interrupt(intr)
            if {
                which_dev = devintr(intr);
                which_dev.is_some()
            } => {}
        _ => {
            panic!(
                "kerneltrap: scause = {:?}, sepc = {:x}, stval = {:x}",
                scause.cause(),
                sepc::read(),
                stval::read()
            );
        }
    }

    // give up the CPU if this is a timer interrupt and a process
    // is running; only the owning CPU moves it out of RUNNING.
    let should_yield = if which_dev != Some(Intr::Timer) {
        false
    } else if let Some(p) = Cpus::myproc() {
        PTABLE.lock().procs[p].state == ProcState::RUNNING
    } else {
        false
    };
    if should_yield {
        proc::yielding()
    }

    // yielding may have caused traps to occur, so restore the
    // trap registers for kernelvec.rs's sret.
    unsafe {
        sepc::write(sepc_saved);
        sstatus_write(sstatus_saved);
    }
}

fn clockintr() {
    let cpu = unsafe { Cpus::cpu_id() };
    if cpu == 0 {
        let mut ticks = TICKS.lock();
        *ticks += 1;
        proc::wakeup(&(*ticks) as *const usize as usize);
    }
}

// check what kind of device interrupt this is and handle it.
fn devintr(intr: Interrupt) -> Option<Intr> {
    match intr {
        Interrupt::SupervisorSoft => {
            // software interrupt from the machine-mode timer
            // interrupt, forwarded by timervec in kernelvec.rs.
            clockintr();

            // acknowledge by clearing the SSIP bit in sip.
            unsafe {
                sip::clear_ssoft();
            }

            Some(Intr::Timer)
        }
        _ => None,
    }
}
