// Spin mutex with the interrupt discipline the scheduler needs:
// taking a lock pushes interrupts off on this CPU (noff/intena on
// the Cpu struct), releasing pops. Guards are tokens, not owners:
// the process-table lock is handed across swtch, acquired on one
// kernel stack and released on another, so the guard only records
// "one outstanding hold" and Drop releases whichever acquire is
// current.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut, Drop};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::proc::{CPUS, Cpus, IntrLock};

#[derive(Debug)]
pub struct Mutex<T> {
    locked: AtomicBool,
    // which cpu holds it, for holding(); valid only while locked.
    cpu: UnsafeCell<isize>,
    name: &'static str,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Mutex<T> {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _intr_lock: IntrLock,
}

impl<T> Mutex<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            cpu: UnsafeCell::new(-1),
            name,
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        let _intr_lock = Cpus::lock_mycpu(self.name);
        assert!(!self.holding(), "acquire {}", self.name);
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        unsafe {
            *self.cpu.get() = Cpus::cpu_id() as isize;
        }
        MutexGuard {
            mutex: self,
            _intr_lock,
        }
    }

    // does this cpu hold the lock? interrupts must be off.
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
            && unsafe { *self.cpu.get() } == unsafe { Cpus::cpu_id() as isize }
    }

    // release a hold whose guard lives on another kernel stack.
    // fork_ret runs on a brand-new stack while the scheduler's
    // guard is parked across swtch; this is its release.
    //
    // # Safety
    // The caller must be on the cpu that holds the lock and must
    // not touch the protected data afterwards.
    pub unsafe fn force_unlock(&self) {
        assert!(self.holding(), "force_unlock {}", self.name);
        unsafe {
            *self.cpu.get() = -1;
        }
        self.locked.store(false, Ordering::Release);
        unsafe { (*CPUS.mycpu()).unlock() }
    }

    // release the guard but keep the mutex reference around so the
    // caller can re-lock, as sleep() does with the condition lock.
    pub fn unlock(guard: MutexGuard<'_, T>) -> &'_ Mutex<T> {
        let mutex = guard.mutex;
        drop(guard);
        mutex
    }
}

impl<T> MutexGuard<'_, T> {
    pub fn holding(&self) -> bool {
        self.mutex.holding()
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        assert!(self.holding(), "release {}", self.mutex.name);
        unsafe {
            *self.mutex.cpu.get() = -1;
        }
        self.mutex.locked.store(false, Ordering::Release);
        // _intr_lock drops after this body and pops interrupts.
    }
}
