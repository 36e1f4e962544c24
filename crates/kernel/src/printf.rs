// Formatted console output and the panic printer.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::console;
use crate::spinlock::Mutex;

// serializes concurrent println!s; skipped once panicked so a
// wedged lock cannot swallow the panic message.
static PR: Mutex<()> = Mutex::new((), "pr");
pub static PANICKED: AtomicBool = AtomicBool::new(false);

struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.bytes() {
            console::putc(c);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;
    if PANICKED.load(Ordering::Relaxed) {
        let _ = Writer.write_fmt(args);
    } else {
        let _guard = PR.lock();
        let _ = Writer.write_fmt(args);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::printf::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

pub fn panic_inner(info: &core::panic::PanicInfo<'_>) -> ! {
    crate::riscv::intr_off();
    PANICKED.store(true, Ordering::Relaxed);
    println!("panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
