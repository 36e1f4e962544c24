// Console output, to the uart. Input is out of scope here: the
// kernel exposes no read syscall, so there is no line discipline.

use crate::uart;

pub fn init() {
    uart::init();
}

pub fn putc(c: u8) {
    uart::putc(c);
}
