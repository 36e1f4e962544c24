// Low-level driver for the 16550 uart on qemu's virt board.
// Output only, polled; the kernel has no console input path.

#[cfg(target_os = "none")]
mod imp {
    use core::ptr::{read_volatile, write_volatile};

    use crate::memlayout::UART0;

    // the uart control registers, at address UART0.
    const THR: usize = 0; // transmit holding register
    const IER: usize = 1; // interrupt enable register
    const FCR: usize = 2; // FIFO control register
    const LCR: usize = 3; // line control register
    const LSR: usize = 5; // line status register

    const FCR_FIFO_ENABLE: u8 = 1 << 0;
    const FCR_FIFO_CLEAR: u8 = 3 << 1;
    const LCR_EIGHT_BITS: u8 = 3;
    const LCR_BAUD_LATCH: u8 = 1 << 7;
    const LSR_TX_IDLE: u8 = 1 << 5;

    unsafe fn write_reg(reg: usize, v: u8) {
        unsafe { write_volatile((UART0 + reg) as *mut u8, v) }
    }

    unsafe fn read_reg(reg: usize) -> u8 {
        unsafe { read_volatile((UART0 + reg) as *const u8) }
    }

    pub fn init() {
        unsafe {
            // disable interrupts.
            write_reg(IER, 0x00);
            // special mode to set baud rate, 38.4K.
            write_reg(LCR, LCR_BAUD_LATCH);
            write_reg(0, 0x03);
            write_reg(1, 0x00);
            // leave set-baud mode, 8 bits no parity.
            write_reg(LCR, LCR_EIGHT_BITS);
            // reset and enable FIFOs.
            write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);
        }
    }

    // spin until the uart can take another byte. Safe from any
    // context, including panics with locks held.
    pub fn putc(c: u8) {
        unsafe {
            while read_reg(LSR) & LSR_TX_IDLE == 0 {
                core::hint::spin_loop();
            }
            write_reg(THR, c);
        }
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    pub fn init() {}

    pub fn putc(_c: u8) {}
}

pub use imp::*;
