// The user/kernel crossing. This page is mapped at the same
// virtual address (TRAMPOLINE) in both the kernel page table and
// every user page table, so the satp switch in the middle of
// uservec/userret does not move the ground under the pc.
//
// uservec saves the user registers into the trapframe (mapped at
// TRAPFRAME, whose address usertrap_ret parks in sscratch),
// switches to the kernel page table and jumps to usertrap.
// userret is the inverse: switch to the user page table passed in
// a0, reload the user registers, sret.

use crate::memlayout::TRAPFRAME;

core::arch::global_asm!(
    r#"
.section trampsec
.globl trampoline
trampoline:
.align 4
.globl uservec
uservec:
        # trap.rs sets stvec to point here, so traps from user
        # space start here, in supervisor mode, but with the user
        # page table.

        # swap a0 and sscratch, so that a0 is TRAPFRAME.
        csrrw a0, sscratch, a0

        # save the user registers in the trapframe.
        sd ra, 40(a0)
        sd sp, 48(a0)
        sd gp, 56(a0)
        sd tp, 64(a0)
        sd t0, 72(a0)
        sd t1, 80(a0)
        sd t2, 88(a0)
        sd s0, 96(a0)
        sd s1, 104(a0)
        sd a1, 120(a0)
        sd a2, 128(a0)
        sd a3, 136(a0)
        sd a4, 144(a0)
        sd a5, 152(a0)
        sd a6, 160(a0)
        sd a7, 168(a0)
        sd s2, 176(a0)
        sd s3, 184(a0)
        sd s4, 192(a0)
        sd s5, 200(a0)
        sd s6, 208(a0)
        sd s7, 216(a0)
        sd s8, 224(a0)
        sd s9, 232(a0)
        sd s10, 240(a0)
        sd s11, 248(a0)
        sd t3, 256(a0)
        sd t4, 264(a0)
        sd t5, 272(a0)
        sd t6, 280(a0)

        # save the user a0 in the trapframe.
        csrr t0, sscratch
        sd t0, 112(a0)

        # restore the kernel stack pointer and hartid.
        ld sp, 8(a0)
        ld tp, 32(a0)

        # load the address of usertrap() and the kernel page table.
        ld t0, 16(a0)
        ld t1, 0(a0)

        # switch to the kernel page table.
        sfence.vma zero, zero
        csrw satp, t1
        sfence.vma zero, zero

        # jump to usertrap(), which does not return.
        jr t0

.globl userret
userret:
        # userret(satp): switch from kernel to user.
        # called by usertrap_ret() in trap.rs via the
        # trampoline mapping.

        # switch to the user page table.
        sfence.vma zero, zero
        csrw satp, a0
        sfence.vma zero, zero

        # restore all but a0 from the trapframe.
        li a0, {tf}
        ld ra, 40(a0)
        ld sp, 48(a0)
        ld gp, 56(a0)
        ld tp, 64(a0)
        ld t0, 72(a0)
        ld t1, 80(a0)
        ld t2, 88(a0)
        ld s0, 96(a0)
        ld s1, 104(a0)
        ld a1, 120(a0)
        ld a2, 128(a0)
        ld a3, 136(a0)
        ld a4, 144(a0)
        ld a5, 152(a0)
        ld a6, 160(a0)
        ld a7, 168(a0)
        ld s2, 176(a0)
        ld s3, 184(a0)
        ld s4, 192(a0)
        ld s5, 200(a0)
        ld s6, 208(a0)
        ld s7, 216(a0)
        ld s8, 224(a0)
        ld s9, 232(a0)
        ld s10, 240(a0)
        ld s11, 248(a0)
        ld t3, 256(a0)
        ld t4, 264(a0)
        ld t5, 272(a0)
        ld t6, 280(a0)

        # restore user a0 last.
        ld a0, 112(a0)

        # return to user mode and the saved user pc.
        # usertrap_ret() set up sstatus and sepc.
        sret
"#,
    tf = const TRAPFRAME
);
