//! Banked register and PSR tests: mode switching, SPSR access, the
//! decompose/recompose round trip, and cross-mode register access.

use super::*;

#[test]
fn test_reset_state() {
    let core = ArmCore::new();
    assert_eq!(core.mode, SVC32_MODE);
    assert_eq!(core.bank(), Bank::Svc);
    assert_eq!(core.get_cpsr() & MODE_MASK, SVC32_MODE);
    assert_eq!(core.get_cpsr() & INT_MASK, INT_MASK);
}

#[test]
fn test_switch_mode_banks_r13_r14() {
    let mut core = ArmCore::new();
    core.regs[13] = 0x1000; // SVC stack
    core.regs[14] = 0x2000;
    core.switch_mode(IRQ32_MODE);
    core.regs[13] = 0x3000;
    core.regs[14] = 0x4000;
    core.switch_mode(SVC32_MODE);
    assert_eq!(core.regs[13], 0x1000);
    assert_eq!(core.regs[14], 0x2000);
    core.switch_mode(IRQ32_MODE);
    assert_eq!(core.regs[13], 0x3000);
    assert_eq!(core.regs[14], 0x4000);
}

#[test]
fn test_fiq_banks_r8_to_r14() {
    let mut core = ArmCore::new();
    for i in 8..15 {
        core.regs[i] = i as u32;
    }
    core.switch_mode(FIQ32_MODE);
    for i in 8..15 {
        core.regs[i] = 0xF00 + i as u32;
    }
    core.switch_mode(SVC32_MODE);
    // R8-R12 restored from the user column, R13/R14 from SVC.
    for i in 8..13 {
        assert_eq!(core.regs[i], i as u32);
    }
    assert_eq!(core.regs[13], 13);
    assert_eq!(core.regs[14], 14);
    core.switch_mode(FIQ32_MODE);
    for i in 8..15 {
        assert_eq!(core.regs[i], 0xF00 + i as u32);
    }
}

#[test]
fn test_save_restore_identity() {
    // Mode round trip leaves the register file bit-identical.
    let mut core = ArmCore::new();
    for i in 0..15 {
        core.regs[i] = 0x1000 + i as u32;
    }
    let snapshot = core.regs;
    core.switch_mode(ABORT32_MODE);
    core.switch_mode(FIQ32_MODE);
    core.switch_mode(UNDEF32_MODE);
    core.switch_mode(SVC32_MODE);
    assert_eq!(core.regs, snapshot);
}

#[test]
fn test_system_shares_user_bank() {
    let mut core = ArmCore::new();
    core.switch_mode(USER32_MODE);
    core.regs[13] = 0xAAAA;
    core.switch_mode(SVC32_MODE);
    core.switch_mode(SYSTEM32_MODE);
    assert_eq!(core.regs[13], 0xAAAA);
    assert_eq!(core.bank(), Bank::User);
}

#[test]
fn test_unknown_mode_uses_dummy_bank() {
    let mut core = ArmCore::new();
    core.regs[13] = 0x1234;
    core.switch_mode(0x15); // not a recognized mode
    assert_eq!(core.bank(), Bank::Dummy);
    // Writes are retained but no SPSR is observable.
    core.regs[13] = 0x9999;
    assert_eq!(core.get_spsr(0x15), core.get_cpsr());
    core.switch_mode(SVC32_MODE);
    assert_eq!(core.regs[13], 0x1234);
}

#[test]
fn test_cpsr_decompose_recompose_identity() {
    // Every architecturally visible bit survives the round trip.
    let mut core = ArmCore::new();
    let values = [
        0x1F & SVC32_MODE | N_BIT | C_BIT | T_BIT,
        USER32_MODE | Z_BIT | V_BIT | Q_BIT | 0x000F_0000,
        FIQ32_MODE | I_BIT | F_BIT | E_BIT | A_BIT,
        SYSTEM32_MODE | N_BIT | Z_BIT | C_BIT | V_BIT,
    ];
    for &value in &values {
        core.set_cpsr(value);
        assert_eq!(core.get_cpsr(), value, "round trip of {:08X}", value);
    }
}

#[test]
fn test_set_cpsr_switches_bank() {
    let mut core = ArmCore::new();
    core.regs[13] = 0x5000;
    core.set_cpsr(IRQ32_MODE | I_BIT);
    assert_eq!(core.bank(), Bank::Irq);
    assert_eq!(core.mode, IRQ32_MODE);
    core.set_cpsr(SVC32_MODE | I_BIT);
    assert_eq!(core.regs[13], 0x5000);
}

#[test]
fn test_spsr_per_bank() {
    let mut core = ArmCore::new();
    core.set_spsr(IRQ32_MODE, 0x1111_0010);
    core.set_spsr(FIQ32_MODE, 0x2222_0010);
    assert_eq!(core.get_spsr(IRQ32_MODE), 0x1111_0010);
    assert_eq!(core.get_spsr(FIQ32_MODE), 0x2222_0010);
    // User/System have no SPSR: reads come back as CPSR.
    assert_eq!(core.get_spsr(USER32_MODE), core.get_cpsr());
}

#[test]
fn test_get_set_reg_cross_mode() {
    let mut core = ArmCore::new();
    core.set_reg(IRQ32_MODE, 13, 0xABCD);
    assert_eq!(core.get_reg(IRQ32_MODE, 13), 0xABCD);
    // The live SVC R13 is untouched.
    assert_ne!(core.regs[13], 0xABCD);
    core.switch_mode(IRQ32_MODE);
    assert_eq!(core.regs[13], 0xABCD);
}

#[test]
fn test_get_reg_fiq_high_registers() {
    let mut core = ArmCore::new();
    core.regs[8] = 0x88;
    core.set_reg(FIQ32_MODE, 8, 0xF8);
    assert_eq!(core.get_reg(FIQ32_MODE, 8), 0xF8);
    assert_eq!(core.regs[8], 0x88);
}

#[test]
fn test_user_msr_restricted_to_flags() {
    let mut rig = TestRig::new();
    rig.core.set_cpsr(USER32_MODE);
    // Try to switch to SVC and set N via MSR CPSR_fc.
    rig.core.regs[0] = SVC32_MODE | N_BIT | I_BIT;
    rig.put(0, 0xE129_F000); // MSR CPSR_fc, R0
    rig.step();
    // Flags took, control byte did not.
    assert!(rig.core.nflag);
    assert_eq!(rig.core.mode, USER32_MODE);
    assert!(!rig.core.iflag);
}

#[test]
fn test_privileged_msr_switches_mode() {
    let mut rig = TestRig::new();
    rig.core.regs[0] = IRQ32_MODE | I_BIT | F_BIT;
    rig.put(0, 0xE129_F000); // MSR CPSR_fc, R0
    rig.step();
    assert_eq!(rig.core.mode, IRQ32_MODE);
    assert_eq!(rig.core.bank(), Bank::Irq);
}

#[test]
fn test_msr_spsr_then_mrs() {
    let mut rig = TestRig::new();
    rig.core.regs[0] = USER32_MODE | N_BIT;
    rig.put(0, 0xE169_F000); // MSR SPSR_fc, R0
    rig.put(4, 0xE14F_1000); // MRS R1, SPSR
    rig.run(2);
    assert_eq!(rig.core.regs[1], USER32_MODE | N_BIT);
}

#[test]
fn test_ntrans_tracks_privilege() {
    let mut core = ArmCore::new();
    assert!(core.ntrans_sig);
    core.switch_mode(USER32_MODE);
    assert!(!core.ntrans_sig);
    core.switch_mode(SYSTEM32_MODE);
    assert!(core.ntrans_sig);
}

#[test]
fn test_thread_context_save_load() {
    let mut core = ArmCore::new();
    for i in 0..13 {
        core.regs[i] = 0x100 + i as u32;
    }
    core.regs[13] = 0x0FFF_0000;
    core.regs[14] = 0x0010_0000;
    core.pc = 0x0010_0400;
    core.mmu.thread_uro = 0x1FF8_2000;
    core.nflag = true;

    let mut ctx = ThreadContext::default();
    core.save_context(&mut ctx);
    assert_eq!(ctx.sp, 0x0FFF_0000);
    assert_eq!(ctx.pc, 0x0010_0400);
    assert_eq!(ctx.tls, 0x1FF8_2000);
    assert!(ctx.cpsr & N_BIT != 0);

    let mut other = ArmCore::new();
    other.load_context(&ctx);
    assert_eq!(other.regs[0..13], core.regs[0..13]);
    assert_eq!(other.regs[13], 0x0FFF_0000);
    assert_eq!(other.pc, 0x0010_0400);
    assert_eq!(other.mmu.thread_uro, 0x1FF8_2000);
    assert!(other.nflag);
}

#[test]
fn test_context_roundtrip_is_identity() {
    let mut core = ArmCore::new();
    core.regs[2] = 0xDEAD;
    core.fpscr = 0x0300_0000;
    core.ext_regs[5] = 0x3F80_0000;

    let mut ctx = ThreadContext::default();
    core.save_context(&mut ctx);
    core.regs[2] = 0;
    core.fpscr = 0;
    core.ext_regs[5] = 0;
    core.load_context(&ctx);
    assert_eq!(core.regs[2], 0xDEAD);
    assert_eq!(core.fpscr, 0x0300_0000);
    assert_eq!(core.ext_regs[5], 0x3F80_0000);
}
