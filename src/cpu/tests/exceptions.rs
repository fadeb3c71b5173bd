//! Exception-entry tests: interrupt lines, vectors, aborts through the
//! MMU, the SWI sink seam and LDM exception return.

use super::*;
use crate::mmu::Control;

const TTB: u32 = 0x4000;
const L2: u32 = 0x5000;

/// Map the first MiB through a coarse table with one valid page at
/// va 0 (AP full access) and everything else faulting.
fn enable_mmu_single_page(rig: &mut TestRig) {
    // Coarse descriptor, domain 0.
    rig.put(TTB, L2 | 1);
    // Small page: va page 0 -> pa 0, AP = 0b11 in every subpage.
    rig.put(L2, 0x0000_0FF0 | 2);
    rig.core.mmu.translation_table_base = TTB;
    rig.core.mmu.domain_access_control = 0x1; // domain 0 client
    rig.core.mmu.control |= Control::MMU;
}

#[test]
fn test_irq_entry() {
    let mut rig = TestRig::new();
    rig.put(0, 0xE3A0_0001); // MOV R0, #1
    rig.put(4, 0xE3A0_1001); // MOV R1, #1 (preempted)
    rig.core.iflag = false;
    rig.step();
    assert_eq!(rig.core.regs[0], 1);

    rig.core.nirq_sig = false; // assert IRQ
    rig.step();
    assert_eq!(rig.core.mode, IRQ32_MODE);
    assert!(rig.core.iflag);
    assert!(!rig.core.fflag); // IRQ entry leaves FIQ enabled
    // Return link points past the instruction that was about to run.
    assert_eq!(rig.core.regs[14], 8);
    assert_eq!(rig.core.regs[15], IRQ_VECTOR);
    assert_eq!(rig.core.regs[1], 0); // preempted instruction never ran
}

#[test]
fn test_fiq_entry_masks_both() {
    let mut rig = TestRig::new();
    rig.put(0, 0xE3A0_0001);
    rig.core.fflag = false;
    rig.core.nfiq_sig = false;
    rig.step();
    assert_eq!(rig.core.mode, FIQ32_MODE);
    assert!(rig.core.iflag);
    assert!(rig.core.fflag);
    assert_eq!(rig.core.regs[15], FIQ_VECTOR);
}

#[test]
fn test_irq_gated_by_i_flag() {
    let mut rig = TestRig::new();
    rig.put(0, 0xE3A0_0001);
    rig.core.iflag = true; // masked
    rig.core.nirq_sig = false;
    rig.step();
    assert_eq!(rig.core.mode, SVC32_MODE);
    assert_eq!(rig.core.regs[0], 1); // instruction ran normally
}

#[test]
fn test_fiq_beats_irq() {
    let mut rig = TestRig::new();
    rig.put(0, 0xE3A0_0001);
    rig.core.iflag = false;
    rig.core.fflag = false;
    rig.core.nirq_sig = false;
    rig.core.nfiq_sig = false;
    rig.step();
    assert_eq!(rig.core.mode, FIQ32_MODE);
}

#[test]
fn test_reset_beats_everything() {
    let mut rig = TestRig::new();
    rig.core.iflag = false;
    rig.core.nirq_sig = false;
    rig.core.nreset_sig = false;
    rig.step();
    assert_eq!(rig.core.mode, SVC32_MODE);
    assert_eq!(rig.core.regs[15], RESET_VECTOR);
    assert!(rig.core.iflag && rig.core.fflag);
}

#[test]
fn test_spsr_snapshot_on_entry() {
    let mut rig = TestRig::new();
    rig.core.set_cpsr(USER32_MODE | N_BIT); // interrupts enabled, user
    rig.core.nirq_sig = false;
    rig.step();
    assert_eq!(rig.core.mode, IRQ32_MODE);
    assert_eq!(rig.core.get_spsr(IRQ32_MODE), USER32_MODE | N_BIT);
}

#[test]
fn test_undefined_instruction_vector() {
    let mut rig = TestRig::new();
    rig.put(0, 0xE7F0_00F0); // permanently undefined encoding
    rig.step();
    assert_eq!(rig.core.mode, UNDEF32_MODE);
    assert_eq!(rig.core.regs[15], UNDEF_VECTOR);
    assert_eq!(rig.core.regs[14], 4); // return past the slot
}

#[test]
fn test_high_vectors_relocate() {
    let mut rig = TestRig::new();
    rig.core.mmu.control |= Control::HIGH_VECTORS;
    rig.put(0, 0xE7F0_00F0);
    rig.step();
    assert_eq!(rig.core.regs[15], 0xFFFF_0000 + UNDEF_VECTOR);
}

#[test]
fn test_vector_remap_offset() {
    let mut rig = TestRig::new();
    rig.core.vector_remap = Some(0x100);
    rig.put(0, 0xE7F0_00F0);
    rig.step();
    assert_eq!(rig.core.regs[15], 0x100 + UNDEF_VECTOR);
}

// ========== SWI seam ==========

#[test]
fn test_swi_handled_by_sink() {
    // spec scenario: a handled SWI leaves the PSR alone and resumes at
    // the next instruction.
    let mut rig = TestRig::new();
    rig.sink.handled = true;
    rig.core.set_reg(SVC32_MODE, 14, 0x5555_5555);
    let cpsr_before = rig.core.get_cpsr();
    rig.put(0x8000, 0xEF00_0032); // SWI #0x32
    rig.put(0x8004, 0xE3A0_0005); // MOV R0, #5
    rig.core.pc = 0x8000;
    rig.core.regs[15] = 0x8000;
    rig.core.flush_pipe();
    rig.run(2);
    assert_eq!(rig.sink.calls, vec![0x32]);
    assert_eq!(rig.core.get_cpsr(), cpsr_before);
    assert_eq!(rig.core.mode, SVC32_MODE);
    assert_eq!(rig.core.regs[0], 5); // resumed at 0x8004
    assert_eq!(rig.core.get_reg(SVC32_MODE, 14), 0x5555_5555);
}

#[test]
fn test_swi_declined_takes_vector() {
    // spec scenario: a declined SWI runs the architectural entry.
    let mut rig = TestRig::new();
    rig.sink.handled = false;
    rig.core.set_cpsr(USER32_MODE); // user, interrupts enabled
    let old_cpsr = rig.core.get_cpsr();
    rig.put(0x8000, 0xEF00_0032);
    rig.core.pc = 0x8000;
    rig.core.regs[15] = 0x8000;
    rig.core.flush_pipe();
    rig.step();
    assert_eq!(rig.sink.calls, vec![0x32]);
    assert_eq!(rig.core.mode, SVC32_MODE);
    assert!(rig.core.iflag);
    assert_eq!(rig.core.get_spsr(SVC32_MODE), old_cpsr);
    assert_eq!(rig.core.regs[14], 0x8004);
    assert_eq!(rig.core.regs[15], SWI_VECTOR);
}

#[test]
fn test_swi_declined_high_vectors() {
    let mut rig = TestRig::new();
    rig.sink.handled = false;
    rig.core.mmu.control |= Control::HIGH_VECTORS;
    rig.put(0, 0xEF00_0001);
    rig.step();
    assert_eq!(rig.core.regs[15], 0xFFFF_0008);
}

// ========== Aborts through the MMU ==========

#[test]
fn test_prefetch_abort_on_unmapped_fetch() {
    let mut rig = TestRig::new();
    enable_mmu_single_page(&mut rig);
    // Branch into the unmapped second page.
    rig.put(0, 0xE1A0_F001); // MOV PC, R1
    rig.core.regs[1] = 0x2000;
    rig.run(2);
    assert_eq!(rig.core.mode, ABORT32_MODE);
    assert_eq!(rig.core.regs[15], PREFETCH_ABORT_VECTOR);
    // Prefetch status was recorded on the I side.
    assert_eq!(rig.core.mmu.fault_statusi & 0xF, 0x7);
}

#[test]
fn test_data_abort_base_restored() {
    // spec scenario: pre-indexed load with writeback faults; with the
    // Base Restored model the base register is unchanged.
    let mut rig = TestRig::new();
    enable_mmu_single_page(&mut rig);
    rig.core.regs[5] = 0x2000;
    rig.core.regs[6] = 0x1000;
    rig.put(0, 0xE7B5_5006); // LDR R5, [R5, R6]!
    rig.step();
    assert_eq!(rig.core.mode, ABORT32_MODE);
    assert_eq!(rig.core.regs[15], DATA_ABORT_VECTOR);
    assert_eq!(rig.core.mmu.fault_address, 0x3000);
    assert_eq!(rig.core.mmu.fault_status & 0xF, 0x7); // page translation
    // LR_abt = faulting pc + 8.
    assert_eq!(rig.core.regs[14], 8);
    // Base register was restored.
    assert_eq!(rig.core.get_reg(SVC32_MODE, 5), 0x2000);
}

#[test]
fn test_data_abort_base_updated() {
    let mut rig = TestRig::new();
    enable_mmu_single_page(&mut rig);
    rig.core.set_abort_model(AbortModel::BaseUpdated);
    rig.core.regs[5] = 0x2000;
    rig.core.regs[6] = 0x1000;
    rig.put(0, 0xE7B5_5006); // LDR R5, [R5, R6]!
    rig.step();
    assert_eq!(rig.core.mode, ABORT32_MODE);
    // Late abort model: the writeback went through.
    assert_eq!(rig.core.get_reg(SVC32_MODE, 5), 0x3000);
}

#[test]
fn test_aborted_store_makes_no_memory_change() {
    let mut rig = TestRig::new();
    enable_mmu_single_page(&mut rig);
    rig.core.regs[0] = 0xDDDD;
    rig.core.regs[1] = 0x2000; // unmapped
    rig.put(0, 0xE581_0000); // STR R0, [R1]
    rig.step();
    assert_eq!(rig.core.mode, ABORT32_MODE);
    assert_eq!(rig.word(0x2000), 0); // nothing reached physical memory
}

#[test]
fn test_ldm_abort_stops_transfer() {
    let mut rig = TestRig::new();
    enable_mmu_single_page(&mut rig);
    rig.put(0xFF8, 0xAA); // last mapped words
    rig.put(0xFFC, 0xBB);
    rig.core.regs[4] = 0xFF8;
    rig.put(0, 0xE894_000E); // LDMIA R4, {R1, R2, R3} - third word faults
    rig.step();
    assert_eq!(rig.core.mode, ABORT32_MODE);
    assert_eq!(rig.core.get_reg(SVC32_MODE, 1), 0xAA);
    assert_eq!(rig.core.get_reg(SVC32_MODE, 2), 0xBB);
    assert_eq!(rig.core.get_reg(SVC32_MODE, 3), 0); // never loaded
}

// ========== Exception return ==========

#[test]
fn test_ldm_with_pc_and_s_bit_returns() {
    // spec scenario: LDMIA R13!, {R0,R1,R2,PC}^ from Supervisor with
    // SPSR_svc pointing back at User.
    let mut rig = TestRig::new();
    rig.put(0x1000, 0x11);
    rig.put(0x1004, 0x22);
    rig.put(0x1008, 0x33);
    rig.put(0x100C, 0x0000_4444); // return address
    rig.core.regs[13] = 0x1000;
    rig.core.set_spsr(SVC32_MODE, USER32_MODE); // user, interrupts enabled
    rig.put(0, 0xE8FD_8007); // LDMIA R13!, {R0,R1,R2,PC}^
    rig.step();
    assert_eq!(rig.core.regs[0], 0x11);
    assert_eq!(rig.core.regs[1], 0x22);
    assert_eq!(rig.core.regs[2], 0x33);
    assert_eq!(rig.core.regs[15], 0x4444);
    assert_eq!(rig.core.mode, USER32_MODE);
    assert_eq!(rig.core.bank(), Bank::User);
    assert_eq!(rig.core.get_cpsr(), USER32_MODE);
    // Writeback landed in the Supervisor bank before the switch.
    assert_eq!(rig.core.get_reg(SVC32_MODE, 13), 0x1010);
}

#[test]
fn test_ldm_user_bank_transfer() {
    // LDM with the S bit and no PC reads/writes the User bank.
    let mut rig = TestRig::new();
    rig.put(0x1000, 0x77);
    rig.core.regs[13] = 0x3333; // SVC R13
    rig.core.set_reg(USER32_MODE, 13, 0x1111);
    rig.core.regs[4] = 0x1000;
    rig.put(0, 0xE8D4_2000); // LDMIA R4, {R13}^
    rig.step();
    assert_eq!(rig.core.get_reg(USER32_MODE, 13), 0x77);
    assert_eq!(rig.core.regs[13], 0x3333); // SVC stack untouched
}

#[test]
fn test_stm_user_bank_transfer() {
    let mut rig = TestRig::new();
    rig.core.regs[13] = 0x3333;
    rig.core.set_reg(USER32_MODE, 13, 0x1111);
    rig.core.regs[4] = 0x1200;
    rig.put(0, 0xE944_2000); // STMDB R4, {R13}^
    rig.step();
    assert_eq!(rig.word(0x11FC), 0x1111); // user R13, not SVC
}

#[test]
fn test_subs_pc_lr_exception_return() {
    // Data-processing write to PC with the S bit restores the SPSR.
    let mut rig = TestRig::new();
    rig.core.switch_mode(IRQ32_MODE);
    rig.core.set_spsr(IRQ32_MODE, USER32_MODE | N_BIT);
    rig.core.regs[14] = 0x104;
    rig.put(0, 0xE25E_F004); // SUBS PC, LR, #4
    rig.step();
    assert_eq!(rig.core.regs[15], 0x100);
    assert_eq!(rig.core.mode, USER32_MODE);
    assert!(rig.core.nflag);
}

#[test]
fn test_exception_clears_reservation() {
    let mut rig = TestRig::new();
    rig.core.regs[1] = 0x700;
    rig.core.regs[3] = 5;
    rig.put(0, 0xE191_0F9F); // LDREX R0, [R1]
    rig.put(4, 0xE7F0_00F0); // undefined -> exception entry
    rig.run(2);
    assert_eq!(rig.core.mode, UNDEF32_MODE);
    // Return and try the store: the monitor must be closed.
    rig.core.switch_mode(SVC32_MODE);
    rig.core.pc = 8;
    rig.core.regs[15] = 8;
    rig.core.flush_pipe();
    rig.put(8, 0xE181_2F93); // STREX R2, R3, [R1]
    rig.step();
    assert_eq!(rig.core.regs[2], 1);
}
