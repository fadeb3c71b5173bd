//! Instruction decode and execution.
//!
//! Primary dispatch is over instruction bits [27:20], with sub-decode on
//! bits [7:4] inside the groups that overload them (multiplies, swaps,
//! exclusives and the misc loads share the data-processing space; the
//! v6 media page shares the register-offset load/store space).
//!
//! The execute functions return `Option<()>`: `None` means a data abort
//! was flagged mid-instruction and unwinding stopped early. The caller
//! ([`ArmCore::step`]) turns the pending abort into a vector entry.

use super::helpers::{
    bit, bits, signed_sat_q, signed_saturated_add16, signed_saturated_add32,
    signed_saturated_add8, signed_saturated_sub16, signed_saturated_sub32,
    signed_saturated_sub8, unsigned_sat_q, unsigned_saturated_add16, unsigned_saturated_add8,
    unsigned_saturated_sub16, unsigned_saturated_sub8, MULT_TABLE,
};
use super::psr::*;
use super::{ArmCore, SwiHandler};
use crate::bus::PhysBus;
use crate::coproc::{CoprocSlot, CpPhase, CpResult};

impl ArmCore {
    /// Execute one condition-passed ARM instruction.
    pub(crate) fn execute(&mut self, bus: &mut dyn PhysBus, swi: &mut dyn SwiHandler, instr: u32) {
        let _ = self.exec_primary(bus, swi, instr);
    }

    fn exec_primary(
        &mut self,
        bus: &mut dyn PhysBus,
        swi: &mut dyn SwiHandler,
        instr: u32,
    ) -> Option<()> {
        match bits(instr, 20, 27) {
            0x00..=0x1F => self.exec_group0(bus, instr),
            0x20..=0x3F => self.exec_dp_imm(instr),
            0x40..=0x5F => {
                let offset = instr & 0xFFF;
                self.exec_single_transfer(bus, instr, offset)
            }
            0x60..=0x7F => {
                if bit(instr, 4) {
                    self.exec_media(instr)
                } else {
                    let offset = self.ls_reg_rhs(instr);
                    self.exec_single_transfer(bus, instr, offset)
                }
            }
            0x80..=0x9F => self.exec_block_transfer(bus, instr),
            0xA0..=0xBF => {
                self.exec_branch(instr);
                Some(())
            }
            0xC0..=0xDF => self.exec_coproc_transfer(bus, instr),
            0xE0..=0xEF => {
                if bit(instr, 4) {
                    if bit(instr, 20) {
                        self.exec_mrc(instr)
                    } else {
                        self.exec_mcr(bus, instr)
                    }
                } else {
                    self.exec_cdp(instr)
                }
            }
            _ => {
                // SWI: the sink gets first refusal; a handled call resumes
                // at the next instruction with no vector entry.
                if swi.handle_swi(instr & 0x00FF_FFFF) {
                    self.ccycles(1);
                } else {
                    self.take_exception(SWI_VECTOR);
                }
                Some(())
            }
        }
    }

    // ========== Group 0: data processing / multiply / misc transfer ==========

    fn exec_group0(&mut self, bus: &mut dyn PhysBus, instr: u32) -> Option<()> {
        let op = bits(instr, 20, 27);
        let b47 = bits(instr, 4, 7);

        if b47 == 0x9 {
            return self.exec_mul_swap_sync(bus, instr, op);
        }
        if b47 == 0xB || b47 == 0xD || b47 == 0xF {
            return self.exec_misc_transfer(bus, instr);
        }
        if op & 0x19 == 0x10 {
            // The compare slots without the S bit hold the control ops.
            return self.exec_control(instr, op, b47);
        }

        let opcode = (op >> 1) & 0xF;
        let s = op & 1 != 0;
        let rhs = if s && is_logical(opcode) {
            self.dp_s_reg_rhs(instr)
        } else {
            self.dp_reg_rhs(instr)
        };
        self.exec_dp_common(instr, opcode, s, rhs);
        Some(())
    }

    /// Multiplies, swaps and the exclusive family (bits [7:4] == 1001).
    fn exec_mul_swap_sync(&mut self, bus: &mut dyn PhysBus, instr: u32, op: u32) -> Option<()> {
        match op {
            0x00 | 0x01 => self.exec_mul(instr, false, op & 1 != 0),
            0x02 | 0x03 => self.exec_mul(instr, true, op & 1 != 0),
            0x08 => self.multiply64(instr, false, false),
            0x09 => self.multiply64(instr, false, true),
            0x0A => self.multiply_add64(instr, false, false),
            0x0B => self.multiply_add64(instr, false, true),
            0x0C => self.multiply64(instr, true, false),
            0x0D => self.multiply64(instr, true, true),
            0x0E => self.multiply_add64(instr, true, false),
            0x0F => self.multiply_add64(instr, true, true),
            0x10 => return self.exec_swap(bus, instr, false),
            0x14 => return self.exec_swap(bus, instr, true),
            0x18 | 0x1A | 0x1C | 0x1E => return self.exec_strex(bus, instr, op),
            0x19 | 0x1B | 0x1D | 0x1F => return self.exec_ldrex(bus, instr, op),
            _ => self.undef_instr(instr),
        }
        Some(())
    }

    /// MUL / MLA.
    fn exec_mul(&mut self, instr: u32, accumulate: bool, set_flags: bool) {
        let rd = bits(instr, 16, 19) as usize;
        let rs = self.regs[bits(instr, 8, 11) as usize];
        let rm = self.regs[bits(instr, 0, 3) as usize];
        if rd == 15 {
            self.undef_instr(instr);
            return;
        }
        let mut result = rm.wrapping_mul(rs);
        if accumulate {
            result = result.wrapping_add(self.regs[bits(instr, 12, 15) as usize]);
        }
        self.regs[rd] = result;
        if set_flags {
            self.set_nz(result);
        }
        self.icycles(MULT_TABLE[(rs >> 27) as usize & 0x1F] as u64);
    }

    /// SWP / SWPB.
    fn exec_swap(&mut self, bus: &mut dyn PhysBus, instr: u32, byte: bool) -> Option<()> {
        let addr = self.regs[bits(instr, 16, 19) as usize];
        let rm = self.regs[bits(instr, 0, 3) as usize];
        let rd = bits(instr, 12, 15) as usize;

        self.bus_used_inc_pc_n();
        let loaded = if byte {
            let v = self.read_byte_at(bus, addr, false)?;
            self.write_byte_at(bus, addr, rm, false)?;
            v
        } else {
            let mut v = self.read_word_at(bus, addr, false)?;
            if addr & 3 != 0 {
                v = super::helpers::align_rotate(addr, v);
            }
            self.write_word_at(bus, addr, rm, false)?;
            v
        };
        self.write_dest(rd, loaded);
        Some(())
    }

    /// STREX family: conditional store when the reservation still holds.
    fn exec_strex(&mut self, bus: &mut dyn PhysBus, instr: u32, op: u32) -> Option<()> {
        if !self.is_v6() {
            self.undef_instr(instr);
            return Some(());
        }
        let addr = self.regs[bits(instr, 16, 19) as usize];
        let rd = bits(instr, 12, 15) as usize;
        let rm = bits(instr, 0, 3) as usize;

        let success = self.exclusive_state && self.is_exclusive(addr);
        if success {
            let value = self.regs[rm];
            match op {
                0x18 => self.write_word_at(bus, addr, value, false)?,
                0x1A => {
                    let value2 = self.regs[(rm + 1) & 0xF];
                    self.write_word_at(bus, addr, value, false)?;
                    self.write_word_at(bus, addr.wrapping_add(4), value2, false)?;
                }
                0x1C => self.write_byte_at(bus, addr, value, false)?,
                _ => self.write_halfword_at(bus, addr, value, false)?,
            }
        }
        self.regs[rd] = if success { 0 } else { 1 };
        self.clear_exclusive();
        Some(())
    }

    /// LDREX family: load and open a reservation.
    fn exec_ldrex(&mut self, bus: &mut dyn PhysBus, instr: u32, op: u32) -> Option<()> {
        if !self.is_v6() {
            self.undef_instr(instr);
            return Some(());
        }
        let addr = self.regs[bits(instr, 16, 19) as usize];
        let rd = bits(instr, 12, 15) as usize;

        match op {
            0x19 => {
                let v = self.read_word_at(bus, addr, false)?;
                self.regs[rd] = v;
            }
            0x1B => {
                let lo = self.read_word_at(bus, addr, false)?;
                let hi = self.read_word_at(bus, addr.wrapping_add(4), false)?;
                self.regs[rd] = lo;
                self.regs[(rd + 1) & 0xF] = hi;
            }
            0x1D => {
                let v = self.read_byte_at(bus, addr, false)?;
                self.regs[rd] = v;
            }
            _ => {
                let v = self.read_halfword_at(bus, addr, false)?;
                self.regs[rd] = v;
            }
        }
        self.mark_exclusive(addr);
        Some(())
    }

    /// PSR transfer, BX/BLX(2), CLZ, saturating add/sub, halfword
    /// multiplies: the opcodes living in the S=0 compare slots.
    fn exec_control(&mut self, instr: u32, op: u32, b47: u32) -> Option<()> {
        match (op, b47) {
            (0x10, 0x0) => {
                // MRS Rd, CPSR
                let rd = bits(instr, 12, 15) as usize;
                self.regs[rd] = self.recompose_cpsr();
            }
            (0x14, 0x0) => {
                // MRS Rd, SPSR
                let rd = bits(instr, 12, 15) as usize;
                self.regs[rd] = self.current_spsr();
            }
            (0x12, 0x0) => {
                let rhs = self.regs[bits(instr, 0, 3) as usize];
                self.fix_cpsr(instr, rhs);
            }
            (0x16, 0x0) => {
                let rhs = self.regs[bits(instr, 0, 3) as usize];
                self.fix_spsr(instr, rhs);
            }
            (0x12, 0x1) | (0x12, 0x2) => {
                // BX (BXJ falls back to BX; Jazelle is not modeled)
                let dest = self.regs[bits(instr, 0, 3) as usize];
                self.write_r15_branch(dest);
            }
            (0x12, 0x3) => {
                // BLX(2)
                if !self.is_v5() {
                    self.undef_instr(instr);
                    return Some(());
                }
                let dest = self.regs[bits(instr, 0, 3) as usize];
                self.regs[14] = if self.tflag {
                    self.regs[15].wrapping_sub(2) | 1
                } else {
                    self.regs[15].wrapping_sub(4)
                };
                self.write_r15_branch(dest);
            }
            (0x16, 0x1) => {
                // CLZ
                if !self.is_v5() {
                    self.undef_instr(instr);
                    return Some(());
                }
                let rd = bits(instr, 12, 15) as usize;
                let rm = self.regs[bits(instr, 0, 3) as usize];
                self.regs[rd] = rm.leading_zeros();
            }
            (0x10, 0x5) | (0x12, 0x5) | (0x14, 0x5) | (0x16, 0x5) => {
                self.exec_q_arith(instr, op);
            }
            (0x12, 0x7) => {
                // BKPT: architecturally a prefetch abort.
                self.abort_addr = self.pc;
                self.take_exception(PREFETCH_ABORT_VECTOR);
            }
            (_, 0x8) | (_, 0xA) | (_, 0xC) | (_, 0xE) => {
                self.exec_halfword_multiply(instr, op, b47);
            }
            _ => self.undef_instr(instr),
        }
        Some(())
    }

    /// QADD/QSUB/QDADD/QDSUB (v5E).
    fn exec_q_arith(&mut self, instr: u32, op: u32) {
        if !self.is_v5e() {
            self.undef_instr(instr);
            return;
        }
        let rd = bits(instr, 12, 15) as usize;
        let rm = self.regs[bits(instr, 0, 3) as usize];
        let rn = self.regs[bits(instr, 16, 19) as usize];

        let (operand, pre_sat) = match op {
            0x14 | 0x16 => {
                // Doubling variants saturate the doubled operand first.
                let (v, sat) = signed_saturated_add32(rn, rn);
                (v, sat)
            }
            _ => (rn, false),
        };
        let (result, sat) = match op {
            0x10 | 0x14 => signed_saturated_add32(rm, operand),
            _ => signed_saturated_sub32(rm, operand),
        };
        self.regs[rd] = result;
        if sat || pre_sat {
            self.qflag = true;
        }
    }

    /// SMLAxy / SMLAWy / SMULWy / SMLALxy / SMULxy (v5E).
    fn exec_halfword_multiply(&mut self, instr: u32, op: u32, b47: u32) {
        if !self.is_v5e() {
            self.undef_instr(instr);
            return;
        }
        let rm = self.regs[bits(instr, 0, 3) as usize];
        let rs = self.regs[bits(instr, 8, 11) as usize];
        let x_top = bit(instr, 5);
        let y_top = bit(instr, 6);

        let half = |v: u32, top: bool| -> i32 {
            if top {
                (v >> 16) as i16 as i32
            } else {
                v as i16 as i32
            }
        };

        match op {
            0x10 => {
                // SMLA<x><y>: Rd := Rm.h * Rs.h + Rn, Q on accumulate overflow.
                let rd = bits(instr, 16, 19) as usize;
                let acc = self.regs[bits(instr, 12, 15) as usize];
                let product = half(rm, x_top).wrapping_mul(half(rs, y_top)) as u32;
                let result = product.wrapping_add(acc);
                if super::helpers::add_overflowed(product, acc, result) {
                    self.qflag = true;
                }
                self.regs[rd] = result;
            }
            0x12 => {
                let rd = bits(instr, 16, 19) as usize;
                let wide = (rm as i32 as i64).wrapping_mul(half(rs, y_top) as i64);
                let product = (wide >> 16) as u32;
                if b47 & 0x2 == 0 {
                    // SMLAW<y>
                    let acc = self.regs[bits(instr, 12, 15) as usize];
                    let result = product.wrapping_add(acc);
                    if super::helpers::add_overflowed(product, acc, result) {
                        self.qflag = true;
                    }
                    self.regs[rd] = result;
                } else {
                    // SMULW<y>
                    self.regs[rd] = product;
                }
            }
            0x14 => {
                // SMLAL<x><y>: 64-bit accumulate.
                let rdhi = bits(instr, 16, 19) as usize;
                let rdlo = bits(instr, 12, 15) as usize;
                let acc = ((self.regs[rdhi] as u64) << 32) | self.regs[rdlo] as u64;
                let product = half(rm, x_top).wrapping_mul(half(rs, y_top)) as i64 as u64;
                let result = acc.wrapping_add(product);
                self.regs[rdlo] = result as u32;
                self.regs[rdhi] = (result >> 32) as u32;
            }
            _ => {
                // SMUL<x><y>
                let rd = bits(instr, 16, 19) as usize;
                self.regs[rd] = half(rm, x_top).wrapping_mul(half(rs, y_top)) as u32;
            }
        }
        self.icycles(1);
    }

    // ========== Data processing ==========

    fn exec_dp_imm(&mut self, instr: u32) -> Option<()> {
        let op = bits(instr, 20, 27);
        match op {
            0x30 => {
                // MOVW (v6T2 and later cores carry it in this slot)
                if !self.is_v6() {
                    self.undef_instr(instr);
                    return Some(());
                }
                let rd = bits(instr, 12, 15) as usize;
                let imm16 = (bits(instr, 16, 19) << 12) | (instr & 0xFFF);
                self.write_dest(rd, imm16);
                return Some(());
            }
            0x34 => {
                // MOVT
                if !self.is_v6() {
                    self.undef_instr(instr);
                    return Some(());
                }
                let rd = bits(instr, 12, 15) as usize;
                let imm16 = (bits(instr, 16, 19) << 12) | (instr & 0xFFF);
                self.regs[rd] = (self.regs[rd] & 0xFFFF) | (imm16 << 16);
                return Some(());
            }
            0x32 => {
                // MSR CPSR_<fields>, #imm; a zero mask is the hint space (NOP).
                if bits(instr, 16, 19) != 0 {
                    let rhs = self.dp_imm_rhs(instr);
                    self.fix_cpsr(instr, rhs);
                }
                return Some(());
            }
            0x36 => {
                let rhs = self.dp_imm_rhs(instr);
                self.fix_spsr(instr, rhs);
                return Some(());
            }
            _ => {}
        }

        let opcode = (op >> 1) & 0xF;
        let s = op & 1 != 0;
        let rhs = if s && is_logical(opcode) {
            self.dp_imm_s_rhs(instr)
        } else {
            self.dp_imm_rhs(instr)
        };
        self.exec_dp_common(instr, opcode, s, rhs);
        Some(())
    }

    /// The sixteen data-processing opcodes over a resolved operand 2.
    fn exec_dp_common(&mut self, instr: u32, opcode: u32, s: bool, rhs: u32) {
        let rn = bits(instr, 16, 19) as usize;
        let rd = bits(instr, 12, 15) as usize;
        let mut lhs = self.regs[rn];
        if rn == 15 && self.tflag {
            // Thumb PC-relative operands read the word-aligned PC.
            lhs &= !2;
        }

        match opcode {
            0x0 => self.dp_logical(rd, s, lhs & rhs),
            0x1 => self.dp_logical(rd, s, lhs ^ rhs),
            0x2 => self.dp_sub(rd, s, lhs, rhs, 0),
            0x3 => self.dp_sub(rd, s, rhs, lhs, 0),
            0x4 => self.dp_add(rd, s, lhs, rhs, 0),
            0x5 => self.dp_add(rd, s, lhs, rhs, self.cflag as u32),
            0x6 => self.dp_sub(rd, s, lhs, rhs, !self.cflag as u32),
            0x7 => self.dp_sub(rd, s, rhs, lhs, !self.cflag as u32),
            0x8 => {
                // TST: flags only, shifter carry already placed.
                let result = lhs & rhs;
                self.set_nz(result);
            }
            0x9 => {
                let result = lhs ^ rhs;
                self.set_nz(result);
            }
            0xA => {
                // CMP
                let result = lhs.wrapping_sub(rhs);
                self.set_nz(result);
                self.sub_carry(lhs, rhs, result);
                self.sub_overflow(lhs, rhs, result);
            }
            0xB => {
                // CMN
                let result = lhs.wrapping_add(rhs);
                self.set_nz(result);
                self.add_carry(lhs, rhs, result);
                self.add_overflow(lhs, rhs, result);
            }
            0xC => self.dp_logical(rd, s, lhs | rhs),
            0xD => self.dp_logical(rd, s, rhs),
            0xE => self.dp_logical(rd, s, lhs & !rhs),
            _ => self.dp_logical(rd, s, !rhs),
        }
    }

    /// Writeback for the logical group; C comes from the shifter.
    fn dp_logical(&mut self, rd: usize, s: bool, result: u32) {
        if rd == 15 {
            if s {
                self.write_sr15(result);
            } else {
                self.write_r15(result);
            }
            return;
        }
        self.regs[rd] = result;
        if s {
            self.set_nz(result);
        }
    }

    /// ADD/ADC writeback with arithmetic flags.
    fn dp_add(&mut self, rd: usize, s: bool, lhs: u32, rhs: u32, carry_in: u32) {
        let wide = lhs as u64 + rhs as u64 + carry_in as u64;
        let result = wide as u32;
        if rd == 15 {
            if s {
                self.write_sr15(result);
            } else {
                self.write_r15(result);
            }
            return;
        }
        self.regs[rd] = result;
        if s {
            self.set_nz(result);
            self.cflag = wide > u32::MAX as u64;
            self.vflag = (!(lhs ^ rhs) & (lhs ^ result)) & 0x8000_0000 != 0;
        }
    }

    /// SUB/SBC/RSB/RSC writeback with arithmetic flags. `borrow_in` is 1
    /// when the incoming carry is clear.
    fn dp_sub(&mut self, rd: usize, s: bool, lhs: u32, rhs: u32, borrow_in: u32) {
        let result = lhs.wrapping_sub(rhs).wrapping_sub(borrow_in);
        if rd == 15 {
            if s {
                self.write_sr15(result);
            } else {
                self.write_r15(result);
            }
            return;
        }
        self.regs[rd] = result;
        if s {
            self.set_nz(result);
            self.cflag = (lhs as u64) >= (rhs as u64 + borrow_in as u64);
            self.vflag = ((lhs ^ rhs) & (lhs ^ result)) & 0x8000_0000 != 0;
        }
    }

    // ========== Single data transfer ==========

    fn exec_single_transfer(
        &mut self,
        bus: &mut dyn PhysBus,
        instr: u32,
        offset: u32,
    ) -> Option<()> {
        let pre = bit(instr, 24);
        let up = bit(instr, 23);
        let byte = bit(instr, 22);
        let w = bit(instr, 21);
        let load = bit(instr, 20);
        let rn = bits(instr, 16, 19) as usize;

        let mut base = self.regs[rn];
        if rn == 15 && self.tflag {
            base &= !2;
        }
        let computed = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre { computed } else { base };
        // Post-indexed with W set is the forced-user (T) variant.
        let forced_user = !pre && w;
        let writeback = !pre || w;

        let outcome = if load {
            if byte {
                self.load_byte(bus, instr, addr, false, forced_user)
            } else {
                self.load_word(bus, instr, addr, forced_user)
            }
        } else {
            let stored = if byte {
                self.store_byte(bus, instr, addr, forced_user)
            } else {
                self.store_word(bus, instr, addr, forced_user)
            };
            stored.map(|()| true)
        };

        match outcome {
            Some(base_writable) => {
                if writeback && base_writable && rn != 15 {
                    self.regs[rn] = computed;
                }
                Some(())
            }
            None => {
                if writeback && self.lateabt_sig && rn != 15 {
                    self.regs[rn] = computed;
                }
                None
            }
        }
    }

    /// Halfword / signed byte / doubleword transfers (bits [7:4] of
    /// 1011/1101/1111 in the data-processing space).
    fn exec_misc_transfer(&mut self, bus: &mut dyn PhysBus, instr: u32) -> Option<()> {
        let b47 = bits(instr, 4, 7);
        let load = bit(instr, 20);

        // LDRD/STRD occupy the store slots of the signed encodings.
        if !load && b47 == 0xD {
            return self.exec_ldrd(bus, instr);
        }
        if !load && b47 == 0xF {
            return self.exec_strd(bus, instr);
        }

        let pre = bit(instr, 24);
        let up = bit(instr, 23);
        let w = bit(instr, 21);
        let rn = bits(instr, 16, 19) as usize;
        let base = self.regs[rn];
        let offset = self.ls7_rhs(instr);
        let computed = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre { computed } else { base };
        let writeback = !pre || w;

        let outcome = match (load, b47) {
            (false, 0xB) => self.store_halfword(bus, instr, addr).map(|()| true),
            (true, 0xB) => self.load_halfword(bus, instr, addr, false),
            (true, 0xD) => self.load_byte(bus, instr, addr, true, false),
            (true, 0xF) => self.load_halfword(bus, instr, addr, true),
            _ => {
                self.undef_instr(instr);
                return Some(());
            }
        };

        match outcome {
            Some(base_writable) => {
                if writeback && base_writable && rn != 15 {
                    self.regs[rn] = computed;
                }
                Some(())
            }
            None => {
                if writeback && self.lateabt_sig && rn != 15 {
                    self.regs[rn] = computed;
                }
                None
            }
        }
    }

    /// LDRD (v5TE): two words into an even/odd register pair.
    fn exec_ldrd(&mut self, bus: &mut dyn PhysBus, instr: u32) -> Option<()> {
        if !self.is_v5e() {
            self.undef_instr(instr);
            return Some(());
        }
        let write_back = bit(instr, 21);
        let pre_indexed = bit(instr, 24);
        let rn = bits(instr, 16, 19) as usize;
        let rd = bits(instr, 12, 15) as usize;

        if (write_back && !pre_indexed) || rd & 1 != 0 || rd == 14 {
            self.undef_instr(instr);
            return Some(());
        }

        self.bus_used_inc_pc_seq();
        let base = self.regs[rn];
        let offset = self.ls7_rhs(instr);
        let sum = if bit(instr, 23) {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre_indexed { sum } else { base };

        if (!pre_indexed || write_back) && (rn == rd || rn == rd + 1) {
            self.undef_instr(instr);
            return Some(());
        }

        let value1 = self.read_word_at(bus, addr, false)?;
        let value2 = self.read_word_at(bus, addr.wrapping_add(4), false)?;
        self.icycles(2);
        self.regs[rd] = value1;
        self.regs[rd + 1] = value2;

        if !pre_indexed || write_back {
            self.regs[rn] = sum;
        }
        Some(())
    }

    /// STRD (v5TE).
    fn exec_strd(&mut self, bus: &mut dyn PhysBus, instr: u32) -> Option<()> {
        if !self.is_v5e() {
            self.undef_instr(instr);
            return Some(());
        }
        let write_back = bit(instr, 21);
        let pre_indexed = bit(instr, 24);
        let rn = bits(instr, 16, 19) as usize;
        let rd = bits(instr, 12, 15) as usize;

        if (write_back && !pre_indexed) || rd & 1 != 0 || rn == 15 {
            self.undef_instr(instr);
            return Some(());
        }

        self.bus_used_inc_pc_n();
        let base = self.regs[rn];
        let offset = self.ls7_rhs(instr);
        let sum = if bit(instr, 23) {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre_indexed { sum } else { base };

        if (!pre_indexed || write_back) && (rn == rd || rn == rd + 1) {
            self.undef_instr(instr);
            return Some(());
        }

        let v1 = self.regs[rd];
        let v2 = self.regs[rd + 1];
        self.write_word_at(bus, addr, v1, false)?;
        self.write_word_at(bus, addr.wrapping_add(4), v2, false)?;

        if !pre_indexed || write_back {
            self.regs[rn] = sum;
        }
        Some(())
    }

    // ========== Block data transfer ==========

    fn exec_block_transfer(&mut self, bus: &mut dyn PhysBus, instr: u32) -> Option<()> {
        let rn = bits(instr, 16, 19) as usize;
        let base = self.regs[rn];
        let count = (instr & 0xFFFF).count_ones() * 4;

        // Every addressing mode reduces to an ascending transfer from a
        // start address plus a final base value.
        let (start, wb) = match (bit(instr, 24), bit(instr, 23)) {
            (false, true) => (base, base.wrapping_add(count)),
            (true, true) => (base.wrapping_add(4), base.wrapping_add(count)),
            (false, false) => (
                base.wrapping_sub(count).wrapping_add(4),
                base.wrapping_sub(count),
            ),
            (true, false) => (base.wrapping_sub(count), base.wrapping_sub(count)),
        };

        match (bit(instr, 20), bit(instr, 22)) {
            (true, false) => self.load_mult(bus, instr, start, wb),
            (true, true) => self.load_smult(bus, instr, start, wb),
            (false, false) => self.store_mult(bus, instr, start, wb),
            (false, true) => self.store_smult(bus, instr, start, wb),
        }
    }

    // ========== Branches ==========

    fn exec_branch(&mut self, instr: u32) {
        // 24-bit signed displacement in words; R15 already reads PC+8.
        let offset = (((instr << 8) as i32) >> 6) as u32;
        if bit(instr, 24) {
            self.regs[14] = if self.tflag {
                self.regs[15].wrapping_sub(2)
            } else {
                self.regs[15].wrapping_sub(4)
            };
        }
        self.regs[15] = self.regs[15].wrapping_add(offset);
        self.flush_pipe();
    }

    // ========== Coprocessor instructions ==========

    fn exec_coproc_transfer(&mut self, bus: &mut dyn PhysBus, instr: u32) -> Option<()> {
        let op = bits(instr, 20, 27);
        if op == 0xC4 {
            return self.exec_mcrr(instr);
        }
        if op == 0xC5 {
            return self.exec_mrrc(instr);
        }

        let pre = bit(instr, 24);
        let up = bit(instr, 23);
        let w = bit(instr, 21);
        let rn = bits(instr, 16, 19) as usize;
        let base = self.regs[rn];
        let offset = (instr & 0xFF) << 2;
        let computed = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if pre { computed } else { base };
        let writeback = w;

        let outcome = if bit(instr, 20) {
            self.coproc_ldc(bus, instr, addr)
        } else {
            self.coproc_stc(bus, instr, addr)
        };

        match outcome {
            Some(()) => {
                if writeback && rn != 15 {
                    self.regs[rn] = computed;
                }
                Some(())
            }
            None => {
                if writeback && self.lateabt_sig && rn != 15 {
                    self.regs[rn] = computed;
                }
                None
            }
        }
    }

    /// LDC: stream words from memory into the coprocessor until it stops
    /// answering `Inc`.
    fn coproc_ldc(&mut self, bus: &mut dyn PhysBus, instr: u32, mut address: u32) -> Option<()> {
        let cpnum = bits(instr, 8, 11) as usize;
        let mut slot = std::mem::replace(self.coprocs.slot_mut(cpnum), CoprocSlot::Detached);

        let outcome = if let CoprocSlot::External(cp) = &mut slot {
            let mut cpab = cp.ldc(CpPhase::First, instr, 0);
            let mut outcome = CpOutcome::Done;
            while cpab == CpResult::Busy {
                self.num_icycles += 1;
                if self.int_pending() {
                    cp.ldc(CpPhase::Interrupt, instr, 0);
                    outcome = CpOutcome::Interrupted;
                    break;
                }
                cpab = cp.ldc(CpPhase::Busy, instr, 0);
            }
            if outcome == CpOutcome::Done {
                if cpab == CpResult::Cant {
                    outcome = CpOutcome::Cant;
                } else {
                    cp.ldc(CpPhase::Transfer, instr, 0);
                    self.regs[15] = self.regs[15].wrapping_add(4);
                    self.next_instr = super::PCINCED | super::NONSEQ;
                    loop {
                        match self.mmu_read_word_for_coproc(bus, address) {
                            Some(data) => {
                                if cp.ldc(CpPhase::Data, instr, data) == CpResult::Inc {
                                    address = address.wrapping_add(4);
                                } else {
                                    break;
                                }
                            }
                            None => {
                                outcome = CpOutcome::Aborted;
                                break;
                            }
                        }
                    }
                }
            }
            outcome
        } else {
            CpOutcome::Cant
        };

        *self.coprocs.slot_mut(cpnum) = slot;
        match outcome {
            CpOutcome::Cant => {
                self.undef_instr(instr);
                Some(())
            }
            CpOutcome::Aborted => None,
            _ => Some(()),
        }
    }

    /// STC: stream words out of the coprocessor into memory.
    fn coproc_stc(&mut self, bus: &mut dyn PhysBus, instr: u32, mut address: u32) -> Option<()> {
        let cpnum = bits(instr, 8, 11) as usize;
        let mut slot = std::mem::replace(self.coprocs.slot_mut(cpnum), CoprocSlot::Detached);

        let outcome = if let CoprocSlot::External(cp) = &mut slot {
            let mut data = 0u32;
            let mut cpab = cp.stc(CpPhase::First, instr, &mut data);
            let mut outcome = CpOutcome::Done;
            while cpab == CpResult::Busy {
                self.num_icycles += 1;
                if self.int_pending() {
                    cp.stc(CpPhase::Interrupt, instr, &mut data);
                    outcome = CpOutcome::Interrupted;
                    break;
                }
                cpab = cp.stc(CpPhase::Busy, instr, &mut data);
            }
            if outcome == CpOutcome::Done {
                if cpab == CpResult::Cant {
                    outcome = CpOutcome::Cant;
                } else {
                    self.regs[15] = self.regs[15].wrapping_add(4);
                    self.next_instr = super::PCINCED | super::NONSEQ;
                    loop {
                        cpab = cp.stc(CpPhase::Data, instr, &mut data);
                        if self.mmu_write_word_for_coproc(bus, address, data).is_none() {
                            outcome = CpOutcome::Aborted;
                            break;
                        }
                        if cpab == CpResult::Inc {
                            address = address.wrapping_add(4);
                        } else {
                            break;
                        }
                    }
                }
            }
            outcome
        } else {
            CpOutcome::Cant
        };

        *self.coprocs.slot_mut(cpnum) = slot;
        match outcome {
            CpOutcome::Cant => {
                self.undef_instr(instr);
                Some(())
            }
            CpOutcome::Aborted => None,
            _ => Some(()),
        }
    }

    /// MCR: one word to a coprocessor register.
    fn exec_mcr(&mut self, bus: &mut dyn PhysBus, instr: u32) -> Option<()> {
        let cpnum = bits(instr, 8, 11) as usize;
        let value = self.regs[bits(instr, 12, 15) as usize];

        if matches!(self.coprocs.slot(cpnum), CoprocSlot::SystemControl) {
            let privileged = self.privileged();
            if self.mmu.mcr(bus, instr, value, privileged) {
                self.bus_used_inc_pc_n();
                self.ccycles(1);
            } else {
                self.undef_instr(instr);
            }
            return Some(());
        }

        let mut slot = std::mem::replace(self.coprocs.slot_mut(cpnum), CoprocSlot::Detached);
        let outcome = if let CoprocSlot::External(cp) = &mut slot {
            let mut cpab = cp.mcr(CpPhase::First, instr, value);
            let mut outcome = CpOutcome::Done;
            while cpab == CpResult::Busy {
                self.num_icycles += 1;
                if self.int_pending() {
                    cp.mcr(CpPhase::Interrupt, instr, 0);
                    outcome = CpOutcome::Interrupted;
                    break;
                }
                cpab = cp.mcr(CpPhase::Busy, instr, value);
            }
            if outcome == CpOutcome::Done && cpab == CpResult::Cant {
                outcome = CpOutcome::Cant;
            }
            outcome
        } else {
            CpOutcome::Cant
        };

        *self.coprocs.slot_mut(cpnum) = slot;
        match outcome {
            CpOutcome::Cant => self.undef_instr(instr),
            CpOutcome::Done => {
                self.bus_used_inc_pc_n();
                self.ccycles(1);
            }
            _ => {}
        }
        Some(())
    }

    /// MRC: one word from a coprocessor register; Rd = 15 targets the
    /// flags instead.
    fn exec_mrc(&mut self, instr: u32) -> Option<()> {
        let cpnum = bits(instr, 8, 11) as usize;
        let rd = bits(instr, 12, 15) as usize;

        if matches!(self.coprocs.slot(cpnum), CoprocSlot::SystemControl) {
            let privileged = self.privileged();
            match self.mmu.mrc(instr, privileged) {
                Some(value) => {
                    self.mrc_writeback(rd, value);
                    self.ccycles(1);
                    self.icycles(1);
                }
                None => self.undef_instr(instr),
            }
            return Some(());
        }

        let mut slot = std::mem::replace(self.coprocs.slot_mut(cpnum), CoprocSlot::Detached);
        let mut value = 0u32;
        let outcome = if let CoprocSlot::External(cp) = &mut slot {
            let mut cpab = cp.mrc(CpPhase::First, instr, &mut value);
            let mut outcome = CpOutcome::Done;
            while cpab == CpResult::Busy {
                self.num_icycles += 1;
                if self.int_pending() {
                    cp.mrc(CpPhase::Interrupt, instr, &mut value);
                    outcome = CpOutcome::Interrupted;
                    break;
                }
                cpab = cp.mrc(CpPhase::Busy, instr, &mut value);
            }
            if outcome == CpOutcome::Done && cpab == CpResult::Cant {
                outcome = CpOutcome::Cant;
            }
            outcome
        } else {
            CpOutcome::Cant
        };

        *self.coprocs.slot_mut(cpnum) = slot;
        match outcome {
            CpOutcome::Cant => self.undef_instr(instr),
            CpOutcome::Done => {
                self.mrc_writeback(rd, value);
                self.ccycles(1);
                self.icycles(1);
            }
            _ => {}
        }
        Some(())
    }

    fn mrc_writeback(&mut self, rd: usize, value: u32) {
        if rd == 15 {
            // MRC to R15 deposits the condition bits.
            self.nflag = value & N_BIT != 0;
            self.zflag = value & Z_BIT != 0;
            self.cflag = value & C_BIT != 0;
            self.vflag = value & V_BIT != 0;
        } else {
            self.regs[rd] = value;
        }
    }

    /// MCRR (v5E): two words to a coprocessor.
    fn exec_mcrr(&mut self, instr: u32) -> Option<()> {
        let cpnum = bits(instr, 8, 11) as usize;
        let v1 = self.regs[bits(instr, 12, 15) as usize];
        let v2 = self.regs[bits(instr, 16, 19) as usize];

        let mut slot = std::mem::replace(self.coprocs.slot_mut(cpnum), CoprocSlot::Detached);
        let outcome = if let CoprocSlot::External(cp) = &mut slot {
            let mut cpab = cp.mcrr(CpPhase::First, instr, v1, v2);
            let mut outcome = CpOutcome::Done;
            while cpab == CpResult::Busy {
                self.num_icycles += 1;
                if self.int_pending() {
                    cp.mcrr(CpPhase::Interrupt, instr, 0, 0);
                    outcome = CpOutcome::Interrupted;
                    break;
                }
                cpab = cp.mcrr(CpPhase::Busy, instr, v1, v2);
            }
            if outcome == CpOutcome::Done && cpab == CpResult::Cant {
                outcome = CpOutcome::Cant;
            }
            outcome
        } else {
            CpOutcome::Cant
        };

        *self.coprocs.slot_mut(cpnum) = slot;
        match outcome {
            CpOutcome::Cant => self.undef_instr(instr),
            CpOutcome::Done => self.ccycles(1),
            _ => {}
        }
        Some(())
    }

    /// MRRC (v5E): two words from a coprocessor.
    fn exec_mrrc(&mut self, instr: u32) -> Option<()> {
        let cpnum = bits(instr, 8, 11) as usize;
        let rd_lo = bits(instr, 12, 15) as usize;
        let rd_hi = bits(instr, 16, 19) as usize;

        let mut slot = std::mem::replace(self.coprocs.slot_mut(cpnum), CoprocSlot::Detached);
        let mut v1 = 0u32;
        let mut v2 = 0u32;
        let outcome = if let CoprocSlot::External(cp) = &mut slot {
            let mut cpab = cp.mrrc(CpPhase::First, instr, &mut v1, &mut v2);
            let mut outcome = CpOutcome::Done;
            while cpab == CpResult::Busy {
                self.num_icycles += 1;
                if self.int_pending() {
                    cp.mrrc(CpPhase::Interrupt, instr, &mut v1, &mut v2);
                    outcome = CpOutcome::Interrupted;
                    break;
                }
                cpab = cp.mrrc(CpPhase::Busy, instr, &mut v1, &mut v2);
            }
            if outcome == CpOutcome::Done && cpab == CpResult::Cant {
                outcome = CpOutcome::Cant;
            }
            outcome
        } else {
            CpOutcome::Cant
        };

        *self.coprocs.slot_mut(cpnum) = slot;
        match outcome {
            CpOutcome::Cant => self.undef_instr(instr),
            CpOutcome::Done => {
                self.regs[rd_lo] = v1;
                self.regs[rd_hi] = v2;
                self.ccycles(1);
                self.icycles(1);
            }
            _ => {}
        }
        Some(())
    }

    /// CDP: internal coprocessor operation.
    fn exec_cdp(&mut self, instr: u32) -> Option<()> {
        let cpnum = bits(instr, 8, 11) as usize;
        let mut slot = std::mem::replace(self.coprocs.slot_mut(cpnum), CoprocSlot::Detached);

        let outcome = if let CoprocSlot::External(cp) = &mut slot {
            let mut cpab = cp.cdp(CpPhase::First, instr);
            let mut outcome = CpOutcome::Done;
            while cpab == CpResult::Busy {
                self.num_icycles += 1;
                if self.int_pending() {
                    cp.cdp(CpPhase::Interrupt, instr);
                    outcome = CpOutcome::Interrupted;
                    break;
                }
                cpab = cp.cdp(CpPhase::Busy, instr);
            }
            if outcome == CpOutcome::Done && cpab == CpResult::Cant {
                outcome = CpOutcome::Cant;
            }
            outcome
        } else {
            CpOutcome::Cant
        };

        *self.coprocs.slot_mut(cpnum) = slot;
        if outcome == CpOutcome::Cant {
            self.undef_instr(instr);
        } else if outcome == CpOutcome::Done {
            self.num_ncycles += 1;
        }
        Some(())
    }

    /// Data read on behalf of a streaming coprocessor transfer.
    fn mmu_read_word_for_coproc(&mut self, bus: &mut dyn PhysBus, address: u32) -> Option<u32> {
        self.read_word_at(bus, address, false)
    }

    /// Data write on behalf of a streaming coprocessor transfer.
    fn mmu_write_word_for_coproc(
        &mut self,
        bus: &mut dyn PhysBus,
        address: u32,
        data: u32,
    ) -> Option<()> {
        self.write_word_at(bus, address, data, false)
    }

    // ========== v6 media page ==========

    fn exec_media(&mut self, instr: u32) -> Option<()> {
        if !self.is_v6() {
            self.undef_instr(instr);
            return Some(());
        }
        let op = bits(instr, 20, 27);
        let b47 = bits(instr, 4, 7);

        match op {
            0x61 | 0x62 | 0x63 | 0x65 | 0x66 | 0x67 => self.exec_parallel(instr, op),
            0x68 if b47 == 0xB => self.exec_sel(instr),
            0x6A | 0x6B if b47 & 0x3 == 0x1 => self.exec_ssat(instr),
            0x6E | 0x6F if b47 & 0x3 == 0x1 => self.exec_usat(instr),
            0x6A if b47 == 0x7 => self.exec_extend(instr, Extend::SignedByte),
            0x6B if b47 == 0x7 => self.exec_extend(instr, Extend::SignedHalf),
            0x6E if b47 == 0x7 => self.exec_extend(instr, Extend::UnsignedByte),
            0x6F if b47 == 0x7 => self.exec_extend(instr, Extend::UnsignedHalf),
            0x6B if b47 == 0x3 => {
                // REV
                let rd = bits(instr, 12, 15) as usize;
                let rm = self.regs[bits(instr, 0, 3) as usize];
                self.regs[rd] = rm.swap_bytes();
            }
            0x6B if b47 == 0xB => {
                // REV16
                let rd = bits(instr, 12, 15) as usize;
                let rm = self.regs[bits(instr, 0, 3) as usize];
                self.regs[rd] = ((rm & 0x00FF_00FF) << 8) | ((rm >> 8) & 0x00FF_00FF);
            }
            0x6F if b47 == 0xB => {
                // REVSH
                let rd = bits(instr, 12, 15) as usize;
                let rm = self.regs[bits(instr, 0, 3) as usize];
                self.regs[rd] = (rm as u16).swap_bytes() as i16 as i32 as u32;
            }
            0x7A | 0x7B if b47 & 0x7 == 0x5 => self.exec_bfx(instr, true),
            0x7E | 0x7F if b47 & 0x7 == 0x5 => self.exec_bfx(instr, false),
            0x7C | 0x7D if b47 & 0x7 == 0x1 => self.exec_bfc_bfi(instr),
            _ => self.undef_instr(instr),
        }
        Some(())
    }

    /// SXT/UXT with optional accumulate and byte rotation.
    fn exec_extend(&mut self, instr: u32, kind: Extend) {
        let rd = bits(instr, 12, 15) as usize;
        let rn = bits(instr, 16, 19) as usize;
        let rotation = bits(instr, 10, 11) * 8;
        let rotated = self.regs[bits(instr, 0, 3) as usize].rotate_right(rotation);

        let value = match kind {
            Extend::SignedByte => rotated as u8 as i8 as i32 as u32,
            Extend::SignedHalf => rotated as u16 as i16 as i32 as u32,
            Extend::UnsignedByte => rotated & 0xFF,
            Extend::UnsignedHalf => rotated & 0xFFFF,
        };
        // Rn = 15 encodes the plain extend; otherwise accumulate.
        self.regs[rd] = if rn == 15 {
            value
        } else {
            self.regs[rn].wrapping_add(value)
        };
    }

    /// SSAT with optional shift of the source.
    fn exec_ssat(&mut self, instr: u32) {
        let rd = bits(instr, 12, 15) as usize;
        let sat = bits(instr, 16, 20);
        let shift = bits(instr, 7, 11);
        let rm = self.regs[bits(instr, 0, 3) as usize];

        let operand = if bit(instr, 6) {
            let amount = if shift == 0 { 31 } else { shift };
            (rm as i32) >> amount
        } else {
            ((rm as i32) << shift) as i32
        };
        let (value, saturated) = signed_sat_q(operand, sat);
        self.regs[rd] = value;
        if saturated {
            self.qflag = true;
        }
    }

    /// USAT.
    fn exec_usat(&mut self, instr: u32) {
        let rd = bits(instr, 12, 15) as usize;
        let sat = bits(instr, 16, 20);
        let shift = bits(instr, 7, 11);
        let rm = self.regs[bits(instr, 0, 3) as usize];

        let operand = if bit(instr, 6) {
            let amount = if shift == 0 { 31 } else { shift };
            (rm as i32) >> amount
        } else {
            ((rm as i32) << shift) as i32
        };
        let (value, saturated) = unsigned_sat_q(operand, sat);
        self.regs[rd] = value;
        if saturated {
            self.qflag = true;
        }
    }

    /// SBFX/UBFX.
    fn exec_bfx(&mut self, instr: u32, signed: bool) {
        let rd = bits(instr, 12, 15) as usize;
        let rn = bits(instr, 0, 3) as usize;
        let lsb = bits(instr, 7, 11);
        let widthm1 = bits(instr, 16, 20);
        if rd == 15 || rn == 15 || lsb + widthm1 >= 32 {
            self.undef_instr(instr);
            return;
        }
        let raw = self.regs[rn] >> lsb;
        let width = widthm1 + 1;
        let mask = if width == 32 { !0 } else { (1u32 << width) - 1 };
        let field = raw & mask;
        self.regs[rd] = if signed && field & (1 << widthm1) != 0 {
            field | !mask
        } else {
            field
        };
    }

    /// BFC (Rn = 15) / BFI.
    fn exec_bfc_bfi(&mut self, instr: u32) {
        let rd = bits(instr, 12, 15) as usize;
        let rn = bits(instr, 0, 3) as usize;
        let lsb = bits(instr, 7, 11);
        let msb = bits(instr, 16, 20);
        if rd == 15 || msb < lsb {
            self.undef_instr(instr);
            return;
        }
        let width = msb - lsb + 1;
        let mask = if width == 32 {
            !0u32
        } else {
            ((1u32 << width) - 1) << lsb
        };
        if rn == 15 {
            self.regs[rd] &= !mask;
        } else {
            let field = (self.regs[rn] << lsb) & mask;
            self.regs[rd] = (self.regs[rd] & !mask) | field;
        }
    }

    /// SEL: byte select on the GE flags.
    fn exec_sel(&mut self, instr: u32) {
        let rd = bits(instr, 12, 15) as usize;
        let rn = self.regs[bits(instr, 16, 19) as usize];
        let rm = self.regs[bits(instr, 0, 3) as usize];
        let ge = self.geflag >> 16;

        let mut result = 0u32;
        for lane in 0..4 {
            let byte = if ge & (1 << lane) != 0 {
                (rn >> (lane * 8)) & 0xFF
            } else {
                (rm >> (lane * 8)) & 0xFF
            };
            result |= byte << (lane * 8);
        }
        self.regs[rd] = result;
    }

    /// The parallel add/sub page: signed/unsigned basic, saturating and
    /// halving variants, selected by op and bits [7:5].
    fn exec_parallel(&mut self, instr: u32, op: u32) {
        let rd = bits(instr, 12, 15) as usize;
        let rn = self.regs[bits(instr, 16, 19) as usize];
        let rm = self.regs[bits(instr, 0, 3) as usize];
        let sub_op = bits(instr, 5, 7);

        // Lane arithmetic as i32 on sign- or zero-extended inputs; the
        // basic variants derive the GE bits from the wide result.
        let signed = matches!(op, 0x61 | 0x62 | 0x63);
        let h16 = |v: u32, top: bool| -> i32 {
            let half = (if top { v >> 16 } else { v }) & 0xFFFF;
            if signed {
                half as u16 as i16 as i32
            } else {
                half as i32
            }
        };
        let b8 = |v: u32, lane: u32| -> i32 {
            let byte = (v >> (lane * 8)) & 0xFF;
            if signed {
                byte as u8 as i8 as i32
            } else {
                byte as i32
            }
        };

        match op {
            0x61 | 0x65 => {
                // Basic add/sub, writing GE. Signed variants set GE when
                // the lane result is non-negative; unsigned variants set
                // it from the lane carry (add) or no-borrow (sub).
                let mut ge = 0u32;
                let lane_ge = |v: i32, is_add: bool| -> bool {
                    if signed {
                        v >= 0
                    } else if is_add {
                        v >= 0x1_0000
                    } else {
                        v >= 0
                    }
                };
                let byte_ge = |v: i32, is_add: bool| -> bool {
                    if signed {
                        v >= 0
                    } else if is_add {
                        v >= 0x100
                    } else {
                        v >= 0
                    }
                };
                let result = match sub_op {
                    0 | 1 | 2 | 3 => {
                        let (lo, lo_add, hi, hi_add) = match sub_op {
                            0 => (h16(rn, false) + h16(rm, false), true,
                                  h16(rn, true) + h16(rm, true), true),
                            1 => (h16(rn, false) - h16(rm, true), false,
                                  h16(rn, true) + h16(rm, false), true),
                            2 => (h16(rn, false) + h16(rm, true), true,
                                  h16(rn, true) - h16(rm, false), false),
                            _ => (h16(rn, false) - h16(rm, false), false,
                                  h16(rn, true) - h16(rm, true), false),
                        };
                        if lane_ge(lo, lo_add) {
                            ge |= 0b0011;
                        }
                        if lane_ge(hi, hi_add) {
                            ge |= 0b1100;
                        }
                        ((lo as u32) & 0xFFFF) | ((hi as u32) << 16)
                    }
                    4 | 7 => {
                        let is_add = sub_op == 4;
                        let mut out = 0u32;
                        for lane in 0..4 {
                            let v = if is_add {
                                b8(rn, lane) + b8(rm, lane)
                            } else {
                                b8(rn, lane) - b8(rm, lane)
                            };
                            if byte_ge(v, is_add) {
                                ge |= 1 << lane;
                            }
                            out |= ((v as u32) & 0xFF) << (lane * 8);
                        }
                        out
                    }
                    _ => {
                        self.undef_instr(instr);
                        return;
                    }
                };
                self.geflag = ge << 16;
                self.regs[rd] = result;
            }
            0x62 | 0x66 => {
                // Saturating variants; no GE update.
                let result = match sub_op {
                    0 => {
                        let lo = self.par_sat16(rn as u16, rm as u16, true, op == 0x62);
                        let hi =
                            self.par_sat16((rn >> 16) as u16, (rm >> 16) as u16, true, op == 0x62);
                        lo as u32 | ((hi as u32) << 16)
                    }
                    3 => {
                        let lo = self.par_sat16(rn as u16, rm as u16, false, op == 0x62);
                        let hi =
                            self.par_sat16((rn >> 16) as u16, (rm >> 16) as u16, false, op == 0x62);
                        lo as u32 | ((hi as u32) << 16)
                    }
                    4 | 7 => {
                        let mut out = 0u32;
                        for lane in 0..4 {
                            let a = (rn >> (lane * 8)) as u8;
                            let b = (rm >> (lane * 8)) as u8;
                            let v = match (sub_op == 4, op == 0x62) {
                                (true, true) => signed_saturated_add8(a, b),
                                (false, true) => signed_saturated_sub8(a, b),
                                (true, false) => unsigned_saturated_add8(a, b),
                                (false, false) => unsigned_saturated_sub8(a, b),
                            };
                            out |= (v as u32) << (lane * 8);
                        }
                        out
                    }
                    _ => {
                        self.undef_instr(instr);
                        return;
                    }
                };
                self.regs[rd] = result;
            }
            0x63 | 0x67 => {
                // Halving variants.
                let result = match sub_op {
                    0 | 3 => {
                        let add = sub_op == 0;
                        let lo = self.par_halving16(rn, rm, false, add, op == 0x63);
                        let hi = self.par_halving16(rn, rm, true, add, op == 0x63);
                        (lo & 0xFFFF) | (hi << 16)
                    }
                    4 | 7 => {
                        let add = sub_op == 4;
                        let mut out = 0u32;
                        for lane in 0..4 {
                            let a = b8(rn, lane);
                            let b = b8(rm, lane);
                            let wide = if add { a + b } else { a - b };
                            out |= (((wide >> 1) as u32) & 0xFF) << (lane * 8);
                        }
                        out
                    }
                    _ => {
                        self.undef_instr(instr);
                        return;
                    }
                };
                self.regs[rd] = result;
            }
            _ => self.undef_instr(instr),
        }
    }

    fn par_sat16(&self, a: u16, b: u16, add: bool, signed: bool) -> u16 {
        match (add, signed) {
            (true, true) => signed_saturated_add16(a, b),
            (false, true) => signed_saturated_sub16(a, b),
            (true, false) => unsigned_saturated_add16(a, b),
            (false, false) => unsigned_saturated_sub16(a, b),
        }
    }

    fn par_halving16(&self, rn: u32, rm: u32, top: bool, add: bool, signed: bool) -> u32 {
        let pick = |v: u32| -> i32 {
            let half = (if top { v >> 16 } else { v }) & 0xFFFF;
            if signed {
                half as u16 as i16 as i32
            } else {
                half as i32
            }
        };
        let wide = if add {
            pick(rn) + pick(rm)
        } else {
            pick(rn) - pick(rm)
        };
        (wide >> 1) as u32
    }

    // ========== Unconditional (NV) space ==========

    /// Instructions decoded from the NV condition slot: BLX(1), PLD,
    /// CPS, CLREX.
    pub(crate) fn execute_unconditional(&mut self, _bus: &mut dyn PhysBus, instr: u32) {
        if bits(instr, 25, 27) == 5 {
            // BLX(1): branch with link and force Thumb.
            if !self.is_v5() {
                self.undef_instr(instr);
                return;
            }
            let offset = (((instr << 8) as i32) >> 6) as u32;
            let h = (instr >> 23) & 2;
            self.regs[14] = self.regs[15].wrapping_sub(4);
            let dest = self.regs[15].wrapping_add(offset).wrapping_add(h) | 1;
            self.write_r15_branch(dest);
            return;
        }

        if instr & 0x0D70_F000 == 0x0550_F000 {
            // PLD: a hint, ignored.
            return;
        }

        if self.is_v6() && instr == 0xF57F_F01F {
            // CLREX
            self.clear_exclusive();
            return;
        }

        if self.is_v6() && bits(instr, 20, 27) == 0x10 {
            // CPS: change processor state. A no-op from user mode.
            if !self.privileged() {
                return;
            }
            if bit(instr, 19) {
                let disable = bit(instr, 18);
                if bit(instr, 8) {
                    self.aflag = disable;
                }
                if bit(instr, 7) {
                    self.iflag = disable;
                }
                if bit(instr, 6) {
                    self.fflag = disable;
                }
            }
            if bit(instr, 17) {
                let new_mode = instr & 0x1F;
                self.switch_mode(new_mode);
            }
            self.cpsr = self.recompose_cpsr();
            return;
        }

        self.undef_instr(instr);
    }
}

/// Opcodes whose S variant takes the shifter carry-out.
#[inline]
fn is_logical(opcode: u32) -> bool {
    matches!(opcode, 0x0 | 0x1 | 0x8 | 0x9 | 0xC | 0xD | 0xE | 0xF)
}

/// How a coprocessor handshake ended.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CpOutcome {
    Done,
    Cant,
    Interrupted,
    Aborted,
}

/// Source half selection for the extend family.
#[derive(Clone, Copy)]
enum Extend {
    SignedByte,
    SignedHalf,
    UnsignedByte,
    UnsignedHalf,
}
