//! ARM11 (ARMv6) interpreter core.
//!
//! One [`ArmCore`] is one emulated CPU: the live register file with its
//! banked shadows, the decomposed CPSR flag cache, the two-slot pipeline
//! shadow, the external signal lines, the exclusive-access monitor, the
//! MMU and the coprocessor dispatch table.
//!
//! # Module Organization
//!
//! - `psr`: CPSR bit layout, mode numbers, bank mapping
//! - `helpers`: barrel shifter, flag/ALU helpers, memory access helpers
//! - `execute`: instruction decode and execution
//! - `thumb`: Thumb 16-bit to ARM 32-bit instruction rewriting
//!
//! The core runs one instruction per [`ArmCore::step`]: poll the external
//! signal lines, advance the pipeline, fetch through the I-side MMU,
//! rewrite Thumb to ARM if needed, test the condition field, execute.
//! Exceptions never escape as errors; they are taken by entering the
//! corresponding vector before the next instruction.

use crate::bus::PhysBus;
use crate::coproc::CoprocBank;
use crate::mmu::{ChipFamily, Mmu};
use bitflags::bitflags;

mod execute;
mod helpers;
pub mod psr;
mod thumb;

#[cfg(test)]
mod tests;

pub use psr::*;

bitflags! {
    /// Architecture-version properties of the emulated chip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArchProps: u32 {
        const V4 = 1 << 0;
        const V5 = 1 << 1;
        const V5E = 1 << 2;
        const V6 = 1 << 3;
    }
}

/// What kind of cache the emulated chip advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    None,
    Data,
    Inst,
}

/// Descriptor of the emulated chip.
#[derive(Debug, Clone, Copy)]
pub struct CpuConfig {
    pub arch_name: &'static str,
    pub name: &'static str,
    /// Main ID register value and the mask of its significant bits.
    pub cpu_val: u32,
    pub cpu_mask: u32,
    pub cache_kind: CacheKind,
}

/// The ARM11 MPCore profile used by the 3DS path.
pub const ARM11_CONFIG: CpuConfig = CpuConfig {
    arch_name: "armv6",
    name: "arm11",
    cpu_val: 0x0007_B000,
    cpu_mask: 0x0007_F000,
    cache_kind: CacheKind::None,
};

/// Run control for the execute loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stop,
    ChangeMode,
    Once,
    Run,
}

/// How a data abort interacts with base-register writeback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortModel {
    /// The base register is left unchanged by an aborted access.
    BaseRestored,
    /// Writeback still happens on an aborted access (late abort).
    BaseUpdated,
}

// Pipeline shadow states. SEQ through PCINCEDNONSEQ reuse the shadow;
// anything at PRIMEPIPE or above refills it.
pub(crate) const SEQ: u32 = 0;
pub(crate) const NONSEQ: u32 = 1;
pub(crate) const PCINCED: u32 = 2;
pub(crate) const PRIMEPIPE: u32 = 4;
pub(crate) const RESUME: u32 = 8;

/// Reservation granule of the exclusive monitor, in bytes.
const EXCLUSIVE_GRANULE: u32 = 8;
/// Number of reservation slots; eviction is round-robin.
const EXCLUSIVE_SLOTS: usize = 128;
const EXCLUSIVE_NONE: u32 = 0xFFFF_FFFF;

/// The system-call sink. The core consults it on every SWI before
/// synthesizing the vector; a `true` answer means the call was handled
/// out-of-band and execution resumes after the SWI.
pub trait SwiHandler {
    fn handle_swi(&mut self, imm24: u32) -> bool;
}

/// A sink that declines every SWI, forcing the architectural vector.
pub struct DeclineAllSwi;

impl SwiHandler for DeclineAllSwi {
    fn handle_swi(&mut self, _imm24: u32) -> bool {
        false
    }
}

/// Thread context record exchanged with the outer scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadContext {
    pub cpu_registers: [u32; 13],
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
    pub fpu_registers: [u32; 64],
    pub fpscr: u32,
    pub fpexc: u32,
    /// User read-only thread register (TLS pointer).
    pub tls: u32,
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self {
            cpu_registers: [0; 13],
            sp: 0,
            lr: 0,
            pc: 0,
            cpsr: 0,
            fpu_registers: [0; 64],
            fpscr: 0,
            fpexc: 0,
            tls: 0,
        }
    }
}

/// One emulated ARM core.
pub struct ArmCore {
    /// The live register file. `regs[15]` is the pipelined PC and reads
    /// as the current instruction address plus 8 (ARM) or 4 (Thumb).
    pub regs: [u32; 16],
    reg_bank: [[u32; 16]; NUM_BANKS],
    spsr: [u32; NUM_BANKS],
    /// Assembled CPSR; authoritative only at synchronization points.
    pub cpsr: u32,
    /// Current 5-bit mode number.
    pub mode: u32,
    bank: Bank,

    // Decomposed flag cache, authoritative during execution.
    pub nflag: bool,
    pub zflag: bool,
    pub cflag: bool,
    pub vflag: bool,
    pub qflag: bool,
    /// GE[3:0], kept in CPSR bit positions (19..16).
    pub geflag: u32,
    pub eflag: bool,
    pub aflag: bool,
    pub tflag: bool,
    pub iflag: bool,
    pub fflag: bool,

    // Pipeline shadow.
    pub(crate) next_instr: u32,
    /// Address of the instruction being executed.
    pub pc: u32,
    pub(crate) decoded: u32,
    pub(crate) loaded: u32,
    pub(crate) decoded_addr: u32,
    pub(crate) loaded_addr: u32,

    pub emulate: RunState,

    // External signal lines, active-low where the N prefix says so.
    pub nreset_sig: bool,
    pub nfiq_sig: bool,
    pub nirq_sig: bool,
    pub abort_sig: bool,
    /// Pending abort vector, taken at the end of the instruction.
    pub(crate) aborted: Option<u32>,
    /// Address of the last faulting fetch.
    pub abort_addr: u32,
    pub ntrans_sig: bool,
    pub bigend_sig: bool,
    pub prog32_sig: bool,
    pub data32_sig: bool,
    /// High selects the Base Updated (late) abort model.
    pub lateabt_sig: bool,

    // Cycle and instruction counters.
    pub num_instrs: u64,
    pub(crate) num_scycles: u64,
    pub(crate) num_ncycles: u64,
    pub(crate) num_icycles: u64,
    pub(crate) num_ccycles: u64,
    pub(crate) num_fcycles: u64,

    // Exclusive-access monitor.
    exclusive_tags: [u32; EXCLUSIVE_SLOTS],
    exclusive_cursor: usize,
    pub(crate) exclusive_state: bool,

    /// Extra displacement applied to the vector base, for chips that
    /// remap the exception table.
    pub vector_remap: Option<u32>,

    pub config: CpuConfig,
    pub props: ArchProps,

    // VFP register storage; arithmetic lives behind the coprocessor hooks.
    pub ext_regs: [u32; 64],
    pub fpsid: u32,
    pub fpscr: u32,
    pub fpexc: u32,

    pub mmu: Mmu,
    pub coprocs: CoprocBank,
}

impl ArmCore {
    /// Create an ARM11 core in reset state with CP15 attached.
    pub fn new() -> Self {
        let mut core = Self {
            regs: [0; 16],
            reg_bank: [[0; 16]; NUM_BANKS],
            spsr: [0; NUM_BANKS],
            cpsr: 0,
            mode: SVC32_MODE,
            bank: Bank::Svc,
            nflag: false,
            zflag: false,
            cflag: false,
            vflag: false,
            qflag: false,
            geflag: 0,
            eflag: false,
            aflag: false,
            tflag: false,
            iflag: true,
            fflag: true,
            next_instr: RESUME,
            pc: 0,
            decoded: 0,
            loaded: 0,
            decoded_addr: 0,
            loaded_addr: 0,
            emulate: RunState::Run,
            nreset_sig: true,
            nfiq_sig: true,
            nirq_sig: true,
            abort_sig: false,
            aborted: None,
            abort_addr: 1,
            ntrans_sig: true,
            bigend_sig: false,
            prog32_sig: true,
            data32_sig: true,
            lateabt_sig: false,
            num_instrs: 0,
            num_scycles: 0,
            num_ncycles: 0,
            num_icycles: 0,
            num_ccycles: 0,
            num_fcycles: 0,
            exclusive_tags: [EXCLUSIVE_NONE; EXCLUSIVE_SLOTS],
            exclusive_cursor: 0,
            exclusive_state: false,
            vector_remap: None,
            config: ARM11_CONFIG,
            props: ArchProps::V4 | ArchProps::V5 | ArchProps::V5E | ArchProps::V6,
            ext_regs: [0; 64],
            fpsid: 0x4102_3001,
            fpscr: 0,
            fpexc: 0,
            mmu: Mmu::new(ChipFamily::Arm1176JZFS),
            coprocs: CoprocBank::new(),
        };
        core.coprocs.attach_system_control(15);
        core.reset();
        core
    }

    /// Choose which architecture generations the core accepts.
    pub fn select_processor(&mut self, props: ArchProps) {
        self.props = props;
        self.coprocs.reset();
    }

    #[inline]
    pub fn is_v4(&self) -> bool {
        self.props.contains(ArchProps::V4)
    }

    #[inline]
    pub fn is_v5(&self) -> bool {
        self.props.contains(ArchProps::V5)
    }

    #[inline]
    pub fn is_v5e(&self) -> bool {
        self.props.contains(ArchProps::V5E)
    }

    #[inline]
    pub fn is_v6(&self) -> bool {
        self.props.contains(ArchProps::V6)
    }

    /// Power-on reset: Supervisor mode, interrupts masked, PC at the
    /// reset vector, all counters cleared, MMU back to defaults.
    pub fn reset(&mut self) {
        self.next_instr = 0;
        self.regs[15] = 0;
        self.cpsr = INT_MASK | SVC32_MODE;
        self.mode = SVC32_MODE;
        self.cpsr_altered();
        self.bank = Bank::Svc;
        self.flush_pipe();

        self.nreset_sig = true;
        self.nfiq_sig = true;
        self.nirq_sig = true;
        self.ntrans_sig = true;
        self.abort_sig = false;
        self.aborted = None;
        self.abort_addr = 1;

        self.num_instrs = 0;
        self.num_scycles = 0;
        self.num_ncycles = 0;
        self.num_icycles = 0;
        self.num_ccycles = 0;
        self.num_fcycles = 0;

        self.exclusive_tags = [EXCLUSIVE_NONE; EXCLUSIVE_SLOTS];
        self.exclusive_cursor = 0;
        self.exclusive_state = false;

        self.mmu.reset();
        self.coprocs.reset();
    }

    /// Clock ticks since reset: the sum of every cycle class.
    pub fn time(&self) -> u64 {
        self.num_scycles + self.num_ncycles + self.num_icycles + self.num_ccycles
            + self.num_fcycles
    }

    /// True outside the two user modes.
    #[inline]
    pub fn privileged(&self) -> bool {
        !is_user_mode(self.mode)
    }

    /// Configured abort model, as a signal for the writeback paths.
    #[inline]
    pub fn abort_model(&self) -> AbortModel {
        if self.lateabt_sig {
            AbortModel::BaseUpdated
        } else {
            AbortModel::BaseRestored
        }
    }

    pub fn set_abort_model(&mut self, model: AbortModel) {
        self.lateabt_sig = model == AbortModel::BaseUpdated;
    }

    // ========== Instruction Execution ==========

    /// Execute one instruction. Returns `false` when the slot was consumed
    /// by an exception entry (reset/IRQ/FIQ/prefetch abort) instead of an
    /// instruction.
    pub fn step(&mut self, bus: &mut dyn PhysBus, swi: &mut dyn SwiHandler) -> bool {
        let isize: u32 = if self.tflag { 2 } else { 4 };

        // Advance or refill the pipeline shadow.
        match self.next_instr {
            SEQ => {
                self.regs[15] = self.regs[15].wrapping_add(isize);
                self.pc = self.pc.wrapping_add(isize);
                self.num_scycles += 1;
            }
            NONSEQ => {
                self.regs[15] = self.regs[15].wrapping_add(isize);
                self.pc = self.pc.wrapping_add(isize);
                self.num_ncycles += 1;
            }
            n if n == PCINCED => {
                // The program counter was already advanced mid-instruction.
                self.pc = self.pc.wrapping_add(isize);
                self.num_scycles += 1;
            }
            n if n == (PCINCED | NONSEQ) => {
                self.pc = self.pc.wrapping_add(isize);
                self.num_ncycles += 1;
            }
            _ => {
                // PRIMEPIPE / RESUME: the program counter has been changed.
                self.pc = self.regs[15];
                self.regs[15] = self.pc.wrapping_add(2 * isize);
                self.aborted = None;
                self.abort_sig = false;
                self.abort_addr = 1;
                self.num_ncycles += 1;
            }
        }
        self.next_instr = SEQ;
        self.decoded_addr = self.pc.wrapping_add(isize);
        self.loaded_addr = self.pc.wrapping_add(2 * isize);

        // External signals, strongest first. FIQ gated by F, IRQ by I.
        if !self.nreset_sig {
            self.take_exception(RESET_VECTOR);
            return false;
        }
        if !self.nfiq_sig && !self.fflag {
            self.take_exception(FIQ_VECTOR);
            return false;
        }
        if !self.nirq_sig && !self.iflag {
            self.take_exception(IRQ_VECTOR);
            return false;
        }

        // Fetch through the I-side MMU.
        let fetch_pc = self.pc & if self.tflag { !1 } else { !3 };
        let raw = match self
            .mmu
            .load_instr(bus, fetch_pc, self.tflag, self.privileged())
        {
            Ok(word) => word,
            Err(_) => {
                self.abort_addr = fetch_pc;
                self.take_exception(PREFETCH_ABORT_VECTOR);
                return false;
            }
        };
        self.decoded = raw;
        self.num_instrs += 1;

        // Thumb instructions are rewritten into the equivalent ARM word
        // and fall through into the normal execute path.
        let instr = if self.tflag {
            match self.thumb_decode(fetch_pc, raw) {
                thumb::ThumbDecode::Decoded(armed) => armed,
                thumb::ThumbDecode::Branch => return true,
                thumb::ThumbDecode::Undefined => {
                    self.undef_instr(raw);
                    return true;
                }
            }
        } else {
            raw
        };

        // Condition field. The NV slot decodes the unconditional space.
        let cond = instr >> 28;
        let pass = match cond {
            0xE => true,
            0xF => {
                self.execute_unconditional(bus, instr);
                if let Some(vector) = self.aborted.take() {
                    self.take_exception(vector);
                }
                return true;
            }
            _ => self.check_condition(cond),
        };

        if pass {
            self.execute(bus, swi, instr);
            if let Some(vector) = self.aborted.take() {
                self.take_exception(vector);
            }
        }
        true
    }

    /// Condition predicate over the decomposed flags.
    pub fn check_condition(&self, cond: u32) -> bool {
        match cond {
            0x0 => self.zflag,                             // EQ
            0x1 => !self.zflag,                            // NE
            0x2 => self.cflag,                             // CS
            0x3 => !self.cflag,                            // CC
            0x4 => self.nflag,                             // MI
            0x5 => !self.nflag,                            // PL
            0x6 => self.vflag,                             // VS
            0x7 => !self.vflag,                            // VC
            0x8 => self.cflag && !self.zflag,              // HI
            0x9 => !self.cflag || self.zflag,              // LS
            0xA => self.nflag == self.vflag,               // GE
            0xB => self.nflag != self.vflag,               // LT
            0xC => !self.zflag && self.nflag == self.vflag, // GT
            0xD => self.zflag || self.nflag != self.vflag, // LE
            0xE => true,                                   // AL
            _ => false,                                    // NV
        }
    }

    // ========== Exceptions ==========

    /// Enter the vector at `vector`: save the return state, switch mode,
    /// mask interrupts and branch. The LR adjustment per vector follows
    /// the architectural return offsets.
    pub fn take_exception(&mut self, vector: u32) {
        self.aborted = None;
        self.abort_sig = false;

        let isize: i32 = if self.tflag { 2 } else { 4 };
        let esize: i32 = if self.tflag { 0 } else { 4 };
        let e2size: i32 = if self.tflag { -4 } else { 0 };
        let return_base = self.regs[15];

        let (ints, new_mode, offset) = match vector {
            RESET_VECTOR => (INT_MASK, SVC32_MODE, 0),
            UNDEF_VECTOR => (I_BIT, UNDEF32_MODE, isize),
            SWI_VECTOR => (I_BIT, SVC32_MODE, isize),
            PREFETCH_ABORT_VECTOR => (I_BIT, ABORT32_MODE, esize),
            DATA_ABORT_VECTOR => (I_BIT, ABORT32_MODE, e2size),
            IRQ_VECTOR => (I_BIT, IRQ32_MODE, esize),
            FIQ_VECTOR => (INT_MASK, FIQ32_MODE, esize),
            _ => (I_BIT, SVC32_MODE, isize),
        };

        let old_cpsr = self.recompose_cpsr();
        self.switch_mode(new_mode);
        if self.bank.has_spsr() {
            self.spsr[self.bank as usize] = old_cpsr;
        }
        self.regs[14] = return_base.wrapping_sub(offset as u32);
        self.tflag = false;
        self.iflag = true;
        if ints & F_BIT != 0 {
            self.fflag = true;
        }
        self.cpsr = self.recompose_cpsr();

        // Exception entry invalidates any open reservation.
        self.exclusive_state = false;

        let mut target = vector;
        if self.mmu.high_vectors() {
            target = target.wrapping_add(0xFFFF_0000);
        }
        if let Some(base) = self.vector_remap {
            target = target.wrapping_add(base);
        }
        self.set_r15(target);
    }

    /// Raise the undefined-instruction trap for `instr`.
    pub fn undef_instr(&mut self, instr: u32) {
        log::warn!(
            "undefined instruction {:08x} at pc={:08x}",
            instr,
            self.pc
        );
        self.take_exception(UNDEF_VECTOR);
    }

    /// True when an external exception would preempt a busy-waiting
    /// coprocessor. The exception itself is taken at the next
    /// top-of-instruction poll.
    pub(crate) fn int_pending(&self) -> bool {
        !self.nreset_sig
            || (!self.nfiq_sig && !self.fflag)
            || (!self.nirq_sig && !self.iflag)
    }

    // ========== Mode and bank management ==========

    /// Switch the live register file to `new_mode`, spilling the outgoing
    /// bank and loading the incoming one. FIQ additionally banks R8-R12.
    pub fn switch_mode(&mut self, new_mode: u32) {
        self.switch_bank(bank_of_mode(new_mode));
        self.mode = new_mode;
        self.ntrans_sig = new_mode & 3 != 0;
    }

    /// Swap the live registers to `new_bank` without changing the mode
    /// field. LDM/STM with the S bit borrow the User bank this way.
    pub(crate) fn switch_bank(&mut self, new_bank: Bank) {
        let old_bank = self.bank;

        if old_bank != new_bank {
            // Save away the old registers.
            match old_bank {
                Bank::User | Bank::Irq | Bank::Svc | Bank::Abort | Bank::Undef => {
                    if new_bank == Bank::Fiq {
                        for i in 8..13 {
                            self.reg_bank[Bank::User as usize][i] = self.regs[i];
                        }
                    }
                    self.reg_bank[old_bank as usize][13] = self.regs[13];
                    self.reg_bank[old_bank as usize][14] = self.regs[14];
                }
                Bank::Fiq => {
                    for i in 8..15 {
                        self.reg_bank[Bank::Fiq as usize][i] = self.regs[i];
                    }
                }
                Bank::Dummy => {
                    for i in 8..15 {
                        self.reg_bank[Bank::Dummy as usize][i] = self.regs[i];
                    }
                }
            }

            // Restore the new registers.
            match new_bank {
                Bank::User | Bank::Irq | Bank::Svc | Bank::Abort | Bank::Undef => {
                    if old_bank == Bank::Fiq {
                        for i in 8..13 {
                            self.regs[i] = self.reg_bank[Bank::User as usize][i];
                        }
                    }
                    self.regs[13] = self.reg_bank[new_bank as usize][13];
                    self.regs[14] = self.reg_bank[new_bank as usize][14];
                }
                Bank::Fiq => {
                    for i in 8..15 {
                        self.regs[i] = self.reg_bank[Bank::Fiq as usize][i];
                    }
                }
                Bank::Dummy => {
                    for i in 8..15 {
                        self.regs[i] = self.reg_bank[Bank::Dummy as usize][i];
                    }
                }
            }
            self.bank = new_bank;
        }
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    // ========== PSR plumbing ==========

    /// Reassemble the architectural CPSR from the decomposed flag cache.
    pub fn recompose_cpsr(&self) -> u32 {
        let mut c = self.mode & MODE_MASK;
        if self.nflag {
            c |= N_BIT;
        }
        if self.zflag {
            c |= Z_BIT;
        }
        if self.cflag {
            c |= C_BIT;
        }
        if self.vflag {
            c |= V_BIT;
        }
        if self.qflag {
            c |= Q_BIT;
        }
        c |= self.geflag & GE_MASK;
        if self.eflag {
            c |= E_BIT;
        }
        if self.aflag {
            c |= A_BIT;
        }
        if self.iflag {
            c |= I_BIT;
        }
        if self.fflag {
            c |= F_BIT;
        }
        if self.tflag {
            c |= T_BIT;
        }
        c
    }

    /// Architectural CPSR read.
    pub fn get_cpsr(&self) -> u32 {
        self.recompose_cpsr()
    }

    /// Architectural CPSR write: store and resynchronize the flag cache,
    /// switching banks when the mode field changed.
    pub fn set_cpsr(&mut self, value: u32) {
        self.cpsr = value;
        self.cpsr_altered();
    }

    /// Resynchronize the decomposed flags (and the register bank) from
    /// `self.cpsr` after it has been written.
    pub fn cpsr_altered(&mut self) {
        self.nflag = self.cpsr & N_BIT != 0;
        self.zflag = self.cpsr & Z_BIT != 0;
        self.cflag = self.cpsr & C_BIT != 0;
        self.vflag = self.cpsr & V_BIT != 0;
        self.qflag = self.cpsr & Q_BIT != 0;
        self.geflag = self.cpsr & GE_MASK;
        self.eflag = self.cpsr & E_BIT != 0;
        self.aflag = self.cpsr & A_BIT != 0;
        self.iflag = self.cpsr & I_BIT != 0;
        self.fflag = self.cpsr & F_BIT != 0;
        self.tflag = self.cpsr & T_BIT != 0;

        let new_mode = self.cpsr & MODE_MASK;
        if new_mode != self.mode {
            self.switch_mode(new_mode);
        }
    }

    /// MSR to the CPSR, honoring the field mask in instruction bits
    /// 19..16. User mode is restricted to the flags byte.
    pub fn fix_cpsr(&mut self, instr: u32, rhs: u32) {
        self.cpsr = self.recompose_cpsr();
        if !is_user_mode(self.mode) {
            if instr & (1 << 16) != 0 {
                self.cpsr = (self.cpsr & !0x0000_00FF) | (rhs & 0x0000_00FF);
            }
            if instr & (1 << 17) != 0 {
                self.cpsr = (self.cpsr & !0x0000_FF00) | (rhs & 0x0000_FF00);
            }
            if instr & (1 << 18) != 0 {
                self.cpsr = (self.cpsr & !0x00FF_0000) | (rhs & 0x00FF_0000);
            }
        }
        if instr & (1 << 19) != 0 {
            self.cpsr = (self.cpsr & !0xFF00_0000) | (rhs & 0xFF00_0000);
        }
        self.cpsr_altered();
    }

    /// MSR to the current bank's SPSR with the same field mask.
    pub fn fix_spsr(&mut self, instr: u32, rhs: u32) {
        if !self.bank.has_spsr() {
            return;
        }
        let slot = &mut self.spsr[self.bank as usize];
        if instr & (1 << 16) != 0 {
            *slot = (*slot & !0x0000_00FF) | (rhs & 0x0000_00FF);
        }
        if instr & (1 << 17) != 0 {
            *slot = (*slot & !0x0000_FF00) | (rhs & 0x0000_FF00);
        }
        if instr & (1 << 18) != 0 {
            *slot = (*slot & !0x00FF_0000) | (rhs & 0x00FF_0000);
        }
        if instr & (1 << 19) != 0 {
            *slot = (*slot & !0xFF00_0000) | (rhs & 0xFF00_0000);
        }
    }

    /// SPSR of the bank serving `mode`; banks without one read the CPSR.
    pub fn get_spsr(&self, mode: u32) -> u32 {
        let bank = bank_of_mode(mode & MODE_MASK);
        if bank.has_spsr() {
            self.spsr[bank as usize]
        } else {
            self.recompose_cpsr()
        }
    }

    pub fn set_spsr(&mut self, mode: u32, value: u32) {
        let bank = bank_of_mode(mode & MODE_MASK);
        if bank.has_spsr() {
            self.spsr[bank as usize] = value;
        }
    }

    /// SPSR of the currently live bank.
    pub fn current_spsr(&self) -> u32 {
        if self.bank.has_spsr() {
            self.spsr[self.bank as usize]
        } else {
            self.recompose_cpsr()
        }
    }

    // ========== Register access by mode ==========

    /// Read `reg` as seen from `mode`, going through the bank matrix when
    /// `mode` is not live.
    pub fn get_reg(&self, mode: u32, reg: usize) -> u32 {
        let mode = mode & MODE_MASK;
        if mode == self.mode {
            return self.regs[reg];
        }
        let bank = bank_of_mode(mode);
        if bank == self.bank {
            return self.regs[reg];
        }
        match reg {
            13 | 14 => self.reg_bank[bank as usize][reg],
            // R8-R12 exist twice: the FIQ column and the shared column
            // everything else spills into when FIQ takes over.
            8..=12 if bank == Bank::Fiq => self.reg_bank[Bank::Fiq as usize][reg],
            8..=12 if self.bank == Bank::Fiq => self.reg_bank[Bank::User as usize][reg],
            _ => self.regs[reg],
        }
    }

    pub fn set_reg(&mut self, mode: u32, reg: usize, value: u32) {
        let mode = mode & MODE_MASK;
        let bank = bank_of_mode(mode);
        if mode == self.mode || bank == self.bank {
            self.regs[reg] = value;
            return;
        }
        match reg {
            13 | 14 => self.reg_bank[bank as usize][reg] = value,
            8..=12 if bank == Bank::Fiq => self.reg_bank[Bank::Fiq as usize][reg] = value,
            8..=12 if self.bank == Bank::Fiq => {
                self.reg_bank[Bank::User as usize][reg] = value
            }
            _ => self.regs[reg] = value,
        }
    }

    // ========== R15 ==========

    /// Mark the pipeline shadow for a refill.
    #[inline]
    pub fn flush_pipe(&mut self) {
        self.next_instr |= PRIMEPIPE;
    }

    /// Set the PC, flushing the pipeline.
    pub fn set_r15(&mut self, value: u32) {
        self.regs[15] = value;
        self.flush_pipe();
    }

    /// Write R15 from a data-processing result without the S bit:
    /// a plain branch.
    pub(crate) fn write_r15(&mut self, value: u32) {
        let mask = if self.tflag { !1u32 } else { !3u32 };
        self.regs[15] = value & mask;
        self.flush_pipe();
    }

    /// Write R15 with the S bit: restore CPSR from the SPSR first
    /// (exception return).
    pub(crate) fn write_sr15(&mut self, value: u32) {
        if self.bank.has_spsr() {
            self.cpsr = self.spsr[self.bank as usize];
            self.cpsr_altered();
        }
        let mask = if self.tflag { !1u32 } else { !3u32 };
        self.regs[15] = value & mask;
        self.flush_pipe();
    }

    /// Interworking write of R15: bit 0 selects Thumb.
    pub(crate) fn write_r15_branch(&mut self, value: u32) {
        if value & 1 != 0 {
            self.tflag = true;
            self.regs[15] = value & !1;
        } else {
            self.tflag = false;
            self.regs[15] = value & !3;
        }
        self.cpsr = self.recompose_cpsr();
        self.flush_pipe();
    }

    /// Pipeline shadow for diagnostics: (decoded word, decoded address,
    /// loaded word, loaded address).
    pub fn pipeline_shadow(&self) -> (u32, u32, u32, u32) {
        (self.decoded, self.decoded_addr, self.loaded, self.loaded_addr)
    }

    // ========== Exclusive monitor ==========

    /// Record a reservation for the granule containing `addr`.
    pub(crate) fn mark_exclusive(&mut self, addr: u32) {
        let tag = addr & !(EXCLUSIVE_GRANULE - 1);
        self.exclusive_tags[self.exclusive_cursor] = tag;
        self.exclusive_cursor = (self.exclusive_cursor + 1) % EXCLUSIVE_SLOTS;
        self.exclusive_state = true;
    }

    /// True while a reservation covering `addr` is still open.
    pub(crate) fn is_exclusive(&self, addr: u32) -> bool {
        if !self.exclusive_state {
            return false;
        }
        let tag = addr & !(EXCLUSIVE_GRANULE - 1);
        self.exclusive_tags.contains(&tag)
    }

    /// Drop every open reservation (CLREX, exception entry).
    pub(crate) fn clear_exclusive(&mut self) {
        self.exclusive_tags = [EXCLUSIVE_NONE; EXCLUSIVE_SLOTS];
        self.exclusive_state = false;
    }

    // ========== Thread context ==========

    /// Snapshot the state the outer scheduler moves between threads.
    pub fn save_context(&self, ctx: &mut ThreadContext) {
        ctx.cpu_registers.copy_from_slice(&self.regs[0..13]);
        ctx.sp = self.regs[13];
        ctx.lr = self.regs[14];
        ctx.pc = self.pc;
        ctx.cpsr = self.recompose_cpsr();
        ctx.fpu_registers = self.ext_regs;
        ctx.fpscr = self.fpscr;
        ctx.fpexc = self.fpexc;
        ctx.tls = self.mmu.thread_uro;
    }

    /// Restore a snapshot made by [`Self::save_context`] and resume at
    /// its PC.
    pub fn load_context(&mut self, ctx: &ThreadContext) {
        self.set_cpsr(ctx.cpsr);
        self.regs[0..13].copy_from_slice(&ctx.cpu_registers);
        self.regs[13] = ctx.sp;
        self.regs[14] = ctx.lr;
        self.pc = ctx.pc;
        self.regs[15] = ctx.pc;
        self.ext_regs = ctx.fpu_registers;
        self.fpscr = ctx.fpscr;
        self.fpexc = ctx.fpexc;
        self.mmu.thread_uro = ctx.tls;
        self.flush_pipe();
    }
}

impl Default for ArmCore {
    fn default() -> Self {
        Self::new()
    }
}
