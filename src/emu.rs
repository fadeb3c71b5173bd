//! Emulator orchestrator.
//!
//! Owns one [`ArmCore`] together with its collaborators: the physical
//! memory bus, the system-call sink and the event scheduler. The
//! orchestrator runs the execute loop against an instruction budget and
//! exposes the register, signal and context interfaces the host drives.

use crate::bus::{FlatRam, PhysBus};
use crate::cpu::{ArmCore, DeclineAllSwi, RunState, SwiHandler, ThreadContext};
use crate::scheduler::Scheduler;

/// Boot-time stack pointer handed to the loaded image.
const BOOT_SP: u32 = 0x1000_0000;

/// Number of entries in the execution history ring buffer.
const HISTORY_SIZE: usize = 64;

/// Single entry in the execution history.
#[derive(Clone, Copy, Default)]
struct HistoryEntry {
    /// Address of the instruction.
    pc: u32,
    /// Fetched instruction word (halfword for Thumb).
    instr: u32,
    /// Whether the core was in Thumb state.
    thumb: bool,
}

/// Execution history ring buffer for crash diagnostics.
struct ExecutionHistory {
    entries: [HistoryEntry; HISTORY_SIZE],
    write_idx: usize,
    count: usize,
}

impl ExecutionHistory {
    fn new() -> Self {
        Self {
            entries: [HistoryEntry::default(); HISTORY_SIZE],
            write_idx: 0,
            count: 0,
        }
    }

    fn record(&mut self, pc: u32, instr: u32, thumb: bool) {
        self.entries[self.write_idx] = HistoryEntry { pc, instr, thumb };
        self.write_idx = (self.write_idx + 1) % HISTORY_SIZE;
        if self.count < HISTORY_SIZE {
            self.count += 1;
        }
    }

    /// Entries in execution order (oldest to newest).
    fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        let start = if self.count < HISTORY_SIZE {
            0
        } else {
            self.write_idx
        };
        (0..self.count).map(move |i| {
            let idx = (start + i) % HISTORY_SIZE;
            &self.entries[idx]
        })
    }

    fn clear(&mut self) {
        self.write_idx = 0;
        self.count = 0;
    }
}

/// Reason the execute loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The instruction budget ran out.
    BudgetExhausted,
    /// The run state left `Run` (stop request or single-step).
    Stopped,
}

/// One emulated machine: core, bus, sink and scheduler.
pub struct Emu {
    core: ArmCore,
    bus: Box<dyn PhysBus>,
    sink: Box<dyn SwiHandler>,
    scheduler: Scheduler,
    history: ExecutionHistory,
    last_stop: StopReason,
}

impl Emu {
    /// Build a machine around an externally supplied bus.
    pub fn new(bus: Box<dyn PhysBus>) -> Self {
        let mut emu = Self {
            core: ArmCore::new(),
            bus,
            sink: Box::new(DeclineAllSwi),
            scheduler: Scheduler::new(),
            history: ExecutionHistory::new(),
            last_stop: StopReason::BudgetExhausted,
        };
        emu.boot_defaults();
        emu
    }

    /// Build a machine with a flat RAM of `len` bytes at physical zero.
    pub fn with_ram(len: usize) -> Self {
        Self::new(Box::new(FlatRam::new(len)))
    }

    /// Post-reset register defaults for a loaded image: entry at zero,
    /// stack at the top of the boot region.
    fn boot_defaults(&mut self) {
        self.core.pc = 0;
        self.core.regs[15] = 0;
        self.core.regs[13] = BOOT_SP;
    }

    /// Install the system-call sink.
    pub fn set_swi_handler(&mut self, sink: Box<dyn SwiHandler>) {
        self.sink = sink;
    }

    /// Reset the machine to power-on state.
    pub fn reset(&mut self) {
        self.core.reset();
        self.scheduler.reset();
        self.history.clear();
        self.last_stop = StopReason::BudgetExhausted;
        self.boot_defaults();
    }

    // ========== Execution ==========

    /// Run up to `count` instructions. Returns the number of execute
    /// slots consumed (exception entries count as one).
    pub fn execute_instructions(&mut self, count: u32) -> u32 {
        self.core.emulate = RunState::Run;
        let mut executed = 0;

        while executed < count {
            if self.scheduler.pending() > 0 {
                self.scheduler
                    .invoke_pending(self.core.time(), &mut self.core);
            }

            self.core.step(&mut *self.bus, &mut *self.sink);
            executed += 1;

            let (instr, _, _, _) = self.core.pipeline_shadow();
            self.history.record(self.core.pc, instr, self.core.tflag);

            if self.core.emulate != RunState::Run {
                self.last_stop = StopReason::Stopped;
                return executed;
            }
        }

        self.last_stop = StopReason::BudgetExhausted;
        executed
    }

    /// Run exactly one instruction slot.
    pub fn step(&mut self) {
        self.core.emulate = RunState::Once;
        if self.scheduler.pending() > 0 {
            self.scheduler
                .invoke_pending(self.core.time(), &mut self.core);
        }
        self.core.step(&mut *self.bus, &mut *self.sink);
        let (instr, _, _, _) = self.core.pipeline_shadow();
        self.history.record(self.core.pc, instr, self.core.tflag);
        self.last_stop = StopReason::Stopped;
    }

    /// Ask the loop to stop at the next instruction boundary.
    pub fn request_stop(&mut self) {
        self.core.emulate = RunState::Stop;
    }

    pub fn last_stop_reason(&self) -> StopReason {
        self.last_stop
    }

    // ========== Register and signal access ==========

    pub fn reg(&self, index: usize) -> u32 {
        self.core.regs[index]
    }

    pub fn set_reg(&mut self, index: usize, value: u32) {
        self.core.regs[index] = value;
    }

    pub fn pc(&self) -> u32 {
        self.core.pc
    }

    /// Move execution to `pc`; takes effect at the next step.
    pub fn set_pc(&mut self, pc: u32) {
        self.core.pc = pc;
        self.core.regs[15] = pc;
        self.core.flush_pipe();
    }

    pub fn cpsr(&self) -> u32 {
        self.core.get_cpsr()
    }

    pub fn set_cpsr(&mut self, value: u32) {
        self.core.set_cpsr(value);
    }

    pub fn spsr(&self, mode: u32) -> u32 {
        self.core.get_spsr(mode)
    }

    pub fn set_spsr(&mut self, mode: u32, value: u32) {
        self.core.set_spsr(mode, value);
    }

    /// Assert or release the IRQ line (polled at instruction boundaries).
    pub fn set_irq(&mut self, asserted: bool) {
        self.core.nirq_sig = !asserted;
    }

    /// Assert or release the FIQ line.
    pub fn set_fiq(&mut self, asserted: bool) {
        self.core.nfiq_sig = !asserted;
    }

    /// Assert or release the reset line.
    pub fn set_reset(&mut self, asserted: bool) {
        self.core.nreset_sig = !asserted;
    }

    /// Monotonic count of retired instruction slots.
    pub fn tick_count(&self) -> u64 {
        self.core.num_instrs
    }

    /// Emulated clock ticks since reset.
    pub fn time(&self) -> u64 {
        self.core.time()
    }

    // ========== Context save/load ==========

    pub fn save_context(&self, ctx: &mut ThreadContext) {
        self.core.save_context(ctx);
    }

    pub fn load_context(&mut self, ctx: &ThreadContext) {
        self.core.load_context(ctx);
    }

    // ========== Scheduling ==========

    /// Run `callback` once `delay` cycles from now have elapsed.
    pub fn schedule(&mut self, delay: u64, callback: Box<dyn FnMut(&mut ArmCore)>) {
        self.scheduler.schedule(self.core.time(), delay, callback);
    }

    // ========== Plumbing ==========

    pub fn core(&self) -> &ArmCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ArmCore {
        &mut self.core
    }

    pub fn bus_mut(&mut self) -> &mut dyn PhysBus {
        &mut *self.bus
    }

    /// Copy bytes into physical memory, bypassing the MMU (image loading).
    pub fn write_physical(&mut self, paddr: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.bus.write8(paddr.wrapping_add(i as u32), b);
        }
    }

    // ========== Diagnostics ==========

    /// Format the execution history, oldest first.
    pub fn dump_history(&self) -> String {
        let mut output = String::new();
        output.push_str("Execution history (oldest to newest):\n");
        for entry in self.history.iter() {
            if entry.thumb {
                output.push_str(&format!("  {:08X}  {:04X}      (thumb)\n", entry.pc, entry.instr));
            } else {
                output.push_str(&format!("  {:08X}  {:08X}\n", entry.pc, entry.instr));
            }
        }
        output.push_str(&format!("\nCurrent PC: {:08X}\n", self.core.pc));
        output.push_str(&format!("Instructions: {}\n", self.core.num_instrs));
        output.push_str(&format!("Stop reason: {:?}\n", self.last_stop));
        output
    }

    /// Register dump for debugging.
    pub fn dump_registers(&self) -> String {
        let c = &self.core;
        format!(
            "R0={:08X} R1={:08X} R2={:08X} R3={:08X}\n\
             R4={:08X} R5={:08X} R6={:08X} R7={:08X}\n\
             R8={:08X} R9={:08X} R10={:08X} R11={:08X}\n\
             R12={:08X} SP={:08X} LR={:08X} PC={:08X}\n\
             CPSR={:08X} N={} Z={} C={} V={} Q={} T={} mode={:02X}",
            c.regs[0], c.regs[1], c.regs[2], c.regs[3],
            c.regs[4], c.regs[5], c.regs[6], c.regs[7],
            c.regs[8], c.regs[9], c.regs[10], c.regs[11],
            c.regs[12], c.regs[13], c.regs[14], c.regs[15],
            c.get_cpsr(),
            c.nflag as u32, c.zflag as u32, c.cflag as u32,
            c.vflag as u32, c.qflag as u32, c.tflag as u32,
            c.mode,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that answers a fixed verdict.
    struct RecordingSink {
        handled: bool,
    }

    impl SwiHandler for RecordingSink {
        fn handle_swi(&mut self, _imm24: u32) -> bool {
            self.handled
        }
    }

    #[test]
    fn test_new_emu_boot_defaults() {
        let emu = Emu::with_ram(0x1000);
        assert_eq!(emu.pc(), 0);
        assert_eq!(emu.reg(13), BOOT_SP);
        assert_eq!(emu.tick_count(), 0);
    }

    #[test]
    fn test_execute_budget() {
        let mut emu = Emu::with_ram(0x1000);
        // MOV R0, #1; MOV R1, #2; B .
        emu.write_physical(0, &0xE3A0_0001u32.to_le_bytes());
        emu.write_physical(4, &0xE3A0_1002u32.to_le_bytes());
        emu.write_physical(8, &0xEAFF_FFFEu32.to_le_bytes());

        let executed = emu.execute_instructions(10);
        assert_eq!(executed, 10);
        assert_eq!(emu.last_stop_reason(), StopReason::BudgetExhausted);
        assert_eq!(emu.reg(0), 1);
        assert_eq!(emu.reg(1), 2);
    }

    #[test]
    fn test_tick_count_advances(){
        let mut emu = Emu::with_ram(0x1000);
        emu.write_physical(0, &0xE1A0_0000u32.to_le_bytes()); // NOP (MOV R0,R0)
        emu.write_physical(4, &0xE1A0_0000u32.to_le_bytes());
        emu.execute_instructions(2);
        assert_eq!(emu.tick_count(), 2);
    }

    #[test]
    fn test_swi_sink_receives_immediate() {
        let mut emu = Emu::with_ram(0x1000);
        emu.set_swi_handler(Box::new(RecordingSink { handled: true }));
        emu.write_physical(0, &0xEF00_0032u32.to_le_bytes()); // SWI #0x32
        emu.write_physical(4, &0xE3A0_0005u32.to_le_bytes()); // MOV R0, #5
        emu.execute_instructions(2);
        assert_eq!(emu.reg(0), 5);
    }

    #[test]
    fn test_scheduled_callback_fires() {
        let mut emu = Emu::with_ram(0x1000);
        for i in 0..8 {
            emu.write_physical(i * 4, &0xE1A0_0000u32.to_le_bytes());
        }
        emu.schedule(3, Box::new(|core| core.regs[7] = 0x77));
        emu.execute_instructions(8);
        assert_eq!(emu.reg(7), 0x77);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut emu = Emu::with_ram(0x1000);
        emu.write_physical(0, &0xE3A0_0001u32.to_le_bytes());
        emu.execute_instructions(1);
        emu.reset();
        assert_eq!(emu.pc(), 0);
        assert_eq!(emu.tick_count(), 0);
        assert_eq!(emu.reg(13), BOOT_SP);
    }

    #[test]
    fn test_context_roundtrip() {
        let mut emu = Emu::with_ram(0x1000);
        emu.set_reg(0, 0xAAAA);
        emu.set_reg(13, 0x2000);
        let mut ctx = ThreadContext::default();
        emu.save_context(&mut ctx);
        assert_eq!(ctx.cpu_registers[0], 0xAAAA);
        assert_eq!(ctx.sp, 0x2000);

        emu.set_reg(0, 0);
        emu.load_context(&ctx);
        assert_eq!(emu.reg(0), 0xAAAA);
    }

    #[test]
    fn test_history_records_instructions() {
        let mut emu = Emu::with_ram(0x1000);
        emu.write_physical(0, &0xE3A0_0001u32.to_le_bytes());
        emu.write_physical(4, &0xE3A0_1002u32.to_le_bytes());
        emu.execute_instructions(2);
        let dump = emu.dump_history();
        assert!(dump.contains("00000000"));
        assert!(dump.contains("E3A00001"));
    }
}
