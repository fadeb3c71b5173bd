//! Core test suite, organized into:
//! - instructions.rs: individual instructions and instruction families
//! - modes.rs: banked registers, PSR plumbing, mode switching
//! - exceptions.rs: vector entry, aborts, interrupts, the SWI sink
//! - thumb.rs: Thumb decoding and interworking

use super::*;
use crate::bus::FlatRam;

mod exceptions;
mod instructions;
mod modes;
mod thumb;

/// A core wired to a small flat RAM and a scriptable SWI sink.
pub(crate) struct TestRig {
    pub core: ArmCore,
    pub ram: FlatRam,
    pub sink: ScriptedSink,
}

/// Sink that answers a fixed verdict and records the immediates it saw.
pub(crate) struct ScriptedSink {
    pub handled: bool,
    pub calls: Vec<u32>,
}

impl SwiHandler for ScriptedSink {
    fn handle_swi(&mut self, imm24: u32) -> bool {
        self.calls.push(imm24);
        self.handled
    }
}

impl TestRig {
    /// 64 KiB of RAM at physical zero, core in reset state.
    pub fn new() -> Self {
        Self {
            core: ArmCore::new(),
            ram: FlatRam::new(0x10000),
            sink: ScriptedSink {
                handled: false,
                calls: Vec::new(),
            },
        }
    }

    /// Place an ARM instruction word at `addr`.
    pub fn put(&mut self, addr: u32, instr: u32) {
        use crate::bus::PhysBus;
        self.ram.write32(addr, instr);
    }

    /// Place a Thumb halfword at `addr`.
    pub fn put16(&mut self, addr: u32, instr: u16) {
        use crate::bus::PhysBus;
        self.ram.write16(addr, instr);
    }

    /// Read a word of RAM.
    pub fn word(&mut self, addr: u32) -> u32 {
        use crate::bus::PhysBus;
        self.ram.read32(addr)
    }

    /// Run one instruction slot.
    pub fn step(&mut self) {
        self.core.step(&mut self.ram, &mut self.sink);
    }

    /// Run `n` instruction slots.
    pub fn run(&mut self, n: usize) {
        for _ in 0..n {
            self.step();
        }
    }
}

/// Shorthand flags check: (N, Z, C, V).
pub(crate) fn flags(core: &ArmCore) -> (bool, bool, bool, bool) {
    (core.nflag, core.zflag, core.cflag, core.vflag)
}
