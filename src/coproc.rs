//! Coprocessor dispatch.
//!
//! Sixteen slots, one per coprocessor number. CP15 is special-cased onto
//! the MMU register bank; everything else (VFP at 10/11, chip-specific
//! extensions) plugs in as a boxed [`Coprocessor`]. Detached slots hold a
//! reject handler rather than an absent one, so dispatch never branches on
//! presence: every operation on a detached slot answers [`CpResult::Cant`]
//! and the core raises an undefined-instruction trap.

/// Outcome of a coprocessor operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpResult {
    /// Operation complete.
    Done,
    /// Consumer needs more cycles; re-invoke with [`CpPhase::Busy`].
    Busy,
    /// Operation rejected; becomes an undefined-instruction trap.
    Cant,
    /// LDC/STC only: transfer another word from the next address.
    Inc,
}

/// Handshake phase for multi-cycle coprocessor operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpPhase {
    /// First presentation of the instruction.
    First,
    /// Address generation finished, transfer may begin.
    Transfer,
    /// Re-presentation after a `Busy` answer.
    Busy,
    /// Data word is being exchanged (LDC/STC streaming).
    Data,
    /// An interrupt preempted the busy-wait.
    Interrupt,
}

/// A pluggable coprocessor. Implementations are leaves: they see the raw
/// instruction word and transfer values, never the core state. Every
/// method defaults to rejecting the operation.
pub trait Coprocessor {
    /// Reset to power-on state.
    fn reset(&mut self) {}

    fn cdp(&mut self, _phase: CpPhase, _instr: u32) -> CpResult {
        CpResult::Cant
    }

    fn ldc(&mut self, _phase: CpPhase, _instr: u32, _value: u32) -> CpResult {
        CpResult::Cant
    }

    fn stc(&mut self, _phase: CpPhase, _instr: u32, _value: &mut u32) -> CpResult {
        CpResult::Cant
    }

    fn mrc(&mut self, _phase: CpPhase, _instr: u32, _value: &mut u32) -> CpResult {
        CpResult::Cant
    }

    fn mcr(&mut self, _phase: CpPhase, _instr: u32, _value: u32) -> CpResult {
        CpResult::Cant
    }

    fn mrrc(&mut self, _phase: CpPhase, _instr: u32, _v1: &mut u32, _v2: &mut u32) -> CpResult {
        CpResult::Cant
    }

    fn mcrr(&mut self, _phase: CpPhase, _instr: u32, _v1: u32, _v2: u32) -> CpResult {
        CpResult::Cant
    }

    /// Out-of-band register read, for debuggers and snapshot code.
    fn read_reg(&mut self, _reg: usize, _value: &mut u32) -> CpResult {
        CpResult::Cant
    }

    /// Out-of-band register write.
    fn write_reg(&mut self, _reg: usize, _value: u32) -> CpResult {
        CpResult::Cant
    }
}

/// What occupies a coprocessor slot.
pub enum CoprocSlot {
    /// Nothing attached: every operation answers `Cant`.
    Detached,
    /// The system-control coprocessor; the core routes these to the MMU.
    SystemControl,
    /// An attached leaf coprocessor.
    External(Box<dyn Coprocessor>),
}

/// The sixteen coprocessor slots of one core.
pub struct CoprocBank {
    slots: [CoprocSlot; 16],
}

impl CoprocBank {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| CoprocSlot::Detached),
        }
    }

    /// Attach a leaf coprocessor at `number`, replacing whatever was there.
    pub fn attach(&mut self, number: usize, cp: Box<dyn Coprocessor>) {
        self.slots[number] = CoprocSlot::External(cp);
    }

    /// Mount the system-control routing (CP15) at `number`.
    pub fn attach_system_control(&mut self, number: usize) {
        self.slots[number] = CoprocSlot::SystemControl;
    }

    /// Detach `number`; subsequent operations trap.
    pub fn detach(&mut self, number: usize) {
        log::debug!("coproc: detached p{}", number);
        self.slots[number] = CoprocSlot::Detached;
    }

    pub fn slot(&self, number: usize) -> &CoprocSlot {
        &self.slots[number]
    }

    pub fn slot_mut(&mut self, number: usize) -> &mut CoprocSlot {
        &mut self.slots[number]
    }

    /// Reset every attached coprocessor.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            if let CoprocSlot::External(cp) = slot {
                cp.reset();
            }
        }
    }
}

impl Default for CoprocBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scratch {
        reg: u32,
        busy_left: u32,
    }

    impl Coprocessor for Scratch {
        fn reset(&mut self) {
            self.reg = 0;
        }

        fn mcr(&mut self, _phase: CpPhase, _instr: u32, value: u32) -> CpResult {
            self.reg = value;
            CpResult::Done
        }

        fn mrc(&mut self, phase: CpPhase, _instr: u32, value: &mut u32) -> CpResult {
            if self.busy_left > 0 && phase != CpPhase::Busy {
                return CpResult::Busy;
            }
            if self.busy_left > 0 {
                self.busy_left -= 1;
                return CpResult::Busy;
            }
            *value = self.reg;
            CpResult::Done
        }
    }

    #[test]
    fn test_detached_slot_rejects() {
        let mut bank = CoprocBank::new();
        match bank.slot_mut(7) {
            CoprocSlot::Detached => {}
            _ => panic!("slot 7 should start detached"),
        }
        // A detached slot has no handler to call; the core maps that to
        // `Cant`. Attach and detach restores the reject state.
        bank.attach(7, Box::new(Scratch { reg: 0, busy_left: 0 }));
        assert!(matches!(bank.slot(7), CoprocSlot::External(_)));
        bank.detach(7);
        assert!(matches!(bank.slot(7), CoprocSlot::Detached));
    }

    #[test]
    fn test_external_roundtrip() {
        let mut bank = CoprocBank::new();
        bank.attach(10, Box::new(Scratch { reg: 0, busy_left: 0 }));
        if let CoprocSlot::External(cp) = bank.slot_mut(10) {
            assert_eq!(cp.mcr(CpPhase::First, 0, 0xAB), CpResult::Done);
            let mut out = 0;
            assert_eq!(cp.mrc(CpPhase::First, 0, &mut out), CpResult::Done);
            assert_eq!(out, 0xAB);
        } else {
            panic!("expected external coprocessor");
        }
    }

    #[test]
    fn test_busy_then_done() {
        let mut bank = CoprocBank::new();
        bank.attach(11, Box::new(Scratch { reg: 5, busy_left: 2 }));
        if let CoprocSlot::External(cp) = bank.slot_mut(11) {
            let mut out = 0;
            let mut result = cp.mrc(CpPhase::First, 0, &mut out);
            let mut spins = 0;
            while result == CpResult::Busy {
                result = cp.mrc(CpPhase::Busy, 0, &mut out);
                spins += 1;
                assert!(spins < 10);
            }
            assert_eq!(result, CpResult::Done);
            assert_eq!(out, 5);
        } else {
            panic!("expected external coprocessor");
        }
    }
}
