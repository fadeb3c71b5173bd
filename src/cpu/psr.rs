//! Program status register layout, processor modes and register banks.
//!
//! Bit positions in the CPSR/SPSR for the ARM11 core. The decomposed flag
//! cache in [`super::ArmCore`] is the authoritative copy between
//! synchronization points; these constants define the architectural layout
//! used when the PSR is reassembled.

/// Negative flag (bit 31)
pub const N_BIT: u32 = 1 << 31;
/// Zero flag (bit 30)
pub const Z_BIT: u32 = 1 << 30;
/// Carry flag (bit 29)
pub const C_BIT: u32 = 1 << 29;
/// Overflow flag (bit 28)
pub const V_BIT: u32 = 1 << 28;
/// Sticky saturation flag (bit 27)
pub const Q_BIT: u32 = 1 << 27;
/// Jazelle state (bit 24, not modeled)
pub const J_BIT: u32 = 1 << 24;
/// GE[3:0] SIMD flags (bits 19..16)
pub const GE_MASK: u32 = 0x000F_0000;
/// Endianness state (bit 9)
pub const E_BIT: u32 = 1 << 9;
/// Imprecise abort mask (bit 8)
pub const A_BIT: u32 = 1 << 8;
/// IRQ disable (bit 7)
pub const I_BIT: u32 = 1 << 7;
/// FIQ disable (bit 6)
pub const F_BIT: u32 = 1 << 6;
/// Thumb state (bit 5)
pub const T_BIT: u32 = 1 << 5;

/// Mode field (bits 4..0)
pub const MODE_MASK: u32 = 0x1F;
/// I and F together, as set on exception entry
pub const INT_MASK: u32 = I_BIT | F_BIT;

// Processor mode numbers. The 26-bit modes (0..3) survive only in the
// mode-to-bank table; the core always runs with prog32 high.
pub const USER26_MODE: u32 = 0x00;
pub const FIQ26_MODE: u32 = 0x01;
pub const IRQ26_MODE: u32 = 0x02;
pub const SVC26_MODE: u32 = 0x03;
pub const USER32_MODE: u32 = 0x10;
pub const FIQ32_MODE: u32 = 0x11;
pub const IRQ32_MODE: u32 = 0x12;
pub const SVC32_MODE: u32 = 0x13;
pub const ABORT32_MODE: u32 = 0x17;
pub const UNDEF32_MODE: u32 = 0x1B;
pub const SYSTEM32_MODE: u32 = 0x1F;

/// Hardware vector offsets. Relocated to 0xFFFF0000 when the high-vectors
/// control bit is set, and further displaced by a per-chip remap base.
pub const RESET_VECTOR: u32 = 0x00;
pub const UNDEF_VECTOR: u32 = 0x04;
pub const SWI_VECTOR: u32 = 0x08;
pub const PREFETCH_ABORT_VECTOR: u32 = 0x0C;
pub const DATA_ABORT_VECTOR: u32 = 0x10;
pub const IRQ_VECTOR: u32 = 0x18;
pub const FIQ_VECTOR: u32 = 0x1C;

/// Register banks. User also serves System; Dummy soaks up writes from
/// unrecognized mode values without making them observable through an SPSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Bank {
    User = 0,
    Fiq = 1,
    Irq = 2,
    Svc = 3,
    Abort = 4,
    Undef = 5,
    Dummy = 6,
}

/// Number of register banks (rows of the bank matrix).
pub const NUM_BANKS: usize = 7;

impl Bank {
    /// Banks with an SPSR of their own. User/System and Dummy read the
    /// CPSR back instead.
    pub fn has_spsr(self) -> bool {
        !matches!(self, Bank::User | Bank::Dummy)
    }
}

/// Map a 5-bit mode number to its register bank.
pub fn bank_of_mode(mode: u32) -> Bank {
    const TABLE: [Bank; 32] = [
        Bank::User, Bank::Fiq, Bank::Irq, Bank::Svc,         // 26-bit modes
        Bank::Dummy, Bank::Dummy, Bank::Dummy, Bank::Dummy,
        Bank::Dummy, Bank::Dummy, Bank::Dummy, Bank::Dummy,
        Bank::Dummy, Bank::Dummy, Bank::Dummy, Bank::Dummy,
        Bank::User, Bank::Fiq, Bank::Irq, Bank::Svc,         // 32-bit modes
        Bank::Dummy, Bank::Dummy, Bank::Dummy, Bank::Abort,
        Bank::Dummy, Bank::Dummy, Bank::Dummy, Bank::Undef,
        Bank::Dummy, Bank::Dummy, Bank::Dummy, Bank::User,   // System shares User
    ];
    TABLE[(mode & MODE_MASK) as usize]
}

/// True when `mode` is one of the two user modes (no privilege).
pub fn is_user_mode(mode: u32) -> bool {
    mode == USER26_MODE || mode == USER32_MODE
}
