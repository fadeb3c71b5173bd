//! Memory management unit.
//!
//! Virtual-to-physical translation for both sides of the core: FCSE
//! process-id remapping, I/D TLB probe, two-level page-table walk, domain
//! and access-permission checks, fault generation, and the coprocessor-15
//! register bank that configures all of it. The MMU owns the functional
//! cache and write-buffer containers and routes every access through them
//! when the control register says so.
//!
//! Faults are values, not panics: every data-side accessor returns
//! `Result<_, Fault>` and the fault status/address registers are updated
//! before the error is handed back. The core converts the returned kind
//! into a prefetch or data abort.

mod cache;
mod tlb;
mod wb;

pub use cache::{Cache, WriteMode};
pub use tlb::{Tlb, TlbEntry, TlbMapping};
pub use wb::WriteBuffer;

use crate::bus::PhysBus;
use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// CP15 c1 control register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u32 {
        /// MMU enable
        const MMU = 1 << 0;
        /// Alignment fault checking
        const ALIGN_FAULT = 1 << 1;
        /// Data cache enable
        const DATA_CACHE = 1 << 2;
        /// Write buffer enable
        const WRITE_BUFFER = 1 << 3;
        /// Big-endian operation
        const BIG_ENDIAN = 1 << 7;
        /// System protection (AP=00 becomes privileged read-only)
        const SYSTEM = 1 << 8;
        /// ROM protection (AP=00 becomes read-only for everyone)
        const ROM = 1 << 9;
        /// Branch prediction enable (ignored by the model)
        const BRANCH_PREDICT = 1 << 11;
        /// Instruction cache enable
        const ICACHE = 1 << 12;
        /// High exception vectors at 0xFFFF0000
        const HIGH_VECTORS = 1 << 13;
        /// Round-robin cache replacement (ignored; the model is already RR)
        const ROUND_ROBIN = 1 << 14;
        /// ARMv5 load-to-PC interworking disable
        const L4 = 1 << 15;
        /// ARMv6 extended page tables (subpage AP bits disabled)
        const XP = 1 << 23;
        /// Exception endianness
        const EE = 1 << 25;

        const _ = !0;
    }
}

/// FS[3:0] fault classification, plus the domain captured alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("alignment fault")]
    Alignment,
    #[error("section translation fault")]
    SectionTranslation,
    #[error("page translation fault")]
    PageTranslation,
    #[error("section domain fault")]
    SectionDomain,
    #[error("page domain fault")]
    PageDomain,
    #[error("section permission fault")]
    SectionPermission,
    #[error("sub-page permission fault")]
    SubPagePermission,
}

impl Fault {
    /// FS[3:0] encoding in the fault status register.
    pub fn status(self) -> u32 {
        match self {
            Fault::Alignment => 0x1,
            Fault::SectionTranslation => 0x5,
            Fault::PageTranslation => 0x7,
            Fault::SectionDomain => 0x9,
            Fault::PageDomain => 0xB,
            Fault::SectionPermission => 0xD,
            Fault::SubPagePermission => 0xF,
        }
    }
}

/// Which port of the core is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Instruction,
    Data,
}

/// Chip families with distinct CP15 acceptance tables. The dispatch
/// skeleton is shared; the family only widens or narrows the legal
/// `(CRn, CRm, opcode1, opcode2)` tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipFamily {
    Arm720T,
    Arm920T,
    Arm926EJS,
    Arm1176JZFS,
}

impl ChipFamily {
    /// True for the families with the v6 extended c2/c13 register sets.
    fn has_v6_registers(self) -> bool {
        matches!(self, ChipFamily::Arm1176JZFS)
    }
}

/// FCSE: only a zero high region is remapped by the process id.
const PID_VA_MAP_MASK: u32 = 0xFE00_0000;

// Container geometry. The model is functional, so the sizes only bound
// how much state a guest can park in the containers.
const TLB_ENTRIES: usize = 64;
const CACHE_LINE_BYTES: usize = 32;
const ICACHE_WAYS: usize = 4;
const ICACHE_SETS: usize = 32;
const DCACHE_WAYS: usize = 4;
const DCACHE_SETS: usize = 32;
const MINI_DCACHE_WAYS: usize = 2;
const MINI_DCACHE_SETS: usize = 8;
const WB_ENTRIES: usize = 8;
const WB_ENTRY_BYTES: usize = 16;

/// MMU state: the CP15 register bank plus the translation containers.
pub struct Mmu {
    pub control: Control,
    pub translation_table_base: u32,
    pub translation_table_base1: u32,
    pub translation_table_ctrl: u32,
    pub auxiliary_control: u32,
    pub coprocessor_access_control: u32,
    pub domain_access_control: u32,
    /// Data fault status (c5, opcode2 0).
    pub fault_status: u32,
    /// Instruction fault status (c5, opcode2 1).
    pub fault_statusi: u32,
    /// Data fault address (c6).
    pub fault_address: u32,
    pub last_domain: u32,
    /// FCSE process id (c13, opcode2 0).
    pub process_id: u32,
    pub context_id: u32,
    /// User read-write thread register (c13, opcode2 2).
    pub thread_urw: u32,
    /// User read-only thread register (c13, opcode2 3).
    pub thread_uro: u32,
    pub cache_locked_down: u32,
    pub tlb_locked_down: u32,
    pub cache_type: u32,

    chip: ChipFamily,
    i_tlb: Tlb,
    d_tlb: Tlb,
    i_cache: Cache,
    d_cache: Cache,
    mini_d_cache: Cache,
    wb: WriteBuffer,
}

impl Mmu {
    pub fn new(chip: ChipFamily) -> Self {
        log::debug!("mmu: configuring {:?} register file", chip);
        Self {
            control: Control::from_bits_retain(0x70),
            translation_table_base: 0xDEAD_C0DE,
            translation_table_base1: 0xDEAD_C0DE,
            translation_table_ctrl: 0,
            auxiliary_control: 0,
            coprocessor_access_control: 0,
            domain_access_control: 0xDEAD_C0DE,
            fault_status: 0,
            fault_statusi: 0,
            fault_address: 0,
            last_domain: 0,
            process_id: 0,
            context_id: 0,
            thread_urw: 0,
            thread_uro: 0,
            cache_locked_down: 0,
            tlb_locked_down: 0,
            cache_type: 0x0F0D_2112,
            chip,
            i_tlb: Tlb::new(TLB_ENTRIES),
            d_tlb: Tlb::new(TLB_ENTRIES),
            i_cache: Cache::new(
                CACHE_LINE_BYTES,
                ICACHE_WAYS,
                ICACHE_SETS,
                WriteMode::WriteThrough,
            ),
            d_cache: Cache::new(
                CACHE_LINE_BYTES,
                DCACHE_WAYS,
                DCACHE_SETS,
                WriteMode::WriteBack,
            ),
            mini_d_cache: Cache::new(
                CACHE_LINE_BYTES,
                MINI_DCACHE_WAYS,
                MINI_DCACHE_SETS,
                WriteMode::WriteBack,
            ),
            wb: WriteBuffer::new(WB_ENTRIES, WB_ENTRY_BYTES),
        }
    }

    /// Power-on / reset state. Containers are emptied without write-back.
    pub fn reset(&mut self) {
        *self = Mmu::new(self.chip);
    }

    pub fn chip(&self) -> ChipFamily {
        self.chip
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.control.contains(Control::MMU)
    }

    #[inline]
    pub fn alignment_faults(&self) -> bool {
        self.control.contains(Control::ALIGN_FAULT)
    }

    #[inline]
    pub fn high_vectors(&self) -> bool {
        self.control.contains(Control::HIGH_VECTORS)
    }

    /// FCSE remap: a VA in the bottom 32 MiB picks up the process id.
    #[inline]
    fn fcse_map(&self, va: u32) -> u32 {
        if va & PID_VA_MAP_MASK != 0 {
            va
        } else {
            va | (self.process_id & PID_VA_MAP_MASK)
        }
    }

    // ========== Translation ==========

    /// Resolve `va` through the TLB for `side`, walking the page tables on
    /// a miss. On success the entry has been (re)cached in the TLB.
    pub fn translate(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        side: Side,
    ) -> Result<TlbEntry, Fault> {
        let va = self.fcse_map(va);
        let tlb = match side {
            Side::Instruction => &mut self.i_tlb,
            Side::Data => &mut self.d_tlb,
        };
        if let Some(entry) = tlb.search(va) {
            self.last_domain = entry.domain;
            return Ok(entry);
        }

        let entry = self.walk(bus, va)?;
        self.last_domain = entry.domain;
        match side {
            Side::Instruction => self.i_tlb.insert(entry),
            Side::Data => self.d_tlb.insert(entry),
        }
        Ok(entry)
    }

    /// Two-level table walk. Descriptor fetches are physical reads.
    fn walk(&mut self, bus: &mut dyn PhysBus, va: u32) -> Result<TlbEntry, Fault> {
        let l1_addr = (self.translation_table_base & 0xFFFF_C000) | ((va >> 20) << 2);
        let l1 = bus.read32(l1_addr);
        let domain = (l1 >> 5) & 0xF;

        let l2_addr = match l1 & 3 {
            0 => return Err(Fault::SectionTranslation),
            2 => {
                // 1 MiB section: AP at [11:10], C/B at [3:2], all inline.
                let perms = l1 & ((3 << 10) | 0xC);
                return Ok(TlbEntry::new(
                    va,
                    l1 & 0xFFF0_0000,
                    perms,
                    domain,
                    TlbMapping::Section,
                ));
            }
            1 => (l1 & 0xFFFF_FC00) | (((va >> 12) & 0xFF) << 2),
            _ => (l1 & 0xFFFF_F000) | (((va >> 10) & 0x3FF) << 2),
        };

        let l2 = bus.read32(l2_addr);
        match l2 & 3 {
            0 => Err(Fault::PageTranslation),
            1 => Ok(TlbEntry::new(
                va,
                l2 & 0xFFFF_0000,
                l2 & 0xFFC,
                domain,
                TlbMapping::LargePage,
            )),
            2 => Ok(TlbEntry::new(
                va,
                l2 & 0xFFFF_F000,
                l2 & 0xFFC,
                domain,
                TlbMapping::SmallPage,
            )),
            _ => Ok(TlbEntry::new(
                va,
                l2 & 0xFFFF_FC00,
                l2 & 0x3C,
                domain,
                TlbMapping::TinyPage,
            )),
        }
    }

    /// Domain and access-permission check for a resolved entry.
    fn check_access(
        &self,
        va: u32,
        entry: &TlbEntry,
        is_write: bool,
        privileged: bool,
    ) -> Result<(), Fault> {
        let is_section = entry.mapping == TlbMapping::Section;
        let domain_kind = (self.domain_access_control >> (2 * entry.domain)) & 3;
        match domain_kind {
            3 => return Ok(()), // manager: no permission checks
            1 => {}             // client: consult AP bits
            _ => {
                return Err(if is_section {
                    Fault::SectionDomain
                } else {
                    Fault::PageDomain
                });
            }
        }

        let permitted = match entry.access_permission(va) {
            0 => {
                let system = self.control.contains(Control::SYSTEM);
                let rom = self.control.contains(Control::ROM);
                match (system, rom) {
                    (false, false) => false,
                    (true, false) => privileged && !is_write,
                    (false, true) => !is_write,
                    (true, true) => false, // reserved encoding
                }
            }
            1 => privileged,
            2 => privileged || !is_write,
            _ => true,
        };

        if permitted {
            Ok(())
        } else if is_section {
            Err(Fault::SectionPermission)
        } else {
            Err(Fault::SubPagePermission)
        }
    }

    /// Record a data-side fault in c5/c6 before returning it.
    fn data_fault(&mut self, fault: Fault, va: u32) -> Fault {
        self.fault_status = fault.status() | (self.last_domain << 4);
        self.fault_address = va;
        fault
    }

    /// Record an instruction-side fault in the prefetch fault status.
    fn prefetch_fault(&mut self, fault: Fault, _va: u32) -> Fault {
        self.fault_statusi = fault.status() | (self.last_domain << 4);
        fault
    }

    /// Translate and permission-check a data access, returning the
    /// physical address and resolved entry.
    fn data_access(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        is_write: bool,
        privileged: bool,
    ) -> Result<(u32, TlbEntry), Fault> {
        self.last_domain = 0;
        let entry = self
            .translate(bus, va, Side::Data)
            .map_err(|f| self.data_fault(f, va))?;
        self.check_access(self.fcse_map(va), &entry, is_write, privileged)
            .map_err(|f| self.data_fault(f, va))?;
        Ok((entry.va_to_pa(self.fcse_map(va)), entry))
    }

    #[inline]
    fn dcache_on(&self) -> bool {
        self.control.contains(Control::DATA_CACHE)
    }

    #[inline]
    fn icache_on(&self) -> bool {
        self.control.contains(Control::ICACHE)
    }

    // ========== Instruction side ==========

    /// Fetch the instruction word containing `va`. Thumb fetches return
    /// the halfword in the low bits.
    pub fn load_instr(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        halfword: bool,
        privileged: bool,
    ) -> Result<u32, Fault> {
        let aligned = va & !3;
        if !self.enabled() {
            let word = bus.read32(aligned);
            return Ok(extract_instr(word, va, halfword));
        }

        self.last_domain = 0;
        let entry = self
            .translate(bus, va, Side::Instruction)
            .map_err(|f| self.prefetch_fault(f, va))?;
        // Execute permission follows the read rules.
        self.check_access(self.fcse_map(va), &entry, false, privileged)
            .map_err(|f| self.prefetch_fault(f, va))?;

        let pa = entry.va_to_pa(self.fcse_map(aligned));
        let word = if self.icache_on() && entry.cacheable() {
            match self.i_cache.search(aligned) {
                Some(slot) => {
                    let idx = self.i_cache.word_index(aligned);
                    self.i_cache.line(slot).word(idx)
                }
                None => {
                    let slot = self.i_cache.alloc(bus, aligned, pa);
                    let idx = self.i_cache.word_index(aligned);
                    self.i_cache.line(slot).word(idx)
                }
            }
        } else {
            bus.read32(pa)
        };
        Ok(extract_instr(word, va, halfword))
    }

    // ========== Data side ==========

    /// Read the aligned word containing `va`. Rotation for unaligned
    /// addresses is the caller's business.
    pub fn read_word(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        privileged: bool,
    ) -> Result<u32, Fault> {
        if self.alignment_faults() && va & 3 != 0 {
            return Err(self.data_fault(Fault::Alignment, va));
        }
        let va = va & !3;
        if !self.enabled() {
            self.wb.drain_all(bus);
            return Ok(bus.read32(va));
        }
        let (pa, entry) = self.data_access(bus, va, false, privileged)?;
        if self.dcache_on() && entry.cacheable() {
            Ok(self.cached_read(bus, va, pa))
        } else {
            self.wb.drain_all(bus);
            Ok(bus.read32(pa))
        }
    }

    pub fn read_halfword(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        privileged: bool,
    ) -> Result<u32, Fault> {
        if self.alignment_faults() && va & 1 != 0 {
            return Err(self.data_fault(Fault::Alignment, va));
        }
        let va = va & !1;
        if !self.enabled() {
            self.wb.drain_all(bus);
            return Ok(bus.read16(va) as u32);
        }
        let (pa, entry) = self.data_access(bus, va, false, privileged)?;
        if self.dcache_on() && entry.cacheable() {
            let word = self.cached_read(bus, va & !3, pa & !3);
            Ok((word >> ((va & 2) * 8)) & 0xFFFF)
        } else {
            self.wb.drain_all(bus);
            Ok(bus.read16(pa) as u32)
        }
    }

    pub fn read_byte(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        privileged: bool,
    ) -> Result<u32, Fault> {
        if !self.enabled() {
            self.wb.drain_all(bus);
            return Ok(bus.read8(va) as u32);
        }
        let (pa, entry) = self.data_access(bus, va, false, privileged)?;
        if self.dcache_on() && entry.cacheable() {
            let word = self.cached_read(bus, va & !3, pa & !3);
            Ok((word >> ((va & 3) * 8)) & 0xFF)
        } else {
            self.wb.drain_all(bus);
            Ok(bus.read8(pa) as u32)
        }
    }

    pub fn write_word(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        data: u32,
        privileged: bool,
    ) -> Result<(), Fault> {
        if self.alignment_faults() && va & 3 != 0 {
            return Err(self.data_fault(Fault::Alignment, va));
        }
        let va = va & !3;
        if !self.enabled() {
            bus.write32(va, data);
            return Ok(());
        }
        let (pa, entry) = self.data_access(bus, va, true, privileged)?;
        self.cached_write(bus, va, pa, &entry, data.to_le_bytes().as_slice());
        Ok(())
    }

    pub fn write_halfword(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        data: u32,
        privileged: bool,
    ) -> Result<(), Fault> {
        if self.alignment_faults() && va & 1 != 0 {
            return Err(self.data_fault(Fault::Alignment, va));
        }
        let va = va & !1;
        if !self.enabled() {
            bus.write16(va, data as u16);
            return Ok(());
        }
        let (pa, entry) = self.data_access(bus, va, true, privileged)?;
        self.cached_write(bus, va, pa, &entry, (data as u16).to_le_bytes().as_slice());
        Ok(())
    }

    pub fn write_byte(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        data: u32,
        privileged: bool,
    ) -> Result<(), Fault> {
        if !self.enabled() {
            bus.write8(va, data as u8);
            return Ok(());
        }
        let (pa, entry) = self.data_access(bus, va, true, privileged)?;
        self.cached_write(bus, va, pa, &entry, &[data as u8]);
        Ok(())
    }

    /// Word read through the data cache, filling on miss.
    fn cached_read(&mut self, bus: &mut dyn PhysBus, va: u32, pa: u32) -> u32 {
        // Pending buffered writes must be observable before a fill.
        self.wb.drain_all(bus);
        match self.d_cache.search(va) {
            Some(slot) => {
                let idx = self.d_cache.word_index(va);
                self.d_cache.line(slot).word(idx)
            }
            None => {
                let slot = self.d_cache.alloc(bus, va, pa);
                let idx = self.d_cache.word_index(va);
                self.d_cache.line(slot).word(idx)
            }
        }
    }

    /// Store of `bytes` at `va`/`pa` honoring cacheability, the write
    /// policy and the bufferable bit.
    fn cached_write(
        &mut self,
        bus: &mut dyn PhysBus,
        va: u32,
        pa: u32,
        entry: &TlbEntry,
        bytes: &[u8],
    ) {
        let cacheable = self.dcache_on() && entry.cacheable();
        if cacheable {
            match self.d_cache.write_mode() {
                WriteMode::WriteBack => {
                    let slot = match self.d_cache.search(va) {
                        Some(slot) => slot,
                        // Write-allocate on miss.
                        None => {
                            self.wb.drain_all(bus);
                            self.d_cache.alloc(bus, va, pa)
                        }
                    };
                    let idx = self.d_cache.word_index(va & !3);
                    let mut word = self.d_cache.line(slot).word(idx);
                    let shift = (va & 3) * 8;
                    for (i, &b) in bytes.iter().enumerate() {
                        let sh = shift + (i as u32) * 8;
                        word = (word & !(0xFF << sh)) | ((b as u32) << sh);
                    }
                    self.d_cache.line_mut(slot).set_word(idx, word);
                    return;
                }
                WriteMode::WriteThrough => {
                    if let Some(slot) = self.d_cache.search(va) {
                        let idx = self.d_cache.word_index(va & !3);
                        let mut word = self.d_cache.line(slot).word(idx);
                        let shift = (va & 3) * 8;
                        for (i, &b) in bytes.iter().enumerate() {
                            let sh = shift + (i as u32) * 8;
                            word = (word & !(0xFF << sh)) | ((b as u32) << sh);
                        }
                        self.d_cache.line_mut(slot).set_word(idx, word);
                    }
                    // falls through to memory below
                }
            }
        }

        if self.control.contains(Control::WRITE_BUFFER) && entry.bufferable() {
            self.wb.write_bytes(bus, pa, bytes);
        } else {
            self.wb.drain_all(bus);
            for (i, &b) in bytes.iter().enumerate() {
                bus.write8(pa + i as u32, b);
            }
        }
    }

    /// Force all pending buffered stores out to the bus.
    pub fn drain_write_buffer(&mut self, bus: &mut dyn PhysBus) {
        self.wb.drain_all(bus);
    }

    // ========== CP15 ==========

    /// MRC from coprocessor 15. `None` means the access is rejected and
    /// the core must raise an undefined-instruction trap.
    pub fn mrc(&mut self, instr: u32, privileged: bool) -> Option<u32> {
        let (op1, crn, crm, op2) = decode_cp15(instr);
        if !cp15_access_allowed(self.chip, crn, crm, op1, op2, true, privileged) {
            log::warn!(
                "cp15: rejected mrc c{},c{},{},{} (privileged={})",
                crn,
                crm,
                op1,
                op2,
                privileged
            );
            return None;
        }
        let value = match (crn, crm, op2) {
            (0, 0, 0) => main_id(self.chip),
            (0, 0, 1) => self.cache_type,
            (1, 0, 0) => self.control.bits(),
            (1, 0, 1) => self.auxiliary_control,
            (1, 0, 2) => self.coprocessor_access_control,
            (2, 0, 0) => self.translation_table_base,
            (2, 0, 1) => self.translation_table_base1,
            (2, 0, 2) => self.translation_table_ctrl,
            (3, 0, 0) => self.domain_access_control,
            (5, 0, 0) => self.fault_status,
            (5, 0, 1) => self.fault_statusi,
            (6, 0, 0) => self.fault_address,
            (9, _, _) => self.cache_locked_down,
            (10, _, _) => self.tlb_locked_down,
            (13, 0, 0) => self.process_id,
            (13, 0, 1) => self.context_id,
            (13, 0, 2) => self.thread_urw,
            (13, 0, 3) => self.thread_uro,
            // Maintenance registers read as zero.
            (7, _, _) | (8, _, _) => 0,
            _ => 0,
        };
        Some(value)
    }

    /// MCR to coprocessor 15. `false` means the access is rejected.
    pub fn mcr(
        &mut self,
        bus: &mut dyn PhysBus,
        instr: u32,
        value: u32,
        privileged: bool,
    ) -> bool {
        let (op1, crn, crm, op2) = decode_cp15(instr);
        if !cp15_access_allowed(self.chip, crn, crm, op1, op2, false, privileged) {
            log::warn!(
                "cp15: rejected mcr c{},c{},{},{} (privileged={})",
                crn,
                crm,
                op1,
                op2,
                privileged
            );
            return false;
        }
        match (crn, crm, op2) {
            (0, _, _) => {} // ID registers ignore writes
            (1, 0, 0) => {
                self.control = Control::from_bits_retain(value);
                log::debug!(
                    "cp15: control={:08x} mmu={} dcache={} icache={} vectors={}",
                    value,
                    self.enabled(),
                    self.dcache_on(),
                    self.icache_on(),
                    if self.high_vectors() { "high" } else { "low" }
                );
            }
            (1, 0, 1) => self.auxiliary_control = value,
            (1, 0, 2) => self.coprocessor_access_control = value,
            (2, 0, 0) => self.translation_table_base = value,
            (2, 0, 1) => self.translation_table_base1 = value,
            (2, 0, 2) => self.translation_table_ctrl = value,
            (3, 0, 0) => self.domain_access_control = value,
            (5, 0, 0) => self.fault_status = value,
            (5, 0, 1) => self.fault_statusi = value,
            (6, 0, 0) => self.fault_address = value,
            (7, _, _) => self.cache_op(bus, crm, op2, value),
            (8, _, _) => self.tlb_op(crm, op2, value),
            (9, _, _) => self.cache_locked_down = value,
            (10, _, _) => self.tlb_locked_down = value,
            (13, 0, 0) => self.process_id = value,
            (13, 0, 1) => self.context_id = value,
            (13, 0, 2) => self.thread_urw = value,
            (13, 0, 3) => self.thread_uro = value,
            _ => {}
        }
        true
    }

    /// c7: cache maintenance. `value` is the MVA or set/index operand.
    fn cache_op(&mut self, bus: &mut dyn PhysBus, crm: u32, op2: u32, value: u32) {
        match (crm, op2) {
            (5, 0) => self.i_cache.invalidate_all(bus),
            (5, 1) => self.i_cache.invalidate(bus, value),
            (6, 0) => {
                self.d_cache.invalidate_all(bus);
                self.mini_d_cache.invalidate_all(bus);
            }
            (6, 1) => {
                self.d_cache.invalidate(bus, value);
                self.mini_d_cache.invalidate(bus, value);
            }
            (6, 2) => self.d_cache.invalidate_by_index(bus, value),
            (7, 0) => {
                self.i_cache.invalidate_all(bus);
                self.d_cache.invalidate_all(bus);
                self.mini_d_cache.invalidate_all(bus);
            }
            (10, 1) => {
                self.d_cache.clean(bus, value);
                self.mini_d_cache.clean(bus, value);
            }
            (10, 2) => self.d_cache.clean(bus, value),
            (10, 4) => self.wb.drain_all(bus),
            (14, 0) => {
                self.d_cache.clean_all(bus);
                self.d_cache.invalidate_all(bus);
                self.mini_d_cache.invalidate_all(bus);
                self.wb.drain_all(bus);
            }
            (14, 1) => {
                self.d_cache.invalidate(bus, value);
                self.mini_d_cache.invalidate(bus, value);
            }
            (14, 2) => self.d_cache.invalidate_by_index(bus, value),
            _ => log::trace!("cp15: ignored cache op c7,c{},{}", crm, op2),
        }
    }

    /// c8: TLB maintenance.
    fn tlb_op(&mut self, crm: u32, op2: u32, value: u32) {
        match (crm, op2) {
            (5, 0) => self.i_tlb.invalidate_all(),
            (5, 1) => self.i_tlb.invalidate_entry(value),
            (6, 0) => self.d_tlb.invalidate_all(),
            (6, 1) => self.d_tlb.invalidate_entry(value),
            (7, 0) => {
                self.i_tlb.invalidate_all();
                self.d_tlb.invalidate_all();
            }
            (7, 1) => {
                self.i_tlb.invalidate_entry(value);
                self.d_tlb.invalidate_entry(value);
            }
            _ => log::trace!("cp15: ignored tlb op c8,c{},{}", crm, op2),
        }
    }
}

/// Pick the halfword for a Thumb fetch; ARM fetches pass through.
#[inline]
fn extract_instr(word: u32, va: u32, halfword: bool) -> u32 {
    if halfword {
        if va & 2 != 0 {
            word >> 16
        } else {
            word & 0xFFFF
        }
    } else {
        word
    }
}

/// Main ID register values per family.
fn main_id(chip: ChipFamily) -> u32 {
    match chip {
        ChipFamily::Arm720T => 0x4180_7200,
        ChipFamily::Arm920T => 0x4100_9200,
        ChipFamily::Arm926EJS => 0x4106_9260,
        ChipFamily::Arm1176JZFS => 0x410F_B767,
    }
}

/// Decode the CP15 operand fields of an MRC/MCR word.
#[inline]
fn decode_cp15(instr: u32) -> (u32, u32, u32, u32) {
    let op1 = (instr >> 21) & 7;
    let crn = (instr >> 16) & 0xF;
    let crm = instr & 0xF;
    let op2 = (instr >> 5) & 7;
    (op1, crn, crm, op2)
}

/// Per-chip `(CRn, CRm, opcode1, opcode2)` acceptance. The skeleton is
/// identical across families; v6-class chips additionally accept their
/// extended c2 and c13 registers.
fn cp15_access_allowed(
    chip: ChipFamily,
    crn: u32,
    crm: u32,
    op1: u32,
    op2: u32,
    is_read: bool,
    privileged: bool,
) -> bool {
    if op1 != 0 {
        return false;
    }

    // User mode reaches only the thread registers: reads of TPIDRURW and
    // TPIDRURO, writes of TPIDRURW.
    if !privileged {
        return chip.has_v6_registers()
            && crn == 13
            && crm == 0
            && (op2 == 2 || (op2 == 3 && is_read));
    }

    match crn {
        0 => crm == 0 && is_read,
        1 => crm == 0 && op2 <= if chip.has_v6_registers() { 2 } else { 0 },
        2 => crm == 0 && op2 <= if chip.has_v6_registers() { 2 } else { 0 },
        3 => crm == 0 && op2 == 0,
        4 => false,
        5 => crm == 0 && op2 <= 1,
        6 => crm == 0 && op2 == 0,
        7 => matches!(
            (crm, op2),
            (5, 0) | (5, 1) | (6, 0) | (6, 1) | (6, 2) | (7, 0) | (10, 1) | (10, 2) | (10, 4)
                | (14, 0) | (14, 1) | (14, 2)
        ),
        8 => op2 <= 1 && (5..=7).contains(&crm),
        9 => crm <= 1 && op2 <= 1,
        10 => crm <= 1 && op2 <= 1,
        11 | 12 => false,
        13 => crm == 0 && op2 <= if chip.has_v6_registers() { 3 } else { 0 },
        14 => false,
        15 => false,
        _ => false,
    }
}
