//! Register access shim for the control window
//!
//! The AM35x/TI816x interconnect only performs 32-bit reads, and several
//! Mentor registers lose information when read back that way (INTRTX shares
//! a word with FADDR/POWER and clears on read; the enable registers return
//! stale data). Byte and halfword reads are therefore extracted from a word
//! read, and a small shadow cache answers reads of the write-mostly
//! registers from their last written value.

use std::sync::Arc;

use tracing::debug;

use crate::mmio::{sub_word_shift16, RegisterIo};
use crate::regs::{
    MENTOR_CORE_OFFSET, MUSB_FADDR, MUSB_INTRRXE, MUSB_INTRTX, MUSB_INTRTXE, MUSB_INTRUSBE,
    MUSB_POWER,
};

/// Registers answered from the shadow cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowReg {
    Faddr,
    Power,
    IntrTxE,
    IntrRxE,
    IntrUsbE,
}

impl ShadowReg {
    pub const ALL: [ShadowReg; 5] = [
        ShadowReg::Faddr,
        ShadowReg::Power,
        ShadowReg::IntrTxE,
        ShadowReg::IntrRxE,
        ShadowReg::IntrUsbE,
    ];

    /// Look up the shadowed register at a Mentor offset and access width
    pub fn at(offset: usize, width: u8) -> Option<ShadowReg> {
        let reg = match (offset, width) {
            (MUSB_FADDR, 1) => ShadowReg::Faddr,
            (MUSB_POWER, 1) => ShadowReg::Power,
            (MUSB_INTRUSBE, 1) => ShadowReg::IntrUsbE,
            (MUSB_INTRTXE, 2) => ShadowReg::IntrTxE,
            (MUSB_INTRRXE, 2) => ShadowReg::IntrRxE,
            _ => return None,
        };
        Some(reg)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ShadowEntry {
    value: u16,
    valid: bool,
}

/// Last written value of each shadowed register
#[derive(Debug, Default)]
pub struct ShadowCache {
    entries: [ShadowEntry; ShadowReg::ALL.len()],
}

impl ShadowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: ShadowReg) -> Option<u16> {
        let entry = self.entries[reg.index()];
        entry.valid.then_some(entry.value)
    }

    pub fn store(&mut self, reg: ShadowReg, value: u16) {
        self.entries[reg.index()] = ShadowEntry { value, valid: true };
    }

    pub fn invalidate_all(&mut self) {
        self.entries = Default::default();
    }
}

/// Control-window accessor owning the shadow cache
///
/// Mentor accessors (`read8`/`read16`/`write8`/`write16`) take offsets
/// relative to the Mentor core; `ctrl_*` accessors address the TI wrapper.
pub struct RegisterShim {
    io: Arc<dyn RegisterIo>,
    shadow: ShadowCache,
}

impl RegisterShim {
    pub fn new(io: Arc<dyn RegisterIo>) -> Self {
        Self {
            io,
            shadow: ShadowCache::new(),
        }
    }

    pub fn shadow(&self) -> &ShadowCache {
        &self.shadow
    }

    pub fn reset_shadow(&mut self) {
        self.shadow.invalidate_all();
    }

    #[inline]
    pub fn ctrl_read32(&self, offset: usize) -> u32 {
        self.io.read32(offset)
    }

    #[inline]
    pub fn ctrl_write32(&self, offset: usize, value: u32) {
        self.io.write32(offset, value)
    }

    pub fn read8(&mut self, offset: usize) -> u8 {
        if let Some(reg) = ShadowReg::at(offset, 1) {
            if let Some(value) = self.shadow.get(reg) {
                return value as u8;
            }
            if reg == ShadowReg::Power {
                return self.read_power_through();
            }
        }

        let word = self.read32(offset & !3);
        (word >> ((offset & 3) * 8)) as u8
    }

    pub fn read16(&mut self, offset: usize) -> u16 {
        if let Some(value) = ShadowReg::at(offset, 2).and_then(|reg| self.shadow.get(reg)) {
            return value;
        }

        let word = self.read32(offset & !3);
        (word >> sub_word_shift16(offset)) as u16
    }

    /// Whole Mentor word; every core register read goes through here
    pub fn read32(&self, offset: usize) -> u32 {
        self.io.read32(MENTOR_CORE_OFFSET + offset)
    }

    pub fn write8(&mut self, offset: usize, value: u8) {
        if let Some(reg) = ShadowReg::at(offset, 1) {
            self.shadow.store(reg, value as u16);
        }
        self.io.write8(MENTOR_CORE_OFFSET + offset, value);
    }

    pub fn write16(&mut self, offset: usize, value: u16) {
        if let Some(reg) = ShadowReg::at(offset, 2) {
            self.shadow.store(reg, value);
        }
        self.io.write16(MENTOR_CORE_OFFSET + offset, value);
    }

    /// First POWER read: the word also carries INTRTX, which the read clears
    fn read_power_through(&mut self) -> u8 {
        let word = self.read32(MUSB_FADDR);
        let power = (word >> 8) as u8;
        if word & 0xffff_0000 != 0 {
            debug!(
                "Missing Tx interrupt event = 0x{:x} (INTRTX at 0x{:x})",
                (word >> 16) as u16,
                MUSB_INTRTX
            );
        }
        self.shadow.store(ShadowReg::Power, power as u16);
        power
    }
}
