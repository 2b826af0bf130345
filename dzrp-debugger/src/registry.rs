//! Breakpoint bookkeeping and long-address helpers.
//!
//! A long address is a CPU address qualified by a bank: bits 0-15 hold the
//! address and bits 16-23 hold `bank + 1`, so a zero bank field means a
//! plain 16-bit address that follows whatever is paged in.

use crate::machine::{DebugCmd, Machine, BANK_SIZE, NEXTREG_MMU0};
use log::{debug, warn};
use std::collections::BTreeMap;

/// MMU value the hardware uses for ROM
const MMU_ROM: u8 = 0xFF;
/// Bank number DZRP clients use for ROM
const DZRP_ROM_BANK: u8 = 0xFE;

/// Bank field of a long address (already biased by one; 0 = none)
pub fn bank_field(long_address: i32) -> i32 {
    (long_address >> 16) & 0xFF
}

/// The 16-bit part of a long address
pub fn flat_address(long_address: i32) -> u16 {
    (long_address & 0xFFFF) as u16
}

/// Physical address of a banked long address
pub fn physical_address(long_address: i32) -> u32 {
    let offset = (long_address & (BANK_SIZE as i32 - 1)) as u32;
    let bank = (bank_field(long_address) - 1) as u32;
    offset + bank * BANK_SIZE as u32
}

/// Map a DZRP bank number onto the value written to an MMU NextReg
pub fn bank_to_mmu(bank: u8) -> u8 {
    if bank == DZRP_ROM_BANK {
        MMU_ROM
    } else {
        bank
    }
}

/// Inverse of [`bank_to_mmu`]
pub fn mmu_to_bank(mmu: u8) -> u8 {
    if mmu == MMU_ROM {
        DZRP_ROM_BANK
    } else {
        mmu
    }
}

/// Long address of a CPU address under the machine's current slot mapping
pub fn long_address_of(machine: &dyn Machine, address: u16) -> i32 {
    let slot = (address >> 13) as u8;
    let bank = mmu_to_bank(machine.next_reg(NEXTREG_MMU0 + slot)) as i32;
    ((bank + 1) << 16) | address as i32
}

/// Persistent breakpoints of one debug session.
///
/// Ids are handed out in increasing order starting at 1 and are never reused.
/// Several ids may refer to the same long address; the machine's trap stays
/// armed until the last of them is removed.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    entries: BTreeMap<u16, i32>,
    last_id: u16,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every entry and restart ids at 1. Machine traps are left alone.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.last_id = 0;
    }

    /// Forget every entry but keep counting ids from where they were
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Arm a breakpoint and return its id, or `None` once the id space is spent
    pub fn set_breakpoint(&mut self, machine: &dyn Machine, long_address: i32) -> Option<u16> {
        let Some(id) = self.last_id.checked_add(1) else {
            warn!(target: "dzrp", "breakpoint ids exhausted, refusing 0x{:06x}", long_address);
            return None;
        };
        Self::arm(machine, long_address, true);
        self.last_id = id;
        self.entries.insert(id, long_address);
        debug!(target: "dzrp", "breakpoint #{} at 0x{:06x}", id, long_address);
        Some(id)
    }

    /// Remove a breakpoint; returns false for an unknown id
    pub fn delete_breakpoint(&mut self, machine: &dyn Machine, id: u16) -> bool {
        let Some(long_address) = self.entries.remove(&id) else {
            warn!(target: "dzrp", "remove of unknown breakpoint #{}", id);
            return false;
        };
        if self.contains(long_address) {
            debug!(
                target: "dzrp",
                "breakpoint #{} removed, 0x{:06x} still referenced", id, long_address
            );
        } else {
            Self::arm(machine, long_address, false);
            debug!(target: "dzrp", "breakpoint #{} removed, 0x{:06x} cleared", id, long_address);
        }
        true
    }

    /// Whether any id refers to exactly this long address
    pub fn contains(&self, long_address: i32) -> bool {
        self.entries.values().any(|&a| a == long_address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn arm(machine: &dyn Machine, long_address: i32, set: bool) {
        let cmd = match (bank_field(long_address), set) {
            (0, true) => DebugCmd::SetBreakpoint(flat_address(long_address)),
            (0, false) => DebugCmd::ClearBreakpoint(flat_address(long_address)),
            (_, true) => DebugCmd::SetPhysicalBreakpoint(physical_address(long_address)),
            (_, false) => DebugCmd::ClearPhysicalBreakpoint(physical_address(long_address)),
        };
        machine.debug(cmd);
    }
}
