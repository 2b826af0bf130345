//! A state-only ZX Next stand-in.
//!
//! `MemoryMachine` keeps registers, banked RAM, NextRegs, ports, sprite
//! memory and trap tables, and flips between running and stopped on command.
//! It never executes instructions: a stop "caused by the emulator" is
//! simulated with [`MemoryMachine::halt_at`].

use super::{
    CpuState, DebugCmd, Machine, Registers, SpriteMemory, Traps, BANK_SIZE, NEXTREG_MMU0,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// 256 banks of 8K
const PHYSICAL_SIZE: usize = 256 * BANK_SIZE;
const SPRITE_ATTRIBUTES_SIZE: usize = 128 * 5;
const SPRITE_PATTERNS_SIZE: usize = 64 * 256;
const DEFAULT_CLIP_WINDOW: [u8; 4] = [0, 255, 0, 191];

/// Most recent control commands kept for inspection
pub const HISTORY_LIMIT: usize = 256;

/// Slot mapping after a Next reset: ROM in slots 0-1, banks 10,11,4,5,0,1 above
const DEFAULT_MMU: [u8; 8] = [0xFF, 0xFF, 10, 11, 4, 5, 0, 1];

struct Inner {
    regs: Registers,
    state: CpuState,
    ram: Vec<u8>,
    next_regs: [u8; 256],
    ports: HashMap<u16, u8>,
    sprite_attributes: Vec<u8>,
    sprite_patterns: Vec<u8>,
    clip_window: Vec<u8>,
    breakpoints: HashSet<u16>,
    physical_breakpoints: HashSet<u32>,
    read_watchpoints: HashSet<u16>,
    write_watchpoints: HashSet<u16>,
    history: VecDeque<DebugCmd>,
}

impl Inner {
    fn physical(&self, address: u16) -> usize {
        let slot = (address >> 13) as usize;
        let bank = self.next_regs[NEXTREG_MMU0 as usize + slot] as usize;
        bank * BANK_SIZE + (address as usize & (BANK_SIZE - 1))
    }
}

pub struct MemoryMachine {
    inner: Mutex<Inner>,
    state_changed: Condvar,
}

impl MemoryMachine {
    /// A stopped machine with zeroed memory and the reset slot mapping
    pub fn new() -> Self {
        let mut next_regs = [0u8; 256];
        next_regs[NEXTREG_MMU0 as usize..NEXTREG_MMU0 as usize + 8].copy_from_slice(&DEFAULT_MMU);
        MemoryMachine {
            inner: Mutex::new(Inner {
                regs: Registers::default(),
                state: CpuState::Stopped,
                ram: vec![0; PHYSICAL_SIZE],
                next_regs,
                ports: HashMap::new(),
                sprite_attributes: vec![0; SPRITE_ATTRIBUTES_SIZE],
                sprite_patterns: vec![0; SPRITE_PATTERNS_SIZE],
                clip_window: DEFAULT_CLIP_WINDOW.to_vec(),
                breakpoints: HashSet::new(),
                physical_breakpoints: HashSet::new(),
                read_watchpoints: HashSet::new(),
                write_watchpoints: HashSet::new(),
                history: VecDeque::with_capacity(HISTORY_LIMIT),
            }),
            state_changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: CpuState) {
        if inner.state != state {
            inner.state = state;
            self.state_changed.notify_all();
        }
    }

    /// Stop at `pc` on the emulator's own initiative, as a trap would
    pub fn halt_at(&self, pc: u16) {
        let mut inner = self.lock();
        inner.regs.pc = pc;
        self.set_state(&mut inner, CpuState::Stopped);
    }

    pub fn has_physical_breakpoint(&self, address: u32) -> bool {
        self.lock().physical_breakpoints.contains(&address)
    }

    /// The last [`HISTORY_LIMIT`] control commands, oldest first; clears the record
    pub fn take_history(&self) -> Vec<DebugCmd> {
        self.lock().history.drain(..).collect()
    }

    pub fn load_sprites(&self, memory: SpriteMemory, offset: usize, data: &[u8]) {
        let mut inner = self.lock();
        let target = match memory {
            SpriteMemory::Attributes => &mut inner.sprite_attributes,
            SpriteMemory::Patterns => &mut inner.sprite_patterns,
            SpriteMemory::ClipWindow => &mut inner.clip_window,
        };
        for (i, b) in data.iter().enumerate() {
            let len = target.len();
            target[(offset + i) % len] = *b;
        }
    }
}

impl Default for MemoryMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for MemoryMachine {
    fn registers(&self) -> Registers {
        self.lock().regs
    }

    fn set_registers(&self, regs: &Registers) {
        self.lock().regs = *regs;
    }

    fn debug(&self, cmd: DebugCmd) {
        let mut inner = self.lock();
        if inner.history.len() == HISTORY_LIMIT {
            inner.history.pop_front();
        }
        inner.history.push_back(cmd);
        match cmd {
            DebugCmd::Enter => self.set_state(&mut inner, CpuState::Stopped),
            DebugCmd::Run => self.set_state(&mut inner, CpuState::Running),
            // No instruction execution here: stepping leaves PC where it is
            DebugCmd::Step | DebugCmd::StepOver => {}
            DebugCmd::SetBreakpoint(a) => {
                inner.breakpoints.insert(a);
            }
            DebugCmd::ClearBreakpoint(a) => {
                inner.breakpoints.remove(&a);
            }
            DebugCmd::SetPhysicalBreakpoint(a) => {
                inner.physical_breakpoints.insert(a);
            }
            DebugCmd::ClearPhysicalBreakpoint(a) => {
                inner.physical_breakpoints.remove(&a);
            }
            DebugCmd::SetReadWatchpoint(a) => {
                inner.read_watchpoints.insert(a);
            }
            DebugCmd::ClearReadWatchpoint(a) => {
                inner.read_watchpoints.remove(&a);
            }
            DebugCmd::SetWriteWatchpoint(a) => {
                inner.write_watchpoints.insert(a);
            }
            DebugCmd::ClearWriteWatchpoint(a) => {
                inner.write_watchpoints.remove(&a);
            }
            DebugCmd::ClearAll => {
                inner.breakpoints.clear();
                inner.physical_breakpoints.clear();
                inner.read_watchpoints.clear();
                inner.write_watchpoints.clear();
            }
        }
    }

    fn state(&self) -> CpuState {
        self.lock().state
    }

    fn traps(&self, address: u16) -> Traps {
        let inner = self.lock();
        Traps {
            breakpoint: inner.breakpoints.contains(&address),
            read: inner.read_watchpoints.contains(&address),
            write: inner.write_watchpoints.contains(&address),
        }
    }

    fn peek(&self, address: u16, buf: &mut [u8]) {
        let inner = self.lock();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = inner.ram[inner.physical(address.wrapping_add(i as u16))];
        }
    }

    fn poke(&self, address: u16, data: &[u8]) {
        let mut inner = self.lock();
        for (i, b) in data.iter().enumerate() {
            let phys = inner.physical(address.wrapping_add(i as u16));
            inner.ram[phys] = *b;
        }
    }

    fn peek_physical(&self, address: u32, buf: &mut [u8]) {
        let inner = self.lock();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = inner.ram[(address as usize + i) % PHYSICAL_SIZE];
        }
    }

    fn poke_physical(&self, address: u32, data: &[u8]) {
        let mut inner = self.lock();
        for (i, b) in data.iter().enumerate() {
            inner.ram[(address as usize + i) % PHYSICAL_SIZE] = *b;
        }
    }

    fn next_reg(&self, reg: u8) -> u8 {
        self.lock().next_regs[reg as usize]
    }

    fn set_next_reg(&self, reg: u8, value: u8) {
        let mut inner = self.lock();
        match reg {
            // interrupt status registers: writing 1 clears the bit
            0xC8..=0xCA => inner.next_regs[reg as usize] &= !value,
            _ => inner.next_regs[reg as usize] = value,
        }
    }

    fn peek_sprites(&self, memory: SpriteMemory, offset: usize, buf: &mut [u8]) {
        let inner = self.lock();
        let source = match memory {
            SpriteMemory::Attributes => &inner.sprite_attributes,
            SpriteMemory::Patterns => &inner.sprite_patterns,
            SpriteMemory::ClipWindow => &inner.clip_window,
        };
        for (i, b) in buf.iter_mut().enumerate() {
            *b = source[(offset + i) % source.len()];
        }
    }

    fn in_port(&self, port: u16) -> u8 {
        self.lock().ports.get(&port).copied().unwrap_or(0xFF)
    }

    fn out_port(&self, port: u16, value: u8) {
        self.lock().ports.insert(port, value);
    }

    fn wait_for_state(&self, target: CpuState, timeout: Duration) -> bool {
        let inner = self.lock();
        match self
            .state_changed
            .wait_timeout_while(inner, timeout, |i| i.state != target)
        {
            Ok((inner, _)) => inner.state == target,
            Err(e) => e.into_inner().0.state == target,
        }
    }
}
