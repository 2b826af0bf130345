//! The emulator core as seen by the debugger.
//!
//! The DZRP server never interprets instructions. Everything it knows about
//! the CPU comes through [`Machine`], which the hosting emulator implements.

mod memory;

pub use memory::MemoryMachine;

use std::time::{Duration, Instant};

/// Size of one memory bank / slot window
pub const BANK_SIZE: usize = 0x2000;

/// NextReg holding the bank mapped into slot 0; slots 1..7 follow
pub const NEXTREG_MMU0: u8 = 0x50;

/// First of the three interrupt-enable NextRegs
pub const NEXTREG_INT_EN0: u8 = 0xC4;

/// First of the three interrupt-status NextRegs (write 1 to clear)
pub const NEXTREG_INT_STATUS0: u8 = 0xC8;

/// Run/stop state of the emulated CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Stopped,
}

/// Debugger control vocabulary understood by the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCmd {
    /// Enter the debugger, i.e. stop the CPU
    Enter,
    Run,
    Step,
    StepOver,
    SetBreakpoint(u16),
    ClearBreakpoint(u16),
    SetPhysicalBreakpoint(u32),
    ClearPhysicalBreakpoint(u32),
    SetReadWatchpoint(u16),
    ClearReadWatchpoint(u16),
    SetWriteWatchpoint(u16),
    ClearWriteWatchpoint(u16),
    /// Remove every breakpoint and watchpoint
    ClearAll,
}

/// Traps armed at one logical address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traps {
    pub breakpoint: bool,
    pub read: bool,
    pub write: bool,
}

impl Traps {
    pub fn any_watchpoint(&self) -> bool {
        self.read || self.write
    }
}

/// Which sprite memory a bulk peek reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpriteMemory {
    /// 128 sprites x 5 attribute bytes
    Attributes,
    /// 64 patterns x 256 bytes
    Patterns,
    /// Sprite clip window: x1, x2, y1, y2
    ClipWindow,
}

/// Z80 register file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub pc: u16,
    pub sp: u16,
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub ix: u16,
    pub iy: u16,
    pub af2: u16,
    pub bc2: u16,
    pub de2: u16,
    pub hl2: u16,
    pub i: u8,
    pub r: u8,
    pub im: u8,
}

/// The emulator interface consumed by the server.
///
/// Methods take `&self`; implementations synchronise internally because the
/// host's own thread keeps running the emulation.
pub trait Machine: Send + Sync {
    fn registers(&self) -> Registers;
    fn set_registers(&self, regs: &Registers);

    /// Issue a debugger control command
    fn debug(&self, cmd: DebugCmd);
    /// Authoritative run/stop state
    fn state(&self) -> CpuState;
    /// Traps currently armed at a logical address
    fn traps(&self, address: u16) -> Traps;

    /// Read through the current slot mapping
    fn peek(&self, address: u16, buf: &mut [u8]);
    /// Write through the current slot mapping
    fn poke(&self, address: u16, data: &[u8]);
    /// Read physical memory (`bank * 0x2000 + offset`)
    fn peek_physical(&self, address: u32, buf: &mut [u8]);
    fn poke_physical(&self, address: u32, data: &[u8]);

    fn next_reg(&self, reg: u8) -> u8;
    fn set_next_reg(&self, reg: u8, value: u8);

    fn peek_sprites(&self, memory: SpriteMemory, offset: usize, buf: &mut [u8]);

    fn in_port(&self, port: u16) -> u8;
    fn out_port(&self, port: u16, value: u8);

    /// Block until the CPU reaches `target` or `timeout` elapses.
    ///
    /// Returns whether the target state was reached. The default polls every
    /// millisecond; emulators that can signal state changes should override it.
    fn wait_for_state(&self, target: CpuState, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.state() == target {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
