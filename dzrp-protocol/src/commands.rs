//! Command, notification and break-reason code tables

use crate::ProtocolError;

/// DZRP version implemented by this crate (major, minor, patch)
pub const PROTOCOL_VERSION: [u8; 3] = [2, 0, 0];

/// Notification id for "the CPU has stopped"
pub const NTF_PAUSE: u8 = 1;

/// Requests a DZRP client may send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Init = 1,
    Close = 2,
    GetRegisters = 3,
    SetRegister = 4,
    WriteBank = 5,
    Continue = 6,
    Pause = 7,
    ReadMem = 8,
    WriteMem = 9,
    SetSlot = 10,
    GetTbblueReg = 11,
    SetBorder = 12,
    GetSpritesPalette = 16,
    GetSpritesClipWindowAndControl = 17,
    GetSprites = 18,
    GetSpritePatterns = 19,
    AddBreakpoint = 40,
    RemoveBreakpoint = 41,
    AddWatchpoint = 42,
    RemoveWatchpoint = 43,
    ReadState = 50,
    WriteState = 51,
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        let cmd = match code {
            1 => Command::Init,
            2 => Command::Close,
            3 => Command::GetRegisters,
            4 => Command::SetRegister,
            5 => Command::WriteBank,
            6 => Command::Continue,
            7 => Command::Pause,
            8 => Command::ReadMem,
            9 => Command::WriteMem,
            10 => Command::SetSlot,
            11 => Command::GetTbblueReg,
            12 => Command::SetBorder,
            16 => Command::GetSpritesPalette,
            17 => Command::GetSpritesClipWindowAndControl,
            18 => Command::GetSprites,
            19 => Command::GetSpritePatterns,
            40 => Command::AddBreakpoint,
            41 => Command::RemoveBreakpoint,
            42 => Command::AddWatchpoint,
            43 => Command::RemoveWatchpoint,
            50 => Command::ReadState,
            51 => Command::WriteState,
            // 13..=15 are reserved by the protocol and never valid here
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(cmd)
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        cmd as u8
    }
}

/// Why the CPU stopped, as carried by the pause notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakReason {
    /// Stopped on a temporary ("run until") breakpoint
    NoReason = 0,
    ManualBreak = 1,
    BreakpointHit = 2,
    WatchpointRead = 3,
    WatchpointWrite = 4,
    Other = 255,
}

impl From<BreakReason> for u8 {
    fn from(reason: BreakReason) -> u8 {
        reason as u8
    }
}

/// Machine type reported in the INIT response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MachineType {
    Zx16k = 1,
    Zx48k = 2,
    Zx128k = 3,
    ZxNext = 4,
}

impl From<MachineType> for u8 {
    fn from(machine: MachineType) -> u8 {
        machine as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::try_from(1).unwrap(), Command::Init);
        assert_eq!(Command::try_from(19).unwrap(), Command::GetSpritePatterns);
        assert_eq!(Command::try_from(43).unwrap(), Command::RemoveWatchpoint);
        assert_eq!(u8::from(Command::WriteState), 51);
    }

    #[test]
    fn test_reserved_codes_rejected() {
        for code in [0u8, 13, 14, 15, 20, 44, 52, 255] {
            assert!(matches!(
                Command::try_from(code),
                Err(ProtocolError::UnknownCommand(c)) if c == code
            ));
        }
    }
}
