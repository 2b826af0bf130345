//! Request handlers, one per DZRP command.
//!
//! Every handler reads its arguments from a [`PayloadReader`] and answers
//! through [`Session::reply`] exactly once. Anything that looks at or changes
//! machine state goes through [`Session::execute_stopped`].

use crate::config::ServerConfig;
use crate::machine::{DebugCmd, Machine, Registers, SpriteMemory, BANK_SIZE, NEXTREG_MMU0};
use crate::registry::{bank_to_mmu, flat_address, mmu_to_bank};
use crate::session::Session;
use dzrp_protocol::{
    string_len, Command, MachineType, PayloadReader, PayloadWriter, ProtocolError, Request,
    PROTOCOL_VERSION,
};
use log::{debug, info, warn};

/// Register block of GET_REGISTERS: 12 pairs plus R, I, IM and a spare byte
pub const REG_SIZE: usize = 12 * 2 + 4;

/// Number of 8K slots reported after the registers
pub const SLOT_COUNT: usize = 8;

/// Register numbers for SET_REGISTER
pub const REG_PC: u8 = 0;
pub const REG_SP: u8 = 1;
pub const REG_AF: u8 = 2;
pub const REG_BC: u8 = 3;
pub const REG_DE: u8 = 4;
pub const REG_HL: u8 = 5;
pub const REG_IX: u8 = 6;
pub const REG_IY: u8 = 7;
pub const REG_AF2: u8 = 8; // AF'
pub const REG_BC2: u8 = 9; // BC'
pub const REG_DE2: u8 = 10; // DE'
pub const REG_HL2: u8 = 11; // HL'
pub const REG_IR: u8 = 12;
pub const REG_IM: u8 = 13;
pub const REG_F: u8 = 14;
pub const REG_A: u8 = 15;
pub const REG_C: u8 = 16;
pub const REG_B: u8 = 17;
pub const REG_E: u8 = 18;
pub const REG_D: u8 = 19;
pub const REG_L: u8 = 20;
pub const REG_H: u8 = 21;
pub const REG_IXL: u8 = 22;
pub const REG_IXH: u8 = 23;
pub const REG_IYL: u8 = 24;
pub const REG_IYH: u8 = 25;
pub const REG_F2: u8 = 26;
pub const REG_A2: u8 = 27;
pub const REG_C2: u8 = 28;
pub const REG_B2: u8 = 29;
pub const REG_E2: u8 = 30;
pub const REG_D2: u8 = 31;
pub const REG_L2: u8 = 32;
pub const REG_H2: u8 = 33;
pub const REG_R: u8 = 34;
pub const REG_I: u8 = 35;

const NEXTREG_SPRITE_CONTROL: u8 = 0x15;
const NEXTREG_PALETTE_INDEX: u8 = 0x40;
const NEXTREG_PALETTE_VALUE: u8 = 0x41;
const NEXTREG_PALETTE_CONTROL: u8 = 0x43;
const NEXTREG_PALETTE_VALUE_9BIT: u8 = 0x44;

/// Palette control bits 6-4: which palette 0x40/0x41/0x44 address
const PALETTE_SELECT_MASK: u8 = 0x70;
const PALETTE_SPRITES_FIRST: u8 = 0x20;
const PALETTE_SPRITES_SECOND: u8 = 0x60;

const SPRITE_ATTRIBUTE_LEN: usize = 5;
const SPRITE_PATTERN_LEN: usize = 256;

const ULA_PORT: u16 = 0x00FE;

const WATCH_READ: u8 = 0x01;
const WATCH_WRITE: u8 = 0x02;

/// What the connection should do after a request has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Decode the command byte of `request` and run its handler
pub fn dispatch(
    session: &mut Session,
    request: &Request,
    config: &ServerConfig,
) -> Result<Flow, ProtocolError> {
    let command = Command::try_from(request.cmd_id)?;
    debug!(
        target: "dzrp",
        "<- {:?} seq={} ({} bytes)", command, request.seq_num, request.payload.len()
    );

    session.begin_request(request.seq_num);
    let mut r = PayloadReader::new(&request.payload);

    match command {
        Command::Init => init(session, &mut r, &config.program_name)?,
        Command::Close => {
            info!(target: "dzrp", "client closed the session");
            session.reply(vec![])?;
            return Ok(Flow::Close);
        }
        Command::GetRegisters => get_registers(session)?,
        Command::SetRegister => set_register(session, &mut r)?,
        Command::WriteBank => write_bank(session, &mut r)?,
        Command::Continue => continue_cpu(session, &mut r)?,
        Command::Pause => {
            session.pause()?;
            session.reply(vec![])?;
        }
        Command::ReadMem => read_mem(session, &mut r)?,
        Command::WriteMem => write_mem(session, &mut r)?,
        Command::SetSlot => set_slot(session, &mut r)?,
        Command::GetTbblueReg => {
            let reg = r.read_u8()?;
            let value = session.machine.next_reg(reg);
            session.reply(vec![value])?;
        }
        Command::SetBorder => {
            let color = r.read_u8()?;
            session.machine.out_port(ULA_PORT, color & 0x07);
            session.reply(vec![])?;
        }
        Command::GetSpritesPalette => get_sprites_palette(session, &mut r)?,
        Command::GetSpritesClipWindowAndControl => get_sprites_clip_window(session)?,
        Command::GetSprites => get_sprites(session, &mut r, SpriteMemory::Attributes)?,
        Command::GetSpritePatterns => get_sprites(session, &mut r, SpriteMemory::Patterns)?,
        Command::AddBreakpoint => add_breakpoint(session, &mut r)?,
        Command::RemoveBreakpoint => remove_breakpoint(session, &mut r)?,
        Command::AddWatchpoint => watchpoint(session, &mut r, true)?,
        Command::RemoveWatchpoint => watchpoint(session, &mut r, false)?,
        Command::ReadState | Command::WriteState => {
            warn!(target: "dzrp", "{:?} is not supported, sending empty reply", command);
            r.read_remaining();
            session.reply(vec![])?;
        }
    }

    Ok(Flow::Continue)
}

fn init(
    session: &mut Session,
    r: &mut PayloadReader,
    program_name: &str,
) -> Result<(), ProtocolError> {
    let major = r.read_u8()?;
    let minor = r.read_u8()?;
    let patch = r.read_u8()?;
    let client = r.read_string()?;
    info!(
        target: "dzrp",
        "client '{}' speaks DZRP {}.{}.{}", client, major, minor, patch
    );

    session.execute_stopped(|s| {
        s.machine.debug(DebugCmd::ClearAll);
        s.registry.clear();
        Ok(())
    })?;

    let mut w = PayloadWriter::with_len(1 + 3 + 1 + string_len(program_name));
    w.write_u8(0)
        .write_bytes(&PROTOCOL_VERSION)
        .write_u8(MachineType::ZxNext.into())
        .write_string(program_name);
    session.reply(w.finish())
}

fn get_registers(session: &mut Session) -> Result<(), ProtocolError> {
    let payload = session.execute_stopped(|s| {
        let regs = s.machine.registers();
        let mut w = PayloadWriter::with_len(REG_SIZE + 1 + SLOT_COUNT);
        for pair in [
            regs.pc, regs.sp, regs.af, regs.bc, regs.de, regs.hl, regs.ix, regs.iy, regs.af2,
            regs.bc2, regs.de2, regs.hl2,
        ] {
            w.write_u16(pair);
        }
        w.write_u8(regs.r).write_u8(regs.i).write_u8(regs.im).write_u8(0);

        w.write_u8(SLOT_COUNT as u8);
        for slot in 0..SLOT_COUNT as u8 {
            w.write_u8(mmu_to_bank(s.machine.next_reg(NEXTREG_MMU0 + slot)));
        }
        Ok(w.finish())
    })?;
    session.reply(payload)
}

fn set_high(pair: &mut u16, value: u16) {
    *pair = (*pair & 0x00FF) | ((value & 0xFF) << 8);
}

fn set_low(pair: &mut u16, value: u16) {
    *pair = (*pair & 0xFF00) | (value & 0xFF);
}

/// Apply SET_REGISTER number `number`; false if the number is unknown
pub fn apply_register(regs: &mut Registers, number: u8, value: u16) -> bool {
    match number {
        REG_PC => regs.pc = value,
        REG_SP => regs.sp = value,
        REG_AF => regs.af = value,
        REG_BC => regs.bc = value,
        REG_DE => regs.de = value,
        REG_HL => regs.hl = value,
        REG_IX => regs.ix = value,
        REG_IY => regs.iy = value,
        REG_AF2 => regs.af2 = value,
        REG_BC2 => regs.bc2 = value,
        REG_DE2 => regs.de2 = value,
        REG_HL2 => regs.hl2 = value,
        REG_IR => {
            regs.i = (value >> 8) as u8;
            regs.r = value as u8;
        }
        REG_IM => regs.im = value as u8,
        REG_F => set_low(&mut regs.af, value),
        REG_A => set_high(&mut regs.af, value),
        REG_C => set_low(&mut regs.bc, value),
        REG_B => set_high(&mut regs.bc, value),
        REG_E => set_low(&mut regs.de, value),
        REG_D => set_high(&mut regs.de, value),
        REG_L => set_low(&mut regs.hl, value),
        REG_H => set_high(&mut regs.hl, value),
        REG_IXL => set_low(&mut regs.ix, value),
        REG_IXH => set_high(&mut regs.ix, value),
        REG_IYL => set_low(&mut regs.iy, value),
        REG_IYH => set_high(&mut regs.iy, value),
        REG_F2 => set_low(&mut regs.af2, value),
        REG_A2 => set_high(&mut regs.af2, value),
        REG_C2 => set_low(&mut regs.bc2, value),
        REG_B2 => set_high(&mut regs.bc2, value),
        REG_E2 => set_low(&mut regs.de2, value),
        REG_D2 => set_high(&mut regs.de2, value),
        REG_L2 => set_low(&mut regs.hl2, value),
        REG_H2 => set_high(&mut regs.hl2, value),
        REG_R => regs.r = value as u8,
        REG_I => regs.i = value as u8,
        _ => return false,
    }
    true
}

fn set_register(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    let number = r.read_u8()?;
    let value = r.read_u16()?;

    session.execute_stopped(|s| {
        let mut regs = s.machine.registers();
        if apply_register(&mut regs, number, value) {
            s.machine.set_registers(&regs);
        } else {
            warn!(target: "dzrp", "SET_REGISTER: unknown register {}", number);
        }
        Ok(())
    })?;
    session.reply(vec![])
}

fn write_bank(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    if r.remaining() != 1 + BANK_SIZE {
        let message = format!(
            "Bank data must be {} bytes, got {}",
            BANK_SIZE,
            r.remaining().saturating_sub(1)
        );
        warn!(target: "dzrp", "WRITE_BANK: {}", message);
        r.read_remaining();
        let mut w = PayloadWriter::with_len(1 + string_len(&message));
        w.write_u8(1).write_string(&message);
        return session.reply(w.finish());
    }

    let bank = r.read_u8()?;
    let data = r.read_bytes(BANK_SIZE)?;
    session.execute_stopped(|s| {
        s.machine.poke_physical(bank as u32 * BANK_SIZE as u32, data);
        Ok(())
    })?;
    debug!(target: "dzrp", "wrote bank {}", bank);

    let mut w = PayloadWriter::with_len(1 + string_len(""));
    w.write_u8(0).write_string("");
    session.reply(w.finish())
}

fn continue_cpu(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    let mut targets = [None, None];
    for target in targets.iter_mut() {
        let enabled = r.read_u8()? != 0;
        let address = r.read_u16()?;
        *target = enabled.then_some(address);
    }
    // alternate command and range fields of newer clients are not used
    r.read_remaining();

    debug!(target: "dzrp", "continue, run until {:04x?}", targets);
    session.set_temp_breakpoints(targets);
    session.reply(vec![])?;
    session.resume()
}

fn read_mem(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    let _reserved = r.read_u8()?;
    let address = r.read_u16()?;
    let size = r.read_u16()? as usize;

    let data = session.execute_stopped(|s| {
        let mut data = vec![0u8; size];
        s.machine.peek(address, &mut data);
        Ok(data)
    })?;
    session.reply(data)
}

fn write_mem(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    let _reserved = r.read_u8()?;
    let address = r.read_u16()?;
    let data = r.read_remaining();

    session.execute_stopped(|s| {
        s.machine.poke(address, data);
        Ok(())
    })?;
    session.reply(vec![])
}

fn set_slot(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    let slot = r.read_u8()?;
    let bank = r.read_u8()?;
    if slot as usize >= SLOT_COUNT {
        warn!(target: "dzrp", "SET_SLOT: no slot {}", slot);
        return session.reply(vec![1]);
    }

    session.execute_stopped(|s| {
        s.machine.set_next_reg(NEXTREG_MMU0 + slot, bank_to_mmu(bank));
        Ok(())
    })?;
    session.reply(vec![0])
}

fn get_sprites_palette(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    let palette = r.read_u8()?;
    let select = if palette == 0 {
        PALETTE_SPRITES_FIRST
    } else {
        PALETTE_SPRITES_SECOND
    };

    let payload = session.execute_stopped(|s| {
        let machine: &dyn Machine = s.machine.as_ref();
        let saved_control = machine.next_reg(NEXTREG_PALETTE_CONTROL);
        let saved_index = machine.next_reg(NEXTREG_PALETTE_INDEX);

        machine.set_next_reg(
            NEXTREG_PALETTE_CONTROL,
            (saved_control & !PALETTE_SELECT_MASK) | select,
        );
        let mut w = PayloadWriter::with_len(256 * 2);
        for index in 0..=255u8 {
            machine.set_next_reg(NEXTREG_PALETTE_INDEX, index);
            w.write_u8(machine.next_reg(NEXTREG_PALETTE_VALUE))
                .write_u8(machine.next_reg(NEXTREG_PALETTE_VALUE_9BIT) & 0x01);
        }

        machine.set_next_reg(NEXTREG_PALETTE_INDEX, saved_index);
        machine.set_next_reg(NEXTREG_PALETTE_CONTROL, saved_control);
        Ok(w.finish())
    })?;
    session.reply(payload)
}

fn get_sprites_clip_window(session: &mut Session) -> Result<(), ProtocolError> {
    let payload = session.execute_stopped(|s| {
        let mut payload = vec![0u8; 5];
        s.machine
            .peek_sprites(SpriteMemory::ClipWindow, 0, &mut payload[..4]);
        payload[4] = s.machine.next_reg(NEXTREG_SPRITE_CONTROL);
        Ok(payload)
    })?;
    session.reply(payload)
}

fn get_sprites(
    session: &mut Session,
    r: &mut PayloadReader,
    memory: SpriteMemory,
) -> Result<(), ProtocolError> {
    let index = r.read_u8()? as usize;
    let count = r.read_u8()? as usize;
    let unit = match memory {
        SpriteMemory::Patterns => SPRITE_PATTERN_LEN,
        _ => SPRITE_ATTRIBUTE_LEN,
    };

    let data = session.execute_stopped(|s| {
        let mut data = vec![0u8; count * unit];
        s.machine.peek_sprites(memory, index * unit, &mut data);
        Ok(data)
    })?;
    session.reply(data)
}

fn add_breakpoint(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    let long_address = r.read_long_address()?;
    let condition = r.read_string()?;
    if !condition.is_empty() {
        warn!(target: "dzrp", "breakpoint conditions are not supported: '{}'", condition);
    }

    let id = session.execute_stopped(|s| {
        Ok(s.registry.set_breakpoint(s.machine.as_ref(), long_address))
    })?;

    let mut w = PayloadWriter::with_len(2);
    w.write_u16(id.unwrap_or(0));
    session.reply(w.finish())
}

fn remove_breakpoint(session: &mut Session, r: &mut PayloadReader) -> Result<(), ProtocolError> {
    let id = r.read_u16()?;
    session.execute_stopped(|s| {
        s.registry.delete_breakpoint(s.machine.as_ref(), id);
        Ok(())
    })?;
    session.reply(vec![])
}

/// ADD_WATCHPOINT and REMOVE_WATCHPOINT: arm or disarm traps over a range
fn watchpoint(session: &mut Session, r: &mut PayloadReader, set: bool) -> Result<(), ProtocolError> {
    let long_address = r.read_long_address()?;
    let size = r.read_u16()?;
    let access = r.read_u8()?;
    if set {
        let condition = r.read_string()?;
        if !condition.is_empty() {
            warn!(target: "dzrp", "watchpoint conditions are not supported: '{}'", condition);
        }
    }

    let start = flat_address(long_address);
    debug!(
        target: "dzrp",
        "{} watchpoint {:04x}+{} access={}",
        if set { "add" } else { "remove" }, start, size, access
    );
    session.execute_stopped(|s| {
        for offset in 0..size {
            let address = start.wrapping_add(offset);
            if access & WATCH_READ != 0 {
                s.machine.debug(if set {
                    DebugCmd::SetReadWatchpoint(address)
                } else {
                    DebugCmd::ClearReadWatchpoint(address)
                });
            }
            if access & WATCH_WRITE != 0 {
                s.machine.debug(if set {
                    DebugCmd::SetWriteWatchpoint(address)
                } else {
                    DebugCmd::ClearWriteWatchpoint(address)
                });
            }
        }
        Ok(())
    })?;

    if set {
        session.reply(vec![0])
    } else {
        session.reply(vec![])
    }
}
