//! # DZRP Protocol
//!
//! Framing and payload encoding for the DeZog remote protocol, as spoken
//! between a debugger front end and an emulated ZX Spectrum Next.
//!
//! ## Wire Format
//!
//! Every message is length-prefixed, little-endian:
//! ```text
//! request:      [len:u32-LE][seq:u8][cmd:u8][payload...]
//! response:     [len:u32-LE][seq:u8][payload...]
//! notification: [len:u32-LE][0:u8][ntf:u8][payload...]
//! ```
//! `len` counts every byte after the length field itself. Responses echo the
//! sequence number of the request they answer; notifications always use 0.
//!
//! ## Commands
//!
//! | Code | Name | Code | Name |
//! |------|------|------|------|
//! | 1 | INIT | 12 | SET_BORDER |
//! | 2 | CLOSE | 16 | GET_SPRITES_PALETTE |
//! | 3 | GET_REGISTERS | 17 | GET_SPRITES_CLIP_WINDOW_AND_CONTROL |
//! | 4 | SET_REGISTER | 18 | GET_SPRITES |
//! | 5 | WRITE_BANK | 19 | GET_SPRITE_PATTERNS |
//! | 6 | CONTINUE | 40 | ADD_BREAKPOINT |
//! | 7 | PAUSE | 41 | REMOVE_BREAKPOINT |
//! | 8 | READ_MEM | 42 | ADD_WATCHPOINT |
//! | 9 | WRITE_MEM | 43 | REMOVE_WATCHPOINT |
//! | 10 | SET_SLOT | 50 | READ_STATE |
//! | 11 | GET_TBBLUE_REG | 51 | WRITE_STATE |

mod commands;
mod cursor;
mod messages;

pub use commands::{BreakReason, Command, MachineType, NTF_PAUSE, PROTOCOL_VERSION};
pub use cursor::{string_len, PayloadReader, PayloadWriter};
pub use messages::{
    Notification, ProtocolError, Request, Response, DEFAULT_MAX_FRAME_LEN, HEADER_LEN,
};
