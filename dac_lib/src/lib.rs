//! High level emulation of the "DAC" audio UCode family found in a large number of GameCube and
//! Wii titles.
//!
//! The UCode is driven one mail at a time through [`Ucode::handle_mail`]. Everything it needs from
//! the rest of the emulator (guest RAM, ARAM, the mailbox and the DSP HLE host) is passed in
//! through a [`Bus`] for the duration of the call.

// Most of the casts in the mixer are truncations or sign changes of fixed point values that
// mirror what the DSP does, "as" is what we want.
#![allow(clippy::cast_lossless)]
#![allow(clippy::needless_range_loop)]
// Wants to rewrite some numeric comparison chains as match when it doesn't make a lot of sense
// IMO.
#![allow(clippy::comparison_chain)]
#![allow(clippy::new_without_default)]

#[macro_use]
extern crate arrayref;
#[macro_use]
extern crate log;

mod bitwise;
pub mod dsp;
pub mod error;
pub mod renderer;
pub mod ucode;

pub use dsp::host::{NextUcode, UcodeHost};
pub use dsp::mailbox::{Mail, MailQueue, MailSink};
pub use dsp::memory::{GuestMemory, MemoryAccess, Ram};
pub use dsp::Bus;
pub use error::{DacError, DacResult};
pub use ucode::flags::{UcodeDatabase, UcodeFlags};
pub use ucode::{MailState, Ucode};
