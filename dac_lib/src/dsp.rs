//! Everything the UCode talks to but doesn't own: guest RAM, ARAM, the DSP->CPU mailbox and the
//! DSP HLE host that can swap the running UCode.

pub mod host;
pub mod mailbox;
pub mod memory;

use host::UcodeHost;
use mailbox::MailSink;
use memory::GuestMemory;

/// Sent once the UCode has booted
pub const DSP_INIT: u32 = 0xdcd1_0000;
/// Sent when the UCode comes back from a swap
pub const DSP_RESUME: u32 = 0xdcd1_0001;
pub const DSP_YIELD: u32 = 0xdcd1_0002;
pub const DSP_DONE: u32 = 0xdcd1_0003;
/// Standard command acknowledgment
pub const DSP_SYNC: u32 = 0xdcd1_0004;
/// All requested frames have been rendered
pub const DSP_FRAME_END: u32 = 0xdcd1_0005;

/// Connections to the rest of the emulated console, borrowed for the duration of one mail (or one
/// call into the renderer).
pub struct Bus<'a> {
    /// Main RAM, VPBs, RPBs, tables and output buffers live here
    pub ram: &'a mut dyn GuestMemory,
    /// Auxiliary RAM, source of streamed samples on UCodes that have access to it
    pub aram: &'a dyn GuestMemory,
    pub mail: &'a mut dyn MailSink,
    pub host: &'a mut dyn UcodeHost,
}

impl<'a> Bus<'a> {
    pub fn new(
        ram: &'a mut dyn GuestMemory,
        aram: &'a dyn GuestMemory,
        mail: &'a mut dyn MailSink,
        host: &'a mut dyn UcodeHost,
    ) -> Bus<'a> {
        Bus {
            ram,
            aram,
            mail,
            host,
        }
    }
}
