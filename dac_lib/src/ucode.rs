//! HLE of the "DAC" audio UCode used by most Nintendo first party GameCube and Wii titles (and the
//! IPL). The UCode receives commands one 32bit mail at a time, renders 5ms frames of audio into
//! main RAM and synchronizes with the CPU voice by voice.

pub mod command;
pub mod flags;
pub mod upload;


use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::bitwise::Bitwise;
use crate::dsp::{Bus, DSP_FRAME_END, DSP_INIT, DSP_RESUME, DSP_SYNC};
use crate::error::{DacError, DacResult};
use crate::renderer::Renderer;
use command::{CommandMail, CommandRing, ControlAction, ControlMail, SyncMail, CONTROL_MAIL_PREFIX};
use flags::{UcodeDatabase, UcodeFlags};
use num_traits::FromPrimitive;
use upload::UploadSetup;

/// Second init mail of the default protocol
const INIT_MAIL_DEFAULT: u32 = 0xf355_1111;
/// Only init mail of the light protocol
const INIT_MAIL_LIGHT: u32 = 0x8888_1111;
/// Standard acknowledgment, the low 16 bits echo the command sync field
const ACK_ECHO: u32 = 0xf355_0000;

const SAVESTATE_MAGIC: &[u8; 4] = b"ZDAC";

/// Number of entries in the voice skip mask array
const SKIP_FLAGS_LEN: usize = 0x100;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum MailState {
    /// Waiting for a command length, a sync mail or a control mail
    Waiting,
    /// Buffering the words of a command
    WritingCmd,
    /// Waiting for voice sync mails
    Rendering,
    /// Stopped until the UCode is replaced
    Halted,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum CommandAck {
    Standard,
    DoneRendering,
}

#[derive(Serialize, Deserialize)]
pub struct Ucode {
    #[serde(skip)]
    flags: UcodeFlags,
    mail_state: MailState,
    cmd_ring: CommandRing,
    /// Number of complete commands sitting in `cmd_ring`
    pending_commands: u32,
    /// Words left to receive for the command being written
    words_expected: u32,
    /// Cleared when the end of a render is signaled, the CPU has to acknowledge it before any
    /// other command runs
    cmd_can_execute: bool,
    /// SYNC_PER_FRAME: true if the next sync mail carries the second half of the skip masks
    sync_flags_second_half: bool,
    rendering_requested_frames: u32,
    rendering_voices_per_frame: u32,
    rendering_curr_frame: u32,
    rendering_curr_voice: u32,
    /// Voices with an ID greater or equal to this haven't been unlocked by the CPU yet
    sync_max_voice_id: u32,
    /// One bit per voice, MSB first. Voices with a clear bit are skipped.
    #[serde(with = "BigArray")]
    sync_voice_skip_flags: [u16; SKIP_FLAGS_LEN],
    upload_in_progress: bool,
    upload: UploadSetup,
    /// Set when we hand off to another UCode, the CPU expects DSP_RESUME when we come back
    needs_resume_mail: bool,
    renderer: Renderer,
}

impl Ucode {
    pub fn new(flags: UcodeFlags) -> Ucode {
        Ucode {
            flags,
            mail_state: MailState::Waiting,
            cmd_ring: CommandRing::new(),
            pending_commands: 0,
            words_expected: 0,
            cmd_can_execute: true,
            sync_flags_second_half: false,
            rendering_requested_frames: 0,
            rendering_voices_per_frame: 0,
            rendering_curr_frame: 0,
            rendering_curr_voice: 0,
            sync_max_voice_id: 0,
            sync_voice_skip_flags: [0; SKIP_FLAGS_LEN],
            upload_in_progress: false,
            upload: UploadSetup::new(),
            needs_resume_mail: false,
            renderer: Renderer::new(flags),
        }
    }

    /// Instantiate the UCode whose image has checksum `crc`
    pub fn from_crc(crc: u32, db: &UcodeDatabase) -> DacResult<Ucode> {
        let flags = db.lookup(crc)?;

        if let Some(meta) = flags::lookup_metadata(crc) {
            info!("Audio UCode: {} ({:08x})", meta.description, crc);
        }

        Ok(Ucode::new(flags))
    }

    pub fn flags(&self) -> UcodeFlags {
        self.flags
    }

    pub fn mail_state(&self) -> MailState {
        self.mail_state
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn rendering_in_progress(&self) -> bool {
        self.rendering_curr_frame != self.rendering_requested_frames
    }

    fn is_light(&self) -> bool {
        self.flags.contains(UcodeFlags::LIGHT_PROTOCOL)
    }

    /// Send the boot handshake
    pub fn initialize(&mut self, bus: &mut Bus) {
        if self.is_light() {
            bus.mail.push_mail(INIT_MAIL_LIGHT, false);
        } else {
            bus.mail.push_mail(DSP_INIT, true);
            bus.mail.push_mail(INIT_MAIL_DEFAULT, false);
        }
    }

    /// Called periodically by the host
    pub fn update(&mut self, bus: &mut Bus) {
        if self.needs_resume_mail && !bus.mail.has_pending() {
            self.needs_resume_mail = false;
            bus.mail.push_mail(DSP_RESUME, true);
        }
    }

    /// The host switched back to this UCode after running another one
    pub fn resume(&mut self, bus: &mut Bus) {
        self.needs_resume_mail = false;
        self.set_mail_state(MailState::Waiting);

        if !self.is_light() {
            bus.mail.push_mail(DSP_RESUME, true);
        }
    }

    /// Handle a CPU -> DSP mail
    pub fn handle_mail(&mut self, bus: &mut Bus, mail: u32) {
        #[cfg(feature = "mail_verbose")]
        debug!("CPU -> DSP mail {:08x} ({:?})", mail, self.mail_state);

        if self.upload_in_progress {
            if let Some(next) = self.upload.feed(mail) {
                info!("Handing off to a new UCode");
                self.upload_in_progress = false;
                self.needs_resume_mail = true;
                bus.host.swap_ucode(&next);
            }
            return;
        }

        if self.is_light() {
            self.handle_mail_light(bus, mail);
        } else {
            self.handle_mail_default(bus, mail);
        }
    }

    fn set_mail_state(&mut self, state: MailState) {
        if state != self.mail_state {
            debug!("Mail state {:?} -> {:?}", self.mail_state, state);
        }
        self.mail_state = state;
    }

    fn handle_mail_default(&mut self, bus: &mut Bus, mail: u32) {
        match self.mail_state {
            MailState::Waiting => {
                if mail.bit(31) {
                    self.handle_control_mail(bus, ControlMail(mail));
                } else if mail & 0xffff == 0 {
                    if self.rendering_in_progress() {
                        self.set_mail_state(MailState::Rendering);
                    } else {
                        warn!("Sync mail {:08x} with no rendering in progress, halting", mail);
                        self.set_mail_state(MailState::Halted);
                    }
                } else {
                    self.words_expected = mail & 0xffff;
                    self.set_mail_state(MailState::WritingCmd);
                }
            }
            MailState::Rendering => {
                let sync = SyncMail(mail);

                if self.flags.contains(UcodeFlags::SYNC_PER_FRAME) {
                    let base = if self.sync_flags_second_half { 2 } else { 0 };
                    self.sync_voice_skip_flags[base] = sync.hi();
                    self.sync_voice_skip_flags[base + 1] = sync.lo();

                    if self.sync_flags_second_half {
                        self.sync_max_voice_id = 0xffff;
                    }

                    self.render_audio(bus);

                    if self.sync_flags_second_half {
                        self.set_mail_state(MailState::Waiting);
                    }
                    self.sync_flags_second_half = !self.sync_flags_second_half;
                } else {
                    self.sync_max_voice_id = (sync.voice_group() as u32 + 1) << 4;
                    self.sync_voice_skip_flags[sync.skip_index() as usize] = sync.lo();

                    self.render_audio(bus);
                    self.set_mail_state(MailState::Waiting);
                }
            }
            MailState::WritingCmd => self.write_command_word(bus, mail),
            MailState::Halted => warn!("Received mail {:08x} while halted", mail),
        }
    }

    /// Reaction to the end of a render, default protocol only
    fn handle_control_mail(&mut self, bus: &mut Bus, mail: ControlMail) {
        if mail.prefix() != CONTROL_MAIL_PREFIX {
            warn!("Control mail without the {:04x} prefix: {:08x}", CONTROL_MAIL_PREFIX, mail.0);
        }

        match ControlAction::from_u16(mail.action()) {
            Some(ControlAction::ReplaceUcode) => {
                self.cmd_can_execute = true;
                self.run_pending_commands(bus);
                info!("UCode being replaced");
                self.upload_in_progress = true;
                self.set_mail_state(MailState::Waiting);
            }
            Some(ControlAction::RebootToRom) => {
                info!("UCode rebooting to ROM");
                self.set_mail_state(MailState::Halted);
                bus.host.reboot_to_rom();
            }
            Some(ControlAction::Continue) => {
                self.cmd_can_execute = true;
                self.run_pending_commands(bus);
            }
            Some(ControlAction::Halt) => {
                info!("UCode asked to halt");
                self.set_mail_state(MailState::Halted);
            }
            None => {
                info!("Unknown end of rendering action {:04x}, halting", mail.action());
                self.set_mail_state(MailState::Halted);
            }
        }
    }

    fn handle_mail_light(&mut self, bus: &mut Bus, mail: u32) {
        match self.mail_state {
            MailState::Waiting => {
                let cmd = CommandMail(mail);

                if !cmd.is_command() {
                    warn!("Mail with MSB clear while waiting for a command: {:08x}", mail);
                    return;
                }

                // The number of words is implied by the opcode
                let (extra_words, queued) = match cmd.opcode() {
                    0x01 => (4, true),
                    0x02 => (2, true),
                    0x03 => (0, false),
                    0x0c if self.flags.contains(UcodeFlags::SUPPORTS_GBA_CRYPTO) => (1, true),
                    0x0c if self.flags.contains(UcodeFlags::WEIRD_CMD_0C) => (2, true),
                    _ => (0, true),
                };

                if !queued {
                    self.run_pending_commands(bus);
                    return;
                }

                self.cmd_ring.push(mail);

                if extra_words == 0 {
                    self.pending_commands += 1;
                    self.run_pending_commands(bus);
                } else {
                    self.words_expected = extra_words;
                    self.set_mail_state(MailState::WritingCmd);
                }
            }
            MailState::Rendering => {
                if mail != 0 {
                    error!("Non-zero sync mail in the light protocol: {:08x}", mail);
                    self.set_mail_state(MailState::Halted);
                    return;
                }

                // No per voice synchronization
                self.sync_max_voice_id = u32::MAX;
                self.sync_voice_skip_flags = [0xffff; SKIP_FLAGS_LEN];

                self.render_audio(bus);
                bus.mail.raise_interrupt();
            }
            MailState::WritingCmd => self.write_command_word(bus, mail),
            MailState::Halted => warn!("Received mail {:08x} while halted", mail),
        }
    }

    fn write_command_word(&mut self, bus: &mut Bus, mail: u32) {
        self.cmd_ring.push(mail);

        self.words_expected = self.words_expected.saturating_sub(1);
        if self.words_expected == 0 {
            self.pending_commands += 1;
            self.set_mail_state(MailState::Waiting);
            self.run_pending_commands(bus);
        }
    }

    /// Read a command parameter
    fn read_word(&mut self) -> u32 {
        match self.cmd_ring.pop() {
            Some(w) => w,
            None => {
                error!("Command ring underflow while reading a parameter");
                0
            }
        }
    }

    fn run_pending_commands(&mut self, bus: &mut Bus) {
        // Nothing runs while rendering or while the end of the last render hasn't been
        // acknowledged
        if self.rendering_in_progress() || !self.cmd_can_execute {
            return;
        }

        while self.pending_commands > 0 {
            let cmd = match self.cmd_ring.pop() {
                Some(w) => CommandMail(w),
                None => {
                    error!(
                        "Command ring drained with {} commands still pending",
                        self.pending_commands
                    );
                    self.pending_commands = 0;
                    return;
                }
            };

            // Resynchronize on the next command header
            if !cmd.is_command() {
                continue;
            }

            self.pending_commands -= 1;

            let sync = cmd.sync();
            let extra = cmd.extra();

            match cmd.opcode() {
                op @ (0x00 | 0x0a | 0x0b | 0x0f) => {
                    debug!("NOP command {:02x}", op);
                    self.send_command_ack(bus, CommandAck::Standard, sync);
                }
                0x03 => {
                    if self.is_light() {
                        error!("Command 03 reached the dispatcher in the light protocol");
                    } else {
                        debug!("NOP command 03");
                        self.send_command_ack(bus, CommandAck::Standard, sync);
                    }
                }
                op @ 0x04..=0x09 => {
                    info!("Crashy command {:02x}, halting", op);
                    self.set_mail_state(MailState::Halted);
                    return;
                }
                0x01 => {
                    self.rendering_voices_per_frame = extra as u32;

                    let vpb_base = self.read_word();
                    let tables = self.read_word();
                    let afc_coeffs = self.read_word();
                    let reverb_base = self.read_word();

                    self.renderer.set_vpb_base_addr(vpb_base);
                    self.renderer.load_tables(bus, tables);
                    self.renderer.load_afc_coeffs(bus, afc_coeffs);
                    self.renderer.set_reverb_pb_base_addr(reverb_base);

                    self.send_command_ack(bus, CommandAck::Standard, sync);
                }
                0x02 => {
                    self.rendering_requested_frames = cmd.frames() as u32;
                    self.renderer.set_output_volume(extra);

                    let left = self.read_word();
                    let right = self.read_word();
                    self.renderer.set_output_left_buffer_addr(left);
                    self.renderer.set_output_right_buffer_addr(right);

                    if self.flags.contains(UcodeFlags::COMBINED_CMD_0D) {
                        self.read_word();
                        self.read_word();
                    }

                    self.rendering_curr_frame = 0;
                    self.rendering_curr_voice = 0;

                    if self.is_light() {
                        let frames = self.rendering_requested_frames as u16;
                        self.send_command_ack(bus, CommandAck::Standard, frames);
                        self.set_mail_state(MailState::Rendering);
                    } else {
                        self.render_audio(bus);
                    }

                    // Rendering takes over until the end of the frames
                    return;
                }
                0x0c => {
                    if self.flags.contains(UcodeFlags::SUPPORTS_GBA_CRYPTO) {
                        let addr = self.read_word();
                        bus.host.process_gba_crypto(addr);
                    } else if self.flags.contains(UcodeFlags::WEIRD_CMD_0C) {
                        let a = self.read_word();
                        let b = self.read_word();
                        warn!("Command 0C: {:08x} {:08x}", a, b);
                    } else {
                        warn!("Unhandled command 0C, extra {:04x}", extra);
                    }
                    self.send_command_ack(bus, CommandAck::Standard, sync);
                }
                0x0d => {
                    if self.flags.contains(UcodeFlags::NO_CMD_0D) {
                        warn!("Command 0D is a NOP on this UCode");
                    } else {
                        let param = self.read_word();
                        warn!("Command 0D: {:08x}", param);
                    }
                    self.send_command_ack(bus, CommandAck::Standard, sync);
                }
                0x0e => {
                    if !self.flags.contains(UcodeFlags::NO_ARAM) {
                        error!("Command 0E on a UCode with ARAM access");
                    }
                    let addr = self.read_word();
                    self.renderer.set_aram_base_addr(addr);
                    self.send_command_ack(bus, CommandAck::Standard, sync);
                }
                op => {
                    error!("Unknown command {:02x}, halting", op);
                    self.set_mail_state(MailState::Halted);
                    return;
                }
            }
        }
    }

    fn send_command_ack(&mut self, bus: &mut Bus, ack: CommandAck, sync: u16) {
        debug!("Command ack {:?} {:04x}", ack, sync);

        if self.is_light() {
            // The light protocol acks with the address of the command handler. For render acks
            // the "sync" is the frame count, whose bits 14..8 are always 0. The end of a render
            // isn't signaled at all.
            if ack == CommandAck::DoneRendering {
                error!("End of render ack in the light protocol");
                return;
            }
            let handler = 2 * ((sync as u32 >> 8) & 0x7f) + 0x62;

            bus.mail.push_mail(0x8000_0000 | handler, false);
        } else {
            match ack {
                CommandAck::Standard => {
                    bus.mail.push_mail(DSP_SYNC, true);
                    bus.mail.push_mail(ACK_ECHO | sync as u32, false);
                }
                CommandAck::DoneRendering => bus.mail.push_mail(DSP_FRAME_END, true),
            }
        }
    }

    /// Render as many voices as the CPU allowed us to. Returns early if we need to wait for the
    /// next sync mail.
    fn render_audio(&mut self, bus: &mut Bus) {
        if !self.rendering_in_progress() {
            warn!("Rendering requested while no rendering is in progress");
            return;
        }

        while self.rendering_curr_frame < self.rendering_requested_frames {
            if self.rendering_curr_voice == 0 {
                self.renderer.prepare_frame(bus);
            }

            while self.rendering_curr_voice < self.rendering_voices_per_frame {
                let voice = self.rendering_curr_voice;

                if voice >= self.sync_max_voice_id {
                    return;
                }

                let skip_flags = self
                    .sync_voice_skip_flags
                    .get((voice >> 4) as usize)
                    .copied()
                    .unwrap_or(0);
                let bit = 0xf - (voice & 0xf) as u8;

                if skip_flags.bit(bit) {
                    self.renderer.add_voice(bus, voice as u16);
                }

                self.rendering_curr_voice += 1;
            }

            if !self.is_light() {
                let sync = 0xff00 | (self.rendering_curr_frame as u16 & 0xff);
                self.send_command_ack(bus, CommandAck::Standard, sync);
            }

            self.renderer.finalize_frame(bus);

            self.rendering_curr_voice = 0;
            self.sync_max_voice_id = 0;
            self.rendering_curr_frame += 1;
        }

        if self.is_light() {
            self.set_mail_state(MailState::Waiting);
        } else {
            self.send_command_ack(bus, CommandAck::DoneRendering, 0);
            // Wait for the CPU to acknowledge the end of the render
            self.cmd_can_execute = false;
        }
    }

    /// Serialize the complete UCode state
    pub fn save_state(&self) -> DacResult<Vec<u8>> {
        let mut fb = flexbuffers::FlexbufferSerializer::new();

        self.serialize(&mut fb)?;

        let payload = fb.view();
        let mut buf = Vec::with_capacity(8 + payload.len());

        buf.extend_from_slice(SAVESTATE_MAGIC);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(payload);

        Ok(buf)
    }

    /// Restore a state saved with `save_state`. Flags aren't part of the state: the current ones
    /// are kept.
    pub fn load_state(&mut self, buf: &[u8]) -> DacResult<()> {
        if buf.len() < 8 || buf[0..4] != *SAVESTATE_MAGIC {
            return Err(DacError::BadSavestateMagic);
        }

        let len = u32::from_le_bytes(*array_ref![buf, 4, 4]) as usize;
        let payload = &buf[8..];

        if payload.len() < len {
            return Err(DacError::TruncatedSavestate {
                expected: len,
                got: payload.len(),
            });
        }

        let fbr = flexbuffers::Reader::get_root(&payload[..len])?;
        let mut state = Ucode::deserialize(fbr)?;

        state.flags = self.flags;
        state.renderer.set_flags(self.flags);

        *self = state;

        Ok(())
    }
}
