//! Audio rendering engine: mixing buses, per voice processing and frame boundaries. Doesn't know
//! anything about the mail protocol.

pub mod afc;
pub mod mix;
pub mod reverb;
pub mod source;
pub mod vpb;

use serde_big_array::BigArray;

use crate::dsp::memory::MemoryAccess;
use crate::dsp::Bus;
use crate::ucode::flags::UcodeFlags;
use mix::{
    add_buffers_with_volume, add_buffers_with_volume_ramp, apply_volume_1_15, apply_volume_4_12,
    ramp_step, MixingBuffer, MIXING_BUFFER_LEN,
};
use reverb::ReverbState;
use source::PATTERN_LEN;
use vpb::{Vpb, VpbLayout, VPB_WORDS};

/// The mixing buses
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BufferId {
    FrontLeft = 0,
    FrontRight = 1,
    BackLeft = 2,
    BackRight = 3,
    FrontLeftReverb = 4,
    FrontRightReverb = 5,
    BackLeftReverb = 6,
    BackRightReverb = 7,
    Unk0Reverb = 8,
    Unk1Reverb = 9,
    /// Used by the IPL as a reverb destination
    Unk0 = 10,
    /// Used by the IPL as a mixing destination
    Unk1 = 11,
    /// Used by Pikmin 2 as a reverb destination
    Unk2 = 12,
}

pub const BUFFER_COUNT: usize = 13;

impl BufferId {
    /// Resolve the buffer IDs found in VPBs and RPBs. They're the addresses of the buffers in DSP
    /// memory.
    pub fn from_dest_id(id: u16) -> Option<BufferId> {
        let b = match id {
            0x0d00 => BufferId::FrontLeft,
            0x0d60 => BufferId::FrontRight,
            0x0f40 => BufferId::BackLeft,
            0x0ca0 => BufferId::BackRight,
            0x0e80 => BufferId::FrontLeftReverb,
            0x0ee0 => BufferId::FrontRightReverb,
            0x0c00 => BufferId::BackLeftReverb,
            0x0c50 => BufferId::BackRightReverb,
            0x0dc0 => BufferId::Unk0Reverb,
            0x0e20 => BufferId::Unk1Reverb,
            0x09a0 => BufferId::Unk0,
            0x0fa0 => BufferId::Unk1,
            0x0b00 => BufferId::Unk2,
            _ => return None,
        };

        Some(b)
    }
}

/// Attenuation applied to the back buses at the start of each frame, 1.15
const BACK_DECAY: u16 = 0x6784;
/// Weights used to fold the back reverb buses into the front ones
const REVERB_FOLD_SAME_SIDE: u16 = 0x7fff;
const REVERB_FOLD_OTHER_SIDE: u16 = 0xb820;

pub const RESAMPLING_COEFFS_LEN: usize = 0x100;
pub const CONST_PATTERNS_LEN: usize = 4 * PATTERN_LEN;
pub const SINE_TABLE_LEN: usize = 0x80;
pub const AFC_COEFFS_LEN: usize = 0x20;

#[derive(serde::Serialize, serde::Deserialize)]
pub struct Renderer {
    #[serde(skip)]
    flags: UcodeFlags,
    /// True once `prepare_frame` has run for the current frame
    prepared: bool,
    buffers: [MixingBuffer; BUFFER_COUNT],
    /// 4.12
    output_volume: u16,
    output_lbuf_addr: u32,
    output_rbuf_addr: u32,
    vpb_base_addr: u32,
    reverb_pb_base_addr: u32,
    /// Where ARAM offsets point to in main RAM on NO_ARAM UCodes
    aram_base_addr: u32,
    #[serde(with = "BigArray")]
    resampling_coeffs: [i16; RESAMPLING_COEFFS_LEN],
    /// Patterns 0 and 1 are constant, 2 and 3 are regenerated every frame
    #[serde(with = "BigArray")]
    const_patterns: [i16; CONST_PATTERNS_LEN],
    #[serde(with = "BigArray")]
    sine_table: [i16; SINE_TABLE_LEN],
    afc_coeffs: [i16; AFC_COEFFS_LEN],
    reverb: ReverbState,
}

impl Renderer {
    pub fn new(flags: UcodeFlags) -> Renderer {
        Renderer {
            flags,
            prepared: false,
            buffers: [MixingBuffer::new(); BUFFER_COUNT],
            output_volume: 0,
            output_lbuf_addr: 0,
            output_rbuf_addr: 0,
            vpb_base_addr: 0,
            reverb_pb_base_addr: 0,
            aram_base_addr: 0,
            resampling_coeffs: [0; RESAMPLING_COEFFS_LEN],
            const_patterns: [0; CONST_PATTERNS_LEN],
            sine_table: [0; SINE_TABLE_LEN],
            afc_coeffs: [0; AFC_COEFFS_LEN],
            reverb: ReverbState::new(),
        }
    }

    /// Flags aren't part of savestates, they have to be restored after a load
    pub fn set_flags(&mut self, flags: UcodeFlags) {
        self.flags = flags;
    }

    pub fn buffer(&self, id: BufferId) -> &MixingBuffer {
        &self.buffers[id as usize]
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut MixingBuffer {
        &mut self.buffers[id as usize]
    }

    pub fn set_vpb_base_addr(&mut self, addr: u32) {
        self.vpb_base_addr = addr;
    }

    pub fn set_reverb_pb_base_addr(&mut self, addr: u32) {
        self.reverb_pb_base_addr = addr;
    }

    pub fn set_aram_base_addr(&mut self, addr: u32) {
        self.aram_base_addr = addr;
    }

    pub fn set_output_volume(&mut self, vol: u16) {
        self.output_volume = vol;
    }

    pub fn set_output_left_buffer_addr(&mut self, addr: u32) {
        self.output_lbuf_addr = addr;
    }

    pub fn set_output_right_buffer_addr(&mut self, addr: u32) {
        self.output_rbuf_addr = addr;
    }

    pub fn output_buffer_addrs(&self) -> (u32, u32) {
        (self.output_lbuf_addr, self.output_rbuf_addr)
    }

    /// Download the resampling coefficients, the constant patterns and (unless the light
    /// protocol is in use) the sine table. They're stored back to back at `addr`.
    pub fn load_tables(&mut self, bus: &Bus, addr: u32) {
        let word = |i: usize| bus.ram.load_i16(addr.wrapping_add(i as u32 * 2));

        for (i, c) in self.resampling_coeffs.iter_mut().enumerate() {
            *c = word(i);
        }

        for (i, p) in self.const_patterns.iter_mut().enumerate() {
            *p = word(RESAMPLING_COEFFS_LEN + i);
        }

        // Only used for positional mixing, which the light protocol UCodes don't do
        if !self.flags.contains(UcodeFlags::LIGHT_PROTOCOL) {
            for (i, s) in self.sine_table.iter_mut().enumerate() {
                *s = word(RESAMPLING_COEFFS_LEN + CONST_PATTERNS_LEN + i);
            }
        }
    }

    pub fn load_afc_coeffs(&mut self, bus: &Bus, addr: u32) {
        for (i, c) in self.afc_coeffs.iter_mut().enumerate() {
            *c = bus.ram.load_i16(addr.wrapping_add(i as u32 * 2));
        }
    }

    pub fn const_patterns(&self) -> &[i16; CONST_PATTERNS_LEN] {
        &self.const_patterns
    }

    /// Reset the buses for a new frame. Does nothing if called again before `finalize_frame`.
    pub fn prepare_frame(&mut self, bus: &mut Bus) {
        if self.prepared {
            return;
        }

        self.buffer_mut(BufferId::FrontLeft).fill(0);
        self.buffer_mut(BufferId::FrontRight).fill(0);

        apply_volume_1_15(&mut self.buffer_mut(BufferId::BackLeft)[..], BACK_DECAY);
        apply_volume_1_15(&mut self.buffer_mut(BufferId::BackRight)[..], BACK_DECAY);

        self.apply_reverb(bus, false);

        let back_left = *self.buffer(BufferId::BackLeftReverb);
        let back_right = *self.buffer(BufferId::BackRightReverb);

        let fl = self.buffer_mut(BufferId::FrontLeftReverb);
        add_buffers_with_volume(&mut fl[..], &back_left[..], REVERB_FOLD_SAME_SIDE);
        add_buffers_with_volume(&mut fl[..], &back_right[..], REVERB_FOLD_OTHER_SIDE);

        let fr = self.buffer_mut(BufferId::FrontRightReverb);
        add_buffers_with_volume(&mut fr[..], &back_left[..], REVERB_FOLD_OTHER_SIDE);
        add_buffers_with_volume(&mut fr[..], &back_right[..], REVERB_FOLD_SAME_SIDE);

        self.buffer_mut(BufferId::BackLeftReverb).fill(0);
        self.buffer_mut(BufferId::BackRightReverb).fill(0);

        self.regenerate_patterns();

        self.prepared = true;
    }

    /// Patterns 2 and 3 evolve from frame to frame
    fn regenerate_patterns(&mut self) {
        let pattern2 = &mut self.const_patterns[2 * PATTERN_LEN..3 * PATTERN_LEN];

        let mut yn2 = pattern2[PATTERN_LEN - 2] as i32;
        let mut yn1 = pattern2[PATTERN_LEN - 1] as i32;

        for (i, p) in pattern2.iter_mut().enumerate() {
            let input = (*p as i32) << 16;

            let v = if i % 2 == 0 {
                yn2.wrapping_mul(yn1).wrapping_sub(input)
            } else {
                yn2.wrapping_mul(yn1).wrapping_add(input).wrapping_mul(2)
            };

            *p = (v >> 16) as i16;
            yn2 = yn1;
            yn1 = *p as i32;
        }

        let pattern3 = &mut self.const_patterns[3 * PATTERN_LEN..4 * PATTERN_LEN];

        let yn2 = pattern3[PATTERN_LEN - 2] as i32;
        let yn1 = pattern3[PATTERN_LEN - 1] as i32;
        let acc = yn1 as i16;

        let seed = yn1.wrapping_mul(yn2).wrapping_add((yn2 << 16).wrapping_add(yn1)) >> 16;
        let step = (pattern3[0] as i32).wrapping_add(seed) as i16;
        let step = (step & 0x1ff) | 0x2000;

        for (i, p) in pattern3.iter_mut().enumerate() {
            *p = acc.wrapping_add(((i as i16) + 1).wrapping_mul(step));
        }
    }

    fn fetch_vpb(&self, bus: &Bus, voice_id: u16) -> Vpb {
        let layout = VpbLayout::for_flags(self.flags);
        let count = layout.word_count();
        let addr = self
            .vpb_base_addr
            .wrapping_add(voice_id as u32 * count as u32 * 2);

        let mut raw = [0u16; VPB_WORDS];
        for (i, w) in raw.iter_mut().take(count).enumerate() {
            *w = bus.ram.load::<u16>(addr.wrapping_add(i as u32 * 2));
        }

        Vpb::from_words(&layout.expand(&raw[..count]))
    }

    fn store_vpb(&self, bus: &mut Bus, voice_id: u16, vpb: &Vpb) {
        let layout = VpbLayout::for_flags(self.flags);
        let count = layout.word_count();
        let addr = self
            .vpb_base_addr
            .wrapping_add(voice_id as u32 * count as u32 * 2);

        let raw = layout.compact(&vpb.to_words());
        for (i, &w) in raw.iter().take(count).enumerate() {
            bus.ram.store::<u16>(addr.wrapping_add(i as u32 * 2), w);
        }
    }

    /// Render voice `voice_id` into the mixing buses
    pub fn add_voice(&mut self, bus: &mut Bus, voice_id: u16) {
        let mut vpb = self.fetch_vpb(bus, voice_id);

        if vpb.enabled == 0 || vpb.done != 0 {
            return;
        }

        let input = self.load_input_samples(bus, &mut vpb);

        if vpb.use_dolby_volume != 0 {
            self.mix_dolby(&mut vpb, &input);
        } else {
            self.mix_channels(&mut vpb, &input);
        }

        // The VPB has been taken into account, unless it's just outputting silence
        if vpb.use_constant_sample == 0 {
            vpb.reset_vpb = 0;
        }

        self.store_vpb(bus, voice_id, &vpb);
    }

    /// Positional mixing: the voice is spread over the 4 quadrants using the sine table
    fn mix_dolby(&mut self, vpb: &mut Vpb, input: &MixingBuffer) {
        if vpb.end_requested != 0 {
            vpb.dolby_volume_target = vpb.dolby_volume_current / 2;
            if vpb.dolby_volume_target == 0 {
                vpb.done = 1;
            }
        }

        // 1.15
        let right = self.sine_table[vpb.dolby_x()] as i32;
        let back = self.sine_table[vpb.dolby_y()] as i32;
        let left = self.sine_table[vpb.dolby_x() ^ 0x7f] as i32;
        let front = self.sine_table[vpb.dolby_y() ^ 0x7f] as i32;

        let shift = if self.flags.contains(UcodeFlags::MAKE_DOLBY_LOUDER) {
            15
        } else {
            16
        };

        let quadrants: [i16; 4] = [
            ((left * front) >> shift) as i16,
            ((left * back) >> shift) as i16,
            ((right * front) >> shift) as i16,
            ((right * back) >> shift) as i16,
        ];

        let delta = vpb
            .dolby_volume_target
            .wrapping_sub(vpb.dolby_volume_current) as i32;
        let current = vpb.dolby_volume_current as i32;
        let reverb_factor = vpb.dolby_reverb_factor as i32;

        let deltas = quadrants.map(|q| ((q as u16 as i32).wrapping_mul(delta) >> shift) as i16);
        let volumes = quadrants.map(|q| ((q as i32 * current) >> shift) as i16);

        let reverb_volume = ((current * reverb_factor) >> (shift - 1)) as i16 as i32;
        let reverb_volumes = volumes.map(|v| ((v as i32 * reverb_volume) >> shift) as i16);
        let reverb_deltas = deltas.map(|d| ((d as i32 * reverb_factor) >> shift) as i16);

        let targets = [
            (BufferId::FrontLeft, volumes[0], deltas[0]),
            (BufferId::BackLeft, volumes[1], deltas[1]),
            (BufferId::FrontRight, volumes[2], deltas[2]),
            (BufferId::BackRight, volumes[3], deltas[3]),
            (BufferId::FrontLeftReverb, reverb_volumes[0], reverb_deltas[0]),
            (BufferId::BackLeftReverb, reverb_volumes[1], reverb_deltas[1]),
            (BufferId::FrontRightReverb, reverb_volumes[2], reverb_deltas[2]),
            (BufferId::BackRightReverb, reverb_volumes[3], reverb_deltas[3]),
        ];

        for (id, volume, delta) in targets {
            add_buffers_with_volume_ramp(
                self.buffer_mut(id),
                input,
                (volume as i32) << 16,
                ramp_step(delta),
            );
        }

        vpb.dolby_volume_current = vpb.dolby_volume_target;
    }

    /// Per-channel mixing with an explicit destination bus for each channel
    fn mix_channels(&mut self, vpb: &mut Vpb, input: &MixingBuffer) {
        let num_channels = if self.flags.contains(UcodeFlags::FOUR_MIXING_DESTS) {
            4
        } else {
            6
        };

        if vpb.end_requested != 0 {
            let mut all_mute = true;

            for c in vpb.channels[..num_channels].iter_mut() {
                c.target_volume = c.current_volume / 2;
                all_mute &= c.target_volume == 0;
            }

            if all_mute {
                vpb.done = 1;
            }
        }

        for c in vpb.channels[..num_channels].iter_mut() {
            if c.id == 0 {
                continue;
            }

            let delta = if self.flags.contains(UcodeFlags::VOLUME_EXPLICIT_STEP) {
                c.target_volume
            } else {
                c.target_volume.wrapping_sub(c.current_volume)
            };

            let step = ramp_step(delta);

            if c.current_volume == 0 && step == 0 {
                continue;
            }

            let id = match BufferId::from_dest_id(c.id) {
                Some(id) => id,
                None => {
                    warn!("Mixing to an unmapped buffer: {:04x}", c.id);
                    continue;
                }
            };

            let vol = add_buffers_with_volume_ramp(
                &mut self.buffers[id as usize],
                input,
                (c.current_volume as i32) << 16,
                step,
            );

            c.current_volume = (vol >> 16) as i16;
        }
    }

    /// Apply the output volume and write the front buses to the output buffers
    pub fn finalize_frame(&mut self, bus: &mut Bus) {
        apply_volume_4_12(
            &mut self.buffers[BufferId::FrontLeft as usize][..],
            self.output_volume,
        );
        apply_volume_4_12(
            &mut self.buffers[BufferId::FrontRight as usize][..],
            self.output_volume,
        );

        let left = *self.buffer(BufferId::FrontLeft);
        let right = *self.buffer(BufferId::FrontRight);

        for i in 0..MIXING_BUFFER_LEN as u32 {
            let idx = i as usize;

            bus.ram
                .store::<u16>(self.output_lbuf_addr.wrapping_add(i * 2), left[idx] as u16);
            bus.ram
                .store::<u16>(self.output_rbuf_addr.wrapping_add(i * 2), right[idx] as u16);
        }

        let frame_bytes = (MIXING_BUFFER_LEN * 2) as u32;
        self.output_lbuf_addr = self.output_lbuf_addr.wrapping_add(frame_bytes);
        self.output_rbuf_addr = self.output_rbuf_addr.wrapping_add(frame_bytes);

        self.apply_reverb(bus, true);

        self.prepared = false;
    }
}
