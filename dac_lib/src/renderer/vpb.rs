//! Voice Parameter Blocks. VPBs live in guest RAM as arrays of big endian halfwords; they're
//! decoded into a `Vpb` before processing a voice and encoded back afterwards. Every word the
//! mixer doesn't know about is carried verbatim.

use crate::ucode::flags::UcodeFlags;

/// Size of a full VPB, in halfwords
pub const VPB_WORDS: usize = 0xc0;
/// Size of a legacy VPB, in halfwords
pub const LEGACY_VPB_WORDS: usize = 0x80;

pub const VPB_CHANNELS: usize = 6;

/// Mapping between the legacy and full layouts: (legacy offset, full offset, length).
///
/// Legacy VPBs only have 4 channels and no Dolby block, the space is used for the streaming
/// state instead: the decoded AFC block lives at 0x20 and the ARAM cursor, remaining length and
/// decoded sample count at 0x30. The read-only part starts at 0x40 instead of 0x80. Full layout
/// words not covered here don't exist in legacy VPBs.
const LEGACY_SEGMENTS: [(usize, usize, usize); 5] = [
    (0x00, 0x00, 0x20),
    (0x20, 0x48, 0x10),
    (0x30, 0x40, 0x05),
    (0x35, 0x35, 0x0b),
    (0x40, 0x80, 0x40),
];

/// On-RAM layout of the VPBs
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VpbLayout {
    Full,
    Legacy,
}

impl VpbLayout {
    pub fn for_flags(flags: UcodeFlags) -> VpbLayout {
        if flags.contains(UcodeFlags::TINY_VPB) {
            VpbLayout::Legacy
        } else {
            VpbLayout::Full
        }
    }

    /// Size of one VPB in RAM, in halfwords
    pub fn word_count(self) -> usize {
        match self {
            VpbLayout::Full => VPB_WORDS,
            VpbLayout::Legacy => LEGACY_VPB_WORDS,
        }
    }

    /// Convert `raw` (`word_count()` words in this layout) to the full layout
    pub fn expand(self, raw: &[u16]) -> [u16; VPB_WORDS] {
        let mut words = [0; VPB_WORDS];

        match self {
            VpbLayout::Full => words.copy_from_slice(&raw[..VPB_WORDS]),
            VpbLayout::Legacy => {
                for &(legacy, full, len) in &LEGACY_SEGMENTS {
                    words[full..full + len].copy_from_slice(&raw[legacy..legacy + len]);
                }
            }
        }

        words
    }

    /// Convert full layout `words` to this layout. Only the first `word_count()` words of the
    /// returned array are meaningful.
    pub fn compact(self, words: &[u16; VPB_WORDS]) -> [u16; VPB_WORDS] {
        match self {
            VpbLayout::Full => *words,
            VpbLayout::Legacy => {
                let mut raw = [0; VPB_WORDS];

                for &(legacy, full, len) in &LEGACY_SEGMENTS {
                    raw[legacy..legacy + len].copy_from_slice(&words[full..full + len]);
                }

                raw
            }
        }
    }
}

/// One output channel of a voice in channel (non-positional) mode
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct VpbChannel {
    /// Destination buffer ID, 0 if unused
    pub id: u16,
    /// Target volume, or the ramp delta on UCodes with explicit volume steps
    pub target_volume: i16,
    pub current_volume: i16,
    /// Supposed to tell when the channel can be skipped. The mixer never looks at it.
    pub skip_value: u16,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Vpb {
    pub enabled: u16,
    pub done: u16,
    /// 4.12 fixed point
    pub resampling_ratio: u16,
    pub unk_03: u16,
    /// Set by the CPU when (re)starting a voice, cleared once the voice has been rendered
    pub reset_vpb: u16,
    pub end_reached: u16,
    /// Output `constant_sample` instead of actually reading the sample source
    pub use_constant_sample: u16,
    pub samples_before_loop: u16,
    pub unk_08: [u16; 3],
    /// Fade the voice out and mark it done once silent
    pub end_requested: u16,
    pub unk_0c: u16,
    pub use_dolby_volume: u16,
    pub unk_0e: [u16; 2],
    pub channels: [VpbChannel; VPB_CHANNELS],
    pub unk_28: [u16; 8],
    pub dolby_voice_x: u16,
    pub dolby_voice_y: u16,
    pub dolby_reverb_factor: i16,
    pub dolby_volume_current: i16,
    pub dolby_volume_target: i16,
    pub unk_35: [u16; 3],
    pub current_pos_frac: u16,
    pub unk_39: u16,
    pub constant_sample: i16,
    pub unk_3b: u16,
    /// Last 4 raw input samples of the previous frame
    pub resample_buffer: [i16; 4],
    pub current_aram_addr: u32,
    pub remaining_length: u32,
    pub afc_remaining_decoded_samples: u16,
    pub unk_45: [u16; 3],
    /// Last decoded AFC block. The two last entries double as the decoder history.
    pub afc_remaining_samples: [i16; 16],
    pub unk_58: [u16; 0x28],
    pub samples_source_type: u16,
    pub is_looping: u16,
    pub loop_yn1: i16,
    pub loop_yn2: i16,
    pub loop_address: u32,
    pub loop_start_position: u32,
    pub base_address: u32,
    pub current_position: u32,
    pub unk_8c: [u16; 0x34],
}

fn signed<const N: usize>(w: &[u16; N]) -> [i16; N] {
    w.map(|v| v as i16)
}

fn unsigned<const N: usize>(w: &[i16; N]) -> [u16; N] {
    w.map(|v| v as u16)
}

fn put(words: &mut [u16; VPB_WORDS], offset: usize, v: &[u16]) {
    words[offset..offset + v.len()].copy_from_slice(v);
}

fn put_u32(words: &mut [u16; VPB_WORDS], offset: usize, v: u32) {
    words[offset] = (v >> 16) as u16;
    words[offset + 1] = v as u16;
}

impl Vpb {
    pub fn from_words(w: &[u16; VPB_WORDS]) -> Vpb {
        let u32_at = |offset: usize| ((w[offset] as u32) << 16) | w[offset + 1] as u32;

        let mut channels = [VpbChannel::default(); VPB_CHANNELS];
        for (i, c) in channels.iter_mut().enumerate() {
            let raw = array_ref![w, 0x10 + i * 4, 4];

            *c = VpbChannel {
                id: raw[0],
                target_volume: raw[1] as i16,
                current_volume: raw[2] as i16,
                skip_value: raw[3],
            };
        }

        Vpb {
            enabled: w[0x00],
            done: w[0x01],
            resampling_ratio: w[0x02],
            unk_03: w[0x03],
            reset_vpb: w[0x04],
            end_reached: w[0x05],
            use_constant_sample: w[0x06],
            samples_before_loop: w[0x07],
            unk_08: *array_ref![w, 0x08, 3],
            end_requested: w[0x0b],
            unk_0c: w[0x0c],
            use_dolby_volume: w[0x0d],
            unk_0e: *array_ref![w, 0x0e, 2],
            channels,
            unk_28: *array_ref![w, 0x28, 8],
            dolby_voice_x: w[0x30],
            dolby_voice_y: w[0x31],
            dolby_reverb_factor: w[0x32] as i16,
            dolby_volume_current: w[0x33] as i16,
            dolby_volume_target: w[0x34] as i16,
            unk_35: *array_ref![w, 0x35, 3],
            current_pos_frac: w[0x38],
            unk_39: w[0x39],
            constant_sample: w[0x3a] as i16,
            unk_3b: w[0x3b],
            resample_buffer: signed(array_ref![w, 0x3c, 4]),
            current_aram_addr: u32_at(0x40),
            remaining_length: u32_at(0x42),
            afc_remaining_decoded_samples: w[0x44],
            unk_45: *array_ref![w, 0x45, 3],
            afc_remaining_samples: signed(array_ref![w, 0x48, 16]),
            unk_58: *array_ref![w, 0x58, 0x28],
            samples_source_type: w[0x80],
            is_looping: w[0x81],
            loop_yn1: w[0x82] as i16,
            loop_yn2: w[0x83] as i16,
            loop_address: u32_at(0x84),
            loop_start_position: u32_at(0x86),
            base_address: u32_at(0x88),
            current_position: u32_at(0x8a),
            unk_8c: *array_ref![w, 0x8c, 0x34],
        }
    }

    pub fn to_words(&self) -> [u16; VPB_WORDS] {
        let mut w = [0; VPB_WORDS];

        w[0x00] = self.enabled;
        w[0x01] = self.done;
        w[0x02] = self.resampling_ratio;
        w[0x03] = self.unk_03;
        w[0x04] = self.reset_vpb;
        w[0x05] = self.end_reached;
        w[0x06] = self.use_constant_sample;
        w[0x07] = self.samples_before_loop;
        put(&mut w, 0x08, &self.unk_08);
        w[0x0b] = self.end_requested;
        w[0x0c] = self.unk_0c;
        w[0x0d] = self.use_dolby_volume;
        put(&mut w, 0x0e, &self.unk_0e);

        for (i, c) in self.channels.iter().enumerate() {
            put(
                &mut w,
                0x10 + i * 4,
                &[
                    c.id,
                    c.target_volume as u16,
                    c.current_volume as u16,
                    c.skip_value,
                ],
            );
        }

        put(&mut w, 0x28, &self.unk_28);
        w[0x30] = self.dolby_voice_x;
        w[0x31] = self.dolby_voice_y;
        w[0x32] = self.dolby_reverb_factor as u16;
        w[0x33] = self.dolby_volume_current as u16;
        w[0x34] = self.dolby_volume_target as u16;
        put(&mut w, 0x35, &self.unk_35);
        w[0x38] = self.current_pos_frac;
        w[0x39] = self.unk_39;
        w[0x3a] = self.constant_sample as u16;
        w[0x3b] = self.unk_3b;
        put(&mut w, 0x3c, &unsigned(&self.resample_buffer));
        put_u32(&mut w, 0x40, self.current_aram_addr);
        put_u32(&mut w, 0x42, self.remaining_length);
        w[0x44] = self.afc_remaining_decoded_samples;
        put(&mut w, 0x45, &self.unk_45);
        put(&mut w, 0x48, &unsigned(&self.afc_remaining_samples));
        put(&mut w, 0x58, &self.unk_58);
        w[0x80] = self.samples_source_type;
        w[0x81] = self.is_looping;
        w[0x82] = self.loop_yn1 as u16;
        w[0x83] = self.loop_yn2 as u16;
        put_u32(&mut w, 0x84, self.loop_address);
        put_u32(&mut w, 0x86, self.loop_start_position);
        put_u32(&mut w, 0x88, self.base_address);
        put_u32(&mut w, 0x8a, self.current_position);
        put(&mut w, 0x8c, &self.unk_8c);

        w
    }

    /// Pan position, 7 bits
    pub fn dolby_x(&self) -> usize {
        (self.dolby_voice_x & 0x7f) as usize
    }

    /// Pan position, 7 bits
    pub fn dolby_y(&self) -> usize {
        (self.dolby_voice_y & 0x7f) as usize
    }

    /// AFC decoder history, most recent sample
    pub fn afc_yn1(&self) -> i16 {
        self.afc_remaining_samples[0xf]
    }

    /// AFC decoder history, second most recent sample
    pub fn afc_yn2(&self) -> i16 {
        self.afc_remaining_samples[0xe]
    }

    pub fn set_afc_history(&mut self, yn1: i16, yn2: i16) {
        self.afc_remaining_samples[0xf] = yn1;
        self.afc_remaining_samples[0xe] = yn2;
    }

    /// Raw MRAM sources only track the integer part of the position
    pub fn current_position_hi(&self) -> u16 {
        (self.current_position >> 16) as u16
    }

    pub fn set_current_position_hi(&mut self, v: u16) {
        self.current_position = ((v as u32) << 16) | (self.current_position & 0xffff);
    }

    pub fn loop_start_position_hi(&self) -> u16 {
        (self.loop_start_position >> 16) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_words() -> [u16; VPB_WORDS] {
        let mut w = [0; VPB_WORDS];

        for (i, v) in w.iter_mut().enumerate() {
            *v = (i as u16).wrapping_mul(0x9e37) ^ 0x5a5a;
        }

        w
    }

    #[test]
    fn full_layout_is_lossless() {
        let w = pattern_words();

        assert_eq!(Vpb::from_words(&w).to_words(), w);
    }

    #[test]
    fn named_fields() {
        let mut w = [0; VPB_WORDS];

        w[0x02] = 0x1000;
        w[0x12] = 0xfff0;
        w[0x40] = 0x0001;
        w[0x41] = 0x2340;
        w[0x57] = 0xffff;
        w[0x80] = 33;
        w[0x8a] = 0x0010;
        w[0x8b] = 0x8000;

        let vpb = Vpb::from_words(&w);

        assert_eq!(vpb.resampling_ratio, 0x1000);
        assert_eq!(vpb.channels[0].current_volume, -0x10);
        assert_eq!(vpb.current_aram_addr, 0x0001_2340);
        assert_eq!(vpb.afc_yn1(), -1);
        assert_eq!(vpb.samples_source_type, 33);
        assert_eq!(vpb.current_position_hi(), 0x10);

        let mut vpb = vpb;
        vpb.set_current_position_hi(0x20);
        assert_eq!(vpb.current_position, 0x0020_8000);
    }

    #[test]
    fn legacy_layout() {
        let mut raw = [0; LEGACY_VPB_WORDS];
        for (i, v) in raw.iter_mut().enumerate() {
            *v = 0x100 + i as u16;
        }

        let full = VpbLayout::Legacy.expand(&raw);

        // Source type lives at 0x40 in the legacy layout
        assert_eq!(full[0x80], 0x140);
        assert_eq!(full[0x3f], 0x13f);
        assert_eq!(full[0x1f], 0x11f);
        // Decoded AFC block
        assert_eq!(full[0x48], 0x120);
        assert_eq!(full[0x57], 0x12f);
        // ARAM cursor, remaining length, decoded sample count
        assert_eq!(full[0x40], 0x130);
        assert_eq!(full[0x44], 0x134);
        // Channels 4 and 5, Dolby block
        assert!(full[0x20..0x35].iter().all(|&v| v == 0));

        let back = VpbLayout::Legacy.compact(&full);
        assert_eq!(&back[..LEGACY_VPB_WORDS], &raw[..]);
    }

    #[test]
    fn legacy_keeps_streaming_state() {
        let mut vpb = Vpb::from_words(&[0; VPB_WORDS]);
        vpb.current_pos_frac = 0x1234;
        vpb.constant_sample = -5;
        vpb.resample_buffer = [1, 2, 3, 4];
        vpb.current_aram_addr = 0x0012_3456;
        vpb.remaining_length = 0x0001_0000;
        vpb.afc_remaining_decoded_samples = 9;
        vpb.set_afc_history(-7, 8);
        vpb.current_position = 0x0040_0000;

        let raw = VpbLayout::Legacy.compact(&vpb.to_words());
        let back = Vpb::from_words(&VpbLayout::Legacy.expand(&raw[..LEGACY_VPB_WORDS]));

        assert_eq!(back, vpb);
    }

    #[test]
    fn legacy_drops_missing_words() {
        let w = pattern_words();

        let raw = VpbLayout::Legacy.compact(&w);
        let full = VpbLayout::Legacy.expand(&raw[..LEGACY_VPB_WORDS]);

        assert_eq!(&full[..0x20], &w[..0x20]);
        assert_eq!(&full[0x35..0x45], &w[0x35..0x45]);
        assert_eq!(&full[0x48..0x58], &w[0x48..0x58]);
        assert_eq!(&full[0x80..], &w[0x80..]);
        assert!(full[0x20..0x35].iter().all(|&v| v == 0));
        assert!(full[0x45..0x48].iter().all(|&v| v == 0));
        assert!(full[0x58..0x80].iter().all(|&v| v == 0));
    }
}
