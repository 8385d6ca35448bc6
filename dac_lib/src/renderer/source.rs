//! Voice sample sources and resampling

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::afc::{decode_afc_block, AFC_BLOCK_SAMPLES};
use super::mix::{saturate_to_i16, MixingBuffer, MIXING_BUFFER_LEN};
use super::vpb::Vpb;
use super::{BufferId, Renderer};
use crate::dsp::memory::{AccessWidth, Addressable, GuestMemory, MemoryAccess};
use crate::dsp::Bus;
use crate::ucode::flags::UcodeFlags;

/// Value of the VPB `samples_source_type` field
#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleSource {
    SquareWave = 0,
    SawWave = 1,
    SquareWave25Pct = 3,
    ConstPattern1 = 4,
    /// 2bit AFC. The value doubles as the number of bytes per block.
    AfcLqFromAram = 5,
    ConstPattern0 = 7,
    Pcm8FromAram = 8,
    /// 4bit AFC. The value doubles as the number of bytes per block.
    AfcHqFromAram = 9,
    ConstPattern0VariableStep = 10,
    ConstPattern2 = 11,
    ConstPattern3 = 12,
    Pcm16FromAram = 16,
    Pcm16FromMram = 33,
}

impl SampleSource {
    pub fn from_vpb(vpb: &Vpb) -> Option<SampleSource> {
        SampleSource::from_u16(vpb.samples_source_type)
    }

    /// Index in the constant pattern table, for pattern sources
    fn pattern_index(self) -> Option<usize> {
        match self {
            SampleSource::ConstPattern0 | SampleSource::ConstPattern0VariableStep => Some(0),
            SampleSource::ConstPattern1 => Some(1),
            SampleSource::ConstPattern2 => Some(2),
            SampleSource::ConstPattern3 => Some(3),
            _ => None,
        }
    }
}

pub const PATTERN_LEN: usize = 0x40;
const PATTERN_LEN_FRAC: u32 = (PATTERN_LEN as u32) << 16;

/// Raw samples needed to render one frame at the highest possible ratio, plus the 4 samples of
/// history and some slack for the nearest-neighbour path reading one past the end.
const RAW_BUFFER_LEN: usize = MIXING_BUFFER_LEN * 0x10 + 0x20;
const HISTORY_LEN: usize = 4;

/// Above this ratio the DSP doesn't bother interpolating
const NEAREST_NEIGHBOUR_RATIO: u32 = 4;

/// Number of raw samples consumed by one frame of output
pub fn needed_raw_samples(vpb: &Vpb) -> usize {
    let n = (vpb.current_pos_frac as u32 + MIXING_BUFFER_LEN as u32 * vpb.resampling_ratio as u32)
        >> 12;

    (n as usize).min(RAW_BUFFER_LEN - HISTORY_LEN - 4)
}

impl Renderer {
    /// Memory streamed samples come from and the offset to add to the VPB addresses
    fn sample_memory<'b>(&self, bus: &'b Bus<'_>) -> (&'b dyn GuestMemory, u32) {
        if self.flags.contains(UcodeFlags::NO_ARAM) {
            (&*bus.ram, self.aram_base_addr)
        } else {
            (bus.aram, 0)
        }
    }

    /// Generate one frame of input samples for `vpb`, resampled to the output rate
    pub(super) fn load_input_samples(&self, bus: &Bus, vpb: &mut Vpb) -> MixingBuffer {
        let mut out = MixingBuffer::new();

        if vpb.use_constant_sample != 0 {
            out.fill(vpb.constant_sample);
            return out;
        }

        let source = match SampleSource::from_vpb(vpb) {
            Some(s) => s,
            None => {
                error!(
                    "Using an unknown sample source: {:04x}",
                    vpb.samples_source_type
                );
                return out;
            }
        };

        match source {
            SampleSource::SquareWave | SampleSource::SquareWave25Pct => {
                let mask = if source == SampleSource::SquareWave {
                    0x4000
                } else {
                    0x2000
                };

                let mut pos = (vpb.current_pos_frac as u32) << 1;
                let step = (vpb.resampling_ratio as u32) << 1;

                for s in out.iter_mut() {
                    *s = if pos & mask != 0 { 0xc000u16 as i16 } else { 0x4000 };
                    pos = pos.wrapping_add(step);
                }

                vpb.current_pos_frac = ((pos >> 1) & 0xffff) as u16;
            }
            SampleSource::SawWave => {
                let mut pos = vpb.current_pos_frac as u32;
                let step = (vpb.resampling_ratio as u32) >> 1;

                for s in out.iter_mut() {
                    *s = pos as u16 as i16;
                    pos = pos.wrapping_add(step);
                }

                vpb.current_pos_frac = (pos & 0xffff) as u16;
            }
            SampleSource::ConstPattern0
            | SampleSource::ConstPattern0VariableStep
            | SampleSource::ConstPattern1
            | SampleSource::ConstPattern2
            | SampleSource::ConstPattern3 => {
                // Never None for pattern sources
                let idx = source.pattern_index().unwrap_or(0);
                let pattern = &self.const_patterns[idx * PATTERN_LEN..(idx + 1) * PATTERN_LEN];

                let ratio = vpb.resampling_ratio as u32;
                let mut pos = (vpb.current_pos_frac as u32) << 6;
                let step = ratio << 5;

                if source == SampleSource::ConstPattern0VariableStep {
                    // The step is modulated by the back right bus
                    let modulation = self.buffer(BufferId::BackRight);

                    for (s, &m) in out.iter_mut().zip(modulation.iter()) {
                        *s = pattern[(pos >> 16) as usize];

                        let var = (m as i32 * ratio as i32) >> 10;
                        let next = pos as i64 + step as i64 + var as i64;

                        pos = next.rem_euclid(PATTERN_LEN_FRAC as i64) as u32;
                    }
                } else {
                    for s in out.iter_mut() {
                        *s = pattern[(pos >> 16) as usize];
                        pos = (pos + step) % PATTERN_LEN_FRAC;
                    }
                }

                vpb.current_pos_frac = (pos >> 6) as u16;
            }
            SampleSource::Pcm8FromAram
            | SampleSource::Pcm16FromAram
            | SampleSource::AfcLqFromAram
            | SampleSource::AfcHqFromAram
            | SampleSource::Pcm16FromMram => {
                let mut raw = [0i16; RAW_BUFFER_LEN];

                raw[..HISTORY_LEN].copy_from_slice(&vpb.resample_buffer);

                let needed = needed_raw_samples(vpb);
                let dst = &mut raw[HISTORY_LEN..HISTORY_LEN + needed];

                match source {
                    SampleSource::Pcm8FromAram => self.download_pcm::<u8>(bus, vpb, dst),
                    SampleSource::Pcm16FromAram => self.download_pcm::<u16>(bus, vpb, dst),
                    SampleSource::Pcm16FromMram => download_raw_from_mram(bus, vpb, dst),
                    _ => self.download_afc(bus, vpb, dst, source),
                }

                self.resample(vpb, &raw, &mut out);
            }
        }

        out
    }

    /// Resample `src` (4 history samples followed by the new raw samples) into `dst`
    pub(super) fn resample(&self, vpb: &mut Vpb, src: &[i16], dst: &mut MixingBuffer) {
        // 20.12
        let ratio = vpb.resampling_ratio as u32;
        let mut pos = vpb.current_pos_frac as u32;
        let mut base = 0usize;

        if ratio >> 12 >= NEAREST_NEIGHBOUR_RATIO {
            for s in dst.iter_mut() {
                pos += ratio;
                *s = src[(pos >> 12) as usize];
            }

            base = (pos >> 12) as usize;
            pos &= 0xfff;
        } else {
            for s in dst.iter_mut() {
                // 64 sets of 4 coefficients, selected by the top 6 bits of the fractional part
                let set = ((pos & 0xfff) >> 6) as usize * 4;
                let coeffs = &self.resampling_coeffs[set..set + 4];

                let mut acc = 0i32;
                for (i, &c) in coeffs.iter().enumerate() {
                    acc = acc.wrapping_add((2 * c as i32).wrapping_mul(src[base + i] as i32));
                }

                *s = saturate_to_i16(acc >> 16);

                pos += ratio;
                base += (pos >> 12) as usize;
                pos &= 0xfff;
            }
        }

        vpb.resample_buffer
            .copy_from_slice(&src[base..base + HISTORY_LEN]);
        vpb.current_pos_frac = pos as u16;
        vpb.constant_sample = dst[MIXING_BUFFER_LEN - 1];
    }

    /// Stream 8 or 16 bit big endian PCM
    fn download_pcm<T: Addressable>(&self, bus: &Bus, vpb: &mut Vpb, dst: &mut [i16]) {
        if vpb.done != 0 {
            dst.fill(0);
            return;
        }

        let width = T::width() as u32;
        let (mem, offset) = self.sample_memory(bus);

        let restart = |vpb: &mut Vpb| {
            vpb.remaining_length = vpb.loop_start_position.wrapping_sub(vpb.current_position);
            vpb.current_aram_addr = vpb
                .base_address
                .wrapping_add(vpb.current_position.wrapping_mul(width));
        };

        if vpb.reset_vpb != 0 {
            restart(vpb);
        }

        vpb.end_reached = 0;

        let mut written = 0;
        while written < dst.len() {
            if vpb.end_reached != 0 {
                vpb.end_reached = 0;

                if vpb.is_looping == 0 {
                    dst[written..].fill(0);
                    vpb.done = 1;
                    break;
                }

                vpb.current_position = vpb.loop_address;
                restart(vpb);

                if vpb.remaining_length == 0 {
                    warn!("Looping PCM voice with an empty loop");
                    dst[written..].fill(0);
                    break;
                }
            }

            let count = (vpb.remaining_length as usize).min(dst.len() - written);

            for s in &mut dst[written..written + count] {
                let v = mem.load::<T>(offset.wrapping_add(vpb.current_aram_addr));

                *s = match T::width() {
                    AccessWidth::Byte => ((v.as_u32() as u8 as i8) as i16) << 8,
                    _ => v.as_u32() as u16 as i16,
                };

                vpb.current_aram_addr = vpb.current_aram_addr.wrapping_add(width);
            }

            written += count;
            vpb.remaining_length -= count as u32;

            if vpb.remaining_length == 0 {
                vpb.end_reached = 1;
            }
        }
    }

    /// Decode one AFC block at the current ARAM address into the VPB sample cache
    fn decode_afc_into_cache(&self, bus: &Bus, vpb: &mut Vpb, source: SampleSource) {
        let block_len = source as u32;
        let (mem, offset) = self.sample_memory(bus);

        let mut block = [0u8; 9];
        for (i, b) in block.iter_mut().take(block_len as usize).enumerate() {
            *b = mem.read_u8(
                offset
                    .wrapping_add(vpb.current_aram_addr)
                    .wrapping_add(i as u32),
            );
        }

        vpb.current_aram_addr = vpb.current_aram_addr.wrapping_add(block_len);

        let hq = source == SampleSource::AfcHqFromAram;
        let samples = decode_afc_block(&block, hq, &self.afc_coeffs, vpb.afc_yn1(), vpb.afc_yn2());

        vpb.afc_remaining_samples = samples;
    }

    fn download_afc(&self, bus: &Bus, vpb: &mut Vpb, dst: &mut [i16], source: SampleSource) {
        if vpb.reset_vpb != 0 {
            vpb.set_afc_history(0, 0);
            vpb.afc_remaining_decoded_samples = 0;
            vpb.remaining_length = vpb.loop_start_position;
            vpb.current_aram_addr = vpb.base_address;
        }

        if vpb.done != 0 {
            dst.fill(0);
            return;
        }

        let mut written = 0;
        loop {
            // Flush what's left of the last decoded block
            let cached = (vpb.afc_remaining_decoded_samples as usize).min(AFC_BLOCK_SAMPLES);
            let n = cached.min(dst.len() - written);
            let start = AFC_BLOCK_SAMPLES - cached;

            dst[written..written + n]
                .copy_from_slice(&vpb.afc_remaining_samples[start..start + n]);
            vpb.afc_remaining_decoded_samples = (cached - n) as u16;
            written += n;

            if written == dst.len() {
                return;
            }

            if vpb.remaining_length == 0 {
                if vpb.is_looping == 0 {
                    vpb.done = 1;
                    dst[written..].fill(0);
                    return;
                }

                let loop_block = vpb.loop_address / AFC_BLOCK_SAMPLES as u32;
                vpb.current_aram_addr = vpb
                    .base_address
                    .wrapping_add(loop_block * source as u32);
                vpb.set_afc_history(vpb.loop_yn1, vpb.loop_yn2);

                self.decode_afc_into_cache(bus, vpb, source);

                let cached = AFC_BLOCK_SAMPLES as u32 - vpb.loop_address % AFC_BLOCK_SAMPLES as u32;
                vpb.afc_remaining_decoded_samples = cached as u16;
                vpb.remaining_length = vpb
                    .loop_start_position
                    .saturating_sub(cached)
                    .saturating_sub(vpb.loop_address);
            } else {
                self.decode_afc_into_cache(bus, vpb, source);

                vpb.afc_remaining_decoded_samples = AFC_BLOCK_SAMPLES as u16;
                vpb.remaining_length = vpb
                    .remaining_length
                    .saturating_sub(AFC_BLOCK_SAMPLES as u32);
            }
        }
    }
}

/// Stream 16 bit samples straight from main RAM
fn download_raw_from_mram(bus: &Bus, vpb: &mut Vpb, dst: &mut [i16]) {
    let mut addr = vpb
        .base_address
        .wrapping_add(vpb.current_position_hi() as u32 * 2);

    let read = |addr: &mut u32| {
        let s = bus.ram.load_i16(*addr);
        *addr = addr.wrapping_add(2);
        s
    };

    let requested = dst.len();

    if requested as u32 > vpb.remaining_length {
        // Play what's left then hold the last sample
        let remaining = vpb.remaining_length as usize;
        let mut last = 0;

        for s in &mut dst[..remaining] {
            last = read(&mut addr);
            *s = last;
        }
        dst[remaining..].fill(last);

        let pos = vpb.current_position_hi().wrapping_add(remaining as u16);
        vpb.set_current_position_hi(pos);
        vpb.remaining_length = 0;
        vpb.done = 1;
    } else {
        vpb.remaining_length -= requested as u32;
        vpb.samples_before_loop = vpb
            .loop_start_position_hi()
            .wrapping_sub(vpb.current_position_hi());

        let before_loop = vpb.samples_before_loop as usize;

        if requested <= before_loop {
            for s in dst.iter_mut() {
                *s = read(&mut addr);
            }

            let pos = vpb.current_position_hi().wrapping_add(requested as u16);
            vpb.set_current_position_hi(pos);
        } else {
            for s in &mut dst[..before_loop] {
                *s = read(&mut addr);
            }

            // The loop becomes the new base
            vpb.base_address = vpb.loop_address;
            addr = vpb.loop_address;

            for s in &mut dst[before_loop..] {
                *s = read(&mut addr);
            }

            vpb.set_current_position_hi((requested - before_loop) as u16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::host::{NextUcode, UcodeHost};
    use crate::dsp::mailbox::MailQueue;
    use crate::dsp::memory::Ram;
    use crate::renderer::vpb::VPB_WORDS;

    struct NoHost;

    impl UcodeHost for NoHost {
        fn reboot_to_rom(&mut self) {}
        fn swap_ucode(&mut self, _: &NextUcode) {}
        fn process_gba_crypto(&mut self, _: u32) {}
    }

    fn blank_vpb() -> Vpb {
        Vpb::from_words(&[0; VPB_WORDS])
    }

    /// Resampler with a single non-zero tap so interpolation is easy to follow
    fn test_renderer() -> Renderer {
        let mut r = Renderer::new(UcodeFlags::empty());

        for set in 0..64 {
            // 0.5 on the second tap
            r.resampling_coeffs[set * 4 + 1] = 0x4000;
        }

        r
    }

    fn ramp_input() -> Vec<i16> {
        (0..RAW_BUFFER_LEN as i32).map(|i| (i * 4) as i16).collect()
    }

    #[test]
    fn interpolated_below_four() {
        let r = test_renderer();
        let mut vpb = blank_vpb();
        let src = ramp_input();
        let mut out = MixingBuffer::new();

        vpb.resampling_ratio = 0x3fff;
        r.resample(&mut vpb, &src, &mut out);

        // (2 * 0x4000 * src[1]) >> 16 == src[1] / 2
        assert_eq!(out[0], src[1] / 2);
        // 0x3fff moved the window by 3 samples
        assert_eq!(out[1], src[1 + 3] / 2);
        assert_eq!(vpb.current_pos_frac, ((0x3fff * 0x50) & 0xfff) as u16);
    }

    #[test]
    fn nearest_neighbour_at_four() {
        let r = test_renderer();
        let mut vpb = blank_vpb();
        let src = ramp_input();
        let mut out = MixingBuffer::new();

        vpb.resampling_ratio = 0x4000;
        r.resample(&mut vpb, &src, &mut out);

        // No interpolation, one every 4 input samples
        assert_eq!(out[0], src[4]);
        assert_eq!(out[1], src[8]);
        assert_eq!(out[0x4f], src[0x50 * 4]);
        assert_eq!(vpb.current_pos_frac, 0);
        assert_eq!(vpb.resample_buffer, [src[0x140], src[0x141], src[0x142], src[0x143]]);
        assert_eq!(vpb.constant_sample, out[0x4f]);
    }

    #[test]
    fn square_wave() {
        let r = test_renderer();
        let mut ram = Ram::new(0);
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.samples_source_type = SampleSource::SquareWave as u16;
        vpb.resampling_ratio = 0x1000;

        let out = r.load_input_samples(&bus, &mut vpb);

        // pos advances by 0x2000 per sample, bit 14 flips every two samples
        assert_eq!(&out[0..4], &[0x4000, 0x4000, 0xc000u16 as i16, 0xc000u16 as i16]);
        assert_eq!(vpb.current_pos_frac, ((0x50 * 0x2000u32 >> 1) & 0xffff) as u16);
    }

    #[test]
    fn constant_sample_overrides_source() {
        let r = test_renderer();
        let mut ram = Ram::new(0);
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.samples_source_type = SampleSource::Pcm16FromAram as u16;
        vpb.use_constant_sample = 1;
        vpb.constant_sample = -5;

        let out = r.load_input_samples(&bus, &mut vpb);
        assert!(out.iter().all(|&s| s == -5));
    }

    #[test]
    fn unknown_source_is_silent() {
        let r = test_renderer();
        let mut ram = Ram::new(0);
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.samples_source_type = 2;

        let out = r.load_input_samples(&bus, &mut vpb);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn pcm8_stops_at_end() {
        let r = test_renderer();
        let mut ram = Ram::new(0);
        let mut aram = Ram::new(0x1000);
        for i in 0..0x20 {
            aram.write_u8(0x100 + i, (i as u8).wrapping_add(1));
        }
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.reset_vpb = 1;
        vpb.base_address = 0x100;
        vpb.current_position = 0;
        vpb.loop_start_position = 0x10;

        let mut dst = [0x55i16; 0x20];
        r.download_pcm::<u8>(&bus, &mut vpb, &mut dst);

        assert_eq!(dst[0], 1 << 8);
        assert_eq!(dst[0xf], 0x10 << 8);
        assert!(dst[0x10..].iter().all(|&s| s == 0));
        assert_eq!(vpb.done, 1);
    }

    #[test]
    fn pcm16_loops() {
        let r = test_renderer();
        let mut ram = Ram::new(0);
        let mut aram = Ram::new(0x1000);
        for i in 0..8u32 {
            aram.store::<u16>(0x200 + i * 2, 0x100 * i as u16);
        }
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.reset_vpb = 1;
        vpb.is_looping = 1;
        vpb.base_address = 0x200;
        vpb.loop_address = 4;
        vpb.loop_start_position = 8;

        let mut dst = [0i16; 12];
        r.download_pcm::<u16>(&bus, &mut vpb, &mut dst);

        assert_eq!(
            dst,
            [0, 0x100, 0x200, 0x300, 0x400, 0x500, 0x600, 0x700, 0x400, 0x500, 0x600, 0x700]
        );
        assert_eq!(vpb.done, 0);
        assert_eq!(vpb.end_reached, 1);
    }

    #[test]
    fn no_aram_reads_main_ram() {
        let mut r = Renderer::new(UcodeFlags::NO_ARAM);
        r.set_aram_base_addr(0x8000);

        let mut ram = Ram::new(0x10000);
        ram.store::<u16>(0x8000 + 0x40, 0x1234);
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.reset_vpb = 1;
        vpb.base_address = 0x40;
        vpb.loop_start_position = 1;

        let mut dst = [0i16; 1];
        r.download_pcm::<u16>(&bus, &mut vpb, &mut dst);
        assert_eq!(dst[0], 0x1234);
    }

    #[test]
    fn afc_loop_realigns_cache() {
        let mut r = test_renderer();
        // Pair 0 only uses the residual
        r.afc_coeffs = [0; 0x20];

        let mut ram = Ram::new(0);
        let mut aram = Ram::new(0x1000);
        // Two HQ blocks. Block 0 all +1, block 1 all +2
        aram.write_u8(0x300, 0x00);
        for i in 0..8 {
            aram.write_u8(0x301 + i, 0x11);
        }
        aram.write_u8(0x309, 0x00);
        for i in 0..8 {
            aram.write_u8(0x30a + i, 0x22);
        }
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.reset_vpb = 1;
        vpb.is_looping = 1;
        vpb.base_address = 0x300;
        vpb.loop_start_position = 32;
        // Loop in the middle of the second block
        vpb.loop_address = 16 + 12;

        let mut dst = [0i16; 40];
        r.download_afc(&bus, &mut vpb, &mut dst, SampleSource::AfcHqFromAram);

        assert!(dst[..16].iter().all(|&s| s == 1));
        assert!(dst[16..32].iter().all(|&s| s == 2));
        // After the loop only the last 4 samples of block 1 are replayed, then the loop has
        // consumed its whole length and restarts
        assert!(dst[32..40].iter().all(|&s| s == 2));
        assert_eq!(vpb.done, 0);
    }

    #[test]
    fn afc_lq_blocks() {
        let mut r = test_renderer();
        r.afc_coeffs = [0; 0x20];

        let mut ram = Ram::new(0);
        let mut aram = Ram::new(0x1000);
        // Two 5 byte LQ blocks. Block 0 all +1, block 1 all -1
        aram.write_u8(0x300, 0x00);
        for i in 0..4 {
            aram.write_u8(0x301 + i, 0x55);
        }
        aram.write_u8(0x305, 0x00);
        for i in 0..4 {
            aram.write_u8(0x306 + i, 0xff);
        }
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.reset_vpb = 1;
        vpb.base_address = 0x300;
        vpb.loop_start_position = 32;

        let mut dst = [0x55i16; 40];
        r.download_afc(&bus, &mut vpb, &mut dst, SampleSource::AfcLqFromAram);

        // 2bit residuals are scaled by 1 << 13, then >> 11
        assert!(dst[..16].iter().all(|&s| s == 4));
        assert!(dst[16..32].iter().all(|&s| s == -4));
        assert!(dst[32..].iter().all(|&s| s == 0));
        assert_eq!(vpb.current_aram_addr, 0x30a);
        assert_eq!(vpb.done, 1);
    }

    #[test]
    fn variable_step_pattern() {
        let mut r = test_renderer();
        for i in 0..PATTERN_LEN {
            r.const_patterns[i] = i as i16 * 0x100;
        }

        let mut ram = Ram::new(0);
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;

        let mut vpb = blank_vpb();
        vpb.samples_source_type = SampleSource::ConstPattern0VariableStep as u16;
        vpb.resampling_ratio = 0x800;

        // No modulation: one pattern sample per output sample
        {
            let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);
            let out = r.load_input_samples(&bus, &mut vpb);

            assert_eq!(out[1], 0x100);
            assert_eq!(out[0x3f], 0x3f00);
            assert_eq!(out[0x40], 0);
            assert_eq!(vpb.current_pos_frac, (0x10 << 16 >> 6) as u16);
        }

        // +0.5 on the back right bus: 1.5 pattern samples per output sample
        vpb.current_pos_frac = 0;
        r.buffer_mut(BufferId::BackRight).fill(0x4000);
        {
            let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);
            let out = r.load_input_samples(&bus, &mut vpb);

            assert_eq!(&out[..4], &[0, 0x100, 0x300, 0x400]);
        }

        // -1.0 cancels the step entirely
        vpb.current_pos_frac = 0;
        r.buffer_mut(BufferId::BackRight).fill(-0x8000);
        {
            let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);
            let out = r.load_input_samples(&bus, &mut vpb);

            assert!(out.iter().all(|&s| s == 0));
            assert_eq!(vpb.current_pos_frac, 0);
        }
    }

    #[test]
    fn mram_crosses_loop() {
        let mut ram = Ram::new(0x1000);
        for i in 0..4u32 {
            ram.store::<u16>(0x100 + i * 2, 10 + i as u16);
            ram.store::<u16>(0x400 + i * 2, 20 + i as u16);
        }
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.base_address = 0x100;
        vpb.loop_address = 0x400;
        vpb.loop_start_position = 3 << 16;
        vpb.remaining_length = 100;

        let mut dst = [0i16; 5];
        download_raw_from_mram(&bus, &mut vpb, &mut dst);

        assert_eq!(dst, [10, 11, 12, 20, 21]);
        assert_eq!(vpb.base_address, 0x400);
        assert_eq!(vpb.current_position_hi(), 2);
        assert_eq!(vpb.remaining_length, 95);
    }

    #[test]
    fn mram_runs_out() {
        let mut ram = Ram::new(0x1000);
        for i in 0..4u32 {
            ram.store::<u16>(0x100 + i * 2, 10 + i as u16);
        }
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;
        let bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);

        let mut vpb = blank_vpb();
        vpb.base_address = 0x100;
        vpb.loop_start_position = 0x10 << 16;
        vpb.remaining_length = 2;

        let mut dst = [0i16; 5];
        download_raw_from_mram(&bus, &mut vpb, &mut dst);

        assert_eq!(dst, [10, 11, 11, 11, 11]);
        assert_eq!(vpb.done, 1);
        assert_eq!(vpb.current_position_hi(), 2);
    }
}
