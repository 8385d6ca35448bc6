//! Reverb Parameter Blocks and the reverb circular buffers

use super::mix::{add_buffers_with_volume, saturate_to_i16, MIXING_BUFFER_LEN};
use super::{BufferId, Renderer};
use crate::dsp::memory::{GuestMemory, MemoryAccess};
use crate::bitwise::Bitwise;
use crate::dsp::Bus;

pub const RPB_COUNT: usize = 4;
/// Size of one RPB in RAM, in bytes
pub const RPB_STRIDE: u32 = 0x20;
/// Size of one frame in the circular buffers, in bytes
const BLOCK_BYTES: u32 = (MIXING_BUFFER_LEN * 2) as u32;
const FILTER_TAPS: usize = 8;

/// Bus each RPB feeds when reading back its circular buffer, and drains into it after the frame
const REVERB_SOURCES: [BufferId; RPB_COUNT] = [
    BufferId::Unk0Reverb,
    BufferId::Unk1Reverb,
    BufferId::FrontLeftReverb,
    BufferId::FrontRightReverb,
];

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct ReverbDest {
    pub buffer_id: u16,
    /// 1.15
    pub volume: u16,
}

/// Decoded RPB. RPBs are never written back to RAM.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct ReverbPb {
    /// 0: disabled. Bit 0: filter before mixing, bit 1: filter after mixing
    pub enabled: u16,
    /// Number of frames in the circular buffer
    pub circular_buffer_size: u16,
    pub circular_buffer_base: u32,
    pub dest: [ReverbDest; 2],
    pub filter_coeffs: [i16; FILTER_TAPS],
}

impl ReverbPb {
    pub fn load(mem: &dyn GuestMemory, addr: u32) -> ReverbPb {
        let word = |i: u32| mem.load::<u16>(addr.wrapping_add(i * 2));

        let mut filter_coeffs = [0; FILTER_TAPS];
        for (i, c) in filter_coeffs.iter_mut().enumerate() {
            *c = word(8 + i as u32) as i16;
        }

        ReverbPb {
            enabled: word(0),
            circular_buffer_size: word(1),
            circular_buffer_base: ((word(2) as u32) << 16) | word(3) as u32,
            dest: [
                ReverbDest {
                    buffer_id: word(4),
                    volume: word(5),
                },
                ReverbDest {
                    buffer_id: word(6),
                    volume: word(7),
                },
            ],
            filter_coeffs,
        }
    }
}

/// Reverb state that isn't stored in RAM
#[derive(serde::Serialize, serde::Deserialize, Default, Clone, PartialEq, Eq, Debug)]
pub struct ReverbState {
    /// Current frame in each circular buffer
    frame_index: [u16; RPB_COUNT],
    /// Last samples of the previous frame, needed by the filter
    last8: [[i16; FILTER_TAPS]; RPB_COUNT],
}

impl ReverbState {
    pub fn new() -> ReverbState {
        ReverbState::default()
    }

    #[cfg(test)]
    pub fn frame_index(&self, rpb: usize) -> u16 {
        self.frame_index[rpb]
    }
}

/// 8 tap FIR filter, in place. Each output only depends on inputs at the same or higher index so
/// the lookahead samples are still unfiltered when they're read.
fn apply_filter(buffer: &mut [i16; MIXING_BUFFER_LEN + FILTER_TAPS], coeffs: &[i16; FILTER_TAPS]) {
    for i in 0..MIXING_BUFFER_LEN {
        let mut acc = 0i32;

        for (j, &c) in coeffs.iter().enumerate() {
            acc = acc.wrapping_add(buffer[i + j] as i32 * c as i32);
        }

        buffer[i] = saturate_to_i16(acc >> 15);
    }
}

impl Renderer {
    /// Before rendering the voices (`post_rendering == false`) read back the reverb circular
    /// buffers and mix them in. After rendering store the new reverb output.
    pub(super) fn apply_reverb(&mut self, bus: &mut Bus, post_rendering: bool) {
        if self.reverb_pb_base_addr == 0 {
            return;
        }

        for (rpb_idx, &source) in REVERB_SOURCES.iter().enumerate() {
            let rpb_addr = self
                .reverb_pb_base_addr
                .wrapping_add(rpb_idx as u32 * RPB_STRIDE);
            let rpb = ReverbPb::load(&*bus.ram, rpb_addr);

            if rpb.enabled == 0 {
                continue;
            }

            let frame = self.reverb.frame_index[rpb_idx];
            let addr = rpb
                .circular_buffer_base
                .wrapping_add(frame as u32 * BLOCK_BYTES);

            if post_rendering {
                let buf = self.buffer(source);

                for (i, &s) in buf.iter().enumerate() {
                    bus.ram.store::<u16>(addr.wrapping_add(i as u32 * 2), s as u16);
                }

                // A size of 0 behaves like a single frame buffer
                let size = rpb.circular_buffer_size.max(1);
                self.reverb.frame_index[rpb_idx] = (frame + 1) % size;
            } else {
                let mut buffer = [0i16; MIXING_BUFFER_LEN + FILTER_TAPS];

                buffer[..FILTER_TAPS].copy_from_slice(&self.reverb.last8[rpb_idx]);
                for i in 0..MIXING_BUFFER_LEN {
                    buffer[FILTER_TAPS + i] = bus.ram.load_i16(addr.wrapping_add(i as u32 * 2));
                }
                self.reverb.last8[rpb_idx].copy_from_slice(&buffer[MIXING_BUFFER_LEN..]);

                if rpb.enabled.bit(0) {
                    apply_filter(&mut buffer, &rpb.filter_coeffs);
                }

                for dest in &rpb.dest {
                    if dest.buffer_id == 0 {
                        continue;
                    }

                    match BufferId::from_dest_id(dest.buffer_id) {
                        Some(id) => add_buffers_with_volume(
                            &mut self.buffer_mut(id)[..],
                            &buffer[..MIXING_BUFFER_LEN],
                            dest.volume,
                        ),
                        None => warn!(
                            "RPB {} mixing into unknown buffer {:04x}",
                            rpb_idx, dest.buffer_id
                        ),
                    }
                }

                if rpb.enabled.bit(1) {
                    apply_filter(&mut buffer, &rpb.filter_coeffs);
                }

                self.buffer_mut(source)[..].copy_from_slice(&buffer[..MIXING_BUFFER_LEN]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::host::{NextUcode, UcodeHost};
    use crate::dsp::mailbox::MailQueue;
    use crate::dsp::memory::Ram;
    use crate::ucode::flags::UcodeFlags;

    struct NoHost;

    impl UcodeHost for NoHost {
        fn reboot_to_rom(&mut self) {}
        fn swap_ucode(&mut self, _: &NextUcode) {}
        fn process_gba_crypto(&mut self, _: u32) {}
    }

    const RPB_BASE: u32 = 0x1000;
    const CIRC_BASE: u32 = 0x2000;

    fn write_rpb(ram: &mut Ram, idx: u32, words: &[u16]) {
        for (i, &w) in words.iter().enumerate() {
            ram.store::<u16>(RPB_BASE + idx * RPB_STRIDE + i as u32 * 2, w);
        }
    }

    fn slot(ram: &Ram, frame: u32) -> Vec<i16> {
        (0..MIXING_BUFFER_LEN as u32)
            .map(|i| ram.load_i16(CIRC_BASE + frame * BLOCK_BYTES + i * 2))
            .collect()
    }

    #[test]
    fn circular_buffer_wraps() {
        let mut ram = Ram::new(0x10000);
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;

        // RPB 0, enabled, 3 frames, no destination, no filter
        write_rpb(
            &mut ram,
            0,
            &[1, 3, (CIRC_BASE >> 16) as u16, CIRC_BASE as u16],
        );

        let mut r = Renderer::new(UcodeFlags::empty());
        r.set_reverb_pb_base_addr(RPB_BASE);

        for frame in 0..4i16 {
            r.buffer_mut(BufferId::Unk0Reverb).fill(frame + 1);

            let mut bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);
            r.apply_reverb(&mut bus, true);
        }

        // The fourth frame went back to the first slot and overwrote it
        assert_eq!(r.reverb.frame_index(0), 1);
        assert!(slot(&ram, 0).iter().all(|&s| s == 4));
        assert!(slot(&ram, 1).iter().all(|&s| s == 2));
        assert!(slot(&ram, 2).iter().all(|&s| s == 3));
        // Nothing written past the end of the buffer
        assert!(slot(&ram, 3).iter().all(|&s| s == 0));

        // The next read comes from the slot following the last write
        r.buffer_mut(BufferId::Unk0Reverb).fill(0);
        let mut bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);
        r.apply_reverb(&mut bus, false);

        // 8 carried samples (all zero on the first read) then the slot contents
        let buf = r.buffer(BufferId::Unk0Reverb);
        assert!(buf[..8].iter().all(|&s| s == 0));
        assert!(buf[8..].iter().all(|&s| s == 2));
        assert_eq!(r.reverb.last8[0], [2; 8]);
    }

    #[test]
    fn read_back_mixes_into_destinations() {
        let mut ram = Ram::new(0x10000);
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;

        // RPB 2, 1 frame, feeds front left at half volume and an unknown buffer
        write_rpb(
            &mut ram,
            2,
            &[
                1,
                1,
                (CIRC_BASE >> 16) as u16,
                CIRC_BASE as u16,
                0x0d00,
                0x4000,
                0x1234,
                0x7fff,
                // Identity filter
                0x7fff,
            ],
        );

        for i in 0..MIXING_BUFFER_LEN as u32 {
            ram.store::<u16>(CIRC_BASE + i * 2, 0x1000);
        }

        let mut r = Renderer::new(UcodeFlags::empty());
        r.set_reverb_pb_base_addr(RPB_BASE);

        let mut bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);
        r.apply_reverb(&mut bus, false);

        let fl = r.buffer(BufferId::FrontLeft);
        // The first 8 samples come from the (empty) carry
        assert!(fl[..8].iter().all(|&s| s == 0));
        // 0x1000 * 0x7fff >> 15 then halved
        assert!(fl[8..].iter().all(|&s| s == 0x7ff));

        let src = r.buffer(BufferId::FrontLeftReverb);
        assert!(src[8..].iter().all(|&s| s == 0xfff));
    }

    #[test]
    fn disabled_without_base() {
        let mut ram = Ram::new(0x1000);
        let aram = Ram::new(0);
        let mut mail = MailQueue::new();
        let mut host = NoHost;

        let mut r = Renderer::new(UcodeFlags::empty());
        r.buffer_mut(BufferId::FrontLeftReverb).fill(5);

        let mut bus = Bus::new(&mut ram, &aram, &mut mail, &mut host);
        r.apply_reverb(&mut bus, true);
        r.apply_reverb(&mut bus, false);

        assert!(r.buffer(BufferId::FrontLeftReverb).iter().all(|&s| s == 5));
        assert!(ram.as_slice().iter().all(|&b| b == 0));
    }
}
