//! Fixed point mixing primitives

use std::ops::{Deref, DerefMut};

use serde_big_array::BigArray;

/// Number of samples rendered per frame and per bus
pub const MIXING_BUFFER_LEN: usize = 0x50;

/// One frame worth of samples for one bus
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct MixingBuffer {
    #[serde(with = "BigArray")]
    samples: [i16; MIXING_BUFFER_LEN],
}

impl MixingBuffer {
    pub fn new() -> MixingBuffer {
        MixingBuffer {
            samples: [0; MIXING_BUFFER_LEN],
        }
    }

    pub fn from_samples(samples: [i16; MIXING_BUFFER_LEN]) -> MixingBuffer {
        MixingBuffer { samples }
    }
}

impl Default for MixingBuffer {
    fn default() -> MixingBuffer {
        MixingBuffer::new()
    }
}

impl Deref for MixingBuffer {
    type Target = [i16; MIXING_BUFFER_LEN];

    fn deref(&self) -> &Self::Target {
        &self.samples
    }
}

impl DerefMut for MixingBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.samples
    }
}

/// Saturate a 32bit signed value to fit in a 16bit signed value
pub fn saturate_to_i16(v: i32) -> i16 {
    if v < i32::from(i16::MIN) {
        i16::MIN
    } else if v > i32::from(i16::MAX) {
        i16::MAX
    } else {
        v as i16
    }
}

/// `buf *= vol` with `vol` in 1.15 format. Not saturated, the attenuation factors used with it
/// are all below 1.0.
pub fn apply_volume_1_15(buf: &mut [i16], vol: u16) {
    for s in buf.iter_mut() {
        *s = ((*s as i32 * vol as i32) >> 15) as i16;
    }
}

/// `buf *= vol` with `vol` in 4.12 format, saturated
pub fn apply_volume_4_12(buf: &mut [i16], vol: u16) {
    for s in buf.iter_mut() {
        *s = saturate_to_i16((*s as i32 * vol as i32) >> 12);
    }
}

/// `dst += src * vol` with `vol` in unsigned 1.15 format. The scaled sample is saturated, the
/// accumulation wraps around.
pub fn add_buffers_with_volume(dst: &mut [i16], src: &[i16], vol: u16) {
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        let v = saturate_to_i16((s as i32 * vol as i32) >> 15);

        *d = d.wrapping_add(v);
    }
}

/// Ramp step moving a volume by `delta` over one frame. Volumes are 16.16 while ramping.
pub fn ramp_step(delta: i16) -> i32 {
    ((delta as i32) << 16) / MIXING_BUFFER_LEN as i32
}

/// `dst += src * vol` while `vol` moves by `step` after every sample. Returns the final volume.
pub fn add_buffers_with_volume_ramp(
    dst: &mut MixingBuffer,
    src: &MixingBuffer,
    mut vol: i32,
    step: i32,
) -> i32 {
    if vol == 0 && step == 0 {
        return vol;
    }

    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        let v = saturate_to_i16(((vol >> 16) * s as i32) >> 15);

        *d = d.wrapping_add(v);
        vol = vol.wrapping_add(step);
    }

    vol
}
