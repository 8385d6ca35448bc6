//! AFC decoder. AFC is an ADPCM variant encoding 16 samples per block with either 4bit (9 byte
//! blocks) or 2bit (5 byte blocks) residuals.

use super::mix::saturate_to_i16;

/// Samples per AFC block
pub const AFC_BLOCK_SAMPLES: usize = 16;

/// Decode a single AFC block. `yn1` is the most recent previously decoded sample, `yn2` the one
/// before it. `coeffs` holds 16 predictor pairs.
///
/// `block` must contain the header byte followed by 8 (`hq`) or 4 bytes of residuals.
pub fn decode_afc_block(
    block: &[u8],
    hq: bool,
    coeffs: &[i16; 0x20],
    mut yn1: i16,
    mut yn2: i16,
) -> [i16; AFC_BLOCK_SAMPLES] {
    let header = block[0];
    // Computed in 16 bits: a shift of 15 wraps around to -32768 like on the DSP
    let delta = (1i32 << (header >> 4)) as i16 as i32;
    let idx = (header & 0xf) as usize;

    let mut nibbles = [0i32; AFC_BLOCK_SAMPLES];

    if hq {
        for (i, &b) in block[1..9].iter().enumerate() {
            nibbles[i * 2] = (b >> 4) as i32;
            nibbles[i * 2 + 1] = (b & 0xf) as i32;
        }

        for n in nibbles.iter_mut() {
            if *n >= 8 {
                *n -= 16;
            }
            *n <<= 11;
        }
    } else {
        for (i, &b) in block[1..5].iter().enumerate() {
            nibbles[i * 4] = ((b >> 6) & 3) as i32;
            nibbles[i * 4 + 1] = ((b >> 4) & 3) as i32;
            nibbles[i * 4 + 2] = ((b >> 2) & 3) as i32;
            nibbles[i * 4 + 3] = (b & 3) as i32;
        }

        for n in nibbles.iter_mut() {
            if *n >= 2 {
                *n -= 4;
            }
            *n <<= 13;
        }
    }

    let c1 = coeffs[idx * 2] as i32;
    let c2 = coeffs[idx * 2 + 1] as i32;

    let mut out = [0; AFC_BLOCK_SAMPLES];

    for (o, &n) in out.iter_mut().zip(nibbles.iter()) {
        // The DSP accumulator is 40 bits wide
        let sample = delta as i64 * n as i64 + yn1 as i64 * c1 as i64 + yn2 as i64 * c2 as i64;
        let sample = saturate_to_i16((sample >> 11) as i32);

        *o = sample;
        yn2 = yn1;
        yn1 = sample;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_coeffs() -> [i16; 0x20] {
        let mut c = [0; 0x20];

        // Pair 0: no prediction
        // Pair 1: first order predictor, yn1 * 1.0
        c[2] = 0x800;
        // Pair 2: second order
        c[4] = 0x1000;
        c[5] = -0x800;

        c
    }

    #[test]
    fn hq_no_prediction() {
        // Shift 0, pair 0, residuals 1, -1, 7, -8 ...
        let block = [0x00, 0x1f, 0x78, 0, 0, 0, 0, 0, 0];

        let out = decode_afc_block(&block, true, &test_coeffs(), 0, 0);

        assert_eq!(&out[0..4], &[1, -1, 7, -8]);
        assert!(out[4..].iter().all(|&s| s == 0));
    }

    #[test]
    fn lq_with_shift() {
        // Shift 2, pair 0. 2bit residuals 1, -2, -1, 0
        let block = [0x20, 0b01_10_11_00, 0, 0, 0];

        let out = decode_afc_block(&block, false, &test_coeffs(), 0, 0);

        // (4 * (n << 13)) >> 11 == n * 16
        assert_eq!(&out[0..4], &[16, -32, -16, 0]);
    }

    #[test]
    fn prediction_uses_history() {
        let block = [0x01, 0, 0, 0, 0, 0, 0, 0, 0];

        let out = decode_afc_block(&block, true, &test_coeffs(), 100, 0);

        // Pair 1 just keeps repeating yn1
        assert!(out.iter().all(|&s| s == 100));
    }

    #[test]
    fn max_shift_wraps() {
        // Shift 15 gives a delta of -32768
        let block = [0xf0, 0x10, 0, 0, 0, 0, 0, 0, 0];

        let out = decode_afc_block(&block, true, &test_coeffs(), 0, 0);

        assert_eq!(out[0], saturate_to_i16((-32768 * (1 << 11)) >> 11));
        assert_eq!(out[0], -32768);
    }

    #[test]
    fn decoding_is_deterministic() {
        let block = [0x42, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0];
        let coeffs = test_coeffs();

        let a = decode_afc_block(&block, true, &coeffs, -300, 1200);
        let b = decode_afc_block(&block, true, &coeffs, -300, 1200);

        assert_eq!(a, b);

        // Different history, different output
        let c = decode_afc_block(&block, true, &coeffs, 0, 0);
        assert_ne!(a, c);
    }
}
