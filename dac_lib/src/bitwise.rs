/// Bit tests on mail words, voice masks and parameter block flags
pub trait Bitwise {
    /// Returns true if the given bit is set in `self`
    fn bit(self, bitpos: u8) -> bool;
}

macro_rules! impl_bitwise {
    ($($t:ty),*) => {
        $(
            impl Bitwise for $t {
                fn bit(self, bitpos: u8) -> bool {
                    self & (1 << bitpos) != 0
                }
            }
        )*
    };
}

impl_bitwise!(u16, u32);

#[test]
fn bitwise() {
    let mask = 0x8001u16;

    assert!(mask.bit(15));
    assert!(mask.bit(0));
    assert!(!mask.bit(7));

    let mail = 0x8200_0000u32;
    assert!(mail.bit(31));
    assert!(!mail.bit(30));
}
