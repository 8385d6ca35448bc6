//! Guest memory access. The GameCube is big endian, the UCode only ever does byte, halfword or
//! word accesses.

/// The access sizes used by the UCode
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum AccessWidth {
    Byte = 1,
    HalfWord = 2,
    Word = 4,
}

pub trait Addressable: Copy {
    fn width() -> AccessWidth;
    fn from_u32(v: u32) -> Self;
    fn as_u32(self) -> u32;
}

impl Addressable for u8 {
    fn width() -> AccessWidth {
        AccessWidth::Byte
    }

    fn from_u32(v: u32) -> u8 {
        v as u8
    }

    fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Addressable for u16 {
    fn width() -> AccessWidth {
        AccessWidth::HalfWord
    }

    fn from_u32(v: u32) -> u16 {
        v as u16
    }

    fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Addressable for u32 {
    fn width() -> AccessWidth {
        AccessWidth::Word
    }

    fn from_u32(v: u32) -> u32 {
        v
    }

    fn as_u32(self) -> u32 {
        self
    }
}

/// Byte-addressable guest memory. Implemented by the emulator's RAM and ARAM, and by `Ram` for
/// standalone use.
pub trait GuestMemory {
    fn read_u8(&self, addr: u32) -> u8;
    fn write_u8(&mut self, addr: u32, v: u8);
}

/// Big endian multi-byte accessors on top of `GuestMemory`
pub trait MemoryAccess {
    fn load<T: Addressable>(&self, addr: u32) -> T;
    fn store<T: Addressable>(&mut self, addr: u32, v: T);

    /// Load a signed big endian halfword
    fn load_i16(&self, addr: u32) -> i16 {
        self.load::<u16>(addr) as i16
    }
}

impl<M: GuestMemory + ?Sized> MemoryAccess for M {
    fn load<T: Addressable>(&self, addr: u32) -> T {
        let mut v = 0u32;

        for i in 0..T::width() as u32 {
            v = (v << 8) | self.read_u8(addr.wrapping_add(i)) as u32;
        }

        T::from_u32(v)
    }

    fn store<T: Addressable>(&mut self, addr: u32, v: T) {
        let width = T::width() as u32;
        let v = v.as_u32();

        for i in 0..width {
            let shift = (width - 1 - i) * 8;
            self.write_u8(addr.wrapping_add(i), (v >> shift) as u8);
        }
    }
}

/// The top two bits select the cached/uncached mirror, they're ignored by the DMA engines
const PHYS_MASK: u32 = 0x3fff_ffff;

/// Flat RAM image
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Ram {
        Ram {
            data: vec![0; size],
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Ram {
        Ram { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl GuestMemory for Ram {
    /// Out-of-range reads return 0
    fn read_u8(&self, addr: u32) -> u8 {
        let addr = (addr & PHYS_MASK) as usize;

        self.data.get(addr).copied().unwrap_or(0)
    }

    /// Out-of-range writes are ignored
    fn write_u8(&mut self, addr: u32, v: u8) {
        let addr = (addr & PHYS_MASK) as usize;

        if let Some(b) = self.data.get_mut(addr) {
            *b = v;
        }
    }
}
