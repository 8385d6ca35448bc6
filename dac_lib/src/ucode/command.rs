//! Command word buffering and mail word decoding

use bitfield::bitfield;
use num_derive::FromPrimitive;
use serde_big_array::BigArray;

/// Depth of the command ring buffer, in 32-bit words. Must divide 256 for the index wrapping to
/// work.
pub const COMMAND_RING_DEPTH: usize = 64;

/// Ring buffer holding the words of commands received but not yet executed
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CommandRing {
    #[serde(with = "BigArray")]
    buffer: [u32; COMMAND_RING_DEPTH],
    /// Read index in buffer. Wider than COMMAND_RING_DEPTH to differentiate full and empty.
    read_index: u8,
    /// Write index in buffer. Wider than COMMAND_RING_DEPTH to differentiate full and empty.
    write_index: u8,
}

impl CommandRing {
    pub fn new() -> CommandRing {
        CommandRing {
            buffer: [0; COMMAND_RING_DEPTH],
            read_index: 0,
            write_index: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read_index == self.write_index
    }

    pub fn is_full(&self) -> bool {
        self.len() == COMMAND_RING_DEPTH
    }

    pub fn len(&self) -> usize {
        let l = self.write_index.wrapping_sub(self.read_index);

        l as usize
    }

    #[cfg(test)]
    pub fn clear(&mut self) {
        self.read_index = self.write_index;
    }

    /// Append a word. If the ring is full the oldest word is lost, the same way the hardware
    /// buffer gets overwritten by a misbehaving game.
    pub fn push(&mut self, val: u32) {
        if self.is_full() {
            warn!("Command ring overflow, dropping {:08x}", self.buffer[self.slot(self.read_index)]);
            self.read_index = self.read_index.wrapping_add(1);
        }

        let i = self.slot(self.write_index);

        self.write_index = self.write_index.wrapping_add(1);

        self.buffer[i] = val;
    }

    pub fn pop(&mut self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }

        let i = self.slot(self.read_index);

        self.read_index = self.read_index.wrapping_add(1);

        Some(self.buffer[i])
    }

    #[cfg(test)]
    pub fn peek(&self) -> Option<u32> {
        if self.is_empty() {
            None
        } else {
            Some(self.buffer[self.slot(self.read_index)])
        }
    }

    fn slot(&self, index: u8) -> usize {
        index as usize % COMMAND_RING_DEPTH
    }
}

bitfield! {
    /// First word of a command
    #[derive(Clone, Copy)]
    pub struct CommandMail(u32);
    impl Debug;

    /// Words with this bit clear are never command headers
    pub bool, is_command, _: 31;
    pub u8, opcode, _: 30, 24;
    /// Echoed back in the command acknowledgment
    pub u16, sync, _: 31, 16;
    /// Frame count of the render command
    pub u8, frames, _: 23, 16;
    /// Opcode-specific parameter
    pub u16, extra, _: 15, 0;
}

bitfield! {
    /// Mail sent by the CPU in the default protocol when it has consumed the rendered frames
    #[derive(Clone, Copy)]
    pub struct ControlMail(u32);
    impl Debug;

    /// Should be CONTROL_MAIL_PREFIX
    pub u16, prefix, _: 31, 16;
    pub u16, action, _: 15, 0;
}

pub const CONTROL_MAIL_PREFIX: u16 = 0xcdd1;

/// What the CPU wants the UCode to do after a render
#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlAction {
    Halt = 0,
    /// Run pending commands then receive a new UCode
    ReplaceUcode = 1,
    RebootToRom = 2,
    /// Acknowledge the end of the render and run pending commands
    Continue = 3,
}

bitfield! {
    /// Voice unlock mail received in the RENDERING state
    #[derive(Clone, Copy)]
    pub struct SyncMail(u32);
    impl Debug;

    pub u16, hi, _: 31, 16;
    pub u16, lo, _: 15, 0;
    /// Index of the last group of 16 voices unlocked by this mail
    pub u8, voice_group, _: 19, 16;
    /// Entry of the skip mask array updated by this mail
    pub u8, skip_index, _: 23, 16;
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn command_ring() {
        let mut ring = CommandRing::new();

        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.peek(), None);

        ring.push(0x8100_0010);
        ring.push(0x8000_0000);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.peek(), Some(0x8100_0010));
        assert_eq!(ring.pop(), Some(0x8100_0010));
        assert_eq!(ring.pop(), Some(0x8000_0000));
        assert!(ring.is_empty());

        for i in 0..COMMAND_RING_DEPTH {
            assert_eq!(ring.len(), i);
            ring.push(i as u32);
        }
        assert!(ring.is_full());

        ring.clear();
        assert!(ring.is_empty());
        assert!(!ring.is_full());
    }

    #[test]
    fn command_ring_index_wrap() {
        let mut ring = CommandRing::new();

        for v in 0..256 {
            for i in 0..COMMAND_RING_DEPTH {
                assert_eq!(ring.len(), i);
                ring.push(v);
            }

            for i in 0..COMMAND_RING_DEPTH {
                assert_eq!(ring.len(), COMMAND_RING_DEPTH - i);
                assert_eq!(ring.pop(), Some(v));
            }
        }
    }

    #[test]
    fn command_ring_overflow_drops_oldest() {
        let mut ring = CommandRing::new();

        for i in 0..(COMMAND_RING_DEPTH as u32 + 1) {
            ring.push(i);
        }

        assert!(ring.is_full());
        assert_eq!(ring.pop(), Some(1));
    }

    #[test]
    fn mail_fields() {
        let cmd = CommandMail(0x8201_7fff);

        assert!(cmd.is_command());
        assert_eq!(cmd.opcode(), 0x02);
        assert_eq!(cmd.sync(), 0x8201);
        assert_eq!(cmd.frames(), 0x01);
        assert_eq!(cmd.extra(), 0x7fff);

        let ctrl = ControlMail(0xcdd1_0003);
        assert_eq!(ctrl.prefix(), CONTROL_MAIL_PREFIX);
        assert_eq!(
            ControlAction::from_u16(ctrl.action()),
            Some(ControlAction::Continue)
        );

        let sync = SyncMail(0x0003_f00f);
        assert_eq!(sync.voice_group(), 3);
        assert_eq!(sync.skip_index(), 3);
        assert_eq!(sync.lo(), 0xf00f);
    }
}
