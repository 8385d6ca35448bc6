//! Behavior flags and the database of known UCode revisions

use bitflags::bitflags;
use fnv::FnvHashMap;

use crate::error::{DacError, DacResult};

bitflags! {
    /// Differences between the various revisions of the UCode. Resolved once from the UCode CRC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UcodeFlags: u32 {
        /// Positional mixing volumes are computed with a 1.15 scale instead of 1.16
        const MAKE_DOLBY_LOUDER = 1 << 0;
        /// No ARAM on this platform, samples are streamed from main RAM at a base set by
        /// command 0E
        const NO_ARAM = 1 << 1;
        /// Reduced mail protocol, see `Ucode::handle_mail_light`
        const LIGHT_PROTOCOL = 1 << 2;
        /// Voices only have 4 mixing destinations instead of 6
        const FOUR_MIXING_DESTS = 1 << 3;
        /// VPBs are 0x80 words long instead of 0xc0
        const TINY_VPB = 1 << 4;
        /// The channel "target volume" field holds the ramp delta directly
        const VOLUME_EXPLICIT_STEP = 1 << 5;
        /// Voice skip masks are sent once per frame as two 32-voice halves
        const SYNC_PER_FRAME = 1 << 6;
        /// Command 0D is a NOP
        const NO_CMD_0D = 1 << 7;
        /// Command 0C hands a GBA crypto parameter block to the host
        const SUPPORTS_GBA_CRYPTO = 1 << 8;
        /// Command 0C takes two unidentified parameters
        const WEIRD_CMD_0C = 1 << 9;
        /// Command 0D has been merged into command 02, which takes two more words
        const COMBINED_CMD_0D = 1 << 10;
    }
}

/// One known UCode revision
pub struct Metadata {
    pub crc: u32,
    pub flags: UcodeFlags,
    pub description: &'static str,
}

/// Immutable CRC -> flags mapping
pub struct UcodeDatabase {
    entries: FnvHashMap<u32, UcodeFlags>,
}

impl UcodeDatabase {
    /// Database with every revision in `DATABASE`
    pub fn builtin() -> UcodeDatabase {
        UcodeDatabase::from_entries(DATABASE.iter().map(|m| (m.crc, m.flags)))
    }

    pub fn from_entries<I>(entries: I) -> UcodeDatabase
    where
        I: IntoIterator<Item = (u32, UcodeFlags)>,
    {
        UcodeDatabase {
            entries: entries.into_iter().collect(),
        }
    }

    /// Return the flags for the UCode with the given `crc`. There's no sensible default, an
    /// unknown UCode is an error.
    pub fn lookup(&self, crc: u32) -> DacResult<UcodeFlags> {
        match self.entries.get(&crc) {
            Some(&flags) => Ok(flags),
            None => Err(DacError::UnknownUcode(crc)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Look up the static metadata of a UCode revision
pub fn lookup_metadata(crc: u32) -> Option<&'static Metadata> {
    DATABASE.iter().find(|m| m.crc == crc)
}

const LIGHT: UcodeFlags = UcodeFlags::LIGHT_PROTOCOL;
const LOUD_NO_ARAM: UcodeFlags = UcodeFlags::NO_ARAM.union(UcodeFlags::MAKE_DOLBY_LOUDER);

pub static DATABASE: [Metadata; 14] = [
    Metadata {
        crc: 0x24b2_2038,
        flags: LIGHT
            .union(UcodeFlags::FOUR_MIXING_DESTS)
            .union(UcodeFlags::TINY_VPB)
            .union(UcodeFlags::VOLUME_EXPLICIT_STEP)
            .union(UcodeFlags::NO_CMD_0D)
            .union(UcodeFlags::WEIRD_CMD_0C),
        description: "GameCube IPL (NTSC)",
    },
    Metadata {
        crc: 0x6ba3_b3ea,
        flags: LIGHT
            .union(UcodeFlags::FOUR_MIXING_DESTS)
            .union(UcodeFlags::NO_CMD_0D),
        description: "GameCube IPL (PAL)",
    },
    Metadata {
        crc: 0x42f6_4ac4,
        flags: LIGHT
            .union(UcodeFlags::NO_CMD_0D)
            .union(UcodeFlags::WEIRD_CMD_0C),
        description: "Luigi's Mansion",
    },
    Metadata {
        crc: 0x4be6_a5cb,
        flags: LIGHT
            .union(UcodeFlags::NO_CMD_0D)
            .union(UcodeFlags::SUPPORTS_GBA_CRYPTO),
        description: "Pikmin, Animal Crossing",
    },
    Metadata {
        crc: 0xdf05_9f68,
        flags: LIGHT
            .union(UcodeFlags::NO_CMD_0D)
            .union(UcodeFlags::SUPPORTS_GBA_CRYPTO),
        description: "Pikmin (demo)",
    },
    Metadata {
        crc: 0x267f_d05a,
        flags: UcodeFlags::SYNC_PER_FRAME.union(UcodeFlags::NO_CMD_0D),
        description: "Pikmin (PAL)",
    },
    Metadata {
        crc: 0x56d3_6052,
        flags: UcodeFlags::SYNC_PER_FRAME.union(UcodeFlags::NO_CMD_0D),
        description: "Super Mario Sunshine",
    },
    Metadata {
        crc: 0x8684_0740,
        flags: UcodeFlags::empty(),
        description: "The Legend of Zelda: The Wind Waker",
    },
    Metadata {
        crc: 0x2fcd_f1ec,
        flags: UcodeFlags::MAKE_DOLBY_LOUDER,
        description: "Four Swords Adventures, Mario Kart: Double Dash!!, Pikmin 2",
    },
    Metadata {
        crc: 0x6ca3_3a6d,
        flags: UcodeFlags::MAKE_DOLBY_LOUDER,
        description: "Twilight Princess (GameCube), Donkey Kong Jungle Beat",
    },
    Metadata {
        crc: 0x6c3f_6f94,
        flags: LOUD_NO_ARAM,
        description: "Twilight Princess (Wii)",
    },
    Metadata {
        crc: 0xd643_001f,
        flags: LOUD_NO_ARAM,
        description: "Super Mario Galaxy, Super Mario Galaxy 2",
    },
    Metadata {
        crc: 0xb7eb_9a9c,
        flags: LOUD_NO_ARAM.union(UcodeFlags::COMBINED_CMD_0D),
        description: "Pikmin (New Play Control)",
    },
    Metadata {
        crc: 0xeaeb_38cc,
        flags: LOUD_NO_ARAM,
        description: "Pikmin 2 (New Play Control)",
    },
];
