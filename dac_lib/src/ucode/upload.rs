//! Collects the mails describing the next UCode after a "replace UCode" control mail

use crate::dsp::host::NextUcode;

/// Number of mails making up an upload request. The last three carry nothing we care about.
pub const UPLOAD_MAIL_COUNT: u8 = 13;

#[derive(serde::Serialize, serde::Deserialize, Default)]
pub struct UploadSetup {
    next: NextUcode,
    step: u8,
}

impl UploadSetup {
    pub fn new() -> UploadSetup {
        UploadSetup::default()
    }

    /// Feed one mail. Returns the complete description once the last mail has been received and
    /// resets the collector.
    pub fn feed(&mut self, mail: u32) -> Option<NextUcode> {
        let half = mail as u16;
        let n = &mut self.next;

        match self.step {
            0 => n.mram_dest_addr = mail,
            1 => n.mram_size = half,
            2 => n.mram_dram_addr = half,
            3 => n.iram_mram_addr = mail,
            4 => n.iram_size = half,
            5 => n.iram_dest = half,
            6 => n.iram_startpc = half,
            7 => n.dram_mram_addr = mail,
            8 => n.dram_size = half,
            9 => n.dram_dest = half,
            _ => (),
        }

        self.step += 1;

        if self.step == UPLOAD_MAIL_COUNT {
            let next = self.next;
            *self = UploadSetup::new();
            Some(next)
        } else {
            None
        }
    }

    pub fn step(&self) -> u8 {
        self.step
    }
}

#[test]
fn upload_collects_thirteen_mails() {
    let mut up = UploadSetup::new();

    let mails = [
        0x8000_1000,
        0x0000_0400,
        0x0000_0010,
        0x8000_2000,
        0x0001_0800,
        0x0000_0000,
        0x0000_0010,
        0x8000_3000,
        0x0000_0200,
        0x0000_0000,
        0,
        0,
    ];

    for &m in &mails {
        assert_eq!(up.feed(m), None);
    }
    assert_eq!(up.step(), 12);

    let next = up.feed(0).unwrap();

    assert_eq!(next.mram_dest_addr, 0x8000_1000);
    assert_eq!(next.mram_size, 0x400);
    assert_eq!(next.iram_mram_addr, 0x8000_2000);
    // Only the low halfword is kept
    assert_eq!(next.iram_size, 0x0800);
    assert_eq!(next.iram_startpc, 0x10);
    assert_eq!(next.dram_mram_addr, 0x8000_3000);
    assert_eq!(next.dram_size, 0x200);

    assert_eq!(up.step(), 0);
}
