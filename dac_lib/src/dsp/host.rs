//! Hand-offs to the DSP HLE host for things the audio UCode doesn't do by itself

/// Description of the UCode image the CPU wants to boot next, as sent through the mailbox after a
/// "load new UCode" control mail.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct NextUcode {
    pub mram_dest_addr: u32,
    pub mram_size: u16,
    pub mram_dram_addr: u16,
    pub iram_mram_addr: u32,
    pub iram_size: u16,
    pub iram_dest: u16,
    pub iram_startpc: u16,
    pub dram_mram_addr: u32,
    pub dram_size: u16,
    pub dram_dest: u16,
}

pub trait UcodeHost {
    /// The UCode asked to reboot into the DSP ROM
    fn reboot_to_rom(&mut self);

    /// The CPU uploaded a new UCode, the host should replace the current one. The current
    /// instance keeps running until the host drops it.
    fn swap_ucode(&mut self, next: &NextUcode);

    /// GBA link cryptography, `addr` points at the parameter block in guest RAM
    fn process_gba_crypto(&mut self, addr: u32);
}
