use crate::consts::BLOCK_SIZE_U64;

use bitfield::bitfield;
use size::{consts::KiB, Size};

/// Card Specific Data block.
pub type CsdData = [u8; 16];

/// Card Identification block.
pub type CidData = [u8; 16];

/// SD status block.
pub type SdStatusData = [u8; 64];

bitfield! {
    /// Card Specific Data, version 1 (SDSC and MMC).
    ///
    /// Also decodes the MMC erase group fields, which share bits 46:37 with
    /// the SD erase fields. The capacity formula adds one to `device_size`.
    pub struct CsdV1(u128);
    pub u8, version, _: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub read_partial_blocks, _: 79;
    pub write_block_misalignment, _: 78;
    pub read_block_misalignment, _: 77;
    pub dsr_implemented, _: 76;
    pub u16, device_size, _: 73, 62;
    pub u8, max_read_current_vdd_max, _: 61, 59;
    pub u8, max_read_current_vdd_min, _: 58, 56;
    pub u8, max_write_current_vdd_max, _: 55, 53;
    pub u8, max_write_current_vdd_min, _: 52, 50;
    pub u8, device_size_multiplier, _: 49, 47;
    pub erase_single_block_enabled, _: 46;
    pub u8, erase_sector_size, _: 45, 39;
    /// MMC only, overlaps the SD erase fields.
    pub u8, erase_group_size, _: 46, 42;
    /// MMC only, overlaps the SD erase fields.
    pub u8, erase_group_multiplier, _: 41, 37;
    pub u8, write_protect_group_size, _: 38, 32;
    pub write_protect_group_enable, _: 31;
    pub u8, write_speed_factor, _: 28, 26;
    pub u8, max_write_data_length, _: 25, 22;
    pub write_partial_blocks_allowed, _: 21;
    pub file_format_group, _: 15;
    pub copy_flag, _: 14;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, file_format, _: 11, 10;
    pub u8, crc, _: 7, 1;
}

bitfield! {
    /// Card Specific Data, version 2 (SDHC/SDXC).
    ///
    /// Differs from version 1 in `device_size` (22 bits at 69:48) and in
    /// dropping the current and multiplier fields.
    pub struct CsdV2(u128);
    pub u8, version, _: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub read_partial_blocks, _: 79;
    pub write_block_misalignment, _: 78;
    pub read_block_misalignment, _: 77;
    pub dsr_implemented, _: 76;
    pub u32, device_size, _: 69, 48;
    pub erase_single_block_enabled, _: 46;
    pub u8, erase_sector_size, _: 45, 39;
    pub u8, write_protect_group_size, _: 38, 32;
    pub write_protect_group_enable, _: 31;
    pub u8, write_speed_factor, _: 28, 26;
    pub u8, max_write_data_length, _: 25, 22;
    pub write_partial_blocks_allowed, _: 21;
    pub file_format_group, _: 15;
    pub copy_flag, _: 14;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, file_format, _: 11, 10;
    pub u8, crc, _: 7, 1;
}

/// Card Specific Data, generic container.
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

/// Represents capacity provider.
pub trait CapacityProvider {
    /// Returns the card capacity in bytes.
    fn card_capacity(&self) -> Size;

    /// Returns the card capacity in 512-byte blocks.
    fn card_capacity_blocks(&self) -> u64;
}

impl From<CsdData> for CsdV1 {
    fn from(csd_data: CsdData) -> Self {
        CsdV1(u128::from_be_bytes(csd_data))
    }
}

impl From<CsdData> for CsdV2 {
    fn from(csd_data: CsdData) -> Self {
        CsdV2(u128::from_be_bytes(csd_data))
    }
}

/// Layout is chosen by the CSD_STRUCTURE field, not by the card type:
/// MMC registers with structure 2 or 3 still use the version 1 layout.
impl From<CsdData> for Csd {
    fn from(csd_data: CsdData) -> Self {
        if csd_data[0] >> 6 == 1 {
            Csd::V2(CsdV2::from(csd_data))
        } else {
            Csd::V1(CsdV1::from(csd_data))
        }
    }
}

impl CsdV1 {
    /// Erase unit of an SDSC card in sectors.
    pub fn sd_erase_block_sectors(&self) -> u32 {
        (u32::from(self.erase_sector_size()) + 1)
            << self.max_write_data_length().saturating_sub(9)
    }

    /// Erase unit of an MMC card in sectors.
    pub fn mmc_erase_block_sectors(&self) -> u32 {
        (u32::from(self.erase_group_size()) + 1) * (u32::from(self.erase_group_multiplier()) + 1)
    }
}

impl Csd {
    /// Card accepts erase commands on single sectors.
    pub fn supports_sector_erase(&self) -> bool {
        match self {
            Csd::V1(csd) => csd.erase_single_block_enabled(),
            Csd::V2(_) => true,
        }
    }
}

impl CapacityProvider for CsdV1 {
    fn card_capacity(&self) -> Size {
        Size::from_bytes(self.card_capacity_blocks() * BLOCK_SIZE_U64)
    }

    fn card_capacity_blocks(&self) -> u64 {
        let shift =
            (self.device_size_multiplier() + self.read_block_length() + 2).saturating_sub(9);
        (u64::from(self.device_size()) + 1) << shift
    }
}

impl CapacityProvider for CsdV2 {
    fn card_capacity(&self) -> Size {
        Size::from_bytes(self.card_capacity_blocks() * BLOCK_SIZE_U64)
    }

    fn card_capacity_blocks(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * (KiB as u64)
    }
}

impl CapacityProvider for Csd {
    fn card_capacity(&self) -> Size {
        match self {
            Csd::V1(csd) => csd.card_capacity(),
            Csd::V2(csd) => csd.card_capacity(),
        }
    }

    fn card_capacity_blocks(&self) -> u64 {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }
}

/// Erase unit of an SD v2 card in sectors, from the AU_SIZE field of the SD status.
pub fn sd_status_erase_block_sectors(sd_status: &[u8]) -> u32 {
    16 << (sd_status[10] >> 4)
}
