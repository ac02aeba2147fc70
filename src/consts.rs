/// Size of a sector, the only transfer unit of the block device.
pub const BLOCK_SIZE: usize = 512;
/// Size of a sector as `u32`, used for address scaling.
pub const BLOCK_SIZE_U32: u32 = BLOCK_SIZE as u32;
/// Size of a sector as `u64`.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

pub mod commands {
    /// CMD base value (start bit + transmission bit).
    pub const CMD_BASE: u8 = 0x40;
    /// ACMD flag, never transmitted.
    pub const ACMD_FLAG: u8 = 0x80;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = CMD_BASE;
    /// SEND_OP_COND - activates the MMC initialization process.
    pub const CMD1: u8 = CMD_BASE + 1;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = CMD_BASE + 8;
    /// SEND_CSD - read the Card Specific Data (CSD register).
    pub const CMD9: u8 = CMD_BASE + 9;
    /// SEND_CID - read the Card Identification register.
    pub const CMD10: u8 = CMD_BASE + 10;
    /// STOP_TRANSMISSION - end multiple block read sequence.
    pub const CMD12: u8 = CMD_BASE + 12;
    /// SET_BLOCKLEN - set the block length of byte addressed cards.
    pub const CMD16: u8 = CMD_BASE + 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = CMD_BASE + 17;
    /// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card.
    pub const CMD18: u8 = CMD_BASE + 18;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = CMD_BASE + 24;
    /// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION.
    pub const CMD25: u8 = CMD_BASE + 25;
    /// ERASE_WR_BLK_START - first block of the range to erase.
    pub const CMD32: u8 = CMD_BASE + 32;
    /// ERASE_WR_BLK_END - last block of the range to erase.
    pub const CMD33: u8 = CMD_BASE + 33;
    /// ERASE - erase the selected range.
    pub const CMD38: u8 = CMD_BASE + 38;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = CMD_BASE + 55;
    /// READ_OCR - read the OCR register of a card.
    pub const CMD58: u8 = CMD_BASE + 58;
    /// SD_STATUS - read the 64 byte SD status block.
    pub const ACMD13: u8 = CMD_BASE + ACMD_FLAG + 13;
    /// SET_WR_BLK_ERASE_COUNT - pre-erase count for the next multiple block write.
    pub const ACMD23: u8 = CMD_BASE + ACMD_FLAG + 23;
    /// SD_SEND_OP_COMD - Sends host capacity support information and activates
    /// the card's initialization process.
    pub const ACMD41: u8 = CMD_BASE + ACMD_FLAG + 41;

    /// CMD8 argument: 2.7-3.6V supply with the 0xAA check pattern.
    pub const CMD8_ARG: u32 = 0x0000_01AA;
    /// ACMD41 argument: host supports high capacity cards.
    pub const ACMD41_HCS: u32 = 1 << 30;

    /// Command index for logging.
    pub const fn index(cmd: u8) -> u8 {
        cmd & !(CMD_BASE | ACMD_FLAG)
    }
}

pub mod tokens {
    /// Bus is idle, card is ready.
    pub const AVAILABLE: u8 = 0xFF;
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Stop token for write multiple blocks.
    pub const STOP_TRAN: u8 = 0xFD;
    /// Start data token for write multiple blocks.
    pub const WRITE_MULTIPLE: u8 = 0xFC;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
    /// Dummy CRC byte for commands sent after the card stopped checking CRC.
    pub const DUMMY_CRC: u8 = 0x01;
}
