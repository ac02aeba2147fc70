//! Drive control commands.

use crate::{
    config::SdMmcSpiConfig,
    consts::{commands, BLOCK_SIZE},
    csd::{
        sd_status_erase_block_sectors, CapacityProvider, CidData, Csd, CsdData, CsdV1,
        SdStatusData,
    },
    response::{R1Response, R3OcrPayload},
    CardType, Error, ErrorFor, SdMmcSpi, DRIVE,
};

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Drive control command with its typed payload.
#[derive(Debug)]
pub enum IoctlCmd<'a> {
    /// Wait until the card finished internal write operations.
    CtrlSync,
    /// Number of sectors on the card.
    GetSectorCount(&'a mut u64),
    /// Sector size, always [`BLOCK_SIZE`].
    GetSectorSize(&'a mut u16),
    /// Erase block size in sectors.
    GetBlockSize(&'a mut u32),
    /// Erase the inclusive sector range `start..=end` (SD cards only).
    CtrlTrim { start: u32, end: u32 },
    /// Card type found at initialization.
    GetCardType(&'a mut CardType),
    /// Raw CSD register.
    GetCsd(&'a mut CsdData),
    /// Raw CID register.
    GetCid(&'a mut CidData),
    /// Raw OCR register.
    GetOcr(&'a mut R3OcrPayload),
    /// Raw SD status block (SD cards only).
    GetSdStatus(&'a mut SdStatusData),
    /// Any other FatFs control code. Always rejected with [`Error::Parameter`].
    Unsupported(u8),
}

impl<'a, Spi, Cs, Config> SdMmcSpi<'a, Spi, Cs, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Config: SdMmcSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Miscellaneous drive controls other than data read/write.
    pub fn ioctl(&mut self, drive: u8, cmd: IoctlCmd) -> Result<(), ErrorFor<Spi, Cs>> {
        if drive != DRIVE {
            return Err(Error::Parameter);
        }
        self.validate_ready()?;

        self.cs_scope(|s| s.dispatch(cmd))
    }

    /// Run one control command, the card may be left selected.
    fn dispatch(&mut self, cmd: IoctlCmd) -> Result<(), ErrorFor<Spi, Cs>> {
        match cmd {
            IoctlCmd::CtrlSync => {
                if self.select()? {
                    Ok(())
                } else {
                    Err(Error::Io)
                }
            }
            IoctlCmd::GetSectorCount(count) => {
                let mut csd_data = CsdData::default();
                self.read_register(commands::CMD9, &mut csd_data)?;
                *count = Csd::from(csd_data).card_capacity_blocks();
                Ok(())
            }
            IoctlCmd::GetSectorSize(size) => {
                *size = BLOCK_SIZE as u16;
                Ok(())
            }
            IoctlCmd::GetBlockSize(sectors) => {
                *sectors = self.erase_block_sectors()?;
                Ok(())
            }
            IoctlCmd::CtrlTrim { start, end } => self.trim(start, end),
            IoctlCmd::GetCardType(card_type) => {
                *card_type = self.card_type;
                Ok(())
            }
            IoctlCmd::GetCsd(csd_data) => self.read_register(commands::CMD9, csd_data),
            IoctlCmd::GetCid(cid_data) => self.read_register(commands::CMD10, cid_data),
            IoctlCmd::GetOcr(ocr) => {
                if self.send_command(commands::CMD58, 0x0000_0000)? != R1Response::READY_STATE {
                    return Err(Error::Io);
                }
                self.receive_slice(ocr)
            }
            IoctlCmd::GetSdStatus(sd_status) => {
                if !self.card_type.is_sd() {
                    return Err(Error::Io);
                }
                self.read_sd_status(sd_status)
            }
            IoctlCmd::Unsupported(code) => {
                warn!("Unsupported ioctl code {}", code);
                Err(Error::Parameter)
            }
        }
    }

    /// ACMD13 into `data`, the rest of the 64 byte SD status is dropped.
    fn read_sd_status(&mut self, data: &mut [u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        if self.send_command(commands::ACMD13, 0x0000_0000)? != R1Response::READY_STATE {
            return Err(Error::Io);
        }
        // Second byte of the R2 response.
        self.skip_byte()?;

        self.receive_block(data)?;
        for _ in data.len()..core::mem::size_of::<SdStatusData>() {
            self.skip_byte()?;
        }

        Ok(())
    }

    /// Erase block size in sectors.
    fn erase_block_sectors(&mut self) -> Result<u32, ErrorFor<Spi, Cs>> {
        match self.card_type {
            CardType::Sd2 { .. } => {
                let mut head = [0u8; 16];
                self.read_sd_status(&mut head)?;
                Ok(sd_status_erase_block_sectors(&head))
            }
            CardType::Sd1 => {
                let mut csd_data = CsdData::default();
                self.read_register(commands::CMD9, &mut csd_data)?;
                Ok(CsdV1::from(csd_data).sd_erase_block_sectors())
            }
            CardType::Mmc => {
                let mut csd_data = CsdData::default();
                self.read_register(commands::CMD9, &mut csd_data)?;
                Ok(CsdV1::from(csd_data).mmc_erase_block_sectors())
            }
            CardType::Unknown => Err(Error::NotReady),
        }
    }

    /// Erase `start..=end`, waiting up to the erase timeout for completion.
    fn trim(&mut self, start: u32, end: u32) -> Result<(), ErrorFor<Spi, Cs>> {
        if !self.card_type.is_sd() {
            warn!("Trim needs an SD card");
            return Err(Error::Io);
        }

        let mut csd_data = CsdData::default();
        self.dispatch(IoctlCmd::GetCsd(&mut csd_data))?;
        if !Csd::from(csd_data).supports_sector_erase() {
            warn!("SD does not erase single sectors");
            return Err(Error::Io);
        }

        let start = self.address(start)?;
        let end = self.address(end)?;

        if self.send_command(commands::CMD32, start)? == R1Response::READY_STATE
            && self.send_command(commands::CMD33, end)? == R1Response::READY_STATE
            && self.send_command(commands::CMD38, 0x0000_0000)? == R1Response::READY_STATE
            && self.wait_ready(Config::ERASE_TIMEOUT_MS)?
        {
            Ok(())
        } else {
            warn!("SD erase failed");
            Err(Error::Io)
        }
    }
}
