//! Command framing.

use crate::{
    config::SdMmcSpiConfig,
    consts::{commands, tokens},
    crc::command_crc,
    response::R1Response,
    ErrorFor, SdMmcSpi,
};

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

impl<'a, Spi, Cs, Config> SdMmcSpi<'a, Spi, Cs, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Config: SdMmcSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Send command, prefixed with APP_CMD for ACMDs.
    ///
    /// The returned R1 may still have bit 7 set: the card never answered,
    /// or never became ready ([`R1Response::NOT_SELECTED`]).
    pub(crate) fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
    ) -> Result<R1Response, ErrorFor<Spi, Cs>> {
        if (cmd & commands::ACMD_FLAG) != 0 {
            let prefix = self.send_command_impl(commands::CMD55, 0x0000_0000)?;
            if !prefix.is_accepted() {
                debug!(
                    "CMD55 before ACMD{} rejected: 0x{:02X}",
                    commands::index(cmd),
                    prefix.byte()
                );
                return Ok(prefix);
            }
        }

        self.send_command_impl(cmd & !commands::ACMD_FLAG, arg)
    }

    /// Send command implementation.
    fn send_command_impl(&mut self, cmd: u8, arg: u32) -> Result<R1Response, ErrorFor<Spi, Cs>> {
        // CMD12 is sent in the middle of a read stream, the card is busy
        // sending data and must not be reselected.
        if cmd != commands::CMD12 {
            self.deselect()?;
            if !self.select()? {
                return Ok(R1Response::NOT_SELECTED);
            }
        }

        let mut buf = [
            cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            0,
        ];
        let crc_index = buf.len() - 1;

        // Only CMD0 and CMD8 are CRC checked before the card leaves idle.
        let crc = match cmd {
            commands::CMD0 | commands::CMD8 => command_crc(&buf[..crc_index]),
            _ => tokens::DUMMY_CRC,
        };
        buf[crc_index] = crc;

        self.send_slice(&buf)?;

        if cmd == commands::CMD12 {
            self.skip_byte()?;
        }

        let mut r1 = R1Response::NOT_SELECTED;
        for _ in 0..Config::READ_R1_ATTEMPTS {
            r1 = R1Response::from_byte(self.receive()?);

            if r1.is_valid() {
                break;
            }
        }

        if !r1.is_valid() {
            debug!("No response to CMD{}", commands::index(cmd));
        }

        Ok(r1)
    }

    /// Read a 16 byte register (CSD or CID) with a data block.
    pub(crate) fn read_register(
        &mut self,
        cmd: u8,
        data: &mut [u8; 16],
    ) -> Result<(), ErrorFor<Spi, Cs>> {
        if self.send_command(cmd, 0x0000_0000)? != R1Response::READY_STATE {
            warn!("Register read CMD{} rejected", commands::index(cmd));
            return Err(crate::Error::Io);
        }

        self.receive_block(data)
    }
}
