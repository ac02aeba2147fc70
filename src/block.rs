//! Data block transfers.

use crate::{
    config::SdMmcSpiConfig,
    consts::{commands, tokens, BLOCK_SIZE},
    response::R1Response,
    tick::Deadline,
    Error, ErrorFor, SdMmcSpi,
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
    /// Receive one data block into `data`; the trailing CRC is discarded.
    ///
    /// On `Err` the content of `data` is unspecified.
    pub(crate) fn receive_block(&mut self, data: &mut [u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        let deadline = Deadline::start(self.tick, Config::DATA_TOKEN_TIMEOUT_MS);

        let token = loop {
            let token = self.receive()?;
            if token != tokens::AVAILABLE || deadline.expired(self.tick) {
                break token;
            }
        };

        if token != tokens::DATA_START_BLOCK {
            warn!("SD data token missing, got 0x{:02X}", token);
            return Err(Error::Io);
        }

        for pair in data.chunks_mut(2) {
            self.receive_slice(pair)?;
        }

        self.skip_byte()?;
        self.skip_byte()?;

        Ok(())
    }

    /// Send one data block behind `token`, or only the stop token.
    #[cfg(feature = "write")]
    pub(crate) fn send_block(&mut self, token: u8, data: &[u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        if !self.wait_ready(Config::READY_TIMEOUT_MS)? {
            warn!("SD busy before data token 0x{:02X}", token);
            return Err(Error::Io);
        }

        self.send(token)?;

        if token == tokens::STOP_TRAN {
            return Ok(());
        }

        for pair in data.chunks(2) {
            self.send_slice(pair)?;
        }
        // CRC is not checked by the card in SPI mode.
        self.send(0xFF)?;
        self.send(0xFF)?;

        let response = self.receive()?;
        if (response & tokens::DATA_RES_MASK) != tokens::DATA_RES_ACCEPTED {
            warn!("SD rejected data block: 0x{:02X}", response);
            return Err(Error::Io);
        }

        Ok(())
    }

    /// READ_SINGLE_BLOCK followed by one block.
    pub(crate) fn read_single(
        &mut self,
        buf: &mut [u8],
        address: u32,
    ) -> Result<(), ErrorFor<Spi, Cs>> {
        let r1 = self.send_command(commands::CMD17, address)?;
        if r1 != R1Response::READY_STATE {
            warn!("CMD17 rejected: 0x{:02X}", r1.byte());
            return Err(Error::Io);
        }

        self.receive_block(buf)
    }

    /// READ_MULTIPLE_BLOCK, blocks until the first failure, then STOP_TRANSMISSION.
    pub(crate) fn read_multiple(
        &mut self,
        buf: &mut [u8],
        address: u32,
    ) -> Result<(), ErrorFor<Spi, Cs>> {
        let r1 = self.send_command(commands::CMD18, address)?;
        if r1 != R1Response::READY_STATE {
            warn!("CMD18 rejected: 0x{:02X}", r1.byte());
            return Err(Error::Io);
        }

        let mut received = Ok(());
        for (index, chunk) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            received = self.receive_block(chunk);
            if received.is_err() {
                warn!("SD multiple read stopped at block {}", index);
                break;
            }
        }

        let stopped = self.send_command(commands::CMD12, 0x0000_0000);

        received?;
        stopped?;

        Ok(())
    }

    /// WRITE_BLOCK followed by one block.
    #[cfg(feature = "write")]
    pub(crate) fn write_single(
        &mut self,
        buf: &[u8],
        address: u32,
    ) -> Result<(), ErrorFor<Spi, Cs>> {
        let r1 = self.send_command(commands::CMD24, address)?;
        if r1 != R1Response::READY_STATE {
            warn!("CMD24 rejected: 0x{:02X}", r1.byte());
            return Err(Error::Io);
        }

        self.send_block(tokens::DATA_START_BLOCK, buf)
    }

    /// WRITE_MULTIPLE_BLOCK, blocks until the first failure, then the stop token.
    #[cfg(feature = "write")]
    pub(crate) fn write_multiple(
        &mut self,
        buf: &[u8],
        address: u32,
        count: u32,
    ) -> Result<(), ErrorFor<Spi, Cs>> {
        if self.card_type.is_sd() {
            // Pre-erase hint only, the write proceeds whatever the answer.
            self.send_command(commands::ACMD23, count)?;
        }

        let r1 = self.send_command(commands::CMD25, address)?;
        if r1 != R1Response::READY_STATE {
            warn!("CMD25 rejected: 0x{:02X}", r1.byte());
            return Err(Error::Io);
        }

        let mut sent = Ok(());
        for (index, chunk) in buf.chunks(BLOCK_SIZE).enumerate() {
            sent = self.send_block(tokens::WRITE_MULTIPLE, chunk);
            if sent.is_err() {
                warn!("SD multiple write stopped at block {}", index);
                break;
            }
        }

        let stopped = self.send_block(tokens::STOP_TRAN, &[]);

        sent?;
        stopped?;

        Ok(())
    }
}
