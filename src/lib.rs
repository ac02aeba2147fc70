//! Polled MMC/SD block device over SPI, written in Embedded Rust.
//!
//! This crate exposes an SD/MMC card as a drive of 512-byte sectors to a
//! filesystem layer (FatFs-style `initialize`/`status`/`read`/`write`/`ioctl`).
//! Everything is synchronous: waits busy-poll the card against millisecond
//! deadlines taken from a [`DiskTick`] that the host advances at 1 kHz.
//!
//! ## Features
//!
//! * `write` (default): [`SdMmcSpi::write`].
//! * `ioctl` (default): [`SdMmcSpi::ioctl`].
//! * `log` (default): log messages through the `log` crate.
//! * `defmt-log`: log messages through `defmt` instead.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod logging;

mod block;
mod command;
mod config;
mod consts;
mod crc;
mod csd;
mod init;
#[cfg(feature = "ioctl")]
mod ioctl;
mod response;
mod status;
mod tick;

pub use crate::config::{DefaultSdMmcSpiConfig, SdMmcSpiConfig};
pub use crate::consts::BLOCK_SIZE;
pub use crate::csd::{CapacityProvider, CidData, Csd, CsdData, CsdV1, CsdV2, SdStatusData};
#[cfg(feature = "ioctl")]
pub use crate::ioctl::IoctlCmd;
pub use crate::response::{R1Response, R3OcrPayload};
pub use crate::status::Status;
pub use crate::tick::{Clock, Deadline, DiskTick, FixedSocket, Socket, SocketSwitches};

use crate::consts::{commands, tokens, BLOCK_SIZE_U32};

use core::marker::PhantomData;
use embedded_hal::blocking::spi::Transfer;
use size::Size;
use switch_hal::OutputSwitch;

/// The only drive index served by this driver.
pub const DRIVE: u8 = 0;

/// [`SdMmcSpi`] result error.
///
/// `T` - transport error type.
/// `S` - select switch type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Error<T, S> {
    /// Drive index other than [`DRIVE`], zero sector count, buffer too small
    /// or sector out of the card's address range.
    Parameter,
    /// Card is not initialized or not present.
    NotReady,
    /// Card is write protected.
    WriteProtected,
    /// Card rejected a command, a block transfer failed or a wait timed out.
    Io,
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't set a select.
    Select(S),
}

impl<T, S> Error<T, S> {
    /// Failure happened on the wire rather than in argument checking.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io | Error::Transport(_) | Error::Select(_))
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parameter => "parameter",
            Error::NotReady => "not ready",
            Error::WriteProtected => "write protected",
            Error::Io => "io",
            Error::Transport(_) => "transport",
            Error::Select(_) => "select",
        }
    }
}

/// Card type, established once per initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CardType {
    /// Not initialized or not recognized.
    #[default]
    Unknown,
    /// MMC version 3.
    Mmc,
    /// SD version 1.x, byte addressed.
    Sd1,
    /// SD version 2.0 or later, sector addressed when `block_addressed`
    /// (SDHC/SDXC).
    Sd2 { block_addressed: bool },
}

impl CardType {
    /// Card speaks the SD application command set.
    pub fn is_sd(self) -> bool {
        matches!(self, CardType::Sd1 | CardType::Sd2 { .. })
    }

    /// Commands take a sector index instead of a byte offset.
    pub fn is_block_addressed(self) -> bool {
        matches!(
            self,
            CardType::Sd2 {
                block_addressed: true
            }
        )
    }

    /// Command argument for `sector`, `None` if a byte addressed card can't
    /// reach it.
    pub fn address(self, sector: u32) -> Option<u32> {
        if self.is_block_addressed() {
            Some(sector)
        } else {
            sector.checked_mul(BLOCK_SIZE_U32)
        }
    }
}

/// Error type alias.
type ErrorFor<Spi, Cs> = Error<<Spi as Transfer<u8>>::Error, <Cs as OutputSwitch>::Error>;

/// SD Card SPI driver.
///
/// `Spi` - SPI.
/// `Cs` - Chip select output switch, `on` selects the card.
/// `Config` - Config implementation of driver config trait.
///
/// The driver owns the bus for the duration of every call; callers serialize
/// access. Status and timing live in the shared [`DiskTick`].
pub struct SdMmcSpi<'a, Spi, Cs, Config = DefaultSdMmcSpiConfig>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Config: SdMmcSpiConfig,
{
    spi: Spi,
    cs: Cs,
    tick: &'a DiskTick,
    card_type: CardType,
    config: PhantomData<Config>,
}

impl<'a, Spi, Cs, Config> SdMmcSpi<'a, Spi, Cs, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Config: SdMmcSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Receive transfer token.
    const RECEIVE_TRANSFER_TOKEN: u8 = 0xFF;

    /// Creates a new [`SdMmcSpi<Spi, Cs, Config>`].
    ///
    /// `spi` - SPI instance, already configured for mode 0.
    /// `cs` - chip select output switch.
    /// `tick` - timebase and status advanced by the host's 1 kHz callback.
    pub fn new(spi: Spi, cs: Cs, tick: &'a DiskTick) -> Self {
        SdMmcSpi {
            spi,
            cs,
            tick,
            card_type: CardType::Unknown,
            config: PhantomData::<Config>,
        }
    }

    /// Releases the SPI and chip select.
    pub fn free(self) -> (Spi, Cs) {
        (self.spi, self.cs)
    }

    /// Card type found by the last initialization.
    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    /// Forgets the card; the next [`initialize`](Self::initialize) negotiates again.
    pub fn reset(&mut self) {
        info!("SD reset invoked");
        self.card_type = CardType::Unknown;
        self.tick.set(Status::NOT_INITIALIZED);
    }

    /// Initializes the drive and returns the resulting status.
    ///
    /// Does nothing when no card is present. Only drive [`DRIVE`] exists,
    /// any other index reports `NOT_INITIALIZED`.
    pub fn initialize(&mut self, drive: u8) -> Status {
        if drive != DRIVE {
            return Status::NOT_INITIALIZED;
        }

        let status = self.tick.status();
        if status.contains(Status::NO_DISK) {
            warn!("SD initialize skipped, no card in socket");
            return status;
        }

        let negotiated = self.init();
        let released = self.deselect();

        self.card_type = match negotiated.and_then(|card_type| released.map(|_| card_type)) {
            Ok(card_type) => card_type,
            Err(err) => {
                error!("Failed to initialize SD: {}", err.kind());
                CardType::Unknown
            }
        };

        if self.card_type != CardType::Unknown && self.tick.mark_initialized() {
            info!("SD successfully initialized, type: {:?}", self.card_type);
        } else {
            warn!("SD card type not determined");
            self.card_type = CardType::Unknown;
            self.tick.set(Status::NOT_INITIALIZED);
        }

        self.tick.status()
    }

    /// Current drive status.
    pub fn status(&self, drive: u8) -> Status {
        if drive != DRIVE {
            return Status::NOT_INITIALIZED;
        }

        self.tick.status()
    }

    /// Reads `count` sectors starting at `sector` into `buf`.
    ///
    /// Succeeds only if every sector was received.
    pub fn read(
        &mut self,
        drive: u8,
        buf: &mut [u8],
        sector: u32,
        count: u32,
    ) -> Result<(), ErrorFor<Spi, Cs>> {
        let len = Self::validate_request(drive, buf.len(), count)?;
        self.validate_ready()?;
        let address = self.address(sector)?;

        let buf = &mut buf[..len];
        self.cs_scope(|s| {
            if count == 1 {
                s.read_single(buf, address)
            } else {
                s.read_multiple(buf, address)
            }
        })
    }

    /// Writes `count` sectors from `buf` starting at `sector`.
    ///
    /// Succeeds only if every sector was accepted by the card.
    #[cfg(feature = "write")]
    pub fn write(
        &mut self,
        drive: u8,
        buf: &[u8],
        sector: u32,
        count: u32,
    ) -> Result<(), ErrorFor<Spi, Cs>> {
        let len = Self::validate_request(drive, buf.len(), count)?;
        self.validate_ready()?;
        if self.tick.status().contains(Status::WRITE_PROTECTED) {
            return Err(Error::WriteProtected);
        }
        let address = self.address(sector)?;

        let buf = &buf[..len];
        self.cs_scope(|s| {
            if count == 1 {
                s.write_single(buf, address)
            } else {
                s.write_multiple(buf, address, count)
            }
        })
    }

    /// Card capacity from the CSD register.
    pub fn card_capacity(&mut self) -> Result<Size, ErrorFor<Spi, Cs>> {
        self.validate_ready()?;

        let mut csd_data = CsdData::default();
        self.cs_scope(|s| s.read_register(commands::CMD9, &mut csd_data))?;

        let capacity = Csd::from(csd_data).card_capacity();
        debug!("SD capacity: {} bytes", capacity.bytes());

        Ok(capacity)
    }

    /// Validate drive index, count and buffer; returns the bytes to transfer.
    fn validate_request(
        drive: u8,
        buf_len: usize,
        count: u32,
    ) -> Result<usize, ErrorFor<Spi, Cs>> {
        if drive != DRIVE || count == 0 {
            return Err(Error::Parameter);
        }

        match usize::try_from(count) {
            Ok(count) if count <= buf_len / BLOCK_SIZE => Ok(count * BLOCK_SIZE),
            _ => {
                error!(
                    "SD invalid buffer, length: {}, sectors: {}",
                    buf_len, count
                );
                Err(Error::Parameter)
            }
        }
    }

    /// Validate initialized.
    fn validate_ready(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        if self.tick.status().contains(Status::NOT_INITIALIZED) {
            Err(Error::NotReady)
        } else {
            Ok(())
        }
    }

    /// Convert sector to command argument.
    fn address(&self, sector: u32) -> Result<u32, ErrorFor<Spi, Cs>> {
        self.card_type.address(sector).ok_or(Error::Parameter)
    }

    /// Runs `f`, then always deselects the card.
    fn cs_scope<R, F>(&mut self, f: F) -> Result<R, ErrorFor<Spi, Cs>>
    where
        F: FnOnce(&mut Self) -> Result<R, ErrorFor<Spi, Cs>>,
    {
        let result = f(self);
        let released = self.deselect();

        let value = result?;
        released?;

        Ok(value)
    }

    /// Drive chip select active.
    fn select_line(&mut self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.cs.on().map_err(Error::Select)
    }

    /// Drive chip select inactive.
    fn deselect_line(&mut self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.cs.off().map_err(Error::Select)
    }

    /// Deselect the card and clock one byte so it releases MISO.
    fn deselect(&mut self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.deselect_line()?;
        self.skip_byte()
    }

    /// Select the card and wait for it to become ready.
    ///
    /// Returns `false` with the card deselected on timeout.
    fn select(&mut self) -> Result<bool, ErrorFor<Spi, Cs>> {
        self.select_line()?;
        self.skip_byte()?;

        if self.wait_ready(Config::READY_TIMEOUT_MS)? {
            return Ok(true);
        }

        warn!("SD not ready after {} ms", Config::READY_TIMEOUT_MS);
        self.deselect()?;

        Ok(false)
    }

    /// Poll until the card releases the bus or `timeout_ms` elapse.
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<bool, ErrorFor<Spi, Cs>> {
        let deadline = Deadline::start(self.tick, timeout_ms);

        loop {
            if self.receive()? == tokens::AVAILABLE {
                return Ok(true);
            }
            if deadline.expired(self.tick) {
                return Ok(false);
            }
        }
    }

    /// Send one byte and receive one byte.
    fn transfer(&mut self, data: u8) -> Result<u8, ErrorFor<Spi, Cs>> {
        self.spi
            .transfer(&mut [data])
            .map(|b| b[0])
            .map_err(Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    fn receive(&mut self) -> Result<u8, ErrorFor<Spi, Cs>> {
        self.transfer(Self::RECEIVE_TRANSFER_TOKEN)
    }

    /// Send a byte to the SD card.
    fn send(&mut self, data: u8) -> Result<(), ErrorFor<Spi, Cs>> {
        self.transfer(data).map(|_| ())
    }

    /// Receive a slice from the SD card.
    fn receive_slice(&mut self, data: &mut [u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        for byte in data.iter_mut() {
            *byte = self.receive()?;
        }

        Ok(())
    }

    /// Send a slice to the SD card.
    fn send_slice(&mut self, data: &[u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Skip byte.
    fn skip_byte(&mut self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.receive().map(|_| ())
    }
}
