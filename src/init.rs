//! Card type negotiation.

use crate::{
    config::SdMmcSpiConfig,
    consts::{commands, BLOCK_SIZE_U32},
    response::{is_high_capacity, voltage_accepted, R1Response, R3OcrPayload, R7Payload},
    tick::Deadline,
    CardType, ErrorFor, SdMmcSpi,
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
    /// Init sequence value.
    const INIT_SET_VALUE: u8 = 0xFF;

    /// Run the negotiation; `CardType::Unknown` when the card failed any step.
    ///
    /// Leaves the card selected, the caller deselects.
    pub(crate) fn init(&mut self) -> Result<CardType, ErrorFor<Spi, Cs>> {
        info!("SD initialize started");

        self.deselect_line()?;

        for _ in 0..Config::POWER_UP_DUMMY_BYTES {
            self.send(Self::INIT_SET_VALUE)?;
        }

        let r1 = self.send_command(commands::CMD0, 0x0000_0000)?;
        if r1 != R1Response::IN_IDLE_STATE {
            warn!(
                "Wrong response from CMD{}: 0x{:02X}",
                commands::index(commands::CMD0),
                r1.byte()
            );
            return Ok(CardType::Unknown);
        }

        let deadline = Deadline::start(self.tick, Config::INIT_TIMEOUT_MS);

        if self.send_command(commands::CMD8, commands::CMD8_ARG)? == R1Response::IN_IDLE_STATE {
            self.init_sd_v2(&deadline)
        } else {
            self.init_legacy(&deadline)
        }
    }

    /// SD v2: voltage echo, ACMD41 with HCS, then CCS from the OCR.
    fn init_sd_v2(&mut self, deadline: &Deadline) -> Result<CardType, ErrorFor<Spi, Cs>> {
        let mut r7 = R7Payload::default();
        self.receive_slice(&mut r7)?;

        if !voltage_accepted(&r7) {
            warn!("SD rejected 2.7-3.6V range: {:02X} {:02X}", r7[2], r7[3]);
            return Ok(CardType::Unknown);
        }

        if !self.wait_op_cond(commands::ACMD41, commands::ACMD41_HCS, deadline)? {
            warn!("SD v2 did not leave idle state in {} ms", Config::INIT_TIMEOUT_MS);
            return Ok(CardType::Unknown);
        }

        if self.send_command(commands::CMD58, 0x0000_0000)? != R1Response::READY_STATE {
            warn!("CMD{} rejected", commands::index(commands::CMD58));
            return Ok(CardType::Unknown);
        }

        let mut ocr = R3OcrPayload::default();
        self.receive_slice(&mut ocr)?;

        Ok(CardType::Sd2 {
            block_addressed: is_high_capacity(&ocr),
        })
    }

    /// SD v1 or MMC v3: op-condition loop, then force 512 byte blocks.
    fn init_legacy(&mut self, deadline: &Deadline) -> Result<CardType, ErrorFor<Spi, Cs>> {
        let sd = self
            .send_command(commands::ACMD41, 0x0000_0000)?
            .is_accepted();
        let (card_type, op_cmd) = if sd {
            (CardType::Sd1, commands::ACMD41)
        } else {
            (CardType::Mmc, commands::CMD1)
        };

        debug!("Legacy card, probing as {:?}", card_type);

        if !self.wait_op_cond(op_cmd, 0x0000_0000, deadline)? {
            warn!("{:?} did not leave idle state in {} ms", card_type, Config::INIT_TIMEOUT_MS);
            return Ok(CardType::Unknown);
        }

        if self.send_command(commands::CMD16, BLOCK_SIZE_U32)? != R1Response::READY_STATE {
            warn!("CMD{} rejected", commands::index(commands::CMD16));
            return Ok(CardType::Unknown);
        }

        Ok(card_type)
    }

    /// Repeat the op-condition command until the card leaves idle state.
    fn wait_op_cond(
        &mut self,
        cmd: u8,
        arg: u32,
        deadline: &Deadline,
    ) -> Result<bool, ErrorFor<Spi, Cs>> {
        while !deadline.expired(self.tick) {
            if self.send_command(cmd, arg)? == R1Response::READY_STATE {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
