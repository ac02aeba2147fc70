//! Byte level SD/MMC card simulator speaking the SPI protocol.
//!
//! Every exchanged byte advances the shared [`DiskTick`] by one millisecond,
//! so timeouts play out in simulated time.

#![allow(dead_code)]

use sdmmc_spi_disk::{DiskTick, SdMmcSpi, BLOCK_SIZE};

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Simulated card generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// SD v2, high capacity, sector addressed.
    Sdhc,
    /// SD v2, standard capacity, byte addressed.
    Sdsc2,
    /// SD v1, byte addressed.
    Sd1,
    /// MMC v3, byte addressed.
    Mmc,
    /// Never answers a command.
    Silent,
}

/// Real SDHC CSD, 7_710_720 sectors.
pub const CSD_V2: [u8; 16] = hex_literal::hex!("40 0E 00 32 5B 59 00 00 1D 69 7F 80 0A 40 00 8B");
/// Real SDSC CSD, 1_984_000 sectors, single sector erase enabled.
pub const CSD_V1: [u8; 16] = hex_literal::hex!("00 26 00 32 5F 59 83 C8 AD DB CF FF D2 40 40 A5");

const DATA_RESPONSE_ACCEPTED: u8 = 0xE5;
const DATA_RESPONSE_REJECTED: u8 = 0xEB;
const STOP_STUFF_BYTE: u8 = 0x7F;
const WRITE_BUSY_BYTES: u32 = 8;
const ERASE_BUSY_BYTES: u32 = 64;

#[derive(Debug)]
enum Mode {
    Command,
    ReadMulti { next: u32 },
    Write { sector: u32, multi: bool, data: Option<Vec<u8>> },
}

/// Card state, shared by the simulated SPI and chip select.
pub struct Card {
    pub kind: Kind,
    pub present: bool,
    pub write_protect: bool,
    /// Hold MISO low forever while selected.
    pub stuck_busy: bool,
    /// Sector whose data start token never arrives.
    pub drop_token_at: Option<u32>,
    /// Sector whose written data is rejected.
    pub reject_data_at: Option<u32>,
    /// Op-condition polls answered with "idle" before the card is ready.
    pub op_cond_polls: u32,
    pub csd: [u8; 16],
    pub cid: [u8; 16],
    pub sd_status: [u8; 64],
    pub storage: HashMap<u32, [u8; BLOCK_SIZE]>,
    /// Executed commands: index, with 0x80 set for application commands.
    pub commands: Vec<u8>,
    pub erased: Vec<(u32, u32)>,
    pub pre_erase: Option<u32>,
    pub selected: bool,
    pub exchanged: usize,
    pub cs_toggles: usize,
    idle: bool,
    app: bool,
    cmd: Vec<u8>,
    out: VecDeque<u8>,
    busy: u32,
    mode: Mode,
    erase_start: u32,
    erase_end: u32,
}

impl Card {
    pub fn new(kind: Kind) -> Self {
        let csd = match kind {
            Kind::Sdhc => CSD_V2,
            _ => CSD_V1,
        };
        let mut cid = [0u8; 16];
        cid[..7].copy_from_slice(b"\x03SDSIM1");

        Card {
            kind,
            present: true,
            write_protect: false,
            stuck_busy: false,
            drop_token_at: None,
            reject_data_at: None,
            op_cond_polls: 3,
            csd,
            cid,
            sd_status: [0u8; 64],
            storage: HashMap::new(),
            commands: Vec::new(),
            erased: Vec::new(),
            pre_erase: None,
            selected: false,
            exchanged: 0,
            cs_toggles: 0,
            idle: false,
            app: false,
            cmd: Vec::new(),
            out: VecDeque::new(),
            busy: 0,
            mode: Mode::Command,
            erase_start: 0,
            erase_end: 0,
        }
    }

    /// Sector content, zeros when never written.
    pub fn sector(&self, sector: u32) -> [u8; BLOCK_SIZE] {
        self.storage.get(&sector).copied().unwrap_or([0u8; BLOCK_SIZE])
    }

    /// Number of times `cmd` was executed.
    pub fn count(&self, cmd: u8) -> usize {
        self.commands.iter().filter(|&&c| c == cmd).count()
    }

    fn set_selected(&mut self, selected: bool) {
        if self.selected != selected {
            self.cs_toggles += 1;
        }
        self.selected = selected;
        if !selected {
            self.out.clear();
            self.cmd.clear();
        }
    }

    fn exchange(&mut self, input: u8) -> u8 {
        self.exchanged += 1;

        if !self.selected {
            return 0xFF;
        }
        if self.stuck_busy {
            return 0x00;
        }
        if self.collect_write_data(input) {
            return 0xFF;
        }

        let reply = self.next_output();
        self.accept_input(input);
        reply
    }

    fn next_output(&mut self) -> u8 {
        if let Some(byte) = self.out.pop_front() {
            return byte;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return 0x00;
        }
        if self.cmd.is_empty() {
            if let Mode::ReadMulti { next } = self.mode {
                if self.drop_token_at != Some(next) {
                    self.queue_block(&self.sector(next));
                    self.mode = Mode::ReadMulti { next: next + 1 };
                    if let Some(byte) = self.out.pop_front() {
                        return byte;
                    }
                }
            }
        }
        0xFF
    }

    fn collect_write_data(&mut self, input: u8) -> bool {
        let Mode::Write { sector, multi, data: Some(data) } = &mut self.mode else {
            return false;
        };

        data.push(input);
        if data.len() < BLOCK_SIZE + 2 {
            return true;
        }

        let (sector, multi) = (*sector, *multi);
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&data[..BLOCK_SIZE]);

        let accepted = self.reject_data_at != Some(sector);
        if accepted {
            self.storage.insert(sector, block);
            self.out.push_back(DATA_RESPONSE_ACCEPTED);
            self.busy = WRITE_BUSY_BYTES;
        } else {
            self.out.push_back(DATA_RESPONSE_REJECTED);
        }

        self.mode = if multi {
            Mode::Write {
                sector: sector + 1,
                multi,
                data: None,
            }
        } else {
            Mode::Command
        };

        true
    }

    fn accept_input(&mut self, input: u8) {
        if let Mode::Write { multi, data, .. } = &mut self.mode {
            if data.is_none() {
                let start = if *multi { 0xFC } else { 0xFE };
                if input == start {
                    *data = Some(Vec::with_capacity(BLOCK_SIZE + 2));
                    return;
                }
                if *multi && input == 0xFD {
                    self.mode = Mode::Command;
                    self.busy = WRITE_BUSY_BYTES;
                    return;
                }
            }
        }

        if !self.cmd.is_empty() || input & 0xC0 == 0x40 {
            self.cmd.push(input);
            if self.cmd.len() == 6 {
                let frame: Vec<u8> = self.cmd.drain(..).collect();
                self.execute(&frame);
            }
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.out.push_back(0xFF);
        self.out.extend(bytes.iter().copied());
    }

    fn queue_block(&mut self, data: &[u8]) {
        self.out.push_back(0xFF);
        self.out.push_back(0xFE);
        self.out.extend(data.iter().copied());
        self.out.extend([0xA5, 0x5A]);
    }

    fn block_address(&self, arg: u32) -> Option<u32> {
        match self.kind {
            Kind::Sdhc => Some(arg),
            _ if arg % BLOCK_SIZE as u32 == 0 => Some(arg / BLOCK_SIZE as u32),
            _ => None,
        }
    }

    fn op_cond(&mut self) {
        if self.op_cond_polls > 0 {
            self.op_cond_polls -= 1;
            self.respond(&[0x01]);
        } else {
            self.idle = false;
            self.respond(&[0x00]);
        }
    }

    fn execute(&mut self, frame: &[u8]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let crc = frame[5];
        let app = std::mem::take(&mut self.app);

        self.commands.push(if app { index | 0x80 } else { index });

        if self.kind == Kind::Silent {
            return;
        }

        let r1 = self.idle as u8;
        let illegal = r1 | 0x04;
        let is_sd = matches!(self.kind, Kind::Sdhc | Kind::Sdsc2 | Kind::Sd1);
        let is_v2 = matches!(self.kind, Kind::Sdhc | Kind::Sdsc2);

        match (app, index) {
            (_, 0) => {
                if crc != 0x95 {
                    self.respond(&[r1 | 0x08]);
                    return;
                }
                self.idle = true;
                self.mode = Mode::Command;
                self.respond(&[0x01]);
            }
            (_, 8) if is_v2 => {
                if crc != 0x87 {
                    self.respond(&[r1 | 0x08]);
                    return;
                }
                self.respond(&[r1, 0x00, 0x00, ((arg >> 8) & 0x0F) as u8, arg as u8]);
            }
            (false, 55) if is_sd => {
                self.app = true;
                self.respond(&[r1]);
            }
            (true, 41) if is_sd => self.op_cond(),
            (false, 1) if self.kind == Kind::Mmc => self.op_cond(),
            (false, 58) => {
                let mut ocr0 = if self.idle { 0x00 } else { 0x80 };
                if self.kind == Kind::Sdhc && !self.idle {
                    ocr0 |= 0x40;
                }
                self.respond(&[r1, ocr0, 0xFF, 0x80, 0x00]);
            }
            (false, 16) => self.respond(&[if arg == BLOCK_SIZE as u32 { 0x00 } else { 0x40 }]),
            (false, 9) => {
                self.respond(&[0x00]);
                let csd = self.csd;
                self.queue_block(&csd);
            }
            (false, 10) => {
                self.respond(&[0x00]);
                let cid = self.cid;
                self.queue_block(&cid);
            }
            (false, 12) => {
                self.mode = Mode::Command;
                self.out.clear();
                // Stuff byte with bit 7 clear, then R1.
                self.out.extend([STOP_STUFF_BYTE, 0x00]);
            }
            (false, 17) => match self.block_address(arg) {
                Some(sector) => {
                    self.respond(&[0x00]);
                    if self.drop_token_at != Some(sector) {
                        self.queue_block(&self.sector(sector));
                    }
                }
                None => self.respond(&[0x20]),
            },
            (false, 18) => match self.block_address(arg) {
                Some(sector) => {
                    self.respond(&[0x00]);
                    self.mode = Mode::ReadMulti { next: sector };
                }
                None => self.respond(&[0x20]),
            },
            (false, 24) | (false, 25) => match self.block_address(arg) {
                Some(sector) => {
                    self.respond(&[0x00]);
                    self.mode = Mode::Write {
                        sector,
                        multi: index == 25,
                        data: None,
                    };
                }
                None => self.respond(&[0x20]),
            },
            (true, 23) if is_sd => {
                self.pre_erase = Some(arg);
                self.respond(&[0x00]);
            }
            (true, 13) if is_sd => {
                // R2: R1 then a second status byte
                self.respond(&[0x00, 0x00]);
                let sd_status = self.sd_status;
                self.queue_block(&sd_status);
            }
            (false, 32) | (false, 33) => match self.block_address(arg) {
                Some(sector) => {
                    if index == 32 {
                        self.erase_start = sector;
                    } else {
                        self.erase_end = sector;
                    }
                    self.respond(&[0x00]);
                }
                None => self.respond(&[0x20]),
            },
            (false, 38) => {
                for sector in self.erase_start..=self.erase_end {
                    self.storage.remove(&sector);
                }
                self.erased.push((self.erase_start, self.erase_end));
                self.respond(&[0x00]);
                self.busy = ERASE_BUSY_BYTES;
            }
            _ => self.respond(&[illegal]),
        }
    }
}

pub type SharedCard = Rc<RefCell<Card>>;

/// MOSI/MISO side of the simulated card.
pub struct SimSpi {
    card: SharedCard,
    tick: &'static DiskTick,
}

impl Transfer<u8> for SimSpi {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        let mut card = self.card.borrow_mut();
        for word in words.iter_mut() {
            self.tick.on_tick(card.present, card.write_protect);
            *word = card.exchange(*word);
        }
        Ok(words)
    }
}

/// Chip select of the simulated card, `on` selects.
pub struct SimCs {
    card: SharedCard,
}

impl OutputSwitch for SimCs {
    type Error = Infallible;

    fn on(&mut self) -> Result<(), Self::Error> {
        self.card.borrow_mut().set_selected(true);
        Ok(())
    }

    fn off(&mut self) -> Result<(), Self::Error> {
        self.card.borrow_mut().set_selected(false);
        Ok(())
    }
}

pub type Driver = SdMmcSpi<'static, SimSpi, SimCs>;

/// Simulated card wired to a fresh driver.
pub struct Bench {
    pub driver: Driver,
    pub card: SharedCard,
    pub tick: &'static DiskTick,
}

impl Bench {
    pub fn new(card: Card) -> Self {
        let tick: &'static DiskTick = Box::leak(Box::new(DiskTick::new()));
        tick.on_tick(card.present, card.write_protect);

        let card = Rc::new(RefCell::new(card));
        let spi = SimSpi {
            card: card.clone(),
            tick,
        };
        let cs = SimCs { card: card.clone() };

        Bench {
            driver: SdMmcSpi::new(spi, cs, tick),
            card,
            tick,
        }
    }

    /// Bench with an initialized card of `kind`.
    pub fn ready(kind: Kind) -> Self {
        let mut bench = Bench::new(Card::new(kind));
        let status = bench.driver.initialize(0);
        assert!(status.is_ready(), "{:?} failed to initialize: {:?}", kind, status);
        bench
    }

    /// Sample the socket once, as the 1 kHz interrupt would.
    pub fn tick(&self) {
        let card = self.card.borrow();
        self.tick.on_tick(card.present, card.write_protect);
    }
}

/// Deterministic sector payload.
pub fn payload(seed: u64, sectors: usize) -> Vec<u8> {
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    let mut data = vec![0u8; sectors * BLOCK_SIZE];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}
