/// Represents config for [`SdMmcSpi`](crate::SdMmcSpi).
///
/// All timeouts are in milliseconds of the [`DiskTick`](crate::DiskTick) clock.
pub trait SdMmcSpiConfig {
    /// Max time to wait for the card to release the bus (0xFF).
    const READY_TIMEOUT_MS: u32;
    /// Max time to wait for a data start token.
    const DATA_TOKEN_TIMEOUT_MS: u32;
    /// Max time for the whole op-condition negotiation.
    const INIT_TIMEOUT_MS: u32;
    /// Max time to wait for an erase to finish.
    const ERASE_TIMEOUT_MS: u32;
    /// Max bytes to read while polling for R1.
    const READ_R1_ATTEMPTS: usize;
    /// Count of dummy bytes clocked with the card deselected at power-up.
    const POWER_UP_DUMMY_BYTES: usize;
}

/// Default implementation of [`SdMmcSpiConfig`](crate::SdMmcSpiConfig).
pub struct DefaultSdMmcSpiConfig;

impl SdMmcSpiConfig for DefaultSdMmcSpiConfig {
    const READY_TIMEOUT_MS: u32 = 500;
    const DATA_TOKEN_TIMEOUT_MS: u32 = 200;
    const INIT_TIMEOUT_MS: u32 = 1000;
    const ERASE_TIMEOUT_MS: u32 = 30_000;
    const READ_R1_ATTEMPTS: usize = 10;
    const POWER_UP_DUMMY_BYTES: usize = 10;
}
