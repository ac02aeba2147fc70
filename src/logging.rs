//! Logging front-end shared by the driver.
//!
//! Messages go to `log` or `defmt` depending on the enabled feature, and
//! vanish when neither is enabled. Format strings must stay within the
//! subset both backends accept (`{}` and `{:?}`).

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::debug!($($arg)*);
        #[cfg(feature = "defmt-log")]
        ::defmt::debug!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt-log")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::info!($($arg)*);
        #[cfg(feature = "defmt-log")]
        ::defmt::info!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt-log")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::warn!($($arg)*);
        #[cfg(feature = "defmt-log")]
        ::defmt::warn!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt-log")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::error!($($arg)*);
        #[cfg(feature = "defmt-log")]
        ::defmt::error!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt-log")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}
