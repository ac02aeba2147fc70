use bitflags::bitflags;

bitflags! {
    /// Drive status as seen by the filesystem layer.
    ///
    /// `NOT_INITIALIZED` is always set together with `NO_DISK` and is only
    /// cleared by a successful card initialization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        /// Drive has not been initialized, or the card was removed since.
        const NOT_INITIALIZED = 0x01;
        /// No card in the socket.
        const NO_DISK = 0x02;
        /// Card is write protected.
        const WRITE_PROTECTED = 0x04;
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::NOT_INITIALIZED
    }
}

impl Status {
    /// Card is initialized and present.
    pub fn is_ready(self) -> bool {
        !self.contains(Status::NOT_INITIALIZED)
    }
}
