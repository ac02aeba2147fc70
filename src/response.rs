use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub no_response, _: 7;
}

impl R1Response {
    /// Card finished initialization, no error flags.
    pub const READY_STATE: R1Response = R1Response(0x00);
    /// Card is in idle state, no error flags.
    pub const IN_IDLE_STATE: R1Response = R1Response(0x01);
    /// Synthetic response when the card never released the bus before a command.
    pub const NOT_SELECTED: R1Response = R1Response(0xFF);

    /// Wraps a byte clocked in from the card.
    pub const fn from_byte(byte: u8) -> Self {
        R1Response(byte)
    }

    /// Raw response byte.
    pub const fn byte(self) -> u8 {
        self.0
    }

    /// Bit 7 clear means the byte is a real response.
    pub const fn is_valid(self) -> bool {
        self.0 & 0x80 == 0
    }

    /// Accepted: ready or idle, nothing else set.
    pub const fn is_accepted(self) -> bool {
        self.0 <= Self::IN_IDLE_STATE.0
    }
}

/// R3 OCR payload.
pub type R3OcrPayload = [u8; 4];

/// R7 interface condition payload.
pub type R7Payload = [u8; 4];

/// Card Capacity Status bit in the first OCR byte.
pub const OCR_CCS: u8 = 0x40;

/// Card echoed the 2.7-3.6V range and the 0xAA check pattern.
pub fn voltage_accepted(r7: &R7Payload) -> bool {
    r7[2] == 0x01 && r7[3] == 0xAA
}

/// Card reported high capacity, sector addressed.
pub fn is_high_capacity(ocr: &R3OcrPayload) -> bool {
    ocr[0] & OCR_CCS != 0
}
