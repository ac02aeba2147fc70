/// CRC-7 calculation.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0;
    for mut byte in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((byte & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            byte <<= 1;
        }
    }
    crc
}

/// Last byte of a command frame: CRC-7 followed by the end bit.
pub fn command_crc(frame: &[u8]) -> u8 {
    (crc7(frame) << 1) | 0x01
}
