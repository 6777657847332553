//! CRC16-CCITT as used by XMODEM/CRC

const POLY: u16 = 0x1021;

/// Compute the XMODEM CRC (poly 0x1021, init 0, MSB first) over `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
