//! CRC-16 used to protect envelopes.
//!
//! Reflected CCITT polynomial `0x8408` with a zero initial value (the
//! "KERMIT" variant). The table is built at compile time.

const POLY: u16 = 0x8408;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut byte = 0;
    while byte < 256 {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "byte is bounded by the table length"
        )]
        let mut crc = byte as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[byte] = crc;
        byte += 1;
    }
    table
}

/// Fold `data` into a running checksum.
#[must_use]
pub fn crc16_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        let index = usize::from((crc ^ u16::from(byte)) & 0x00ff);
        crc = (crc >> 8) ^ TABLE[index];
    }
    crc
}

/// Checksum of `data`.
///
/// # Examples
///
/// ```
/// use peertalk::frame::crc16;
///
/// assert_eq!(crc16(b"123456789"), 0x2189);
/// ```
#[must_use]
pub fn crc16(data: &[u8]) -> u16 { crc16_update(0, data) }

#[cfg(test)]
mod tests {
    use super::{crc16, crc16_update};

    #[test]
    fn matches_standard_check_value() {
        assert_eq!(crc16(b"123456789"), 0x2189);
        assert_eq!(crc16(b""), 0);
    }

    #[test]
    fn incremental_update_equals_one_shot() {
        let whole = crc16(b"header and payload");
        let split = crc16_update(crc16(b"header "), b"and payload");
        assert_eq!(whole, split);
    }
}
