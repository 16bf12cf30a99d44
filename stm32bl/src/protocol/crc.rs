//! Dow/Maxim CRC-8 (polynomial 0x31, reflected).
//!
//! This is the checksum described in Maxim application note 27. The table is
//! generated at compile time from the reflected polynomial `0x8C`; the
//! running value starts at zero and there is no final xor.

/// Reflected form of the 0x31 polynomial.
const POLY_REFLECTED: u8 = 0x8C;

/// Lookup table indexed by `crc ^ byte`.
pub const CRC8_TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLY_REFLECTED
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a CRC-8 computation from `crc` over `data`.
#[inline]
pub fn crc8_update(crc: u8, data: &[u8]) -> u8 {
    data.iter()
        .fold(crc, |crc, &b| CRC8_TABLE[usize::from(crc ^ b)])
}

/// Calculate the CRC-8 checksum of `data`.
#[inline]
pub fn crc8(data: &[u8]) -> u8 {
    crc8_update(0, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_app_note() {
        assert_eq!(&CRC8_TABLE[..8], &[0, 94, 188, 226, 97, 63, 221, 131]);
        assert_eq!(&CRC8_TABLE[240..248], &[116, 42, 200, 150, 21, 75, 169, 247]);
        assert_eq!(&CRC8_TABLE[248..], &[182, 232, 10, 84, 215, 137, 107, 53]);
    }

    #[test]
    fn test_empty_input_is_zero() {
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn test_check_value() {
        // Standard check input for CRC-8/MAXIM-DOW.
        assert_eq!(crc8(b"123456789"), 0xA1);
    }

    #[test]
    fn test_single_command_bytes() {
        // Control frames carry the checksum of the lone command byte.
        assert_eq!(crc8(&[0x52]), CRC8_TABLE[0x52]);
        assert_eq!(crc8(&[0x53]), CRC8_TABLE[0x53]);
    }

    #[test]
    fn test_pure_function() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(crc8(&data), crc8(&data));
    }

    #[test]
    fn test_appended_checksum_yields_zero() {
        for data in [&b""[..], b"$", b"hello bootloader", &[0xFF; 240]] {
            let mut framed = data.to_vec();
            framed.push(crc8(data));
            assert_eq!(crc8(&framed), 0, "residue for {data:02X?}");
        }
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"\x50\xF0\x00\x00\x08\x00\x80\x00payload";
        let (head, tail) = data.split_at(5);
        assert_eq!(crc8_update(crc8(head), tail), crc8(data));
    }
}
