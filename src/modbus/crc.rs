//! CRC-16/Modbus: reflected, polynomial 0xA001, initial value 0xFFFF, no
//! final XOR (§4.1).

/// Compute the CRC-16/Modbus of `data`.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC to `data` in little-endian order (low byte first).
pub fn append_crc(data: &mut Vec<u8>) {
    let crc = crc16(data);
    data.push((crc & 0xFF) as u8);
    data.push((crc >> 8) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // 0x11 0x03 0x00 0x00 0x00 0x0A -> CRC low=0xC7 high=0x5D (well-known Modbus example)
        let frame = [0x11, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let crc = crc16(&frame);
        assert_eq!(crc & 0xFF, 0xC7);
        assert_eq!(crc >> 8, 0x5D);
    }

    #[test]
    fn self_check_appended_crc_is_zero() {
        let data = [0x11, 0x06, 0x00, 0x08, 0x01, 0xF4];
        let mut framed = data.to_vec();
        append_crc(&mut framed);
        assert_eq!(crc16(&framed), 0);
    }

    proptest::proptest! {
        #[test]
        fn appended_crc_always_checks_out(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64)) {
            let mut framed = bytes.clone();
            append_crc(&mut framed);
            proptest::prop_assert_eq!(crc16(&framed), 0);
        }
    }
}
