//! CRC-16/CCITT-FALSE checksum used to protect message frames.
//!
//! Polynomial 0x1021, initial value 0xFFFF, no reflection, no final xor. This is catalogued as
//! CRC-16/IBM-3740.

use crc::{Crc, CRC_16_IBM_3740};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the CRC-16/CCITT-FALSE of the given bytes.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
        assert_eq!(crc16(&[]), 0xFFFF);
    }
}
