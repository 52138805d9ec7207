//! Wire framing for the MCU link: fixed-size little-endian records with an XOR checksum.
//!
//! Two frame kinds share the same checksum convention (XOR of every byte but the last):
//! the 15-byte sample frame sent continuously by the MCU, and the 6-byte configuration
//! frame sent once at startup and echoed back by the MCU.

pub const SAMPLE_FRAME_LEN: usize = 15;
pub const CONFIG_FRAME_LEN: usize = 6;

const SAMPLE_MAGIC: [u8; 2] = [0xAA, 0xBB];
const CONFIG_MAGIC: [u8; 2] = [0xCC, 0xDD];

/// A decoded three-channel sample frame, as it comes off the wire. No timestamp yet:
/// that's assigned downstream by the fan-out dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFrame {
    pub ch0: i32,
    pub ch1: i32,
    pub ch2: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The two leading bytes are not the sample frame's magic.
    BadHeader,
    /// The header matched but the trailing XOR byte did not.
    BadChecksum,
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

impl SampleFrame {
    pub fn encode(&self) -> [u8; SAMPLE_FRAME_LEN] {
        let mut buf = [0u8; SAMPLE_FRAME_LEN];
        buf[0] = SAMPLE_MAGIC[0];
        buf[1] = SAMPLE_MAGIC[1];
        buf[2..6].copy_from_slice(&self.ch0.to_le_bytes());
        buf[6..10].copy_from_slice(&self.ch1.to_le_bytes());
        buf[10..14].copy_from_slice(&self.ch2.to_le_bytes());
        buf[14] = xor_checksum(&buf[..14]);
        buf
    }

    /// Attempts to decode a frame, distinguishing a bad header from a bad checksum so
    /// the caller (the ingest parser) can apply the right recovery: one byte dropped in
    /// both cases, but they're counted separately for observability.
    pub fn try_decode(bytes: &[u8; SAMPLE_FRAME_LEN]) -> Result<Self, DecodeError> {
        if bytes[0] != SAMPLE_MAGIC[0] || bytes[1] != SAMPLE_MAGIC[1] {
            return Err(DecodeError::BadHeader);
        }
        if xor_checksum(&bytes[..14]) != bytes[14] {
            return Err(DecodeError::BadChecksum);
        }
        Ok(SampleFrame {
            ch0: i32::from_le_bytes(bytes[2..6].try_into().unwrap()),
            ch1: i32::from_le_bytes(bytes[6..10].try_into().unwrap()),
            ch2: i32::from_le_bytes(bytes[10..14].try_into().unwrap()),
        })
    }
}

/// The configuration frame sent to the MCU at startup, and expected echoed back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigFrame {
    pub sampling_rate_hz: u16,
    pub adc_pga_index: u8,
    pub adc_data_rate_index: u8,
}

impl ConfigFrame {
    pub fn encode(&self) -> [u8; CONFIG_FRAME_LEN] {
        let mut buf = [0u8; CONFIG_FRAME_LEN];
        buf[0] = CONFIG_MAGIC[0];
        buf[1] = CONFIG_MAGIC[1];
        buf[2..4].copy_from_slice(&self.sampling_rate_hz.to_le_bytes());
        buf[4] = self.adc_pga_index;
        buf[5] = self.adc_data_rate_index;
        buf
    }

    pub fn try_decode(bytes: &[u8; CONFIG_FRAME_LEN]) -> Result<Self, DecodeError> {
        if bytes[0] != CONFIG_MAGIC[0] || bytes[1] != CONFIG_MAGIC[1] {
            return Err(DecodeError::BadHeader);
        }
        Ok(ConfigFrame {
            sampling_rate_hz: u16::from_le_bytes([bytes[2], bytes[3]]),
            adc_pga_index: bytes[4],
            adc_data_rate_index: bytes[5],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_frame_round_trips() {
        for (ch0, ch1, ch2) in [
            (0, 0, 0),
            (1, -1, 2_147_483_647),
            (-2_147_483_648, 12345, -9999),
        ] {
            let frame = SampleFrame { ch0, ch1, ch2 };
            let encoded = frame.encode();
            let decoded = SampleFrame::try_decode(&encoded).expect("valid frame");
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn bad_header_is_distinct_from_bad_checksum() {
        let mut encoded = SampleFrame { ch0: 1, ch1: 2, ch2: 3 }.encode();
        encoded[0] = 0x00;
        assert_eq!(SampleFrame::try_decode(&encoded), Err(DecodeError::BadHeader));

        let mut encoded = SampleFrame { ch0: 1, ch1: 2, ch2: 3 }.encode();
        encoded[14] ^= 0xFF;
        assert_eq!(SampleFrame::try_decode(&encoded), Err(DecodeError::BadChecksum));
    }

    #[test]
    fn config_frame_round_trips_and_matches_wire_layout() {
        let cfg = ConfigFrame {
            sampling_rate_hz: 100,
            adc_pga_index: 6,
            adc_data_rate_index: 11,
        };
        let encoded = cfg.encode();
        assert_eq!(&encoded[0..2], &[0xCC, 0xDD]);
        assert_eq!(ConfigFrame::try_decode(&encoded).unwrap(), cfg);
    }
}
