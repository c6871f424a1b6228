//! Response decoding for the ADAM-5000TCP controller
//!
//! Read responses carry a payload byte-count at offset 8 and the payload
//! from offset 9. Analog registers arrive as big-endian words; digital coil
//! bytes are paired into little-endian words, one slot per word, so bit `i`
//! of a word is channel `i` of that slot.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::constants::{RESPONSE_COUNT_OFFSET, RESPONSE_PAYLOAD_OFFSET};
use crate::error::{AdamError, Result};
use crate::types::SlotType;

/// Decoder for raw response buffers
pub struct FrameCodec;

impl FrameCodec {
    /// Decode a read response into 16-bit register words
    ///
    /// An odd trailing byte is padded with a zero rather than failing the
    /// poll. Structural anomalies (no payload, declared count larger than
    /// the buffer) are decode errors; the caller keeps its previous data.
    pub fn decode_registers(slot_type: SlotType, response: &[u8]) -> Result<Vec<u16>> {
        if response.len() <= RESPONSE_COUNT_OFFSET {
            return Err(AdamError::decode(format!(
                "response of {} bytes has no payload",
                response.len()
            )));
        }

        let count = response[RESPONSE_COUNT_OFFSET] as usize;
        let available = response.len() - RESPONSE_PAYLOAD_OFFSET;
        if count > available {
            return Err(AdamError::decode(format!(
                "declared payload of {count} bytes, {available} received"
            )));
        }

        let mut payload =
            response[RESPONSE_PAYLOAD_OFFSET..RESPONSE_PAYLOAD_OFFSET + count].to_vec();
        if payload.len() % 2 == 1 {
            payload.push(0);
        }

        let mut words = Vec::with_capacity(payload.len() / 2);
        for pair in payload.chunks_exact(2) {
            let word = match slot_type {
                SlotType::Analog => BigEndian::read_u16(pair),
                SlotType::Digital => LittleEndian::read_u16(pair),
            };
            words.push(word);
        }
        Ok(words)
    }
}
