//! In-memory controller simulator for integration tests and the demo
//!
//! Serves the controller wire protocol from plain register arrays over a
//! local TCP listener. The chassis layout (which slots hold analog or
//! digital modules) is fixed at construction; it is what resolves the
//! target slot of a pattern write, exactly as the real chassis would.

use std::net::SocketAddr;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::constants::{
    ANALOG_SNAPSHOT_WORDS, COIL_ON, FC_READ_ANALOG, FC_READ_DIGITAL, FC_WRITE_ANALOG,
    FC_WRITE_DIGITAL, FC_WRITE_PATTERN, FRAME_HEADER_LEN, SLOT_COUNT,
};
use crate::error::Result;
use crate::types::SlotType;

/// Largest request body the simulator will accept
const MAX_REQUEST_BODY: usize = 260;

/// Protocol-speaking controller double
///
/// Clone handles share the same register state, so a test can keep seeding
/// and inspecting registers while the listener serves connections.
#[derive(Clone)]
pub struct Adam5000Simulator {
    analog: Arc<RwLock<[u16; ANALOG_SNAPSHOT_WORDS]>>,
    /// One word per slot, bit i = channel i
    digital: Arc<RwLock<[u16; 8]>>,
    slot_types: [SlotType; SLOT_COUNT as usize],
}

impl Default for Adam5000Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Adam5000Simulator {
    /// Chassis with analog modules in slots 0-3 and digital in slots 4-7
    pub fn new() -> Self {
        Self::with_slot_types([
            SlotType::Analog,
            SlotType::Analog,
            SlotType::Analog,
            SlotType::Analog,
            SlotType::Digital,
            SlotType::Digital,
            SlotType::Digital,
            SlotType::Digital,
        ])
    }

    pub fn with_slot_types(slot_types: [SlotType; SLOT_COUNT as usize]) -> Self {
        Self {
            analog: Arc::new(RwLock::new([0; ANALOG_SNAPSHOT_WORDS])),
            digital: Arc::new(RwLock::new([0; 8])),
            slot_types,
        }
    }

    /// Bind a local listener and serve connections until the process ends
    ///
    /// Pass port 0 to let the OS pick one; the bound address is returned.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Simulator listening on {local_addr}");

        let sim = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Simulator connection from {peer}");
                        let sim = sim.clone();
                        tokio::spawn(async move {
                            if let Err(e) = sim.handle_connection(stream).await {
                                debug!("Simulator connection ended: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("Simulator accept error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    pub async fn set_analog(&self, index: usize, value: u16) {
        if index >= ANALOG_SNAPSHOT_WORDS {
            warn!("Analog index {index} out of range");
            return;
        }
        self.analog.write().await[index] = value;
    }

    pub async fn analog(&self, index: usize) -> u16 {
        if index >= ANALOG_SNAPSHOT_WORDS {
            return 0;
        }
        self.analog.read().await[index]
    }

    pub async fn set_digital(&self, slot: usize, channel: usize, on: bool) {
        if slot >= 8 || channel >= 16 {
            warn!("Digital slot {slot} channel {channel} out of range");
            return;
        }
        let mut digital = self.digital.write().await;
        if on {
            digital[slot] |= 1 << channel;
        } else {
            digital[slot] &= !(1 << channel);
        }
    }

    pub async fn digital(&self, slot: usize, channel: usize) -> bool {
        if slot >= 8 || channel >= 16 {
            return false;
        }
        (self.digital.read().await[slot] >> channel) & 1 == 1
    }

    /// Serve one connection: header-framed requests, one response each
    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        loop {
            let mut header = [0u8; FRAME_HEADER_LEN];
            if stream.read_exact(&mut header).await.is_err() {
                return Ok(()); // peer closed
            }
            let declared = BigEndian::read_u16(&header[4..6]) as usize;
            if declared == 0 || declared > MAX_REQUEST_BODY {
                debug!("Simulator dropping frame with body length {declared}");
                return Ok(());
            }
            let mut body = vec![0u8; declared];
            stream.read_exact(&mut body).await?;

            let response = self.dispatch(&header, &body).await;
            stream.write_all(&response).await?;
        }
    }

    /// Route one request body to its handler
    async fn dispatch(&self, header: &[u8], body: &[u8]) -> Vec<u8> {
        let tid = BigEndian::read_u16(&header[0..2]);
        if body.len() < 2 {
            return build_exception(tid, 0, 0, 0x01);
        }
        let unit = body[0];
        let function = body[1];

        match function {
            FC_READ_ANALOG if body.len() >= 6 => {
                let start = BigEndian::read_u16(&body[2..4]);
                let count = BigEndian::read_u16(&body[4..6]);
                self.read_analog(tid, unit, start, count).await
            }
            FC_READ_DIGITAL if body.len() >= 6 => {
                let start = BigEndian::read_u16(&body[2..4]);
                let count = BigEndian::read_u16(&body[4..6]);
                self.read_digital(tid, unit, start, count).await
            }
            FC_WRITE_ANALOG if body.len() >= 6 => {
                let index = BigEndian::read_u16(&body[2..4]);
                let value = BigEndian::read_u16(&body[4..6]);
                self.write_analog(tid, unit, index, value).await
            }
            FC_WRITE_DIGITAL if body.len() >= 6 => {
                let index = BigEndian::read_u16(&body[2..4]);
                let value = BigEndian::read_u16(&body[4..6]);
                self.write_digital(tid, unit, index, value).await
            }
            FC_WRITE_PATTERN if body.len() >= 6 => self.write_pattern(tid, unit, body).await,
            _ => build_exception(tid, unit, function, 0x01),
        }
    }

    /// FC04: analog register block read
    async fn read_analog(&self, tid: u16, unit: u8, start: u16, count: u16) -> Vec<u8> {
        let start = start as usize;
        let count = count as usize;
        if start + count > ANALOG_SNAPSHOT_WORDS {
            return build_exception(tid, unit, FC_READ_ANALOG, 0x02);
        }

        let analog = self.analog.read().await;
        let mut payload = vec![0u8; count * 2];
        BigEndian::write_u16_into(&analog[start..start + count], &mut payload);
        build_read_response(tid, unit, FC_READ_ANALOG, &payload)
    }

    /// FC01: coil block read, bits packed LSB-first per byte
    async fn read_digital(&self, tid: u16, unit: u8, start: u16, count: u16) -> Vec<u8> {
        let start = start as usize;
        let count = count as usize;
        if start + count > 8 * 16 {
            return build_exception(tid, unit, FC_READ_DIGITAL, 0x02);
        }

        let digital = self.digital.read().await;
        let mut payload = vec![0u8; count.div_ceil(8)];
        for i in 0..count {
            let coil = start + i;
            if (digital[coil / 16] >> (coil % 16)) & 1 == 1 {
                payload[i / 8] |= 1 << (i % 8);
            }
        }
        build_read_response(tid, unit, FC_READ_DIGITAL, &payload)
    }

    /// FC06: single register write, echoes the request
    async fn write_analog(&self, tid: u16, unit: u8, index: u16, value: u16) -> Vec<u8> {
        let index = index as usize;
        if index >= ANALOG_SNAPSHOT_WORDS {
            return build_exception(tid, unit, FC_WRITE_ANALOG, 0x02);
        }
        self.analog.write().await[index] = value;
        build_write_echo(tid, unit, FC_WRITE_ANALOG, index as u16, value)
    }

    /// FC05: single coil write, echoes the request
    async fn write_digital(&self, tid: u16, unit: u8, index: u16, value: u16) -> Vec<u8> {
        let index = index as usize;
        if index >= 8 * 16 {
            return build_exception(tid, unit, FC_WRITE_DIGITAL, 0x02);
        }
        let mut digital = self.digital.write().await;
        if value == COIL_ON {
            digital[index / 16] |= 1 << (index % 16);
        } else {
            digital[index / 16] &= !(1 << (index % 16));
        }
        build_write_echo(tid, unit, FC_WRITE_DIGITAL, index as u16, value)
    }

    /// FC15: whole-slot pattern write
    ///
    /// The start address alone does not always identify the slot (analog
    /// slot 2 and digital slot 1 both start at 16), so candidates are
    /// resolved against the configured chassis layout, with the digital
    /// frame's byte-count field as the tie-break.
    async fn write_pattern(&self, tid: u16, unit: u8, body: &[u8]) -> Vec<u8> {
        let start = BigEndian::read_u16(&body[2..4]);

        let digital_slot = self.pattern_candidate(start, SlotType::Digital);
        let analog_slot = self.pattern_candidate(start, SlotType::Analog);
        let looks_digital = body.len() > 7 && body[6] as usize == body.len() - 7;

        let slot_type = match (digital_slot, analog_slot) {
            (Some(_), Some(_)) if looks_digital => SlotType::Digital,
            (Some(_), Some(_)) => SlotType::Analog,
            (Some(_), None) => SlotType::Digital,
            (None, Some(_)) => SlotType::Analog,
            (None, None) => return build_exception(tid, unit, FC_WRITE_PATTERN, 0x02),
        };

        match slot_type {
            SlotType::Digital => {
                let slot = (start / 16) as usize;
                let quantity = BigEndian::read_u16(&body[4..6]) as usize;
                let byte_count = match body.get(6) {
                    Some(&count) => count as usize,
                    None => return build_exception(tid, unit, FC_WRITE_PATTERN, 0x03),
                };
                if quantity == 0 || quantity > 16 || body.len() < 7 + byte_count {
                    return build_exception(tid, unit, FC_WRITE_PATTERN, 0x03);
                }
                // Each packed byte arrives as a little-endian word pair;
                // within a packed byte the first coil is the MSB
                let packed: Vec<u8> = body[7..7 + byte_count]
                    .chunks_exact(2)
                    .map(|pair| pair[0])
                    .collect();
                if packed.len() < quantity.div_ceil(8) {
                    return build_exception(tid, unit, FC_WRITE_PATTERN, 0x03);
                }
                let mut digital = self.digital.write().await;
                for c in 0..quantity {
                    let on = (packed[c / 8] >> (7 - c % 8)) & 1 == 1;
                    if on {
                        digital[slot] |= 1 << c;
                    } else {
                        digital[slot] &= !(1 << c);
                    }
                }
            }
            SlotType::Analog => {
                let slot = (start / 8) as usize;
                let raw = &body[6..];
                let mut analog = self.analog.write().await;
                for (i, pair) in raw.chunks_exact(2).take(8).enumerate() {
                    analog[8 * slot + i] = BigEndian::read_u16(pair);
                }
            }
        }

        build_pattern_echo(tid, unit, body)
    }

    fn pattern_candidate(&self, start: u16, slot_type: SlotType) -> Option<u8> {
        let coef = u16::from(slot_type.slot_coef());
        if start % coef != 0 {
            return None;
        }
        let slot = start / coef;
        if slot < u16::from(SLOT_COUNT) && self.slot_types[slot as usize] == slot_type {
            Some(slot as u8)
        } else {
            None
        }
    }
}

fn build_read_response(tid: u16, unit: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(9 + payload.len());
    response.extend_from_slice(&tid.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&((3 + payload.len()) as u16).to_be_bytes());
    response.push(unit);
    response.push(function);
    response.push(payload.len() as u8);
    response.extend_from_slice(payload);
    response
}

fn build_write_echo(tid: u16, unit: u8, function: u8, index: u16, value: u16) -> Vec<u8> {
    let mut response = Vec::with_capacity(12);
    response.extend_from_slice(&tid.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&6u16.to_be_bytes());
    response.push(unit);
    response.push(function);
    response.extend_from_slice(&index.to_be_bytes());
    response.extend_from_slice(&value.to_be_bytes());
    response
}

fn build_pattern_echo(tid: u16, unit: u8, body: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(12);
    response.extend_from_slice(&tid.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&6u16.to_be_bytes());
    response.push(unit);
    response.push(FC_WRITE_PATTERN);
    response.extend_from_slice(&body[2..6]);
    response
}

fn build_exception(tid: u16, unit: u8, function: u8, code: u8) -> Vec<u8> {
    let mut response = Vec::with_capacity(9);
    response.extend_from_slice(&tid.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&3u16.to_be_bytes());
    response.push(unit);
    response.push(function | 0x80);
    response.push(code);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    // Socket-level coverage lives in the integration tests; these only
    // exercise the frame builders and slot resolution.

    #[tokio::test]
    async fn test_read_analog_response_shape() {
        let sim = Adam5000Simulator::new();
        sim.set_analog(2, 0x1234).await;

        let response = sim.read_analog(7, 1, 0, 4).await;
        assert_eq!(response[..6], [0x00, 0x07, 0x00, 0x00, 0x00, 0x0B]);
        assert_eq!(response[6], 1);
        assert_eq!(response[7], FC_READ_ANALOG);
        assert_eq!(response[8], 8);
        assert_eq!(response[13..15], [0x12, 0x34]);
    }

    #[tokio::test]
    async fn test_out_of_range_read_is_an_exception() {
        let sim = Adam5000Simulator::new();
        let response = sim.read_analog(0, 1, 60, 10).await;
        assert_eq!(response[7], FC_READ_ANALOG | 0x80);
        assert_eq!(response[8], 0x02);
    }

    #[tokio::test]
    async fn test_digital_read_packs_bits_lsb_first() {
        let sim = Adam5000Simulator::new();
        sim.set_digital(0, 0, true).await;
        sim.set_digital(0, 9, true).await;

        let response = sim.read_digital(0, 1, 0, 16).await;
        assert_eq!(response[8], 2);
        assert_eq!(response[9], 0x01);
        assert_eq!(response[10], 0x02);
    }

    #[test]
    fn test_pattern_slot_resolution() {
        let sim = Adam5000Simulator::new();
        // Slot 2 is analog in the default layout, slot 4 digital
        assert_eq!(sim.pattern_candidate(16, SlotType::Analog), Some(2));
        assert_eq!(sim.pattern_candidate(16, SlotType::Digital), None);
        assert_eq!(sim.pattern_candidate(64, SlotType::Digital), Some(4));
        assert_eq!(sim.pattern_candidate(12, SlotType::Analog), None);
    }

    #[tokio::test]
    async fn test_truncated_pattern_write_is_an_exception() {
        let sim = Adam5000Simulator::new();
        let header = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06];

        // Digital slot 4 start with the byte-count field cut off
        let body = [0x01, FC_WRITE_PATTERN, 0x00, 0x40, 0x00, 0x08];
        let response = sim.dispatch(&header, &body).await;
        assert_eq!(response[7], FC_WRITE_PATTERN | 0x80);
        assert_eq!(response[8], 0x03);

        // Byte-count declaring more payload than the frame carries
        let body = [0x01, FC_WRITE_PATTERN, 0x00, 0x40, 0x00, 0x08, 0x02];
        let response = sim.dispatch(&header, &body).await;
        assert_eq!(response[7], FC_WRITE_PATTERN | 0x80);
        assert_eq!(response[8], 0x03);
        assert!(!sim.digital(4, 0).await);
    }
}
