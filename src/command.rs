//! Command encoding for the ADAM-5000TCP controller
//!
//! Every command is an immutable byte buffer built before transmission.
//! The single-register commands share a fixed 12-byte frame selected by
//! `(SlotType, CommandKind)`; slot-pattern writes are variable length with
//! the 6-byte length prefix computed last.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{
    ANALOG_REGISTER_COUNT, COIL_OFF, COIL_ON, COUNT_OFFSET, DIGITAL_CHANNELS_PER_SLOT,
    DIGITAL_COIL_COUNT, FC_READ_ANALOG, FC_READ_DIGITAL, FC_WRITE_ANALOG, FC_WRITE_DIGITAL,
    FC_WRITE_PATTERN, FRAME_HEADER_LEN, FUNCTION_OFFSET, REGISTER_COMMAND_LEN,
    REGISTER_INDEX_OFFSET, SLOT_COUNT, UNIT_OFFSET,
};
use crate::error::{AdamError, Result};
use crate::types::{ChannelAddress, ChannelValue, CommandKind, SlotType};

/// A ready-to-send command frame
///
/// Tagged with its originating address, kind, and value so that a reply can
/// be attributed after the round trip when the command is drained from the
/// queue.
#[derive(Debug, Clone)]
pub struct AdamCommand {
    frame: Bytes,
    kind: CommandKind,
    address: Option<ChannelAddress>,
    value: Option<ChannelValue>,
}

impl AdamCommand {
    /// Raw bytes to put on the wire
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Originating channel, present for single-channel commands only
    pub fn address(&self) -> Option<ChannelAddress> {
        self.address
    }

    /// Written value, present for single-channel writes only
    pub fn value(&self) -> Option<ChannelValue> {
        self.value
    }
}

impl fmt::Display for AdamCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.address, self.value) {
            (_, Some(addr), Some(value)) => write!(f, "{} {} = {}", self.kind, addr, value),
            (_, Some(addr), None) => write!(f, "{} {}", self.kind, addr),
            (CommandKind::Read, None, _) => write!(f, "block read"),
            (CommandKind::Write, None, _) => write!(f, "pattern write"),
        }
    }
}

/// Per-channel payload for a multi-register slot write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotPattern {
    /// Raw register bytes for one analog slot, appended to the frame verbatim
    Analog(Vec<u8>),
    /// Coil states for one digital slot, bit-packed on encode
    Digital(Vec<bool>),
}

impl SlotPattern {
    pub fn slot_type(&self) -> SlotType {
        match self {
            SlotPattern::Analog(_) => SlotType::Analog,
            SlotPattern::Digital(_) => SlotType::Digital,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SlotPattern::Analog(bytes) => bytes.len(),
            SlotPattern::Digital(bits) => bits.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic encoder for all controller commands
///
/// Holds only the configured unit address; every method is a pure function
/// of its arguments.
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder {
    unit: u8,
}

impl CommandBuilder {
    pub fn new(unit: u8) -> Self {
        Self { unit }
    }

    /// Default fixed-length frame for a `(slot type, kind)` pair
    ///
    /// Layout: `[0,0, 0,0, 0,6, unit, fc, addrHi, addrLo, countHi, countLo]`.
    /// Read defaults select the full block (0x40 registers / 0x80 coils);
    /// write defaults leave address and value zeroed for the caller to fill.
    fn default_frame(&self, slot_type: SlotType, kind: CommandKind) -> [u8; REGISTER_COMMAND_LEN] {
        let function = match (slot_type, kind) {
            (SlotType::Analog, CommandKind::Read) => FC_READ_ANALOG,
            (SlotType::Analog, CommandKind::Write) => FC_WRITE_ANALOG,
            (SlotType::Digital, CommandKind::Read) => FC_READ_DIGITAL,
            (SlotType::Digital, CommandKind::Write) => FC_WRITE_DIGITAL,
        };
        let count = match (slot_type, kind) {
            (SlotType::Analog, CommandKind::Read) => ANALOG_REGISTER_COUNT,
            (SlotType::Digital, CommandKind::Read) => DIGITAL_COIL_COUNT,
            (_, CommandKind::Write) => 0,
        };

        let mut frame = [0u8; REGISTER_COMMAND_LEN];
        frame[5] = (REGISTER_COMMAND_LEN - FRAME_HEADER_LEN) as u8;
        frame[UNIT_OFFSET] = self.unit;
        frame[FUNCTION_OFFSET] = function;
        frame[COUNT_OFFSET..].copy_from_slice(&count.to_be_bytes());
        frame
    }

    /// Full-block read covering every channel of one slot family
    pub fn read_all(&self, slot_type: SlotType) -> AdamCommand {
        let frame = self.default_frame(slot_type, CommandKind::Read);
        AdamCommand {
            frame: Bytes::copy_from_slice(&frame),
            kind: CommandKind::Read,
            address: None,
            value: None,
        }
    }

    /// Read of a single channel (count forced to one register)
    pub fn read_channel(&self, address: ChannelAddress) -> AdamCommand {
        let mut frame = self.default_frame(address.slot_type(), CommandKind::Read);
        frame[REGISTER_INDEX_OFFSET] = address.register_index();
        frame[COUNT_OFFSET..].copy_from_slice(&1u16.to_be_bytes());
        AdamCommand {
            frame: Bytes::copy_from_slice(&frame),
            kind: CommandKind::Read,
            address: Some(address),
            value: None,
        }
    }

    /// Write of a single channel
    ///
    /// Analog values go out as big-endian counts; digital values use the
    /// Modbus coil convention (`0xFF00` on, `0x0000` off).
    pub fn write_channel(
        &self,
        address: ChannelAddress,
        value: ChannelValue,
    ) -> Result<AdamCommand> {
        if value.slot_type() != address.slot_type() {
            return Err(AdamError::channel(format!(
                "{} value for {}",
                value.slot_type(),
                address
            )));
        }

        let wire_value = match value {
            ChannelValue::Analog(v) => v,
            ChannelValue::Digital(true) => COIL_ON,
            ChannelValue::Digital(false) => COIL_OFF,
        };

        let mut frame = self.default_frame(address.slot_type(), CommandKind::Write);
        frame[REGISTER_INDEX_OFFSET] = address.register_index();
        frame[COUNT_OFFSET..].copy_from_slice(&wire_value.to_be_bytes());
        Ok(AdamCommand {
            frame: Bytes::copy_from_slice(&frame),
            kind: CommandKind::Write,
            address: Some(address),
            value: Some(value),
        })
    }

    /// Multi-register/coil write of one whole slot (function 0x0F)
    ///
    /// Digital patterns are packed as one bit string with the first element
    /// most significant, emitted big-endian, then each packed byte re-emitted
    /// as a little-endian 16-bit value; the controller consumes the bits
    /// reversed, so the last pattern element lands in the least-significant
    /// bit. Analog patterns carry the fixed `00 08` register count followed
    /// by the raw bytes. The hardware expects exactly this layout.
    pub fn slot_pattern(&self, slot: u8, pattern: &SlotPattern) -> Result<AdamCommand> {
        if slot >= SLOT_COUNT {
            return Err(AdamError::channel(format!(
                "slot {slot} out of range 0..{SLOT_COUNT}"
            )));
        }
        if pattern.is_empty() {
            return Err(AdamError::channel("empty slot pattern"));
        }
        let limit = match pattern {
            SlotPattern::Digital(_) => DIGITAL_CHANNELS_PER_SLOT as usize,
            // 8 registers of 2 bytes
            SlotPattern::Analog(_) => 16,
        };
        if pattern.len() > limit {
            return Err(AdamError::channel(format!(
                "pattern of {} exceeds one {} slot (max {limit})",
                pattern.len(),
                pattern.slot_type()
            )));
        }

        let start = u16::from(slot) * u16::from(pattern.slot_type().slot_coef());

        let mut body = BytesMut::new();
        body.put_u8(self.unit);
        body.put_u8(FC_WRITE_PATTERN);
        body.put_u16(start);
        match pattern {
            SlotPattern::Digital(bits) => {
                body.put_u16(bits.len() as u16);
                let packed = pack_pattern_bits(bits);
                body.put_u8((packed.len() * 2) as u8);
                for byte in packed {
                    body.put_u16_le(u16::from(byte));
                }
            }
            SlotPattern::Analog(raw) => {
                body.put_u8(0x00);
                body.put_u8(0x08);
                body.put_slice(raw);
            }
        }

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.put_slice(&(body.len() as u64).to_be_bytes()[2..]);
        frame.put_slice(&body);
        Ok(AdamCommand {
            frame: frame.freeze(),
            kind: CommandKind::Write,
            address: None,
            value: None,
        })
    }
}

/// Pack coil states into bytes, first element as the most significant bit
fn pack_pattern_bits(bits: &[bool]) -> Vec<u8> {
    let mut value: u32 = 0;
    for &bit in bits {
        value = (value << 1) | u32::from(bit);
    }
    let byte_len = bits.len().div_ceil(8);
    value.to_be_bytes()[4 - byte_len..].to_vec()
}
