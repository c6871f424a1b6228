//! Core data model for the ADAM-5000TCP chassis
//!
//! Slot/channel addressing is validated at construction time so that a held
//! [`ChannelAddress`] is always inside the chassis limits and no range check
//! is needed on the wire paths.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    ADDRESSABLE_CHANNELS_PER_SLOT, ANALOG_CHANNELS_PER_SLOT, ANALOG_SLOT_COEF,
    DIGITAL_CHANNELS_PER_SLOT, DIGITAL_SLOT_COEF, SLOT_COUNT,
};
use crate::error::{AdamError, Result};

/// I/O module family of a chassis slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    /// 16-bit word per channel, 8 channels per slot
    Analog,
    /// Single bit per channel, 16 channels packed per word
    Digital,
}

impl SlotType {
    /// Register index stride between consecutive slots
    pub fn slot_coef(self) -> u8 {
        match self {
            SlotType::Analog => ANALOG_SLOT_COEF,
            SlotType::Digital => DIGITAL_SLOT_COEF,
        }
    }

    /// Channels a single slot of this family exposes
    pub fn channels_per_slot(self) -> u8 {
        match self {
            SlotType::Analog => ANALOG_CHANNELS_PER_SLOT,
            SlotType::Digital => DIGITAL_CHANNELS_PER_SLOT,
        }
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotType::Analog => write!(f, "analog"),
            SlotType::Digital => write!(f, "digital"),
        }
    }
}

/// Direction of a register command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Read,
    Write,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Read => write!(f, "read"),
            CommandKind::Write => write!(f, "write"),
        }
    }
}

/// A validated slot/channel position in the chassis
///
/// Both `slot` and `channel` must be in `[0, 8)`: single-channel commands
/// cannot reach digital channels 8-15, those are served by block reads and
/// whole-slot patterns. The constructor is the only way to obtain a value,
/// so every address that reaches the encoder or the snapshot accessors is
/// already in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    slot_type: SlotType,
    slot: u8,
    channel: u8,
}

impl ChannelAddress {
    /// Create an address, rejecting out-of-range slot or channel
    pub fn new(slot_type: SlotType, slot: u8, channel: u8) -> Result<Self> {
        if slot >= SLOT_COUNT {
            return Err(AdamError::channel(format!(
                "slot {slot} out of range 0..{SLOT_COUNT}"
            )));
        }
        if channel >= ADDRESSABLE_CHANNELS_PER_SLOT {
            return Err(AdamError::channel(format!(
                "channel {channel} out of range 0..{ADDRESSABLE_CHANNELS_PER_SLOT}"
            )));
        }
        Ok(Self {
            slot_type,
            slot,
            channel,
        })
    }

    pub fn slot_type(&self) -> SlotType {
        self.slot_type
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Register index used on the wire: `coef * slot + channel`
    pub fn register_index(&self) -> u8 {
        self.slot_type.slot_coef() * self.slot + self.channel
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.slot_type, self.slot, self.channel)
    }
}

/// A raw value crossing the client boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelValue {
    /// Raw register counts from an analog channel
    Analog(u16),
    /// Coil state of a digital channel
    Digital(bool),
}

impl ChannelValue {
    /// Slot family this value belongs to
    pub fn slot_type(&self) -> SlotType {
        match self {
            ChannelValue::Analog(_) => SlotType::Analog,
            ChannelValue::Digital(_) => SlotType::Digital,
        }
    }

    /// Raw register representation (digital maps to 0/1)
    pub fn raw(&self) -> u16 {
        match self {
            ChannelValue::Analog(v) => *v,
            ChannelValue::Digital(b) => u16::from(*b),
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Analog(v) => write!(f, "{v}"),
            ChannelValue::Digital(b) => write!(f, "{}", if *b { "on" } else { "off" }),
        }
    }
}

/// Transport lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Polling lifecycle state, orthogonal to the connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingState {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for PollingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollingState::Stopped => write!(f, "stopped"),
            PollingState::Running => write!(f, "running"),
            PollingState::Paused => write!(f, "paused"),
        }
    }
}
