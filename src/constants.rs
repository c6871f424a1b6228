//! ADAM-5000TCP protocol constants
//!
//! The controller speaks a Modbus-TCP-like framing: a 6-byte header
//! (transaction + protocol id, both zero, then a big-endian length of
//! everything that follows), a unit address, a function code, and a
//! 4-byte address/count body for the fixed-length commands.

// ============================================================================
// Function Codes
// ============================================================================

/// Read digital coil block (FC01)
pub const FC_READ_DIGITAL: u8 = 0x01;

/// Read analog register block (FC04)
pub const FC_READ_ANALOG: u8 = 0x04;

/// Write single digital coil (FC05)
pub const FC_WRITE_DIGITAL: u8 = 0x05;

/// Write single analog register (FC06)
pub const FC_WRITE_ANALOG: u8 = 0x06;

/// Write a multi-register/coil slot pattern (FC15)
pub const FC_WRITE_PATTERN: u8 = 0x0F;

// ============================================================================
// Chassis Geometry
// ============================================================================

/// I/O module positions in the chassis
pub const SLOT_COUNT: u8 = 8;

/// Channels per analog slot (one 16-bit register each)
pub const ANALOG_CHANNELS_PER_SLOT: u8 = 8;

/// Channels per digital slot (one bit each, packed 16 per word)
pub const DIGITAL_CHANNELS_PER_SLOT: u8 = 16;

/// Highest channel reachable by single-channel commands, both families
///
/// The controller only addresses channels 0-7 per slot; digital channels
/// 8-15 are reachable through block reads and whole-slot patterns only.
pub const ADDRESSABLE_CHANNELS_PER_SLOT: u8 = 8;

/// Analog registers covered by a full poll (8 slots x 8 channels = 0x40)
pub const ANALOG_REGISTER_COUNT: u16 = 0x40;

/// Digital coils covered by a full poll (8 slots x 16 channels = 0x80)
pub const DIGITAL_COIL_COUNT: u16 = 0x80;

/// Analog words held in a register snapshot
pub const ANALOG_SNAPSHOT_WORDS: usize = 64;

/// Digital words held in a register snapshot (16 bits = 1 slot each)
pub const DIGITAL_SNAPSHOT_WORDS: usize = 16;

// ============================================================================
// Frame Layout
// ============================================================================

/// Header length preceding the unit address
///
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) = 6 bytes.
/// The length field counts every byte after itself.
pub const FRAME_HEADER_LEN: usize = 6;

/// Fixed length of the single-register command frames
///
/// Header(6) + Unit(1) + Function(1) + Address(2) + Count/Value(2) = 12.
pub const REGISTER_COMMAND_LEN: usize = 12;

/// Byte offset of the unit address within a command frame
pub const UNIT_OFFSET: usize = 6;

/// Byte offset of the function code within a command frame
pub const FUNCTION_OFFSET: usize = 7;

/// Byte offset of the register index low byte within a command frame
pub const REGISTER_INDEX_OFFSET: usize = 9;

/// Byte offset of the trailing count/value field within a command frame
pub const COUNT_OFFSET: usize = 10;

/// Byte offset of the payload byte-count in a read response
pub const RESPONSE_COUNT_OFFSET: usize = 8;

/// Byte offset of the first payload byte in a read response
pub const RESPONSE_PAYLOAD_OFFSET: usize = 9;

/// Upper bound on the declared body length of a response
///
/// The largest real response is a full analog block read, 131 bytes after
/// the header. Anything declaring more means the stream is desynchronized.
pub const MAX_RESPONSE_BODY_LEN: usize = 256;

/// Coil ON value for single-coil writes (Modbus convention)
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF value for single-coil writes
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Addressing
// ============================================================================

/// Register index stride per analog slot
pub const ANALOG_SLOT_COEF: u8 = 8;

/// Register index stride per digital slot
pub const DIGITAL_SLOT_COEF: u8 = 16;

// ============================================================================
// Defaults
// ============================================================================

/// Default TCP port the controller listens on
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default controller unit address
pub const DEFAULT_UNIT: u8 = 1;

/// Default polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Shortest accepted polling interval in milliseconds
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
