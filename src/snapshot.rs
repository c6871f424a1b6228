//! Cached register state of the whole chassis
//!
//! A snapshot is immutable once built; the client swaps a fresh one in
//! behind a lock after every successful poll, so readers never observe a
//! half-updated array. Analog words are indexed `8 * slot + channel`;
//! digital words hold one slot each with bit `i` mapping to channel `i`.

use chrono::{DateTime, Utc};

use crate::constants::{ANALOG_SNAPSHOT_WORDS, DIGITAL_SNAPSHOT_WORDS};
use crate::types::{ChannelAddress, ChannelValue, SlotType};

/// Most-recently polled register values
#[derive(Debug, Clone)]
pub struct RegisterSnapshot {
    analog: [u16; ANALOG_SNAPSHOT_WORDS],
    digital: [u16; DIGITAL_SNAPSHOT_WORDS],
    taken_at: DateTime<Utc>,
}

impl Default for RegisterSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl RegisterSnapshot {
    /// Zero-filled snapshot, the state before any poll has completed
    pub fn empty() -> Self {
        Self {
            analog: [0; ANALOG_SNAPSHOT_WORDS],
            digital: [0; DIGITAL_SNAPSHOT_WORDS],
            taken_at: Utc::now(),
        }
    }

    /// Copy with the analog block replaced
    ///
    /// A short block leaves the remaining words untouched.
    pub fn with_analog(&self, words: &[u16]) -> Self {
        let mut next = self.clone();
        let n = words.len().min(ANALOG_SNAPSHOT_WORDS);
        next.analog[..n].copy_from_slice(&words[..n]);
        next.taken_at = Utc::now();
        next
    }

    /// Copy with the digital block replaced
    pub fn with_digital(&self, words: &[u16]) -> Self {
        let mut next = self.clone();
        let n = words.len().min(DIGITAL_SNAPSHOT_WORDS);
        next.digital[..n].copy_from_slice(&words[..n]);
        next.taken_at = Utc::now();
        next
    }

    /// Copy with a single channel patched, used to fold the result of a
    /// queued single-channel read back into the cache
    pub fn with_value(&self, address: ChannelAddress, value: ChannelValue) -> Self {
        let mut next = self.clone();
        match address.slot_type() {
            SlotType::Analog => {
                next.analog[address.register_index() as usize] = value.raw();
            }
            SlotType::Digital => {
                let word = &mut next.digital[address.slot() as usize];
                if value.raw() != 0 {
                    *word |= 1 << address.channel();
                } else {
                    *word &= !(1 << address.channel());
                }
            }
        }
        next.taken_at = Utc::now();
        next
    }

    /// Cached value of one channel
    pub fn value(&self, address: ChannelAddress) -> ChannelValue {
        match address.slot_type() {
            SlotType::Analog => {
                ChannelValue::Analog(self.analog[address.register_index() as usize])
            }
            SlotType::Digital => {
                let word = self.digital[address.slot() as usize];
                ChannelValue::Digital((word >> address.channel()) & 1 == 1)
            }
        }
    }

    /// Cached value as raw counts (digital maps to 0/1)
    pub fn raw(&self, address: ChannelAddress) -> u16 {
        self.value(address).raw()
    }

    pub fn analog_words(&self) -> &[u16] {
        &self.analog
    }

    pub fn digital_words(&self) -> &[u16] {
        &self.digital
    }

    /// When this snapshot was produced
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}
