//! ADAM-5000/TCP Client Library
//!
//! An async client for the Advantech ADAM-5000/TCP distributed I/O system,
//! speaking its Modbus/TCP-derived wire protocol. The crate covers the full
//! acquisition loop: command construction, frame encoding/decoding, managed
//! TCP transport, and a background polling engine that keeps an in-memory
//! image of all analog and digital channels.
//!
//! # Features
//!
//! - **Command Builder**: every documented request shape, from whole-rack
//!   block reads to single-channel and whole-slot pattern writes
//! - **Managed Transport**: timeout-wrapped TCP with automatic stream
//!   teardown on any I/O fault, so a desynchronized socket never lingers
//! - **Polling Engine**: background acquisition ticks with a live-adjustable
//!   interval, pause/resume, and queued write dispatch between polls
//! - **Register Snapshot**: lock-guarded immutable image of all 64 analog
//!   words and 128 digital channels, swapped wholesale per poll
//! - **Engineering Values**: named parameter table mapping raw words to
//!   scaled readings, published on a broadcast channel every tick
//! - **Simulator**: an in-process controller double for tests and demos
//!
//! # Quick Start
//!
//! ```no_run
//! use adam5000::{Adam5000Client, Adam5000Config, ChannelAddress, SlotType};
//!
//! #[tokio::main]
//! async fn main() -> adam5000::Result<()> {
//!     let config = Adam5000Config::new("192.168.0.10", 502);
//!     let client = Adam5000Client::new(config)?;
//!
//!     if !client.connect().await {
//!         return Err(adam5000::AdamError::connection("controller unreachable"));
//!     }
//!
//!     // Background polling with live updates
//!     client.set_reading_state(true).await;
//!     let mut updates = client.subscribe();
//!     if let Ok(update) = updates.recv().await {
//!         println!("tick {} carried {} values", update.tick, update.values.len());
//!     }
//!
//!     // Cached channel access
//!     let boiler = ChannelAddress::new(SlotType::Analog, 0, 3)?;
//!     let value = client.get_value(boiler).await?;
//!     println!("A0.3 raw = {}", value.raw());
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod command;
pub mod constants;
pub mod error;
pub mod param;
pub mod poller;
pub mod simulator;
pub mod snapshot;
pub mod transport;
pub mod types;

// Re-export core types
pub use error::{AdamError, Result};
pub use types::{
    ChannelAddress, ChannelValue, CommandKind, ConnectionState, PollingState, SlotType,
};

// Re-export the protocol layer
pub use codec::FrameCodec;
pub use command::{AdamCommand, CommandBuilder, SlotPattern};
pub use snapshot::RegisterSnapshot;

// Re-export transport and acquisition types
pub use client::{Adam5000Client, Adam5000Config, ClientStatus};
pub use param::{Param, ParamTable};
pub use poller::{PollingEngine, SensorUpdate};
pub use simulator::Adam5000Simulator;
pub use transport::{AdamTransport, TcpTransport, TransportConfig, TransportStats};
