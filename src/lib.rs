//! # mbus-master - M-Bus (Meter-Bus) Master Protocol Stack
//!
//! The mbus-master crate implements the master side of the wired M-Bus protocol
//! (EN 13757-2/3), used to poll utility meters (water, heat, gas, electricity)
//! over a shared half-duplex serial bus.
//!
//! ## Features
//!
//! - Frame codec for acknowledge, short, control and long frames with checksum validation
//! - Telegram parser for variable data, fixed data, application error and manufacturer specific payloads
//! - Data record decoder resolving DIF/DIFE and VIF/VIFE codings into typed readings
//! - Transaction engine with retries, timeouts, stale byte draining and address checks
//! - Primary addressing and two-phase secondary address selection
//! - Vendor extension hooks for manufacturer specific data
//! - Optional device registry loadable from JSON
//!
//! The stack talks to the bus through [`ByteChannel`]. Opening the serial
//! port is left to the application; any tokio byte stream can be wrapped in
//! a [`StreamChannel`].
//!
//! ```rust
//! use mbus_master::mbus::serial_mock::{MockChannel, MockReply};
//! use mbus_master::{MBusError, MBusMaster};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), MBusError> {
//! let slave = MockChannel::new();
//! slave.queue_reply(MockReply::ack());
//!
//! let master = MBusMaster::new(slave.clone());
//! master.ping(5).await?;
//! assert_eq!(slave.written()[0], vec![0x10, 0x40, 0x05, 0x45, 0x16]);
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod logging;
pub mod mbus;
pub mod payload;
pub mod registry;
pub mod util;
pub mod vendors;

pub use crate::error::MBusError;
pub use crate::logging::init_logger;

// Core M-Bus types
pub use mbus::{
    ByteChannel, DeviceAddress, EngineConfig, MBusFrame, MBusFrameType, MBusMaster, Readout,
    SecondaryAddress, SecondaryAddressMask, SecondarySelection, StreamChannel, Transaction,
    TransactionState,
};
pub use payload::{DataRecordDecoder, Reading, ReadingValue, Telegram, TelegramBody};

// Registries
pub use registry::{DeviceEntry, DeviceRegistry};
pub use vendors::{VendorExtension, VendorRegistry, VendorValue};
