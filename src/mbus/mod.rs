//! The mbus module contains the components responsible for the core M-Bus protocol
//! implementation: frame encoding and decoding, addressing, the byte channel
//! abstraction and the master transaction engine.

pub mod address;
pub mod channel;
pub mod frame;
pub mod mbus_protocol;
pub mod serial_mock;

pub use address::{DeviceAddress, PrimaryAddress, SecondaryAddress, SecondaryAddressMask};
pub use channel::{ByteChannel, StreamChannel};
pub use frame::{decode_frame, encode_frame, ControlField, MBusFrame, MBusFrameType};
pub use mbus_protocol::{
    EngineConfig, MBusMaster, Readout, SecondarySelection, Transaction, TransactionState,
};
