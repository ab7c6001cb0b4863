//! PI30 ASCII protocol spoken by Axpert/Voltronic-style inverters over USB HID.
//!
//! Requests are `<COMMAND><crc16 BE>\r`, responses `(<payload><crc16 BE>\r`.

pub mod decoder;
pub mod device;
pub mod packet;
pub mod schema;
pub mod transport;

pub use decoder::{DecodedRecord, Decoder, Value};
pub use device::{Device, Hidraw, ReadOutcome};
pub use schema::{Registry, Schema};
pub use transport::{Transport, TransportSettings};
