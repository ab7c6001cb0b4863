use std::time::Duration;
use thiserror::Error;

/// Failures opening the device node. These are fatal: nothing can be polled
/// without a handle.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {path} not found")]
    NotFound { path: String },

    #[error("permission denied opening {path}")]
    PermissionDenied { path: String },

    #[error("device {path} unavailable: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of a single command/response exchange. The coordinator logs these
/// and moves on to the next command.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{command}: device not open")]
    NotOpen { command: String },

    #[error("{command}: writing frame failed: {source}")]
    WriteFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command}: reading response failed: {source}")]
    ReadFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command}: no terminator after {}ms, received {:02x?}", .elapsed.as_millis(), .received)]
    ReadTimeout {
        command: String,
        elapsed: Duration,
        received: Vec<u8>,
    },

    #[error("{command}: EOF on device, received {:02x?}", .received)]
    UnexpectedEof { command: String, received: Vec<u8> },

    #[error("{command}: response of {} bytes too short for data, CRC and CR: {:02x?}", .frame.len(), .frame)]
    FrameTooShort { command: String, frame: Vec<u8> },

    #[error(
        "{command}: CRC mismatch: received {:04x}, calculated {:04x} for data {:?} (hex: {:02x?})",
        .received,
        .calculated,
        String::from_utf8_lossy(.data),
        .data
    )]
    CrcMismatch {
        command: String,
        received: u16,
        calculated: u16,
        data: Vec<u8>,
    },
}

/// Failures turning a validated payload into a record.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("no schema registered for command {0}")]
    UnknownCommand(String),

    #[error("{command} response has too few fields: got {got}, want {want}")]
    TooFewFields {
        command: String,
        got: usize,
        want: usize,
    },

    #[error("{command}: error parsing {field} from {token:?}")]
    FieldParse {
        command: String,
        field: &'static str,
        token: String,
    },

    #[error("{command} response is empty")]
    EmptyPayload { command: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("serialising {subtopic} record: {source}")]
    Serialise {
        subtopic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("send(to_mqtt) failed for {subtopic} - channel closed?")]
    ChannelClosed { subtopic: String },
}
