use crate::prelude::*;

use bytes::{BufMut, Bytes, BytesMut};

/// Every frame, in both directions, ends with a single carriage return.
pub const TERMINATOR: u8 = b'\r';

/// Marks the start of data in device responses, eg `(230.0 50.0 ...`.
pub const DATA_START: char = '(';

const CRC_LEN: usize = 2;

/// CRC-16 with polynomial 0x1021, zero seed, MSB-first and no reflection.
pub fn checksum(data: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(data)
}

/// True when the last two bytes of `data` are the big-endian checksum of the rest.
pub fn crc_matches(data: &[u8]) -> bool {
    if data.len() < CRC_LEN {
        return false;
    }
    let (body, crc) = data.split_at(data.len() - CRC_LEN);
    checksum(body).to_be_bytes() == crc
}

/// Wire encoding of a command: ASCII bytes, big-endian CRC, `\r`.
pub fn frame(command: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(command.len() + CRC_LEN + 1);
    buf.put_slice(command.as_bytes());
    buf.put_u16(checksum(command.as_bytes()));
    buf.put_u8(TERMINATOR);
    buf.freeze()
}

pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|b| *b == TERMINATOR)
}

/// Drops NUL and other control bytes (< 0x20) from the tail.
pub fn trim_trailing_control(mut data: &[u8]) -> &[u8] {
    while let [rest @ .., last] = data {
        if *last >= 0x20 {
            break;
        }
        data = rest;
    }
    data
}

/// Checks a response frame (everything before the terminator) and returns its payload.
///
/// The CRC covers the untrimmed data, so trailing control bytes are only
/// stripped once the check has passed.
pub fn validate(command: &str, framed: &[u8]) -> Result<String, ProtocolError> {
    // the terminator has already been split off, so a bare CRC is the minimum
    if framed.len() < CRC_LEN {
        return Err(ProtocolError::FrameTooShort {
            command: command.to_owned(),
            frame: framed.to_vec(),
        });
    }

    let (data, crc) = framed.split_at(framed.len() - CRC_LEN);
    let received = u16::from_be_bytes([crc[0], crc[1]]);
    let calculated = checksum(data);

    if received != calculated {
        return Err(ProtocolError::CrcMismatch {
            command: command.to_owned(),
            received,
            calculated,
            data: data.to_vec(),
        });
    }

    Ok(String::from_utf8_lossy(trim_trailing_control(data)).into_owned())
}
