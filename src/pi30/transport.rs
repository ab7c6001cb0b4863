use crate::prelude::*;
use crate::pi30::device::{Device, Hidraw, ReadOutcome};
use crate::pi30::packet;

use {
    bytes::BytesMut,
    std::io,
    std::path::Path,
    std::time::Duration,
    tokio::time::Instant,
};

/// Timing and sizing for one command/response cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Bound on each read while discarding stale bytes.
    pub flush_attempt: Duration,
    /// Bound on the whole flush phase.
    pub flush_deadline: Duration,
    /// Bound on waiting for the response terminator.
    pub read_deadline: Duration,
    /// Pause after a read that produced nothing.
    pub read_retry: Duration,
    pub read_buffer: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            flush_attempt: Duration::from_millis(20),
            flush_deadline: Duration::from_millis(200),
            read_deadline: Duration::from_secs(5),
            read_retry: Duration::from_millis(50),
            read_buffer: 256,
        }
    }
}

/// Owns the device handle and runs command/response exchanges over it.
pub struct Transport<D = Hidraw> {
    device: Option<D>,
    settings: TransportSettings,
}

impl Transport<Hidraw> {
    /// Opens `path` for read and write.
    pub fn open(path: &str, settings: TransportSettings) -> Result<Self, DeviceError> {
        let device = Hidraw::open(Path::new(path))?;

        info!("opened {}", path);
        Ok(Self::with_device(device, settings))
    }
}

impl<D: Device> Transport<D> {
    pub fn with_device(device: D, settings: TransportSettings) -> Self {
        Self {
            device: Some(device),
            settings,
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Releases the handle. Closing twice is harmless.
    pub fn close(&mut self) {
        if self.device.take().is_some() {
            info!("device closed");
        }
    }

    /// Sends `command` and returns the validated, trimmed response payload.
    pub async fn send_command(&mut self, command: &str) -> Result<String, ProtocolError> {
        let settings = self.settings.clone();
        let device = self.device.as_mut().ok_or_else(|| ProtocolError::NotOpen {
            command: command.to_owned(),
        })?;

        let flushed = flush(device, &settings).await;
        if flushed > 0 {
            debug!("{}: discarded {} stale bytes", command, flushed);
        }

        let frame = packet::frame(command);
        debug!("{}: TX {:02x?}", command, &frame[..]);
        device
            .write_frame(&frame)
            .await
            .map_err(|source| ProtocolError::WriteFailed {
                command: command.to_owned(),
                source,
            })?;

        read_response(device, &settings, command).await
    }
}

// Reads and discards whatever the device still holds from an earlier cycle.
// Never fails; returns the number of bytes thrown away.
async fn flush<D: Device>(device: &mut D, settings: &TransportSettings) -> usize {
    let mut buf = vec![0u8; settings.read_buffer];
    let started = Instant::now();
    let deadline = started + settings.flush_deadline;
    let mut flushed = 0;

    loop {
        let now = Instant::now();
        if now >= deadline {
            debug!(
                "pre-read flush timeout reached after {}ms, {} bytes flushed",
                (now - started).as_millis(),
                flushed
            );
            break;
        }

        let wait = settings.flush_attempt.min(deadline - now);
        match device.read_for(&mut buf, wait).await {
            Ok(ReadOutcome::Data(0)) | Ok(ReadOutcome::Eof) => {
                debug!("pre-read flush completed (no data), {} bytes flushed", flushed);
                break;
            }
            Ok(ReadOutcome::Data(n)) => {
                trace!("flushed {:02x?}", &buf[..n]);
                flushed += n;
            }
            Ok(ReadOutcome::Idle) => {
                debug!("pre-read flush completed (read timeout), {} bytes flushed", flushed);
                break;
            }
            Err(e) => {
                warn!("error during pre-read flush: {}, {} bytes flushed", e, flushed);
                break;
            }
        }
    }

    flushed
}

async fn read_response<D: Device>(
    device: &mut D,
    settings: &TransportSettings,
    command: &str,
) -> Result<String, ProtocolError> {
    let mut buf = vec![0u8; settings.read_buffer];
    let mut response = BytesMut::with_capacity(settings.read_buffer);
    let started = Instant::now();
    let deadline = started + settings.read_deadline;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(ProtocolError::ReadTimeout {
                command: command.to_owned(),
                elapsed: now - started,
                received: response.to_vec(),
            });
        }

        match device.read_for(&mut buf, deadline - now).await {
            Ok(ReadOutcome::Data(n)) if n > 0 => {
                response.extend_from_slice(&buf[..n]);
                debug!("{}: RX {} bytes, {} buffered: {:02x?}", command, n, response.len(), &buf[..n]);

                if let Some(i) = packet::find_terminator(&response) {
                    return packet::validate(command, &response[..i]);
                }
                continue;
            }
            Ok(ReadOutcome::Data(_)) | Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Eof) => {
                return Err(ProtocolError::UnexpectedEof {
                    command: command.to_owned(),
                    received: response.to_vec(),
                })
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
            Err(source) => {
                return Err(ProtocolError::ReadFailed {
                    command: command.to_owned(),
                    source,
                })
            }
        }

        let pause = settings
            .read_retry
            .min(deadline.saturating_duration_since(Instant::now()));
        tokio::time::sleep(pause).await;
    }
}
