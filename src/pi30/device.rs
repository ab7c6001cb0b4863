use crate::prelude::*;

use {
    async_trait::async_trait,
    std::fs::{File, OpenOptions},
    std::io::{self, Read, Write},
    std::os::unix::fs::OpenOptionsExt,
    std::path::Path,
    std::time::Duration,
    tokio::io::unix::AsyncFd,
};

/// Result of one bounded read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    /// Nothing arrived before the attempt's time bound.
    Idle,
    Eof,
}

/// A bidirectional byte stream to the inverter.
///
/// Reads must return within `wait`; writes send the whole frame or fail.
#[async_trait]
pub trait Device: Send {
    async fn read_for(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<ReadOutcome>;

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

fn open_error(path: String, err: io::Error) -> DeviceError {
    match err.kind() {
        io::ErrorKind::NotFound => DeviceError::NotFound { path },
        io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied { path },
        _ => DeviceError::Unavailable { path, source: err },
    }
}

/// A hidraw (or any pollable character device) node, opened non-blocking and
/// driven by the tokio reactor.
pub struct Hidraw {
    fd: AsyncFd<File>,
}

impl Hidraw {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let name = || path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|err| open_error(name(), err))?;

        // epoll refuses nodes it cannot poll (EPERM); that is not an access problem
        let fd = AsyncFd::new(file).map_err(|source| DeviceError::Unavailable {
            path: name(),
            source,
        })?;

        Ok(Self { fd })
    }

    async fn read_ready(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl Device for Hidraw {
    async fn read_for(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<ReadOutcome> {
        match tokio::time::timeout(wait, self.read_ready(buf)).await {
            Err(_) => Ok(ReadOutcome::Idle),
            Ok(Ok(0)) => Ok(ReadOutcome::Eof),
            Ok(Ok(n)) => Ok(ReadOutcome::Data(n)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadOutcome::Idle),
            Ok(Err(e)) => Err(e),
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut written = 0;

        while written < frame.len() {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| inner.get_ref().write(&frame[written..])) {
                Ok(Ok(0)) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(Ok(n)) => written += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }

        trace!("wrote {} bytes", written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_errors_by_kind() {
        let path = || "/dev/hidraw0".to_string();

        assert!(matches!(
            open_error(path(), io::ErrorKind::NotFound.into()),
            DeviceError::NotFound { .. }
        ));
        assert!(matches!(
            open_error(path(), io::ErrorKind::PermissionDenied.into()),
            DeviceError::PermissionDenied { .. }
        ));
        assert!(matches!(
            open_error(path(), io::Error::from_raw_os_error(libc::EBUSY)),
            DeviceError::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn unpollable_node_is_unavailable() {
        match Hidraw::open(Path::new("/dev/null")) {
            Err(DeviceError::Unavailable { path, .. }) => assert_eq!(path, "/dev/null"),
            Err(e) => panic!("expected Unavailable, got {}", e),
            Ok(_) => panic!("/dev/null registered with epoll"),
        }
    }
}
