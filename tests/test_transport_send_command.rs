mod common;
use common::*;
use axpert_bridge::pi30::{packet, Transport, TransportSettings};
use axpert_bridge::prelude::*;

use std::io;
use std::time::Duration;
use tokio::time::Instant;

fn transport(device: ScriptedDevice) -> Transport<ScriptedDevice> {
    Transport::with_device(device, TransportSettings::default())
}

#[tokio::test(start_paused = true)]
async fn happy_path() {
    common_setup();

    let response = Factory::response(Factory::qpigs_payload());
    let (head, tail) = response.split_at(10);
    let device = ScriptedDevice::replying(vec![vec![
        Step::Data(head.to_vec()),
        Step::Data(tail.to_vec()),
    ]])
    .with_stale(b"(NAK\x73\x73\r");
    let mut transport = transport(device.clone());

    let payload = transport.send_command("QPIGS").await.unwrap();

    assert_eq!(payload, format!("({}", Factory::qpigs_payload()));
    assert_eq!(device.written(), vec![packet::frame("QPIGS").to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn small_read_buffer() {
    common_setup();

    let settings = TransportSettings {
        read_buffer: 8,
        ..TransportSettings::default()
    };
    let device = ScriptedDevice::answering(&[Factory::response(Factory::qpigs2_payload())]);
    let mut transport = Transport::with_device(device, settings);

    assert_eq!(transport.send_command("QPIGS2").await.unwrap(), "(01.5 120.4 00180");
}

#[tokio::test(start_paused = true)]
async fn trailing_nuls_stripped_after_crc() {
    common_setup();

    let mut data = b"(B\0\0".to_vec();
    let crc = packet::checksum(&data);
    data.extend_from_slice(&crc.to_be_bytes());
    data.push(b'\r');

    let mut transport = transport(ScriptedDevice::answering(&[data]));
    assert_eq!(transport.send_command("QMOD").await.unwrap(), "(B");
}

#[tokio::test(start_paused = true)]
async fn crc_mismatch() {
    common_setup();

    let mut response = Factory::response("B");
    response[1] = b'L';

    let mut transport = transport(ScriptedDevice::answering(&[response]));
    match transport.send_command("QMOD").await {
        Err(ProtocolError::CrcMismatch {
            command,
            received,
            calculated,
            data,
        }) => {
            assert_eq!(command, "QMOD");
            assert_eq!(received, packet::checksum(b"(B"));
            assert_eq!(calculated, packet::checksum(b"(L"));
            assert_eq!(data, b"(L");
        }
        other => panic!("expected CrcMismatch, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn frame_too_short() {
    common_setup();

    let mut transport = transport(ScriptedDevice::answering(&[b"\x12\r".to_vec()]));
    match transport.send_command("QPIWS").await {
        Err(ProtocolError::FrameTooShort { frame, .. }) => assert_eq!(frame, b"\x12"),
        other => panic!("expected FrameTooShort, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn unexpected_eof() {
    common_setup();

    let device = ScriptedDevice::replying(vec![vec![Step::Data(b"(230".to_vec()), Step::Eof]]);
    let mut transport = transport(device);

    match transport.send_command("QPIGS").await {
        Err(ProtocolError::UnexpectedEof { received, .. }) => assert_eq!(received, b"(230"),
        other => panic!("expected UnexpectedEof, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn read_timeout_is_bounded() {
    common_setup();

    let device = ScriptedDevice::replying(vec![vec![Step::Data(b"(230.0".to_vec())]]);
    let mut transport = transport(device);

    let started = Instant::now();
    let result = transport.send_command("QPIGS").await;
    let elapsed = started.elapsed();

    match result {
        Err(ProtocolError::ReadTimeout {
            elapsed: waited,
            received,
            ..
        }) => {
            assert!(waited >= Duration::from_secs(5));
            assert_eq!(received, b"(230.0");
        }
        other => panic!("expected ReadTimeout, got {:?}", other),
    }

    // flush idles for one attempt, then the read deadline
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_millis(5300), "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn flush_is_bounded_by_deadline() {
    common_setup();

    let device = ScriptedDevice::answering(&[Factory::response("B")]).with_noise(b"\xff\xfe");
    let mut transport = transport(device);

    let started = Instant::now();
    assert_eq!(transport.send_command("QMOD").await.unwrap(), "(B");
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(300), "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn timed_out_reads_are_retried() {
    common_setup();

    let device = ScriptedDevice::replying(vec![vec![
        Step::Error(io::ErrorKind::TimedOut),
        Step::Error(io::ErrorKind::WouldBlock),
        Step::Data(Factory::response("B")),
    ]]);
    let mut transport = transport(device);

    assert_eq!(transport.send_command("QMOD").await.unwrap(), "(B");
}

#[tokio::test(start_paused = true)]
async fn read_error() {
    common_setup();

    let device = ScriptedDevice::replying(vec![vec![Step::Error(io::ErrorKind::Other)]]);
    let mut transport = transport(device);

    assert!(matches!(
        transport.send_command("QMOD").await,
        Err(ProtocolError::ReadFailed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn write_failure() {
    common_setup();

    let device = ScriptedDevice::answering(&[Factory::response("B")]).failing_writes();
    let mut transport = transport(device.clone());

    match transport.send_command("QMOD").await {
        Err(ProtocolError::WriteFailed { command, source }) => {
            assert_eq!(command, "QMOD");
            assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
        }
        other => panic!("expected WriteFailed, got {:?}", other),
    }
    assert!(device.written().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closed_transport() {
    common_setup();

    let mut transport = transport(ScriptedDevice::answering(&[Factory::response("B")]));
    assert!(transport.is_open());

    transport.close();
    transport.close();
    assert!(!transport.is_open());

    assert!(matches!(
        transport.send_command("QMOD").await,
        Err(ProtocolError::NotOpen { .. })
    ));
}

#[tokio::test]
async fn open_missing_device() {
    common_setup();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hidraw9");

    match Transport::open(path.to_str().unwrap(), TransportSettings::default()) {
        Err(DeviceError::NotFound { path: p }) => assert_eq!(p, path.to_str().unwrap()),
        Err(e) => panic!("expected NotFound, got {}", e),
        Ok(_) => panic!("opened a missing device"),
    }
}

#[tokio::test]
async fn open_unpollable_file() {
    common_setup();

    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();

    match Transport::open(path, TransportSettings::default()) {
        Err(DeviceError::Unavailable { path: p, .. }) => assert_eq!(p, path),
        Err(e) => panic!("expected Unavailable, got {}", e),
        Ok(_) => panic!("a regular file registered with epoll"),
    }
}

#[tokio::test]
async fn open_without_access() {
    common_setup();

    // root ignores file modes
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    use std::os::unix::fs::PermissionsExt;
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o000)).unwrap();
    let path = file.path().to_str().unwrap();

    match Transport::open(path, TransportSettings::default()) {
        Err(DeviceError::PermissionDenied { path: p }) => assert_eq!(p, path),
        Err(e) => panic!("expected PermissionDenied, got {}", e),
        Ok(_) => panic!("opened a mode 000 file"),
    }
}
