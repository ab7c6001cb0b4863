#![allow(dead_code)]

use async_trait::async_trait;
use axpert_bridge::coordinator::Publisher;
use axpert_bridge::pi30::{packet, DecodedRecord, Device, ReadOutcome};
use axpert_bridge::prelude::*;

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;

impl Factory {
    pub fn qpigs_payload() -> &'static str {
        "230.0 50.0 230.0 50.0 0161 0115 003 390 54.00 000 100 0039 0000 000.0 00.00 00000 00010000 00 00 00000 010"
    }

    pub fn qpiri_payload() -> &'static str {
        "230.0 21.7 230.0 50.0 21.7 5000 4000 48.0 46.0 42.0 56.4 54.0 2 010 100 0 1 2 1 01 0 0 52.0 0 1 480 0 000"
    }

    pub fn qpigs2_payload() -> &'static str {
        "01.5 120.4 00180"
    }

    pub fn qpiws_payload() -> &'static str {
        "00000000000000000000000000000000"
    }

    /// A complete device response: `(`, payload, CRC over both, CR.
    pub fn response(payload: &str) -> Vec<u8> {
        let mut data = format!("({}", payload).into_bytes();
        let crc = packet::checksum(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        data.push(packet::TERMINATOR);
        data
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Data(Vec<u8>),
    /// Nothing arrives for the whole read attempt.
    Idle,
    Eof,
    Error(io::ErrorKind),
}

/// A fake device driven by a script.
///
/// Reads consume `pending`; once it runs dry they idle for the full wait (or
/// return `noise`, if set, until the next write). Each write queues the next
/// entry of `replies`.
#[derive(Clone, Default)]
pub struct ScriptedDevice {
    pub pending: VecDeque<Step>,
    pub replies: VecDeque<Vec<Step>>,
    pub noise: Option<Vec<u8>>,
    pub fail_writes: bool,
    pub written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replying(replies: Vec<Vec<Step>>) -> Self {
        Self {
            replies: replies.into(),
            ..Self::default()
        }
    }

    /// Each reply arrives in one chunk.
    pub fn answering(responses: &[Vec<u8>]) -> Self {
        Self::replying(responses.iter().map(|r| vec![Step::Data(r.clone())]).collect())
    }

    pub fn with_stale(mut self, bytes: &[u8]) -> Self {
        self.pending.push_back(Step::Data(bytes.to_vec()));
        self
    }

    pub fn with_noise(mut self, bytes: &[u8]) -> Self {
        self.noise = Some(bytes.to_vec());
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    fn fill(buf: &mut [u8], data: &[u8]) -> usize {
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        n
    }
}

const LATENCY: Duration = Duration::from_millis(2);

#[async_trait]
impl Device for ScriptedDevice {
    async fn read_for(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<ReadOutcome> {
        let step = match self.pending.pop_front() {
            Some(step) => step,
            None => match &self.noise {
                Some(noise) => Step::Data(noise.clone()),
                None => Step::Idle,
            },
        };

        match step {
            Step::Data(data) => {
                tokio::time::sleep(LATENCY.min(wait)).await;
                let n = Self::fill(buf, &data);
                if n < data.len() {
                    self.pending.push_front(Step::Data(data[n..].to_vec()));
                }
                Ok(ReadOutcome::Data(n))
            }
            Step::Idle => {
                tokio::time::sleep(wait).await;
                Ok(ReadOutcome::Idle)
            }
            Step::Eof => Ok(ReadOutcome::Eof),
            Step::Error(kind) => Err(kind.into()),
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        self.written.lock().unwrap().push(frame.to_vec());
        self.noise = None;
        if let Some(reply) = self.replies.pop_front() {
            self.pending.extend(reply);
        }
        Ok(())
    }
}

/// Keeps every published record, keyed by subtopic.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub published: Arc<Mutex<Vec<(String, DecodedRecord)>>>,
}

impl RecordingPublisher {
    pub fn subtopics(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, record: &DecodedRecord, subtopic: &str) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap()
            .push((subtopic.to_owned(), record.clone()));
        Ok(())
    }
}
