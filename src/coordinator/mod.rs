use crate::prelude::*;

pub mod task;

use crate::channels::Shutdown;
use crate::pi30::{DecodedRecord, Decoder, Device, Hidraw, Schema, Transport};
use task::{BoundedTask, TaskOutcome};

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receives each successfully decoded record.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, record: &DecodedRecord, subtopic: &str) -> Result<(), PublishError>;
}

/// Used when MQTT is disabled: records only go to the log.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, record: &DecodedRecord, subtopic: &str) -> Result<(), PublishError> {
        let json = serde_json::to_string(record).map_err(|source| PublishError::Serialise {
            subtopic: subtopic.to_owned(),
            source,
        })?;
        info!("{}: {}", subtopic, json);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    pub command_timeout: Duration,
    pub debug: bool,
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub commands_sent: u64,
    pub records_decoded: u64,
    pub records_published: u64,
    pub timeouts: u64,
    pub protocol_errors: u64,
    pub decode_errors: u64,
    pub publish_errors: u64,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Cycles: {}", self.cycles);
        info!("  Commands sent: {}", self.commands_sent);
        info!("  Records decoded: {}", self.records_decoded);
        info!("  Records published: {}", self.records_published);
        info!("  Errors:");
        info!("    Command timeouts: {}", self.timeouts);
        info!("    Protocol: {}", self.protocol_errors);
        info!("    Decode: {}", self.decode_errors);
        info!("    Publish: {}", self.publish_errors);
    }
}

/// Polls the inverter one command at a time and forwards decoded records.
pub struct Coordinator<D = Hidraw> {
    transport: Arc<tokio::sync::Mutex<Transport<D>>>,
    decoder: Decoder,
    publisher: Arc<dyn Publisher>,
    settings: PollSettings,
    shutdown: Shutdown,
    pub stats: Arc<Mutex<PollStats>>,
}

impl<D> Clone for Coordinator<D> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            decoder: self.decoder.clone(),
            publisher: self.publisher.clone(),
            settings: self.settings.clone(),
            shutdown: self.shutdown.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<D: Device + 'static> Coordinator<D> {
    pub fn new(
        transport: Transport<D>,
        decoder: Decoder,
        publisher: Arc<dyn Publisher>,
        settings: PollSettings,
    ) -> Self {
        Self {
            transport: Arc::new(tokio::sync::Mutex::new(transport)),
            decoder,
            publisher,
            settings,
            shutdown: Shutdown::new(),
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    pub fn stats(&self) -> PollStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Polls until `stop` is called.
    pub async fn start(&self) -> Result<()> {
        let commands = self.decoder.registry().poll_list(self.settings.debug);
        info!(
            "polling {} every {}ms",
            commands.iter().map(|s| s.command).collect::<Vec<_>>().join(", "),
            self.settings.interval.as_millis()
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                _ = self.poll_cycle(&commands) => {}
            }

            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        info!("coordinator stopped");
        Ok(())
    }

    /// Safe to call before `start` has begun; `start` then returns without polling.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Runs every scheduled command once, in order.
    pub async fn poll_once(&self) {
        let commands = self.decoder.registry().poll_list(self.settings.debug);
        self.poll_cycle(&commands).await;
    }

    async fn poll_cycle(&self, commands: &[&'static Schema]) {
        self.count(|s| s.cycles += 1);
        for &schema in commands {
            self.poll_command(schema).await;
        }
    }

    /// Sends one command, decodes and publishes the reply. Failures are logged
    /// and counted, never propagated.
    pub async fn poll_command(&self, schema: &'static Schema) -> Option<DecodedRecord> {
        let command = schema.command;
        debug!("Sending {} command...", command);
        self.count(|s| s.commands_sent += 1);

        let transport = self.transport.clone();
        let task = BoundedTask::spawn(command, async move {
            let mut transport = transport.lock_owned().await;
            transport.send_command(command).await
        });

        let payload = match task.wait(self.settings.command_timeout).await {
            TaskOutcome::Completed(Ok(payload)) => payload,
            TaskOutcome::Completed(Err(e)) => {
                warn!("Error sending {} command: {}", command, e);
                self.count(|s| s.protocol_errors += 1);
                return None;
            }
            TaskOutcome::TimedOut(limit) => {
                warn!("{} command timed out after {}ms", command, limit.as_millis());
                self.count(|s| s.timeouts += 1);
                return None;
            }
            TaskOutcome::Failed(e) => {
                error!("{} command task failed: {}", command, e);
                self.count(|s| s.protocol_errors += 1);
                return None;
            }
        };

        debug!("Raw {} response (length {}): {}", command, payload.len(), payload);

        let record = match self.decoder.decode(command, &payload) {
            Ok(record) => record,
            Err(e) => {
                warn!("Error parsing {} response: {}", command, e);
                self.count(|s| s.decode_errors += 1);
                return None;
            }
        };
        self.count(|s| s.records_decoded += 1);
        if log::log_enabled!(log::Level::Debug) {
            if let Ok(json) = serde_json::to_string(&record) {
                debug!("Parsed {} data: {}", command, json);
            }
        }

        match self.publisher.publish(&record, schema.subtopic).await {
            Ok(()) => self.count(|s| s.records_published += 1),
            Err(e) => {
                error!("Error publishing {} data: {}", command, e);
                self.count(|s| s.publish_errors += 1);
            }
        }

        Some(record)
    }

    /// Closes the device once any in-flight command has let go of it.
    pub async fn close_device(&self) {
        match tokio::time::timeout(self.settings.command_timeout, self.transport.lock()).await {
            Ok(mut transport) => transport.close(),
            Err(_) => warn!("device still busy after {}ms, leaving it to process exit", self.settings.command_timeout.as_millis()),
        }
    }

    fn count(&self, f: impl FnOnce(&mut PollStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}
