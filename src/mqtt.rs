use crate::prelude::*;
use crate::channels::Shutdown;
use crate::coordinator::Publisher;
use crate::pi30::DecodedRecord;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use std::time::Duration;

const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_SECS: u64 = 10;
const RECONNECT_DELAY_SECS: u64 = 5;
const DRAIN_TIMEOUT_SECS: u64 = 2;
const REQUEST_CAPACITY: usize = 10;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    /// Relative to the configured namespace.
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    pub fn for_record(
        record: &DecodedRecord,
        device_name: &str,
        subtopic: &str,
    ) -> Result<Message, serde_json::Error> {
        Ok(Message {
            topic: format!("{}/{}", device_name, subtopic),
            retain: false,
            payload: serde_json::to_string(record)?,
        })
    }
} // }}}

pub type Sender = broadcast::Sender<Message>;

/// Hands records to the MQTT task through the `to_mqtt` channel.
#[derive(Clone)]
pub struct MqttPublisher {
    sender: Sender,
    device_name: String,
}

impl MqttPublisher {
    pub fn new(config: &config::Mqtt, channels: &Channels) -> Self {
        Self {
            sender: channels.to_mqtt.clone(),
            device_name: config.device_name().to_owned(),
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, record: &DecodedRecord, subtopic: &str) -> Result<(), PublishError> {
        let message = Message::for_record(record, &self.device_name, subtopic).map_err(|source| {
            PublishError::Serialise {
                subtopic: subtopic.to_owned(),
                source,
            }
        })?;

        self.sender
            .send(message)
            .map_err(|_| PublishError::ChannelClosed {
                subtopic: subtopic.to_owned(),
            })?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct Mqtt {
    config: config::Mqtt,
    channels: Channels,
    shutdown: Shutdown,
}

impl Mqtt {
    pub fn new(config: config::Mqtt, channels: Channels) -> Self {
        Self {
            config,
            channels,
            shutdown: Shutdown::new(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        // the broker drops an existing session on client id reuse
        let client_id = format!("{}_{}", c.client_id(), std::process::id());
        let mut options = MqttOptions::new(client_id, c.host(), c.port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.username(), c.password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.host(), c.port());

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        futures::try_join!(self.receiver(client.clone(), eventloop), self.sender(client))?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping MQTT client...");
        self.shutdown.trigger();
        Ok(())
    }

    // only eventloop.poll() drains the request channel, so the poll loop must not await it
    fn announce(&self, client: &AsyncClient) {
        let client = client.clone();
        let topic = self.lwt_topic();
        tokio::spawn(async move {
            if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, true, "online").await {
                warn!("failed to queue online status on {}: {}", topic, e);
            }
        });
    }

    // Drives the connection. Nothing is subscribed so incoming publishes are not
    // expected. Never awaits the client; the poll future is only dropped on shutdown.
    async fn receiver(&self, client: AsyncClient, mut eventloop: EventLoop) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.wait() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("connected to MQTT broker");
                    self.announce(&client);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    debug!("ignoring publish on {}", publish.topic);
                }
                Err(e) => {
                    error!("MQTT connection lost: {}", e);
                    info!("reconnecting in {}s", RECONNECT_DELAY_SECS);
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                    }
                }
                _ => {} // keepalives etc
            }
        }

        info!("MQTT receiver shutting down");

        // the sender queues the offline status and a disconnect; push them out
        let drained = tokio::time::timeout(Duration::from_secs(DRAIN_TIMEOUT_SECS), async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    _ => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("MQTT disconnect not sent within {}s", DRAIN_TIMEOUT_SECS);
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            let message = tokio::select! {
                _ = self.shutdown.wait() => break,
                message = receiver.recv() => message,
            };

            match message {
                Ok(message) => {
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = self.publish(&client, message) => {}
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("MQTT sender lagged, {} messages dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => bail!("to_mqtt channel closed"),
            }
        }

        info!("MQTT sender received shutdown signal");
        // non-blocking: the request channel may be full if the broker is gone
        if let Err(e) = client.try_publish(self.lwt_topic(), QoS::AtLeastOnce, true, "offline") {
            warn!("could not queue offline status: {}", e);
        }
        if let Err(e) = client.try_disconnect() {
            warn!("could not queue disconnect: {}", e);
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    async fn publish(&self, client: &AsyncClient, message: Message) {
        let topic = format!("{}/{}", self.config.namespace(), message.topic);
        debug!("publishing: {} = {}", topic, message.payload);

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match client
                .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload.as_bytes())
                .await
            {
                Ok(_) => {
                    info!("Published to topic {}", topic);
                    return;
                }
                Err(err) if attempt < PUBLISH_ATTEMPTS => {
                    error!(
                        "MQTT publish failed: {:?} - retrying in {}s (attempt {}/{})",
                        err, PUBLISH_RETRY_SECS, attempt, PUBLISH_ATTEMPTS
                    );
                    tokio::time::sleep(Duration::from_secs(PUBLISH_RETRY_SECS)).await;
                }
                Err(err) => error!("MQTT publish to {} failed, giving up: {:?}", topic, err),
            }
        }
    }

    fn lwt_topic(&self) -> String {
        format!("{}/{}/LWT", self.config.namespace(), self.config.device_name())
    }
}
