pub mod channels;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod mqtt;
pub mod options;
pub mod pi30;
pub mod prelude;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::{LogPublisher, PollSettings, Publisher};
use crate::mqtt::{Mqtt, MqttPublisher};
use crate::pi30::{Decoder, Registry, Transport};
use crate::prelude::*;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Grace period for the MQTT task to publish its offline status.
const MQTT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        // already initialised, eg by a test harness
        debug!("logger not reinitialised: {}", e);
    }
}

/// Runs until `shutdown_rx` fires or the optional runtime limit passes.
///
/// Exits the process with 255 on a bad config and 1 when the device cannot be
/// opened.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, options: Options) -> Result<()> {
    let config = match Config::new(options.config_file.clone()) {
        Ok(config) => config,
        Err(err) => {
            init_logging("info");
            error!("Failed to load config {}: {:?}", options.config_file, err);
            std::process::exit(255);
        }
    };

    init_logging(config.loglevel());
    info!("axpert-bridge {} starting", CARGO_PKG_VERSION);
    config.log_summary();

    info!("Opening device {}", options.device);
    let transport = match Transport::open(&options.device, config.transport.settings()) {
        Ok(transport) => transport,
        Err(e) => {
            let hint = match e {
                DeviceError::NotFound { .. } => "Make sure it exists and the inverter is connected",
                DeviceError::PermissionDenied { .. } => {
                    "Run with appropriate permissions or check your udev rules"
                }
                DeviceError::Unavailable { .. } => "Unexpected error opening device",
            };
            error!("{}. {}", e, hint);
            std::process::exit(1);
        }
    };

    let channels = Channels::new();

    let mqtt = Mqtt::new(config.mqtt.clone(), channels.clone());
    let publisher: Arc<dyn Publisher> = if config.mqtt.enabled() {
        Arc::new(MqttPublisher::new(&config.mqtt, &channels))
    } else {
        Arc::new(LogPublisher)
    };

    let mqtt_clone = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    let coordinator = Coordinator::new(
        transport,
        Decoder::new(Arc::new(Registry::new())),
        publisher,
        PollSettings {
            interval: options.interval,
            command_timeout: config.transport.command_timeout(),
            debug: options.debug,
        },
    );
    let coordinator_clone = coordinator.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator_clone.start().await {
            error!("Coordinator task failed: {}", e);
        }
    });

    match options.runtime {
        Some(secs) => {
            info!("Running for {}s", secs);
            tokio::select! {
                _ = shutdown_rx.recv() => info!("Shutdown signal received"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Runtime limit reached"),
            }
        }
        None => {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received");
        }
    }

    info!("Stopping all components...");
    coordinator.stop();
    if let Err(e) = coordinator_handle.await {
        error!("Error waiting for coordinator task: {}", e);
    }

    mqtt.stop().await?;
    if tokio::time::timeout(MQTT_STOP_TIMEOUT, mqtt_handle).await.is_err() {
        warn!("MQTT task did not stop within {}s", MQTT_STOP_TIMEOUT.as_secs());
    }

    coordinator.close_device().await;
    coordinator.stats().print_summary();

    info!("Shutdown complete");
    Ok(())
}
