use anyhow::Result;
use log::error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

use axpert_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut terminate = signal(SignalKind::terminate())?;

    // Ctrl+C or SIGTERM
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
            }
            _ = terminate.recv() => {}
        }
        let _ = shutdown_tx_clone.send(());
    });

    let app_handle = tokio::spawn(axpert_bridge::app(shutdown_tx.subscribe(), options));

    if let Err(e) = app_handle.await? {
        error!("Application error: {}", e);
    }

    Ok(())
}
