use log::{debug, error, info, warn};
use std::time::Duration;

use rhiot_scanner::bluetooth::{LoopbackBackend, ScannerSession};
use rhiot_scanner::utils::parse_hex_line;
use rhiot_scanner::{ScannerConfig, SensorTelemetryFrame};

const REPLAY_INTERVAL_MILLIS: u64 = 10;

/// Feed captured event buffers through the loopback scanner until one asks to stop
fn replay_events(
    backend: LoopbackBackend,
    path: &str,
) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
    let contents = std::fs::read_to_string(path)?;
    let mut delivered = 0;

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event = match parse_hex_line(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("{}:{}: skipping malformed event: {}", path, line_no + 1, e);
                continue;
            }
        };

        match backend.deliver(&event) {
            Ok(true) => {
                info!("Scanner asked to stop after {} events", delivered + 1);
                return Ok(delivered + 1);
            }
            Ok(false) => delivered += 1,
            Err(e) => error!("{}:{}: dispatch failed: {}", path, line_no + 1, e),
        }
        std::thread::sleep(Duration::from_millis(REPLAY_INTERVAL_MILLIS));
    }

    Ok(delivered)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match ScannerConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let backend = LoopbackBackend::new();
    let session = ScannerSession::new(backend.clone(), &config.scanner_id);

    session.dispatcher().set_advert_event_callback(|event| {
        debug!("{}", event);
        match SensorTelemetryFrame::from_event(event) {
            Ok(Some(tag)) => info!("{}", tag),
            Ok(None) => {}
            Err(e) => warn!("Bad tag frame from {}: {}", event.address_string(), e),
        }
        Ok(false)
    });

    if let Err(e) = session.init_from_config(&config) {
        error!("Failed to start scanner: {}", e);
        return Err(e.into());
    }

    let replay = config.replay_file.clone().map(|path| {
        let backend = backend.clone();
        tokio::task::spawn_blocking(move || replay_events(backend, &path))
    });

    match replay {
        Some(handle) => {
            tokio::select! {
                result = handle => match result {
                    Ok(Ok(count)) => info!("Replay complete: {} events dispatched", count),
                    Ok(Err(e)) => error!("Replay failed: {}", e),
                    Err(e) => error!("Replay task failed: {}", e),
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Program terminated by user. Exiting gracefully.");
                }
            }
        }
        None => {
            info!("No REPLAY_FILE set, waiting for Ctrl+C");
            tokio::signal::ctrl_c().await?;
        }
    }

    info!(
        "Received {} events on device {}",
        session.dispatcher().event_count(),
        config.hci_device
    );
    session.free()?;
    Ok(())
}
