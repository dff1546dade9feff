//! End-of-day bars through a shared-directory handshake with an external
//! export agent.
//!
//! For every request a command file `cmd_<id>.txt` is written to the
//! commands directory. The agent answers by producing `<id>.csv` in the
//! export directory, which is polled until it appears or the timeout
//! elapses. The command file is always removed; the export file is removed
//! once parsed.

mod command;
mod export;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mdkit::{daily_label, Bar};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ConnectorError;
use crate::protocol::{Connector, ConnectorKind, Subscription, TickCallback};

pub use command::{CommandFile, COMMAND_VERB};
pub use export::parse_export;

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub commands_dir: PathBuf,
    pub export_dir: PathBuf,
    pub export_timeout: Duration,
    pub poll_interval: Duration,
}

impl HandshakeConfig {
    pub fn new(commands_dir: impl Into<PathBuf>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            commands_dir: commands_dir.into(),
            export_dir: export_dir.into(),
            export_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct HandshakeConnector {
    config: HandshakeConfig,
    connected: AtomicBool,
}

impl HandshakeConnector {
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            config,
            connected: AtomicBool::new(false),
        }
    }

    /// The export is read as soon as it exists, so the agent must publish it
    /// atomically: write under a temporary name, then rename into place.
    /// The export file is removed whether or not it parses.
    fn wait_for_export(
        &self,
        export_path: &Path,
        instrument: &str,
        timeframe: &str,
    ) -> Result<Vec<Bar>, ConnectorError> {
        let started = Instant::now();
        while started.elapsed() < self.config.export_timeout {
            if export_path.exists() {
                info!(path = %export_path.display(), "export file received");
                let parsed = parse_export(export_path, instrument, timeframe);
                if let Err(err) = fs::remove_file(export_path) {
                    warn!(path = %export_path.display(), error = %err, "failed to remove export file");
                }
                return parsed;
            }
            thread::sleep(self.config.poll_interval);
        }
        Err(ConnectorError::Timeout(self.config.export_timeout))
    }
}

impl Connector for HandshakeConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::FileHandshake
    }

    /// Only prepares the shared directories; the agent is not probed.
    fn connect(&self) -> Result<(), ConnectorError> {
        for dir in [&self.config.commands_dir, &self.config.export_dir] {
            fs::create_dir_all(dir).map_err(|err| {
                ConnectorError::ConnectionFailure(format!("cannot prepare {}: {err}", dir.display()))
            })?;
        }
        info!(
            commands_dir = %self.config.commands_dir.display(),
            export_dir = %self.config.export_dir.display(),
            "handshake connector ready, the export agent must be running"
        );
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn supports_realtime(&self) -> bool {
        false
    }

    fn subscribe_market_data(
        &self,
        _instrument: &str,
        _on_tick: TickCallback,
    ) -> Result<Subscription, ConnectorError> {
        Err(ConnectorError::UnsupportedOperation(
            "end-of-day handshake provides daily bars only, no realtime subscriptions".to_string(),
        ))
    }

    fn request_historical_data(
        &self,
        instrument: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ConnectorError> {
        if !self.is_connected() {
            return Err(ConnectorError::ConnectionFailure(
                "connect before requesting history".to_string(),
            ));
        }
        let label = daily_label(timeframe);

        let id = Uuid::new_v4().simple().to_string();
        let export_path = std::path::absolute(self.config.export_dir.join(format!("{id}.csv")))?;
        let command = CommandFile {
            instrument: instrument.to_string(),
            start: start.date_naive(),
            end: end.date_naive(),
            export_path: export_path.clone(),
        };

        let command_path = self.config.commands_dir.join(format!("cmd_{id}.txt"));
        let _cleanup = CommandCleanup(command_path.clone());
        let payload = command.to_line();
        fs::write(&command_path, &payload)?;
        info!(%payload, "export command written");

        let bars = self.wait_for_export(&export_path, instrument, label)?;
        debug!(id = %id, count = bars.len(), "export parsed");
        Ok(bars)
    }
}

/// Removes the command file when the request finishes, however it ends.
struct CommandCleanup(PathBuf);

impl Drop for CommandCleanup {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.0.display(), error = %err, "failed to remove command file"),
        }
    }
}
