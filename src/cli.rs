use std::path::PathBuf;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::device::btle::spawn_session;
use crate::device::connection::ConnectionConfig;
use crate::device::types::{ConnectionState, DeviceId};
use crate::error::{AppRunError, ConfigError};
use crate::reading::classifier::ClassifierMode;
use crate::session::{SessionControl, SessionSnapshot};

#[derive(Parser, Debug)]
#[command(name = "insole-link", version, about = "Live pressure insole readings over Bluetooth LE")]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scan for insoles and list them
    Scan {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Connect to an insole and log classified readings until interrupted
    Monitor {
        /// Device id as printed by `scan`; the first insole found when omitted
        #[arg(long)]
        device: Option<String>,
        /// Text to send to the insole once connected
        #[arg(long)]
        command: Option<String>,
        /// Use the green/yellow/red scale
        #[arg(long)]
        coarse: bool,
    },
    /// Print the config file location and the effective config
    Config,
}

pub async fn run_command(command: Command, config_io: ConfigIO) -> Result<(), AppRunError> {
    let mut config = config_io.read().await?;

    match command {
        Command::Config => {
            // writes back missing fields with their defaults
            config_io.save(&config).await?;
            println!("{}", config_io.path().to_string_lossy());
            println!("{}", serde_json::to_string_pretty(&config).map_err(ConfigError::from)?);
            Ok(())
        },
        Command::Scan { seconds } => {
            let cancel = CancellationToken::new();
            let handle = spawn_session(config.connection(), config.classifier, cancel.clone());

            sleep(Duration::from_secs(seconds)).await;
            let snapshot = handle.snapshot();
            cancel.cancel();
            handle.join().await?;

            if let Some(err) = &snapshot.last_error {
                warn!("{}", err);
            }
            if snapshot.devices.is_empty() {
                println!("No insoles found");
            }
            for device in &snapshot.devices {
                println!("{}\t{}\t{} dBm", device.id, device.name, device.rssi);
            }
            Ok(())
        },
        Command::Monitor { device, command, coarse } => {
            if coarse {
                config.classifier = ClassifierMode::Coarse;
            }

            monitor(config.connection(), config.classifier, device.map(DeviceId), command).await
        },
    }
}

fn pick_device(snapshot: &SessionSnapshot, wanted: &Option<DeviceId>) -> Option<DeviceId> {
    match wanted {
        Some(id) => snapshot.devices.iter().find(|d| d.id == *id).map(|d| d.id.clone()),
        None => snapshot.devices.first().map(|d| d.id.clone()),
    }
}

/// Decides when `monitor` asks the session to connect.
struct AutoConnect {
    wanted: Option<DeviceId>,
    requested: bool,
}

impl AutoConnect {
    fn new(wanted: Option<DeviceId>) -> Self {
        AutoConnect { wanted, requested: false }
    }

    fn next(&mut self, previous: &SessionSnapshot, snapshot: &SessionSnapshot) -> Option<DeviceId> {
        // a rejected request shows up as a new error
        if snapshot.state.is_linked() || snapshot.last_error != previous.last_error {
            self.requested = false;
        }

        if snapshot.state != ConnectionState::Scanning || self.requested {
            return None;
        }

        let id = pick_device(snapshot, &self.wanted)?;
        self.requested = true;
        Some(id)
    }
}

fn log_snapshot(snapshot: &SessionSnapshot) {
    let zones = snapshot.zones.iter()
        .map(|zone| format!("{}={} {:?} {}", zone.zone, zone.magnitude, zone.severity, zone.color))
        .collect::<Vec<_>>()
        .join(", ");

    info!("{}", zones);
}

async fn monitor(
    connection: ConnectionConfig,
    mode: ClassifierMode,
    wanted: Option<DeviceId>,
    command: Option<String>,
) -> Result<(), AppRunError> {
    let cancel = CancellationToken::new();
    let mut handle = spawn_session(connection, mode, cancel.clone());
    let mut updates = handle.subscribe();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut auto_connect = AutoConnect::new(wanted);
    let mut command_sent = false;
    let mut previous = SessionSnapshot::default();

    'mainloop: loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                break 'mainloop;
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    break 'mainloop;
                }
            },
        }

        let snapshot = updates.borrow_and_update().clone();

        if snapshot.state != previous.state {
            info!("Insole is {}", snapshot.state);
        }
        if snapshot.last_error != previous.last_error {
            if let Some(err) = &snapshot.last_error {
                warn!("{}", err);
            }
        }
        if snapshot.fall && !previous.fall {
            error!("FALL DETECTED: notify the emergency contact");
        }
        if snapshot.reading.is_some() && snapshot.reading != previous.reading {
            log_snapshot(&snapshot);
        }

        if let Some(id) = auto_connect.next(&previous, &snapshot) {
            handle.request(SessionControl::Connect(id)).await?;
        }

        if snapshot.state != ConnectionState::Connected {
            command_sent = false;
        } else if !command_sent {
            if let Some(text) = &command {
                handle.request(SessionControl::Send(text.clone())).await?;
            }
            command_sent = true;
        }

        previous = snapshot;
    }

    // the session task closes the link on its way out
    cancel.cancel();
    handle.join().await?;
    Ok(())
}
