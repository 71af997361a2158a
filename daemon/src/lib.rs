//! Relaycast daemon: wires the broadcast store, hardware and relay services
//! into the engine and runs a line based operator console on stdin.

mod commands;
mod settings;

pub use commands::{parse, ConsoleCommand, USAGE};
pub use settings::{DaemonSettings, VariableSeed, CONFIG_ENV};

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaycast_engine::{create_engine, Services};
use relaycast_forward::RelayClient;
use relaycast_hardware::{HardwarePowerSequencer, HeartbeatMonitor, MemoryVariables};
use relaycast_ipc::{
    command_channel, event_channel, BroadcastStore, EngineCommand, EngineEvent, MemoryStore,
};

/// Initialize logging. Engine events go to stdout, so logs go to stderr.
fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "relaycast=info,relaycast_lib=info,relaycast_engine=debug,relaycast_forward=info,relaycast_hardware=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Runs the daemon until `quit` or the end of stdin.
pub fn run() -> anyhow::Result<()> {
    init_logging();
    info!("Relaycast starting");

    let settings = DaemonSettings::from_args(std::env::args().skip(1))?;

    let store = match &settings.store_path {
        Some(path) => Arc::new(
            MemoryStore::open(path)
                .with_context(|| format!("opening broadcast store {}", path.display()))?,
        ),
        None => {
            warn!("No store path configured, broadcasts are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    info!(broadcasts = store.list()?.len(), "Loaded broadcasts");

    let variables = Arc::new(MemoryVariables::new());
    for seed in &settings.variables {
        variables.define(seed.site_key, seed.name.clone(), seed.value.clone());
    }
    let monitor = Arc::new(HeartbeatMonitor::new(settings.heartbeat_window()));

    let services = Services {
        store: store.clone(),
        forwarder: Arc::new(RelayClient::new(store, &settings.engine)?),
        sequencer: Arc::new(HardwarePowerSequencer::new(variables)),
        devices: monitor.clone(),
    };

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let engine_settings = settings.engine.clone();
    let engine_thread = thread::Builder::new()
        .name("engine".to_string())
        .spawn(move || {
            let mut engine = create_engine(command_rx, event_tx, services, engine_settings);
            engine.run();
        })?;
    let printer = thread::Builder::new()
        .name("events".to_string())
        .spawn(move || print_events(event_rx))?;

    console(io::stdin().lock(), &command_tx, &monitor)?;

    info!("Shutting down");
    if command_tx.send(EngineCommand::Shutdown).is_err() {
        warn!("Engine already stopped");
    }
    if engine_thread.join().is_err() {
        error!("Engine thread panicked");
    }
    if printer.join().is_err() {
        error!("Event printer panicked");
    }

    info!("Relaycast stopped");
    Ok(())
}

/// Reads commands until `quit` or the end of input.
fn console(
    input: impl BufRead,
    command_tx: &Sender<EngineCommand>,
    monitor: &HeartbeatMonitor,
) -> anyhow::Result<()> {
    for line in input.lines() {
        let line = line.context("reading console input")?;

        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let engine_command = match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Heartbeat(mac) => {
                monitor.heartbeat(&mac);
                continue;
            }
            ConsoleCommand::UploadSlate { broadcast, path } => {
                match commands::upload_slate(broadcast, &path) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{e:#}");
                        continue;
                    }
                }
            }
            ConsoleCommand::Engine(command) => command,
        };

        command_tx
            .send(engine_command)
            .context("engine stopped accepting commands")?;
    }
    Ok(())
}

/// Prints engine events as JSON lines until the engine drops its sender.
fn print_events(events: Receiver<EngineEvent>) {
    let stdout = io::stdout();
    for event in events {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Could not serialize event");
                continue;
            }
        };
        let mut out = stdout.lock();
        if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycast_hardware::DeviceStatus;
    use std::io::Cursor;
    use std::time::Duration;

    #[test]
    fn test_console_forwards_commands_until_quit() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let monitor = HeartbeatMonitor::new(Duration::from_secs(60));
        let input = Cursor::new("start p1\n\nbogus\nheartbeat 0a:1b:2c:3d:4e:5f\nstop p1\nquit\nstart p2\n");

        console(input, &tx, &monitor).unwrap();

        let sent: Vec<EngineCommand> = rx.try_iter().collect();
        assert_eq!(
            sent,
            vec![
                EngineCommand::Start {
                    broadcast: "p1".to_string()
                },
                EngineCommand::Stop {
                    broadcast: "p1".to_string()
                },
            ]
        );
        assert!(monitor.is_up("0A:1B:2C:3D:4E:5F").unwrap());
    }

    #[test]
    fn test_console_skips_unreadable_slate() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let monitor = HeartbeatMonitor::new(Duration::from_secs(60));
        let input = Cursor::new("upload-slate p1 /nonexistent/night.png\n");

        console(input, &tx, &monitor).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
