//! Operator console commands.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use relaycast_ipc::EngineCommand;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Forwarded to the engine as is.
    Engine(EngineCommand),

    /// Reads a file and uploads it as the broadcast's slate.
    UploadSlate { broadcast: String, path: PathBuf },

    /// A device reports it is up.
    Heartbeat(String),

    /// Shut the engine down and exit.
    Quit,
}

/// Help text printed for unknown commands.
pub const USAGE: &str = "commands: start|stop|slate|healthy|unhealthy|reset|status <id>, \
                         upload-slate <id> <path>, heartbeat <mac>, quit";

/// Parses one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> anyhow::Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match verb {
        "quit" | "exit" => {
            expect_args(verb, &args, 0)?;
            ConsoleCommand::Quit
        }
        "heartbeat" => {
            expect_args(verb, &args, 1)?;
            ConsoleCommand::Heartbeat(args[0].to_string())
        }
        "upload-slate" => {
            expect_args(verb, &args, 2)?;
            ConsoleCommand::UploadSlate {
                broadcast: args[0].to_string(),
                path: PathBuf::from(args[1]),
            }
        }
        _ => {
            expect_args(verb, &args, 1)?;
            ConsoleCommand::Engine(engine_command(verb, args[0].to_string())?)
        }
    };

    Ok(Some(command))
}

fn engine_command(verb: &str, broadcast: String) -> anyhow::Result<EngineCommand> {
    let command = match verb {
        "start" => EngineCommand::Start { broadcast },
        "stop" => EngineCommand::Stop { broadcast },
        "slate" => EngineCommand::Slate { broadcast },
        "healthy" => EngineCommand::ReportHealth {
            broadcast,
            healthy: true,
        },
        "unhealthy" => EngineCommand::ReportHealth {
            broadcast,
            healthy: false,
        },
        "reset" => EngineCommand::ResetStates { broadcast },
        "status" => EngineCommand::GetStatus { broadcast },
        other => bail!("unknown command '{other}'; {USAGE}"),
    };
    Ok(command)
}

fn expect_args(verb: &str, args: &[&str], count: usize) -> anyhow::Result<()> {
    if args.len() != count {
        bail!("'{verb}' takes {count} argument(s), got {}", args.len());
    }
    Ok(())
}

/// Builds the engine command for a slate upload, naming the asset after the file.
pub fn upload_slate(broadcast: String, path: &Path) -> anyhow::Result<EngineCommand> {
    let data =
        std::fs::read(path).with_context(|| format!("reading slate {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("slate path has no file name")?;

    Ok(EngineCommand::UploadSlate {
        broadcast,
        name,
        data,
    })
}
