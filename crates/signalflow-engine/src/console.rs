//! Operator commands read line by line from standard input.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pause` | Pause the tick loop |
//! | `resume` | Resume the tick loop |
//! | `speed <ms>` | Set the real-time delay between ticks |
//! | `status` | Log the current run status |
//! | `stop` | Stop after the current tick |
//!
//! Stdin is read on a plain thread so a pending read never holds up
//! runtime shutdown; lines are handed to an async task over a channel.

use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;

use signalflow_core::operator::OperatorState;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Lines buffered between the reader thread and the command task.
const COMMAND_BUFFER: usize = 16;

/// One operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Pause the tick loop.
    Pause,
    /// Resume the tick loop.
    Resume,
    /// Set the real-time delay between ticks, in milliseconds.
    Speed(u64),
    /// Log the current status.
    Status,
    /// Stop after the current tick.
    Stop,
}

/// A line that is not a valid command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Nothing but whitespace.
    #[error("empty command")]
    Empty,
    /// Not one of the known commands.
    #[error("unknown command {0:?} (expected pause, resume, speed <ms>, status, stop)")]
    Unknown(String),
    /// `speed` without a whole number of milliseconds.
    #[error("speed needs a whole number of milliseconds, got {0:?}")]
    BadSpeed(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CommandError::Empty);
        };
        match verb.to_ascii_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "status" => Ok(Self::Status),
            "stop" => Ok(Self::Stop),
            "speed" => {
                let arg = words.next().unwrap_or_default();
                arg.parse()
                    .ok()
                    .map(Self::Speed)
                    .ok_or_else(|| CommandError::BadSpeed(arg.to_owned()))
            }
            _ => Err(CommandError::Unknown(verb.to_owned())),
        }
    }
}

/// Carry out one command against the shared operator state.
pub async fn apply(command: Command, operator: &OperatorState) {
    match command {
        Command::Pause => {
            operator.pause();
            info!("Simulation paused by operator");
        }
        Command::Resume => {
            operator.resume();
            info!("Simulation resumed by operator");
        }
        Command::Speed(ms) => {
            let previous = operator.set_tick_interval_ms(ms);
            info!(previous_ms = previous, new_ms = ms, "Tick interval changed");
        }
        Command::Status => log_status(operator).await,
        Command::Stop => {
            operator.request_stop();
            info!("Stop requested by operator");
        }
    }
}

/// Log the operator status as one JSON field.
pub async fn log_status(operator: &OperatorState) {
    let status = operator.status().await;
    match serde_json::to_string(&status) {
        Ok(json) => info!(status = %json, "Run status"),
        Err(e) => warn!(error = %e, "Failed to serialize run status"),
    }
}

/// Start reading commands from stdin for the rest of the process.
pub fn spawn(operator: Arc<OperatorState>) {
    let (tx, mut rx) = mpsc::channel::<String>(COMMAND_BUFFER);

    let reader = std::thread::Builder::new()
        .name("operator-console".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = reader {
        warn!(error = %e, "Operator console unavailable");
        return;
    }

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            match line.parse::<Command>() {
                Ok(command) => apply(command, &operator).await,
                Err(CommandError::Empty) => {}
                Err(e) => warn!(error = %e, "Ignoring operator command"),
            }
        }
    });
    info!("Operator console ready (pause, resume, speed <ms>, status, stop)");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        assert_eq!("pause".parse(), Ok(Command::Pause));
        assert_eq!("  Resume ".parse(), Ok(Command::Resume));
        assert_eq!("speed 250".parse(), Ok(Command::Speed(250)));
        assert_eq!("status".parse(), Ok(Command::Status));
        assert_eq!("STOP".parse(), Ok(Command::Stop));
    }

    #[test]
    fn rejects_bad_lines() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "faster".parse::<Command>(),
            Err(CommandError::Unknown("faster".to_owned()))
        );
        assert_eq!(
            "speed".parse::<Command>(),
            Err(CommandError::BadSpeed(String::new()))
        );
        assert_eq!(
            "speed -5".parse::<Command>(),
            Err(CommandError::BadSpeed("-5".to_owned()))
        );
    }

    #[tokio::test]
    async fn commands_drive_the_operator_state() {
        let operator = OperatorState::new(0, 0);

        apply(Command::Pause, &operator).await;
        assert!(operator.is_paused());
        apply(Command::Resume, &operator).await;
        assert!(!operator.is_paused());

        apply(Command::Speed(400), &operator).await;
        assert_eq!(operator.tick_interval_ms(), 400);

        apply(Command::Status, &operator).await;
        apply(Command::Stop, &operator).await;
        assert!(operator.is_stop_requested());
        assert!(operator.status().await.stop_requested);
    }
}
