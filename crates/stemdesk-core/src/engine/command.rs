//! Line-oriented command surface
//!
//! Parses operator input such as `pause drums` into a [`DeskCommand`] and
//! renders the result of running it as a [`CommandOutcome`].
//!
//! ```ignore
//! let cmd: DeskCommand = "resume vocals".parse()?;
//! let outcome = desk.dispatch(cmd);
//! println!("{}", outcome);
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::desk::InstrumentStatus;
use super::error::DeskError;

/// Help line printed by front ends
pub const COMMAND_HELP: &str = "Commands: pause <name> | resume <name> | status | quit";

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeskCommand {
    Pause(String),
    Resume(String),
    Status,
    Quit,
}

/// Why a line could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("Empty command")]
    Empty,

    #[error("'{0}' needs an instrument name")]
    MissingName(String),

    #[error("Unknown command: '{0}'")]
    Unknown(String),
}

impl FromStr for DeskCommand {
    type Err = CommandParseError;

    /// Verbs are case-insensitive, names are taken verbatim, and tokens
    /// after the expected arguments are ignored.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or(CommandParseError::Empty)?;
        let verb_lower = verb.to_lowercase();

        match verb_lower.as_str() {
            "pause" | "resume" => {
                let name = tokens
                    .next()
                    .ok_or_else(|| CommandParseError::MissingName(verb_lower.clone()))?
                    .to_string();
                if verb_lower == "pause" {
                    Ok(DeskCommand::Pause(name))
                } else {
                    Ok(DeskCommand::Resume(name))
                }
            }
            "status" => Ok(DeskCommand::Status),
            "quit" | "exit" => Ok(DeskCommand::Quit),
            _ => Err(CommandParseError::Unknown(verb.to_string())),
        }
    }
}

/// Result of dispatching a command to the desk
#[derive(Debug)]
pub enum CommandOutcome {
    Paused(String),
    Resumed(String),
    Status(Vec<InstrumentStatus>),
    /// The caller should tear the desk down and exit
    Quit,
    Failed(DeskError),
}

impl CommandOutcome {
    pub fn is_quit(&self) -> bool {
        matches!(self, CommandOutcome::Quit)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CommandOutcome::Failed(_))
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Paused(name) => write!(f, "Instrument '{}' paused.", name),
            CommandOutcome::Resumed(name) => write!(f, "Instrument '{}' resumed.", name),
            CommandOutcome::Status(statuses) if statuses.is_empty() => {
                write!(f, "(no instruments)")
            }
            CommandOutcome::Status(statuses) => {
                for (i, status) in statuses.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", status)?;
                }
                Ok(())
            }
            CommandOutcome::Quit => write!(f, "Stopping all instruments..."),
            CommandOutcome::Failed(err) => write!(f, "{}", err),
        }
    }
}
