//! Operator commands read from stdin

use std::str::FromStr;

use thiserror::Error;

use premium_core::DomesticExchange;

pub const HELP: &str = "commands: switch <bithumb|upbit|coinone>, show, status, help, quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Switch(DomesticExchange),
    Show,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("usage: switch <bithumb|upbit|coinone>")]
    MissingExchange,

    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),

    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CommandError::Unknown(String::new()));
        };

        match verb.to_ascii_lowercase().as_str() {
            "switch" | "s" => {
                let name = words.next().ok_or(CommandError::MissingExchange)?;
                name.parse::<DomesticExchange>()
                    .map(Command::Switch)
                    .map_err(|_| CommandError::UnknownExchange(name.to_string()))
            }
            "show" | "table" => Ok(Command::Show),
            "status" | "stats" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}
