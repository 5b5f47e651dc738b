// SPDX-License-Identifier: BSD-3-Clause

//! Parses the operator console's one-command-per-line text surface. The console never touches
//! engine state directly; the binary dispatches a parsed [`ConsoleCommand`] to the same
//! queue/engine API the receive loop uses.

use ring_protocol::BROADCAST;

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send { destination: String, payload: String },
    Broadcast { payload: String },
    Status,
    Queue,
    Token,
    Logs,
    Help,
    Quit,
}

/// Parses one line of console input. Returns a human-readable error message for anything that
/// isn't a recognized command, suitable for echoing straight back to the operator.
pub fn parse_line(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("empty command".to_string());
    }

    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r.trim_start()),
        None => (line, ""),
    };

    match verb {
        "send" => {
            let (destination, payload) = rest
                .split_once(' ')
                .ok_or_else(|| "usage: send <destination> <payload>".to_string())?;
            if destination.is_empty() {
                return Err("destination must not be empty".to_string());
            }
            Ok(ConsoleCommand::Send {
                destination: destination.to_string(),
                payload: payload.to_string(),
            })
        }
        "broadcast" => {
            if rest.is_empty() {
                return Err("usage: broadcast <payload>".to_string());
            }
            Ok(ConsoleCommand::Broadcast { payload: rest.to_string() })
        }
        "status" => Ok(ConsoleCommand::Status),
        "queue" => Ok(ConsoleCommand::Queue),
        "token" => Ok(ConsoleCommand::Token),
        "logs" => Ok(ConsoleCommand::Logs),
        "help" => Ok(ConsoleCommand::Help),
        "quit" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command '{other}'; try 'help'")),
    }
}

/// The destination a `broadcast` command's payload should be enqueued under.
pub const BROADCAST_DESTINATION: &str = BROADCAST;

pub const HELP_TEXT: &str = "\
send <destination> <payload>   enqueue a unicast message
broadcast <payload>             enqueue a message to every node
status                           show engine counters and state
queue                           show queued messages
token                           force one-shot token generation
logs                             show recent log lines
help                             show this text
quit                             shut down this node";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_spaces_in_payload() {
        let cmd = parse_line("send Bob hello there friend").unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Send {
                destination: "Bob".to_string(),
                payload: "hello there friend".to_string(),
            }
        );
    }

    #[test]
    fn parses_broadcast() {
        let cmd = parse_line("broadcast hi everyone").unwrap();
        assert_eq!(cmd, ConsoleCommand::Broadcast { payload: "hi everyone".to_string() });
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_line("status").unwrap(), ConsoleCommand::Status);
        assert_eq!(parse_line("queue").unwrap(), ConsoleCommand::Queue);
        assert_eq!(parse_line("token").unwrap(), ConsoleCommand::Token);
        assert_eq!(parse_line("logs").unwrap(), ConsoleCommand::Logs);
        assert_eq!(parse_line("help").unwrap(), ConsoleCommand::Help);
        assert_eq!(parse_line("quit").unwrap(), ConsoleCommand::Quit);
    }

    #[test]
    fn rejects_unknown_and_malformed_commands() {
        assert!(parse_line("frobnicate").is_err());
        assert!(parse_line("send Bob").is_err());
        assert!(parse_line("broadcast").is_err());
        assert!(parse_line("").is_err());
    }
}
