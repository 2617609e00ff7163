//! Interactive commands
//!
//! Parses user input into commands and runs the foreground command loop.
//! Malformed input is reported locally and never reaches the server.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::ChatClient;
use crate::error::{ClientError, CommandError};
use crate::message::{Message, Status};
use crate::types::UserId;

/// A parsed user command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `register <username>`
    Register(UserId),
    /// `login <username>`
    Login(UserId),
    /// `logoff`
    Logoff,
    /// `@<username> <message text>`
    Send { to: UserId, text: String },
}

impl Command {
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut words = input.split_whitespace();
        let Some(head) = words.next() else {
            return Err(CommandError::UnknownCommand(String::new()));
        };

        if let Some(receiver) = head.strip_prefix('@') {
            let text = input[head.len()..].trim();
            if receiver.is_empty() || text.is_empty() {
                return Err(CommandError::InvalidSendArgs);
            }
            return Ok(Command::Send {
                to: UserId::from(receiver),
                text: text.to_string(),
            });
        }

        let args: Vec<&str> = words.collect();
        match (head, args.as_slice()) {
            ("register", [user]) => Ok(Command::Register(UserId::from(*user))),
            ("register", _) => Err(CommandError::InvalidRegisterArgs),
            ("login", [user]) => Ok(Command::Login(UserId::from(*user))),
            ("login", _) => Err(CommandError::InvalidLoginArgs),
            ("logoff", []) => Ok(Command::Logoff),
            ("logoff", _) => Err(CommandError::InvalidLogoffArgs),
            _ => Err(CommandError::UnknownCommand(head.to_string())),
        }
    }
}

fn print_reply(reply: &Message) {
    match reply.status {
        Some(Status::Ok) => println!("{}", reply.text_or_empty()),
        Some(Status::RequestQueued) => println!("{}", reply.text_or_empty()),
        _ => eprintln!("Error: {}", reply.text_or_empty()),
    }
}

/// Forward standard input lines from a dedicated thread
///
/// A plain thread keeps a blocked read from holding up runtime shutdown
/// once the loop has ended. The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
        debug!("Input reader stopped");
    });
    rx
}

/// Read commands until input ends or the connection drops
///
/// Every command blocks until its reply arrives or the response timeout
/// expires. Local and application errors are printed and the loop goes
/// on; connection errors end it.
pub async fn run_command_loop(
    client: &mut ChatClient,
    mut lines: mpsc::Receiver<String>,
) -> Result<(), ClientError> {
    let state = Arc::clone(client.state());

    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = state.wait_disconnected() => {
                eprintln!("Connection to server lost");
                return Ok(());
            }
        };

        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match client.execute(command).await {
            Ok(reply) => print_reply(&reply),
            Err(ClientError::Command(e)) => eprintln!("{}", e),
            Err(e @ (ClientError::NoResponse(_) | ClientError::Busy)) => eprintln!("{}", e),
            Err(e) => {
                eprintln!("{}", e);
                return Err(e);
            }
        }
    }
}
