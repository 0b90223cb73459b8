//! Interactive terminal session
//!
//! Reads tasks line by line and prints responses as they arrive, while the
//! prompt stays usable.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::client::{AutoGlmClient, ClientEvent, ConnectionState, ResponseRecord};
use crate::error::Result;

const PROMPT: &str = "> ";

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Quit,
    Help,
    Empty,
    Task(String),
}

impl ChatCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_lowercase().as_str() {
            "" => ChatCommand::Empty,
            "quit" | "exit" | "q" => ChatCommand::Quit,
            "help" | "h" => ChatCommand::Help,
            _ => ChatCommand::Task(line.to_string()),
        }
    }
}

/// Connect, print the banner and run the session on stdin/stdout
pub async fn run(client: &AutoGlmClient) -> Result<()> {
    info!(url = %client.url(), "Connecting to AutoGLM");
    client.connect().await?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    print_banner(&mut stdout)?;

    let result = tokio::select! {
        res = run_session(client, stdin, &mut stdout) => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    client.shutdown().await;
    writeln!(stdout, "\nGoodbye!")?;
    result
}

fn print_banner<W: Write>(out: &mut W) -> Result<()> {
    writeln!(out, "\n{}", "=".repeat(50))?;
    writeln!(out, "AutoGLM WebSocket Client")?;
    writeln!(out, "{}", "=".repeat(50))?;
    writeln!(out, "\nType your task to send to AutoGLM, or 'quit' to exit.")?;
    writeln!(out, "Type 'help' for the list of commands.\n")?;
    write!(out, "{}", PROMPT)?;
    out.flush()?;
    Ok(())
}

fn print_help<W: Write>(out: &mut W) -> Result<()> {
    writeln!(out, "\nAvailable commands:")?;
    writeln!(out, "  quit/exit/q  - Exit the client")?;
    writeln!(out, "  help/h       - Show this help message")?;
    writeln!(out, "\nAnything else is sent to AutoGLM as a task.")?;
    Ok(())
}

fn print_response<W: Write>(out: &mut W, record: &ResponseRecord) -> Result<()> {
    writeln!(out, "\n[{}] {}", record.msg_type, record.data)?;
    Ok(())
}

/// Drive one session until quit, EOF, shutdown or terminal failure.
/// A terminal failure is returned as an error.
pub async fn run_session<R, W>(client: &AutoGlmClient, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut events = client.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match ChatCommand::parse(&line) {
                    ChatCommand::Quit => break,
                    ChatCommand::Help => print_help(out)?,
                    ChatCommand::Empty => {}
                    ChatCommand::Task(task) => match client.send(&task).await {
                        Ok(receipt) => writeln!(out, "Sent (task id {})", receipt.msg_id)?,
                        Err(e) => {
                            warn!(error = %e, "Failed to send task");
                            writeln!(out, "Failed to send task: {}", e)?;
                        }
                    },
                }
            }

            event = events.recv() => {
                match event {
                    Ok(ClientEvent::Response(record)) => print_response(out, &record)?,
                    Ok(ClientEvent::Failed(reason)) => {
                        writeln!(out, "\nError: {}", reason)?;
                        return Err(reason.to_error());
                    }
                    Ok(ClientEvent::StateChanged(ConnectionState::Disconnected)) => {
                        writeln!(out, "\nConnection lost, reconnecting...")?;
                    }
                    Ok(ClientEvent::StateChanged(ConnectionState::Connected)) => {
                        writeln!(out, "\nReconnected.")?;
                    }
                    Ok(ClientEvent::StateChanged(ConnectionState::ShutDown)) => break,
                    Ok(ClientEvent::StateChanged(_)) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Terminal fell behind the response stream");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }

        write!(out, "{}", PROMPT)?;
        out.flush()?;
    }

    Ok(())
}
