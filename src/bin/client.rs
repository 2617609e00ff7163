//! Chat Client - Entry Point
//!
//! Connects to the server, prints incoming text as it arrives, and runs
//! the command loop on standard input.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use session_chat::client::{run_command_loop, spawn_stdin_reader};
use session_chat::{ChatClient, ClientConfig, ClientEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Quiet by default so log lines do not interleave with the prompt
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("session_chat=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::parse();
    let (mut client, mut events) = ChatClient::connect(&config).await?;
    println!("Connected to {}", config.url());
    println!("Commands: register <username> | login <username> | logoff | @<username> <text>");

    // Print unsolicited traffic as soon as it arrives
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Text { from, text } => println!(" > {}: {}", from, text),
                ClientEvent::Promoted { text } => println!("{}", text),
                ClientEvent::Notice { text } => println!("{}", text),
                ClientEvent::Disconnected => break,
            }
        }
    });

    let result = run_command_loop(&mut client, spawn_stdin_reader()).await;

    client.shutdown().await;
    let _ = printer.await;

    result?;
    Ok(())
}
