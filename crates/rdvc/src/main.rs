#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use rdv_common::message::one_line;
use rdv_common::Message;
use rdvc::config::{ClientConfig, Cli};
use rdvc::{ConnStatus, Inbound, Signaling};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Line that ends the body of a message typed on stdin.
const END_OF_MESSAGE: &str = ".";

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_inbound(inbound: &Inbound) {
    println!(
        "{} {}",
        inbound.received_at.format("%H:%M:%S%.3f"),
        one_line(&inbound.message.serialize())
    );
}

/// Accumulates stdin lines into messages: a header line, then body lines
/// up to a line holding only `.`.
#[derive(Default)]
struct Composer {
    lines: Vec<String>,
}

impl Composer {
    fn push(&mut self, line: String) -> Option<String> {
        if line == END_OF_MESSAGE {
            if self.lines.is_empty() {
                return None;
            }
            let header = self.lines.remove(0);
            let body = std::mem::take(&mut self.lines).join("\n");
            return Some(format!("{header}\n{body}"));
        }
        if self.lines.is_empty() && line.trim().is_empty() {
            return None;
        }
        self.lines.push(line);
        None
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = ClientConfig::from(cli);

    let (signaling, mut inbox) = Signaling::connect(config)?;
    info!("signaling as {}", signaling.local_id());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut composer = Composer::default();

    loop {
        tokio::select! {
            inbound = inbox.recv() => {
                let Some(inbound) = inbound else { break };
                print_inbound(&inbound);
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let Some(raw) = composer.push(line) else { continue };
                match Message::parse(&raw) {
                    Ok(message) => signaling.send(message).await?,
                    Err(e) => warn!("not sent: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    // Let the manager flush queued messages before the runtime exits.
    let mut status = signaling.status_watch();
    drop(signaling);
    let stopped = tokio::time::timeout(Duration::from_secs(2), async {
        while *status.borrow_and_update() != ConnStatus::Stopped {
            if status.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    if stopped.is_err() {
        warn!("gave up waiting for the relay connection to close");
    }

    Ok(())
}
