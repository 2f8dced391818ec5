use std::error::Error;
use std::time::Duration;

use clap::Parser;
use jamp::prelude::*;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Call a method on a JAMP service", long_about = None)]
struct Cli {
    /// Server endpoint, e.g. ws://localhost:8080/jamp
    #[arg(short, long)]
    url: String,

    /// rpc, long-poll or websocket. Inferred from the URL scheme if omitted
    #[arg(short, long, value_parser = parse_transport)]
    transport: Option<TransportKind>,

    /// Seconds to wait for a result
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Fire-and-forget: don't wait for a result
    #[arg(long, conflicts_with = "listen")]
    send: bool,

    /// Append a listener argument and print its callbacks for this many
    /// seconds after the result arrives
    #[arg(long, value_name = "SECS")]
    listen: Option<u64>,

    /// Service address, e.g. /calculator
    address: String,

    /// Method name
    method: String,

    /// Arguments as JSON. Anything that doesn't parse is sent as a string
    args: Vec<String>,
}

fn parse_transport(s: &str) -> Result<TransportKind, String> {
    s.parse().map_err(|e: JampError| e.to_string())
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Prints every callback it receives.
struct Printer;

impl Listener for Printer {
    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), ListenerError> {
        println!("<- {method} {}", Value::Array(args));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);

    let mut builder = JampClient::builder()
        .url(cli.url.as_str())
        .client_config(ClientConfig {
            default_timeout: timeout,
            ..ClientConfig::default()
        });
    if let Some(kind) = cli.transport {
        builder = builder.transport(kind);
    }
    let client = builder.build()?;

    let values: Vec<Value> = cli.args.iter().map(|raw| parse_arg(raw)).collect();

    if cli.send {
        let id = client.send(&cli.address, &cli.method, values).await?;
        flush(&client, timeout).await?;
        info!(%id, "sent");
    } else {
        let mut args: Vec<Arg> = values.into_iter().map(Arg::from).collect();
        if cli.listen.is_some() {
            args.push(Arg::listener(Printer));
        }

        match client.call(&cli.address, &cli.method, args).await {
            Ok(result) => println!("{result}"),
            Err(e) => match e.remote_result() {
                Some(remote) => {
                    eprintln!("remote error: {remote}");
                    std::process::exit(1);
                }
                None => return Err(e.into()),
            },
        }

        if let Some(secs) = cli.listen {
            info!(secs, "listening for callbacks");
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
    }

    client.shutdown();
    Ok(())
}

/// Waits until the transport has acknowledged every outstanding send.
async fn flush(client: &JampClient, timeout: Duration) -> Result<(), JampError> {
    let deadline = tokio::time::Instant::now() + timeout;
    while client.stats().await?.pending > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!("send not acknowledged before timeout");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}
