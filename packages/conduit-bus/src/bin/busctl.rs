//! busctl: loads a bus definition and feeds control expressions from stdin
//! to its control channel, printing each reply as JSON.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use conduit_bus::{DispatchError, GatewayConfig, Wiring};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Drive a conduit bus through its control channel.
#[derive(Parser, Debug)]
#[command(name = "busctl")]
#[command(version)]
struct Cli {
    /// Path to the bus definition (JSON).
    #[arg(short, long, value_name = "FILE", env = "CONDUIT_CONFIG")]
    config: String,

    /// Channel the expressions are sent to.
    #[arg(long, default_value = "control")]
    control_channel: String,

    /// How long to wait for each reply.
    #[arg(long, default_value_t = 500)]
    reply_timeout_ms: u64,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }

    let bus = Wiring::from_path(&cli.config)?.build()?;
    bus.start().await?;
    info!(config = %cli.config, channel = %cli.control_channel, "bus ready");

    let gateway = bus.gateway(&cli.control_channel)?;
    let config = GatewayConfig {
        reply_timeout: Duration::from_millis(cli.reply_timeout_ms),
        ..gateway.config().clone()
    };
    let gateway = gateway.with_config(config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        };
        let Some(line) = line else { break };
        let expression = line.trim();
        if expression.is_empty() {
            continue;
        }

        match gateway.request(expression).await {
            Ok(reply) => {
                let json = serde_json::Value::from(reply.payload().clone());
                println!("{json}");
            }
            Err(DispatchError::GatewayTimeout { .. }) => println!("(no reply)"),
            Err(e) => error!(expression = %expression, error = %e, "request failed"),
        }
    }

    bus.stop().await;
    Ok(())
}
