//! Perform a version handshake with a bitcoin node.
//!
//! Defaults to a local regtest node:
//!
//! ```text
//! cargo run --example handshake -- --address localhost:18444 --network regtest
//! ```

use bitcoin_handshake::network::parse_network;
use bitcoin_handshake::user_agent::UserAgent;
use bitcoin_handshake::{SessionConfiguration, TcpSession, Verification};
use clap::Parser;
use log::LevelFilter;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address of the node, as host:port.
    #[arg(short, long, env = "ADDRESS", default_value = "localhost:18444")]
    address: String,

    /// Network of the node: mainnet, testnet, regtest or signet.
    #[arg(short, long, env = "NETWORK", default_value = "regtest")]
    network: String,

    /// Custom user agent (optional).
    #[arg(short, long)]
    user_agent: Option<String>,

    /// Dispatch messages with a foreign magic or a bad checksum.
    #[arg(long)]
    permissive: bool,

    /// Seconds to wait for each message, waits forever if unset.
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    let network = parse_network(&args.network)?;

    let mut configuration = SessionConfiguration::new();
    if let Some(user_agent) = args.user_agent {
        log::debug!("Using custom user agent: {user_agent}");
        configuration = configuration.with_user_agent(UserAgent::new(user_agent)?);
    }
    if args.permissive {
        configuration = configuration.with_verification(Verification::Permissive);
    }
    if let Some(secs) = args.read_timeout {
        configuration = configuration.with_read_timeout(Duration::from_secs(secs));
    }
    log::debug!("{configuration}");

    let session = TcpSession::connect(&args.address, network, configuration).await?;
    let reason = session
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await?;

    println!("Session with {} ended: {reason}", args.address);
    Ok(())
}
