//! tickwire - stream market data to stdout
//!
//! Run with: cargo run -p tickwire-cli -- subscribe AAPL
//!
//! The token is read from `TICKWIRE_TOKEN` (or `KEY`), optionally loaded from
//! a `.env` file.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;
use std::time::Duration;
use tickwire_types::{FeedError, MarketEvent};
use tickwire_ws::{ClientConfig, Credentials, FeedClient, FnSink, SinkOptions, DEFAULT_URL};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code for a token the provider refused
const EXIT_AUTH_FATAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "tickwire", author, version, about)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream trades and quotes for one or more symbols
    Subscribe(SubscribeArgs),
}

#[derive(Args, Debug)]
struct SubscribeArgs {
    /// Symbols to stream (e.g. AAPL, BINANCE:BTCUSDT)
    #[arg(required = true, value_name = "SYMBOL")]
    symbols: Vec<String>,

    /// Upper bound on the reconnect delay, in seconds
    #[arg(long, value_name = "SECS")]
    reconnect_max_delay: Option<u64>,

    /// Websocket endpoint
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,

    /// Print heartbeats too
    #[arg(long)]
    heartbeats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    load_dotenv();

    if let Err(err) = init_logging(&cli.log_level) {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Subscribe(args) => subscribe(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "Exiting");
            eprintln!("Error: {err:#}");
            exit_code(&err)
        }
    }
}

/// Initialize tracing/logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level {level:?}"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load .env file if present; a missing file is not an error.
fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

async fn subscribe(args: SubscribeArgs) -> Result<()> {
    let credentials = Credentials::from_env().context("Loading API token")?;
    let config = build_config(&args);
    let client = FeedClient::websocket(config, credentials).context("Invalid configuration")?;

    let options = SinkOptions::new(client.config().sink_capacity)
        .with_policy(client.config().overflow_policy)
        .with_heartbeats(args.heartbeats);
    client.register_sink_with(
        FnSink::new(|event| println!("{}", format_event(&event))),
        options,
    );

    for symbol in &args.symbols {
        client
            .subscribe(symbol)
            .with_context(|| format!("Invalid symbol {symbol:?}"))?;
    }

    info!(symbols = ?args.symbols, url = %client.config().url, "Starting");
    let mut task = client.start()?;

    let joined = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Installing Ctrl-C handler")?;
            info!("Interrupted, stopping");
            client.stop();
            task.await
        }
    };

    joined.context("Client task failed")??;
    Ok(())
}

fn build_config(args: &SubscribeArgs) -> ClientConfig {
    let mut config = ClientConfig::new().with_url(&args.url);

    if let Some(secs) = args.reconnect_max_delay {
        let max = Duration::from_secs(secs);
        let initial = config.backoff.initial_delay.min(max);
        let backoff = config
            .backoff
            .clone()
            .with_initial_delay(initial)
            .with_max_delay(max);
        config = config.with_backoff(backoff);
    }

    config
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<FeedError>() {
        Some(FeedError::AuthFatal { .. }) => ExitCode::from(EXIT_AUTH_FATAL),
        _ => ExitCode::FAILURE,
    }
}

fn format_event(event: &MarketEvent) -> String {
    match event {
        MarketEvent::Trade {
            symbol,
            price,
            size,
            ts,
            ..
        } => format!("{} TRADE {} {} x {}", ts.to_rfc3339(), symbol, price, size),
        MarketEvent::Quote {
            symbol,
            bid_price,
            bid_size,
            ask_price,
            ask_size,
            ts,
        } => format!(
            "{} QUOTE {} {} x {} / {} x {}",
            ts.to_rfc3339(),
            symbol,
            bid_price,
            bid_size,
            ask_price,
            ask_size
        ),
        MarketEvent::Error { code, message } => match code {
            Some(code) => format!("ERROR [{}] {}", code, message),
            None => format!("ERROR {}", message),
        },
        MarketEvent::Heartbeat => "HEARTBEAT".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tickwire_types::InboundFrame;

    fn subscribe_args(argv: &[&str]) -> SubscribeArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Command::Subscribe(args) => args,
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subscribe() {
        let args = subscribe_args(&["tickwire", "subscribe", "AAPL", "--reconnect-max-delay=8"]);
        assert_eq!(args.symbols, vec!["AAPL"]);
        assert_eq!(args.reconnect_max_delay, Some(8));
        assert_eq!(args.url, DEFAULT_URL);
        assert!(!args.heartbeats);

        let config = build_config(&args);
        assert_eq!(config.backoff.max_delay, Duration::from_secs(8));
        assert_eq!(config.backoff.initial_delay, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_subscribe_requires_symbol() {
        assert!(Cli::try_parse_from(["tickwire", "subscribe"]).is_err());
    }

    #[test]
    fn test_small_max_delay_lowers_initial() {
        let args = subscribe_args(&[
            "tickwire",
            "subscribe",
            "AAPL",
            "MSFT",
            "--reconnect-max-delay",
            "0",
        ]);
        let config = build_config(&args);
        // Zero is rejected by validation rather than silently adjusted
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exit_codes() {
        let fatal = anyhow::Error::new(FeedError::AuthFatal {
            code: None,
            message: "Invalid API key".into(),
        })
        .context("Client task failed");
        assert_eq!(
            format!("{:?}", exit_code(&fatal)),
            format!("{:?}", ExitCode::from(EXIT_AUTH_FATAL))
        );

        let other = anyhow::Error::new(FeedError::ReconnectExhausted { attempts: 3 });
        assert_eq!(
            format!("{:?}", exit_code(&other)),
            format!("{:?}", ExitCode::FAILURE)
        );
    }

    #[test]
    fn test_format_events() {
        let frame = InboundFrame::parse(
            r#"{"type":"trade","data":[{"s":"AAPL","p":189.5,"v":10,"t":1700000000000}]}"#,
        )
        .unwrap();
        let events = frame.into_events();
        assert_eq!(
            format_event(&events[0]),
            "2023-11-14T22:13:20+00:00 TRADE AAPL 189.5 x 10"
        );

        let error = MarketEvent::Error {
            code: Some("429".into()),
            message: "slow down".into(),
        };
        assert_eq!(format_event(&error), "ERROR [429] slow down");
        assert_eq!(format_event(&MarketEvent::Heartbeat), "HEARTBEAT");
    }
}
