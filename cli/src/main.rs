//! chainwatch CLI: read the chain tip and watch signatures from the terminal.
//!
//! Usage:
//! ```bash
//! # Current slot over HTTP, with retry
//! chainwatch tip --url https://api.mainnet-beta.solana.com --retries 5
//!
//! # Watch a signature, failing over to a backup endpoint
//! chainwatch watch --primary wss://a.example --backup wss://b.example --signature <SIG>
//! ```

mod logging;

use std::env;
use std::process;

use anyhow::{bail, Context, Result};

use chainwatch_core::policy::RetryConfig;
use chainwatch_http::{HttpClientConfig, HttpRpcClient};
use chainwatch_ws::{ClientConfig, FailoverClient};

use crate::logging::{init_tracing, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    init_tracing(&LogConfig::from_env());

    let result = match args[1].as_str() {
        "tip" => cmd_tip(&args[2..]).await,
        "watch" => cmd_watch(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainwatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Chain tip and signature watching with retry and failover\n");
    println!("USAGE:");
    println!("    chainwatch <COMMAND>\n");
    println!("COMMANDS:");
    println!("    tip        Print the current slot from an HTTP endpoint");
    println!("    watch      Subscribe to a signature and print notifications");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("TIP FLAGS:");
    println!("    --url <URL>        HTTP RPC endpoint  [required]");
    println!("    --retries <N>      Retries after the first attempt  [default: 3]");
    println!("    --min-ms <MS>      First backoff delay  [default: 100]");
    println!("    --max-ms <MS>      Backoff ceiling  [default: 10000]\n");
    println!("WATCH FLAGS:");
    println!("    --primary <URL>    Primary WebSocket endpoint");
    println!("    --backup <URL>     Backup WebSocket endpoint");
    println!("    --signature <SIG>  Transaction signature to watch  [required]");
    println!("    --config <FILE>    JSON client config (flags override it)\n");
    println!("ENVIRONMENT:");
    println!("    CHAINWATCH_PRIMARY_URL, CHAINWATCH_BACKUP_URL  Endpoints for `watch`");
    println!("    CHAINWATCH_LOG_JSON=1                          JSON log output");
    println!("    RUST_LOG                                       Log filter");
}

async fn cmd_tip(args: &[String]) -> Result<()> {
    let url = parse_flag(args, "--url").context("--url is required")?;
    let defaults = RetryConfig::default();
    let retries = parse_num(args, "--retries")?.unwrap_or(defaults.retries as u64);
    let min_ms = parse_num(args, "--min-ms")?.unwrap_or(defaults.min_timeout.as_millis() as u64);
    let max_ms = parse_num(args, "--max-ms")?.unwrap_or(defaults.max_timeout.as_millis() as u64);

    let retries = u32::try_from(retries).context("--retries is out of range")?;
    let config = HttpClientConfig {
        retry: RetryConfig::from_millis(retries, min_ms, max_ms),
        ..HttpClientConfig::default()
    };
    let client = HttpRpcClient::new(&url, config)?;

    let start = std::time::Instant::now();
    let slot = client.latest_slot().await?;

    println!("  Endpoint: {url}");
    println!("  Slot:     {slot}");
    println!("  Latency:  {}ms", start.elapsed().as_millis());
    Ok(())
}

async fn cmd_watch(args: &[String]) -> Result<()> {
    let signature = parse_flag(args, "--signature").context("--signature is required")?;
    let config = watch_config(args)?;
    config.validate()?;

    let client = FailoverClient::new(config);
    let role = client.connect().await?;
    println!("Connected to {role} endpoint");

    let mut subscription = client.subscribe(signature.as_str()).await?;
    println!("Watching {signature} ({})", subscription.handle());

    let mut state = client.watch_state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = subscription.next_event() => match event {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => bail!("subscription for {signature} ended"),
            },
            changed = state.changed() => {
                if changed.is_err() {
                    bail!("client stopped");
                }
                let current = *state.borrow_and_update();
                println!("State: {current}");
                if current.is_offline() {
                    tracing::warn!(state = %current, "no endpoint left to serve {signature}");
                    bail!("all endpoints unavailable");
                }
            }
            _ = &mut ctrl_c => {
                println!("Interrupted, disconnecting");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

/// `--config` file, else the environment, then flag overrides.
fn watch_config(args: &[String]) -> Result<ClientConfig> {
    let primary = parse_flag(args, "--primary");
    let mut config = match parse_flag(args, "--config") {
        Some(path) => ClientConfig::from_json_file(&path)
            .with_context(|| format!("loading {path}"))?,
        None => match &primary {
            Some(url) => ClientConfig::new(url.as_str()),
            None => ClientConfig::from_env()
                .context("--primary or CHAINWATCH_PRIMARY_URL is required")?,
        },
    };
    if let Some(url) = primary {
        config.primary_url = url;
    }
    if let Some(url) = parse_flag(args, "--backup") {
        config.backup_url = Some(url);
    }
    Ok(config)
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_num(args: &[String], flag: &str) -> Result<Option<u64>> {
    parse_flag(args, flag)
        .map(|v| v.parse::<u64>().with_context(|| format!("{flag} expects a number, got {v:?}")))
        .transpose()
}
