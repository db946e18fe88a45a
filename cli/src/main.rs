//! fallbackrpc CLI: send requests through a ranked endpoint list and
//! inspect endpoint health from the terminal.
//!
//! Usage:
//! ```bash
//! # JSON-RPC call with failover from the first URL to the second
//! fallbackrpc call --url https://rpc-a.example.com --url https://rpc-b.example.com \
//!     --method eth_blockNumber
//!
//! # Raw POST of a JSON payload to a path on each endpoint
//! fallbackrpc request --url https://api-a.example.com --path /v1/simulate --data '{"tx":"..."}'
//!
//! # Probe every endpoint's /health and print the status table
//! FALLBACKRPC_URLS=https://a.example.com,https://b.example.com fallbackrpc health
//! ```

use std::env;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fallbackrpc_core::config::parse_header;
use fallbackrpc_core::{ClientConfig, EndpointHealth};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "request" => cmd_request(&args[2..]).await,
        "health" => cmd_health(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("fallbackrpc {}", env!("CARGO_PKG_VERSION"));
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

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    print!("{}", usage());
}

fn usage() -> String {
    format!(
        "fallbackrpc {version}
JSON-RPC client with retry, circuit breaking and endpoint failover

USAGE:
    fallbackrpc <COMMAND> [FLAGS]

COMMANDS:
    call       Send a JSON-RPC call (--method, optional --params JSON)
    request    POST a raw JSON payload (--path, --data JSON)
    health     Probe every endpoint and print its health
    version    Print version
    help       Print this help

ENDPOINT FLAGS:
    --url <URL>             Endpoint URL, repeat in priority order
    --timeout-ms <MS>       Per-attempt timeout
    --retries <N>           Attempts per endpoint
    --retry-delay-ms <MS>   Base backoff delay
    --cb-threshold <N>      Failures before an endpoint is isolated
    --cb-timeout-ms <MS>    Isolation cool-down
    --header <K=V>          Extra request header, repeatable

HEALTH FLAGS:
    --json                  Print endpoint health as JSON

Without --url, settings come from FALLBACKRPC_* environment variables.
",
        version = env!("CARGO_PKG_VERSION")
    )
}

async fn cmd_call(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").context("--method is required")?;
    let params = match parse_flag(args, "--params") {
        Some(raw) => serde_json::from_str(&raw).context("--params must be valid JSON")?,
        None => Value::Null,
    };

    let client = fallbackrpc_http::connect(build_config(args)?)?;
    let result: Value = client.call(&method, params).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_request(args: &[String]) -> Result<()> {
    let path = parse_flag(args, "--path").unwrap_or_default();
    let payload: Value = match parse_flag(args, "--data") {
        Some(raw) => serde_json::from_str(&raw).context("--data must be valid JSON")?,
        None => Value::Null,
    };

    let client = fallbackrpc_http::connect(build_config(args)?)?;
    let body = client.request(&path, &payload).await?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cmd_health(args: &[String]) -> Result<()> {
    let client = fallbackrpc_http::connect(build_config(args)?)?;
    client.perform_health_checks().await;

    let status = client.health_status();
    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_health(&status));
        println!("\nOverall: {}", client.health());
    }
    Ok(())
}

/// Flags on top of the environment, or on top of defaults when `--url` is
/// given.
fn build_config(args: &[String]) -> Result<ClientConfig> {
    let urls = parse_flags(args, "--url");
    let mut config = if urls.is_empty() {
        ClientConfig::from_env()?
    } else {
        ClientConfig::new(urls)
    };

    if let Some(ms) = parse_number(args, "--timeout-ms")? {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(n) = parse_number(args, "--retries")? {
        config.retries = u32::try_from(n).context("--retries is too large")?;
    }
    if let Some(ms) = parse_number(args, "--retry-delay-ms")? {
        config.retry_delay = Duration::from_millis(ms);
    }
    if let Some(n) = parse_number(args, "--cb-threshold")? {
        config.circuit_breaker_threshold = u32::try_from(n).context("--cb-threshold is too large")?;
    }
    if let Some(ms) = parse_number(args, "--cb-timeout-ms")? {
        config.circuit_breaker_timeout = Duration::from_millis(ms);
    }
    for pair in parse_flags(args, "--header") {
        let Some((name, value)) = parse_header(&pair) else {
            bail!("--header expects K=V, got {pair:?}");
        };
        config.headers.insert(name, value);
    }

    tracing::debug!(
        endpoints = config.urls.len(),
        retries = config.retries,
        timeout_ms = config.timeout.as_millis() as u64,
        "configuration loaded"
    );
    Ok(config)
}

fn render_health(status: &[EndpointHealth]) -> String {
    let width = status
        .iter()
        .map(|e| e.address.len())
        .max()
        .unwrap_or(0)
        .max("ENDPOINT".len());

    let mut out = format!(
        "{:<width$}  {:<7}  {:<7}  {:>8}  {:>8}  {:>7}  {:>7}  {:>9}\n",
        "ENDPOINT", "HEALTHY", "CIRCUIT", "FAILURES", "REQUESTS", "SUCCESS", "FAILURE", "AVG (ms)"
    );
    for e in status {
        out.push_str(&format!(
            "{:<width$}  {:<7}  {:<7}  {:>8}  {:>8}  {:>7}  {:>7}  {:>9.1}\n",
            e.address,
            if e.healthy { "yes" } else { "no" },
            if e.circuit_open { "open" } else { "closed" },
            e.failure_count,
            e.metrics.total_requests,
            e.metrics.total_success,
            e.metrics.total_failure,
            e.metrics.average_duration_ms,
        ));
    }
    out
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}

fn parse_number(args: &[String], flag: &str) -> Result<Option<u64>> {
    parse_flag(args, flag)
        .map(|raw| {
            raw.parse::<u64>()
                .with_context(|| format!("{flag} expects a number, got {raw:?}"))
        })
        .transpose()
}
