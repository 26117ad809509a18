//! vbot probe entry point.
//!
//! ```text
//! vbot call '#.user:SayHello' kitty      Call an action, print the result
//! vbot listen '#.room' Message           Print broadcasts until Ctrl-C
//! vbot --config <path> ...               Use custom config TOML
//! vbot --gen-config                      Dump default config and exit
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vbot_cli::args::{parse_arg, render};
use vbot_cli::config::CliConfig;
use vbot_core::{Client, Value};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vbot", about = "vbot RPC probe")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vbot.toml")]
    config: PathBuf,

    /// Server connect string (overrides config). Example: ws://127.0.0.1:8080/rpc
    #[arg(short, long)]
    url: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call `target` with JSON (or bare string) arguments.
    Call { target: String, args: Vec<String> },
    /// Print every broadcast of `event` on `target`.
    Listen { target: String, event: String },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&CliConfig::default())?;
        println!("{text}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = CliConfig::load(&cli.config);
    if let Some(url) = cli.url {
        config.server.url = url;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("vbot v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = cli.command else {
        error!("no command given; try `vbot --help`");
        return Ok(ExitCode::FAILURE);
    };

    let client = Client::new(config.server.url.clone(), config.client.clone());

    let code = match command {
        Command::Call { target, args } => {
            let args: Vec<Value> = args.iter().map(String::as_str).map(parse_arg).collect();
            match client.send(config.server.timeout_ms, &target, &args).await {
                Ok(value) => {
                    println!("{}", render(&value));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("{target} failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Listen { target, event } => {
            let mut sub = client.subscribe(&target, &event, |value| {
                println!("{}", render(value));
            });
            info!("listening on {target}%{event}; Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            sub.close();
            ExitCode::SUCCESS
        }
    };

    client.close();
    Ok(code)
}
