//! shoal daemon — entry point for running a sync agent.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use shoal_node::{init_logging, validate_nickname, LogFormat, Node, NodeConfig};

#[derive(Parser)]
#[command(name = "shoal-daemon", version, about = "LAN discovery and directory sync agent")]
struct Cli {
    /// Port shared by discovery datagrams and direct connections.
    #[arg(long, env = "SHOAL_PORT")]
    port: Option<u16>,

    /// Directory whose file listing is shared with peers.
    #[arg(long, env = "SHOAL_SHARE_DIR")]
    share_dir: Option<PathBuf>,

    /// Nickname broadcast to the segment (4-16 alphanumeric characters).
    /// Prompted for interactively when not supplied.
    #[arg(long, env = "SHOAL_NICKNAME")]
    nickname: Option<String>,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[arg(long, default_value = "info", env = "SHOAL_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as newline-delimited JSON instead of human-readable lines.
    #[arg(long, env = "SHOAL_LOG_JSON")]
    log_json: bool,

    /// Path to a TOML configuration file. File settings are the base;
    /// CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match cli.config {
        Some(ref path) => Some(
            NodeConfig::from_toml_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
        ),
        None => None,
    };

    let base = file_config.unwrap_or_default();
    let mut config = NodeConfig {
        port: cli.port.unwrap_or(base.port),
        share_dir: cli.share_dir.unwrap_or(base.share_dir),
        nickname: cli.nickname.unwrap_or(base.nickname),
        log_level: cli.log_level,
        log_format: if cli.log_json {
            "json".to_string()
        } else {
            base.log_format
        },
    };

    init_logging(
        LogFormat::from_config(&config.log_format),
        &config.log_level,
    );

    if !validate_nickname(&config.nickname) {
        if !config.nickname.is_empty() {
            tracing::warn!(nickname = %config.nickname, "configured nickname is invalid, prompting");
        }
        config.nickname = prompt_nickname()?;
    }

    tracing::info!(
        port = config.port,
        share_dir = %config.share_dir.display(),
        nickname = %config.nickname,
        "starting shoal"
    );

    let mut node = Node::new(config).context("node initialization failed")?;
    node.run_until_signal().await;
    Ok(())
}

/// Ask for a nickname on stdin until a valid one is entered.
fn prompt_nickname() -> anyhow::Result<String> {
    loop {
        print!("Type a nickname (4-16 chars, alphanum only): ");
        std::io::stdout().flush().context("flushing stdout")?;

        let mut line = String::new();
        let read = std::io::stdin()
            .read_line(&mut line)
            .context("reading nickname from stdin")?;
        if read == 0 {
            anyhow::bail!("stdin closed before a valid nickname was entered");
        }

        let nickname = line.trim();
        if validate_nickname(nickname) {
            return Ok(nickname.to_string());
        }
    }
}
