mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use commands::CommandRunner;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use shardcache::{ClusterClient, ClusterConfig, NodeAddress};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "shardcache-cli")]
#[command(about = "Shardcache CLI - cluster-aware cache shell", long_about = None)]
struct Args {
    /// Seed nodes, comma separated host:port pairs
    #[arg(short = 'n', long, default_value = "127.0.0.1:7000", value_delimiter = ',')]
    nodes: Vec<NodeAddress>,

    /// YAML configuration file (overrides the node and prefix flags)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Prefix prepended to every key
    #[arg(long, default_value = "")]
    key_prefix: String,

    /// AUTH password
    #[arg(long, env = "SHARDCACHE_PASSWORD")]
    password: Option<String>,

    /// Use TLS connections (needs the `tls` feature)
    #[arg(long)]
    tls: bool,

    /// 64-hex-character value encryption key
    #[arg(long, env = "SHARDCACHE_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

impl Args {
    fn cluster_config(&self) -> Result<ClusterConfig> {
        if let Some(path) = &self.config {
            return ClusterConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()));
        }

        let mut config = ClusterConfig::new(self.nodes.clone())
            .with_key_prefix(self.key_prefix.clone())
            .with_tls(self.tls)
            .with_lazy_connect(true);
        if let Some(password) = &self.password {
            config = config.with_password(password.clone());
        }
        if let Some(key) = &self.encryption_key {
            config = config.with_encryption_key(key.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let args = Args::parse();
    let config = args.cluster_config()?;
    let nodes: Vec<String> = config.nodes.iter().map(ToString::to_string).collect();
    let client = ClusterClient::redis(config).context("invalid cluster configuration")?;
    client
        .connect()
        .await
        .with_context(|| format!("cannot connect to {}", nodes.join(",")))?;
    let runner = CommandRunner::new(client.clone());

    let outcome = if !args.command.is_empty() {
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match runner.execute_command(cmd, &cmd_args).await {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(&runner, &nodes.join(",")).await
    };

    client.disconnect().await?;
    outcome
}

async fn run_interactive(runner: &CommandRunner, nodes: &str) -> Result<()> {
    info!(
        "{}",
        format!("Shardcache CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!("Connected to {}", nodes);
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;
    let prompt = format!("{}> ", "shardcache".green());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                let Some((cmd, cmd_args)) = parts.split_first() else {
                    continue;
                };
                rl.add_history_entry(line.as_str())?;

                if cmd.eq_ignore_ascii_case("QUIT") || cmd.eq_ignore_ascii_case("EXIT") {
                    info!("Goodbye!");
                    break;
                }

                match runner.execute_command(cmd, cmd_args).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => error!(error = %e, "{}", format!("Error: {}", e).red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error");
                break;
            }
        }
    }

    Ok(())
}
