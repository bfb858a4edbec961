//! CLI entry point for inbox-assist.

use clap::Parser;
use inbox_assist::{start_app, AppOptions, ImapConfig, OpenAiConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inbox-assist")]
#[command(about = "Sync a support inbox and draft replies from a knowledge base")]
struct Cli {
    /// HTTP port to listen on
    #[arg(short = 'p', long, env = "PORT", default_value = "5000")]
    port: u16,

    /// SQLite database file; omit to keep everything in memory
    #[arg(long, env = "DATABASE_PATH")]
    database_path: Option<PathBuf>,

    /// IMAP server host
    #[arg(long, env = "IMAP_HOST", default_value = "")]
    imap_host: String,

    /// IMAP server port
    #[arg(long, env = "IMAP_PORT", default_value = "993")]
    imap_port: u16,

    /// IMAP login user
    #[arg(long, env = "IMAP_USER", default_value = "")]
    imap_user: String,

    /// IMAP login password
    #[arg(long, env = "IMAP_PASS", default_value = "", hide_env_values = true)]
    imap_pass: String,

    /// Connect to IMAP over TLS
    #[arg(long, env = "IMAP_TLS", default_value = "true", action = clap::ArgAction::Set)]
    imap_tls: bool,

    /// Mailbox to sync
    #[arg(long, env = "IMAP_MAILBOX", default_value = "INBOX")]
    mailbox: String,

    /// Seconds between mailbox syncs
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value = "60")]
    sync_interval_secs: u64,

    /// Draft with a fixed template instead of calling the model
    #[arg(long, env = "USE_MOCK_AI")]
    mock_ai: bool,

    /// API key for the chat completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Model used for drafting
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    openai_model: String,

    /// Base URL of the chat completions API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,
}

impl From<Cli> for AppOptions {
    fn from(cli: Cli) -> Self {
        Self {
            http_port: cli.port,
            database_path: cli.database_path,
            imap: ImapConfig {
                host: cli.imap_host,
                port: cli.imap_port,
                user: cli.imap_user,
                password: cli.imap_pass,
                tls: cli.imap_tls,
            },
            mailbox: cli.mailbox,
            sync_interval: Duration::from_secs(cli.sync_interval_secs.max(1)),
            use_mock_ai: cli.mock_ai,
            openai: OpenAiConfig {
                api_key: cli.openai_api_key,
                model: cli.openai_model,
                base_url: cli.openai_base_url,
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = AppOptions::from(Cli::parse());

    let services = match start_app(opts).await {
        Ok(services) => services,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Wait for Ctrl+C
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    services.stop().await;

    ExitCode::SUCCESS
}
