//! Support inbox backend: mirrors an IMAP mailbox into local storage and
//! drafts replies from a small knowledge base over HTTP.

pub mod drafting;
pub mod email;
pub mod error;
mod http;
pub mod mailbox;
pub mod normalize;
pub mod scheduler;
pub mod scoring;
pub mod sqlite_store;
pub mod store;
pub mod sync;

pub use drafting::{CompletionProvider, CompletionRequest, DraftMode, OpenAiClient, ReplyDrafter};
pub use email::{KnowledgeEntry, MailMessage, ParsedMessage, ReplyRecord};
pub use error::{Error, Result};
pub use http::clean_body;
pub use mailbox::{FetchRange, ImapConfig, ImapConnector, MailboxConnector, MailboxSession};
pub use sqlite_store::SqliteStore;
pub use store::{MemoryStore, Storage};
pub use sync::MailboxSync;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Settings for the hosted language model.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: drafting::DEFAULT_MODEL.to_string(),
            base_url: drafting::DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Configuration options for the backend.
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub http_port: u16,
    /// `SQLite` file; `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    pub imap: ImapConfig,
    pub mailbox: String,
    pub sync_interval: Duration,
    pub use_mock_ai: bool,
    pub openai: OpenAiConfig,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            http_port: 5000,
            database_path: None,
            imap: ImapConfig {
                port: 993,
                tls: true,
                ..ImapConfig::default()
            },
            mailbox: sync::DEFAULT_MAILBOX.to_string(),
            sync_interval: scheduler::DEFAULT_SYNC_INTERVAL,
            use_mock_ai: false,
            openai: OpenAiConfig::default(),
        }
    }
}

impl AppOptions {
    /// Resolve how replies get drafted. A live provider needs an API key.
    pub fn draft_mode(&self) -> Result<DraftMode> {
        if self.use_mock_ai {
            return Ok(DraftMode::Mock);
        }
        let api_key = self
            .openai
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("OPENAI_API_KEY is required unless USE_MOCK_AI is set".into())
            })?;
        let client = OpenAiClient::new(api_key, self.openai.base_url.as_str())?;
        Ok(DraftMode::Live {
            provider: Arc::new(client),
            model: self.openai.model.clone(),
        })
    }

    fn open_store(&self) -> Result<Arc<dyn Storage>> {
        match &self.database_path {
            Some(path) => {
                info!(path = %path.display(), "opening SQLite database");
                Ok(Arc::new(SqliteStore::open(path)?))
            }
            None => {
                info!("using in-memory storage");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }
}

/// Running service handles.
pub struct RunningServices {
    pub http_addr: SocketAddr,
    http_handle: tokio::task::JoinHandle<()>,
    sync_handle: Option<tokio::task::JoinHandle<()>>,
    store: Arc<dyn Storage>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RunningServices {
    /// Stop the HTTP server and the sync loop, then flush storage.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.http_handle.await;
        if let Some(handle) = self.sync_handle {
            let _ = handle.await;
        }
        self.store.close();
    }
}

/// Start the backend against the configured IMAP server.
pub async fn start_app(opts: AppOptions) -> Result<RunningServices> {
    let connector: Option<Arc<dyn MailboxConnector>> = if opts.imap.is_enabled() {
        Some(Arc::new(ImapConnector::new(opts.imap.clone())))
    } else {
        warn!("IMAP_HOST or IMAP_USER not set, mailbox sync disabled");
        None
    };
    start_app_with(opts, connector).await
}

/// Start the backend with an explicit mailbox connector, or none to run
/// without sync.
pub async fn start_app_with(
    opts: AppOptions,
    connector: Option<Arc<dyn MailboxConnector>>,
) -> Result<RunningServices> {
    let mode = opts.draft_mode()?;
    if matches!(mode, DraftMode::Mock) {
        info!("mock AI mode enabled, drafts use a fixed template");
    }

    let store = opts.open_store()?;
    let drafter = Arc::new(ReplyDrafter::new(Arc::clone(&store), mode));
    let sync = connector.map(|connector| {
        Arc::new(MailboxSync::new(connector, Arc::clone(&store)).with_mailbox(opts.mailbox.as_str()))
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_listener = TcpListener::bind(("0.0.0.0", opts.http_port)).await?;
    let http_addr = http_listener.local_addr()?;
    info!(port = http_addr.port(), "HTTP server listening");

    let sync_handle = sync.as_ref().map(|job| {
        scheduler::spawn_sync_loop(Arc::clone(job), opts.sync_interval, shutdown_tx.subscribe())
    });

    let state = http::AppState {
        store: Arc::clone(&store),
        drafter,
        sync,
    };
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        http::run_http_server(http_listener, state, http_shutdown).await;
    });

    Ok(RunningServices {
        http_addr,
        http_handle,
        sync_handle,
        store,
        shutdown_tx,
    })
}
