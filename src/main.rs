//! dataLayer monitor host
//!
//! Runs the monitor pipeline outside a browser:
//! - Reads a JSON-lines capture stream (file or stdin)
//! - One page session per tab, fed through the page-world capture bridge
//! - Background coordinator plus a logging UI surface
//! - Snapshots and settings kept in JSON file stores

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bridge::{page_window, ContextId, Envelope, MessageBus, PageCapture, Parsed, TabId};
use monitor_core::{domain_from_url, Settings};
use monitor_storage::{FileStorage, PersistenceStore, SettingsStore, StorageArea};
use overlay::DomList;
use pipeline::{
    spawn_coordinator, spawn_session, BackgroundCoordinator, MemoryClipboard, PageSession,
    SessionConfig, SessionServices, SessionTask, WindowFeed,
};
use telemetry::{health, init_tracing_from_env, metrics};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppConfig {
    /// Directory holding the JSON stores
    #[serde(default = "default_storage_dir")]
    storage_dir: PathBuf,

    /// Capture stream path, `-` for stdin
    #[serde(default = "default_input")]
    input: String,

    /// Tab used for records that do not name one
    #[serde(default = "default_tab_id")]
    tab_id: TabId,

    /// Page URL used for records that do not name one
    #[serde(default = "default_page_url")]
    page_url: String,

    #[serde(default)]
    default_settings: Settings,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_input() -> String {
    "-".to_string()
}

fn default_tab_id() -> TabId {
    1
}

fn default_page_url() -> String {
    "https://localhost/".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            input: default_input(),
            tab_id: default_tab_id(),
            page_url: default_page_url(),
            default_settings: Settings::default(),
        }
    }
}

/// One line of the capture stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StreamRecord {
    /// `window[dataLayer].push(data)` on a tab
    #[serde(rename_all = "camelCase")]
    Push {
        tab_id: Option<TabId>,
        url: Option<String>,
        data_layer: Option<String>,
        data: Value,
    },
    /// A raw message sent by the CLI surface to the background
    #[serde(rename_all = "camelCase")]
    Request { message: Value },
    /// The tab was closed; its session and background cache go away
    #[serde(rename_all = "camelCase")]
    Close { tab_id: Option<TabId> },
}

const CLI_SURFACE: &str = "cli";
const LOG_SURFACE: &str = "log";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = load_config()?;
    init_tracing_from_env(config.default_settings.debug_logging);

    info!("Starting dataLayer monitor v{}", env!("CARGO_PKG_VERSION"));
    info!(
        storage_dir = %config.storage_dir.display(),
        input = %config.input,
        "Loaded configuration"
    );

    tokio::fs::create_dir_all(&config.storage_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.storage_dir.display()))?;

    let local = Arc::new(
        FileStorage::open(config.storage_dir.join("local.json"), StorageArea::Local)
            .await
            .context("Failed to open local storage")?,
    );
    let sync = Arc::new(
        FileStorage::open(config.storage_dir.join("sync.json"), StorageArea::Sync)
            .await
            .context("Failed to open settings storage")?,
    );
    health().storage.set_healthy();

    let bus = MessageBus::new();
    let settings = SettingsStore::new(sync, config.default_settings.clone());
    let services = SessionServices {
        bus: bus.clone(),
        persistence: PersistenceStore::new(local),
        settings: settings.clone(),
        clipboard: Arc::new(MemoryClipboard::new()),
    };

    let coordinator = Arc::new(BackgroundCoordinator::new(
        bus.clone(),
        settings,
        config.default_settings.max_events,
    ));
    let _coordinator = spawn_coordinator(coordinator.clone());
    let _surface = spawn_log_surface(&bus);

    let reader = open_input(&config.input).await?;
    let mut host = Host::new(services, coordinator, &config);

    tokio::select! {
        result = host.run(reader) => result.context("Capture stream failed")?,
        _ = shutdown_signal() => {}
    }

    info!("Shutting down...");
    host.shutdown().await;

    match serde_json::to_string(&metrics().snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final metrics"),
        Err(e) => error!("Failed to serialize metrics: {}", e),
    }
    let report = health().report();
    info!(status = ?report.status, "Final health");

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<AppConfig> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&AppConfig::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("DLM")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let config: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    let settings = config
        .default_settings
        .clone()
        .validated()
        .context("Invalid default settings")?;

    Ok(AppConfig {
        default_settings: settings,
        ..config
    })
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open capture stream {}", input))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Registers a UI surface that logs every notification it receives.
fn spawn_log_surface(bus: &MessageBus) -> tokio::task::JoinHandle<()> {
    let mut inbox = bus.register(ContextId::surface(LOG_SURFACE));
    tokio::spawn(async move {
        while let Some(delivery) = inbox.recv().await {
            match Envelope::parse(&delivery.message) {
                Ok(Parsed::Known(envelope)) => info!(
                    surface = LOG_SURFACE,
                    message_type = envelope.message.message_type(),
                    tab_id = ?envelope.tab_id,
                    "Surface notification"
                ),
                Ok(Parsed::Unknown(message_type)) => {
                    debug!(message_type = %message_type, "Surface ignored message")
                }
                Err(e) => debug!(error = %e, "Surface dropped malformed message"),
            }
        }
    })
}

/// A tab the host is simulating.
struct HostedTab {
    task: SessionTask,
    page: PageCapture,
    tracked: watch::Receiver<Vec<String>>,
}

impl HostedTab {
    /// Re-installs the capture when the session's tracked arrays changed.
    fn sync_capture(&mut self, tab_id: TabId) {
        if !self.tracked.has_changed().unwrap_or(false) {
            return;
        }
        let names = self.tracked.borrow_and_update().clone();
        let replayed = self.page.retarget(&names);
        info!(tab_id, data_layers = ?names, replayed, "Re-installed capture");
    }
}

/// Drives page sessions from the capture stream.
struct Host {
    services: SessionServices,
    coordinator: Arc<BackgroundCoordinator>,
    default_tab: TabId,
    default_url: String,
    tabs: HashMap<TabId, HostedTab>,
}

impl Host {
    fn new(
        services: SessionServices,
        coordinator: Arc<BackgroundCoordinator>,
        config: &AppConfig,
    ) -> Self {
        Self {
            services,
            coordinator,
            default_tab: config.tab_id,
            default_url: config.page_url.clone(),
            tabs: HashMap::new(),
        }
    }

    async fn run(&mut self, reader: Box<dyn AsyncBufRead + Unpin + Send>) -> Result<()> {
        let mut lines = reader.lines();
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamRecord>(&line) {
                Ok(record) => self.apply(record).await,
                Err(e) => warn!(line = line_no, error = %e, "Skipping malformed record"),
            }
        }
        info!(lines = line_no, "Capture stream finished");
        Ok(())
    }

    async fn apply(&mut self, record: StreamRecord) {
        match record {
            StreamRecord::Push {
                tab_id,
                url,
                data_layer,
                data,
            } => {
                let tab_id = tab_id.unwrap_or(self.default_tab);
                let url = url.unwrap_or_else(|| self.default_url.clone());
                let tab = self.open_tab(tab_id, &url).await;
                tab.sync_capture(tab_id);
                let name = data_layer.unwrap_or_else(|| "dataLayer".to_string());
                tab.page.push(&name, data);
            }
            StreamRecord::Request { message } => {
                let from = ContextId::surface(CLI_SURFACE);
                match self.services.bus.send(&from, &ContextId::Background, message).await {
                    Some(resp) => info!(
                        success = resp.success,
                        code = ?resp.code,
                        data = ?resp.data,
                        "Background response"
                    ),
                    None => warn!("Background did not answer"),
                }
            }
            StreamRecord::Close { tab_id } => {
                let tab_id = tab_id.unwrap_or(self.default_tab);
                if let Some(mut tab) = self.tabs.remove(&tab_id) {
                    tab.page.uninstall();
                    close_tab(tab_id, tab.task).await;
                }
                self.coordinator.forget_tab(tab_id);
            }
        }
    }

    async fn open_tab(&mut self, tab_id: TabId, url: &str) -> &mut HostedTab {
        match self.tabs.entry(tab_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(start_tab(&self.services, tab_id, url).await),
        }
    }

    async fn shutdown(&mut self) {
        for (tab_id, mut tab) in self.tabs.drain() {
            tab.page.uninstall();
            close_tab(tab_id, tab.task).await;
        }
    }
}

async fn start_tab(services: &SessionServices, tab_id: TabId, url: &str) -> HostedTab {
    let domain = domain_from_url(url);
    let (window, messages) = page_window(domain.clone());
    let session = PageSession::initialize(
        SessionConfig {
            tab_id,
            page_url: url.to_string(),
        },
        services.clone(),
        DomList::new(),
    )
    .await;
    let data_layers = session.settings().data_layer_names.clone();
    let tracked = session.tracked_arrays();
    let task = spawn_session(
        session,
        Some(WindowFeed {
            origin: domain,
            messages,
        }),
    );

    let mut page = PageCapture::new(window);
    let replayed = page.install(&data_layers);
    info!(tab_id, url, replayed, "Opened tab");
    HostedTab {
        task,
        page,
        tracked,
    }
}

async fn close_tab(tab_id: TabId, task: SessionTask) {
    if let Some(snapshot) = task.handle.snapshot().await {
        info!(
            tab_id,
            domain = %snapshot.domain,
            events = snapshot.events.len(),
            groups = snapshot.groups.len(),
            "Closing tab"
        );
    }
    task.handle.shutdown().await;
    if let Err(e) = task.join.await {
        error!(tab_id, "Session task failed: {}", e);
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
