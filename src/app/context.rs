use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::error::{FetchError, PagewatchError, Result};
use crate::config::Config;
use crate::download::{Downloader, HttpDownloader, YtDlpDownloader};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::notify::{ConsoleTransport, TelegramTransport, Transport};
use crate::store::SqliteStore;
use crate::tracker::Tracker;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub tracker: Arc<Tracker<SqliteStore>>,
}

impl AppContext {
    pub fn new(config: Config, db_path: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let transport = Self::transport(&config)?;
        Self::assemble(config, store, transport)
    }

    /// In-memory store with a console transport.
    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::assemble(config, store, Arc::new(ConsoleTransport::new()))
    }

    fn assemble(
        config: Config,
        store: Arc<SqliteStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new(&config.fetch)?);
        let downloaders = Self::downloaders(&config)?;
        let tracker = Arc::new(Tracker::new(
            store.clone(),
            fetcher,
            transport,
            downloaders,
            &config,
        )?);

        Ok(Self {
            config,
            store,
            tracker,
        })
    }

    /// Telegram when the bot token variable is set, console otherwise.
    fn transport(config: &Config) -> Result<Arc<dyn Transport>> {
        match std::env::var(&config.telegram.token_env) {
            Ok(token) if !token.trim().is_empty() => {
                info!("Delivering through the Telegram Bot API");
                Ok(Arc::new(TelegramTransport::new(
                    &config.telegram.api_base,
                    token.trim(),
                    config.delivery.send_timeout(),
                )?))
            }
            _ => {
                warn!(
                    "{} is not set; deliveries are printed to stdout",
                    config.telegram.token_env
                );
                Ok(Arc::new(ConsoleTransport::new()))
            }
        }
    }

    fn downloaders(config: &Config) -> Result<Vec<Arc<dyn Downloader>>> {
        let mut chain: Vec<Arc<dyn Downloader>> = Vec::new();
        if config.downloaders.ytdlp {
            chain.push(Arc::new(YtDlpDownloader::new(
                config.downloaders.ytdlp_path.clone(),
            )));
        }
        let http = HttpDownloader::new(&config.fetch.user_agent, config.delivery.download_timeout())
            .map_err(FetchError::from)?;
        chain.push(Arc::new(http));
        Ok(chain)
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| PagewatchError::Config("Could not find data directory".into()))?;
        let app_dir = data_dir.join("pagewatch");
        std::fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("pagewatch.db"))
    }
}
