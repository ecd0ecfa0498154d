//! Turning a resource URL into delivered media.
//!
//! Every delivery runs inside its own temporary directory. Downloaders are
//! tried in order until one produces the file; the result is size-checked,
//! split if it is too large for a single upload, and handed to the
//! dispatcher. The directory is removed when the delivery ends, whatever the
//! outcome.

mod http;
mod split;
mod ytdlp;

pub use http::HttpDownloader;
pub use split::{part_path, split_file};
pub use ytdlp::YtDlpDownloader;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::app::{DownloadError, PagewatchError, Result};
use crate::config::DeliveryConfig;
use crate::domain::{MediaKind, ResourceCandidate};
use crate::notify::{format_size, NotificationDispatcher, ProgressObserver};

/// One way of fetching a resource to a local path.
#[async_trait]
pub trait Downloader: Send + Sync {
    fn name(&self) -> &str;

    /// Returns true when `dest` now holds the complete file.
    async fn attempt(&self, url: &str, dest: &Path) -> bool;
}

/// What a successful delivery sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub size: u64,
    pub parts: usize,
}

pub struct DownloadOrchestrator {
    downloaders: Vec<Arc<dyn Downloader>>,
    max_file_size: u64,
    split_threshold: u64,
    part_size: u64,
    attempt_timeout: Duration,
    temp_root: Option<PathBuf>,
}

impl DownloadOrchestrator {
    pub fn new(downloaders: Vec<Arc<dyn Downloader>>, config: &DeliveryConfig) -> Self {
        Self {
            downloaders,
            max_file_size: config.max_file_size,
            split_threshold: config.split_threshold,
            part_size: config.part_size.max(1),
            attempt_timeout: config.download_timeout(),
            temp_root: config.download_dir.clone(),
        }
    }

    /// Downloads `candidate` and sends it to `user_id`.
    ///
    /// `size_limit` can only lower the configured maximum.
    pub async fn deliver(
        &self,
        candidate: &ResourceCandidate,
        user_id: i64,
        caption: &str,
        size_limit: Option<u64>,
        dispatcher: &NotificationDispatcher,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<Delivered> {
        let workdir = self.workdir()?;
        let dest = workdir.path().join(candidate.file_name());

        let size = self.download(&candidate.url, &dest).await?;

        let limit = size_limit.map_or(self.max_file_size, |l| l.min(self.max_file_size));
        if size > limit {
            remove_quietly(&dest).await;
            return Err(DownloadError::TooLarge { size, limit }.into());
        }

        if size <= self.split_threshold {
            dispatcher
                .send_media(user_id, candidate.kind, &dest, caption, observer)
                .await?;
            return Ok(Delivered { size, parts: 1 });
        }

        info!(
            "Splitting {} ({}) into {} parts",
            candidate.url,
            format_size(size),
            format_size(self.part_size)
        );
        let parts = split_file(&dest, self.part_size)
            .await
            .map_err(|source| DownloadError::Io {
                path: dest.clone(),
                source,
            })?;
        let count = parts.len();

        for (i, part) in parts.iter().enumerate() {
            let part_caption = format!("{} (part {}/{})", caption, i + 1, count);
            let sent = dispatcher
                .send_media(user_id, MediaKind::Document, part, &part_caption, observer.clone())
                .await;
            remove_quietly(part).await;
            sent?;
        }

        remove_quietly(&dest).await;
        Ok(Delivered { size, parts: count })
    }

    fn workdir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pagewatch-");
        let dir = match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|source| {
            PagewatchError::from(DownloadError::Io {
                path: self.temp_root.clone().unwrap_or_else(std::env::temp_dir),
                source,
            })
        })
    }

    /// Runs the downloader chain; returns the size of the file at `dest`.
    async fn download(&self, url: &str, dest: &Path) -> std::result::Result<u64, DownloadError> {
        for downloader in &self.downloaders {
            debug!("Trying {} for {}", downloader.name(), url);

            let ok = match tokio::time::timeout(self.attempt_timeout, downloader.attempt(url, dest)).await {
                Ok(ok) => ok,
                Err(_) => {
                    warn!(
                        "{} timed out after {:?} on {}",
                        downloader.name(),
                        self.attempt_timeout,
                        url
                    );
                    false
                }
            };

            if ok {
                if let Ok(meta) = tokio::fs::metadata(dest).await {
                    debug!("{} fetched {} ({})", downloader.name(), url, format_size(meta.len()));
                    return Ok(meta.len());
                }
                warn!("{} reported success but produced no file for {}", downloader.name(), url);
            }
            remove_quietly(dest).await;
        }

        Err(DownloadError::Exhausted {
            url: url.to_string(),
            attempts: self.downloaders.len(),
        })
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::notify::testing::{RecordingTransport, Sent};

    struct Failing(AtomicUsize);

    #[async_trait]
    impl Downloader for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn attempt(&self, _url: &str, dest: &Path) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            // Leaves a partial file behind.
            let _ = tokio::fs::write(dest, b"partial").await;
            false
        }
    }

    struct Writing(Vec<u8>);

    #[async_trait]
    impl Downloader for Writing {
        fn name(&self) -> &str {
            "writing"
        }

        async fn attempt(&self, _url: &str, dest: &Path) -> bool {
            tokio::fs::write(dest, &self.0).await.is_ok()
        }
    }

    struct Hanging;

    #[async_trait]
    impl Downloader for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn attempt(&self, _url: &str, _dest: &Path) -> bool {
            tokio::time::sleep(Duration::from_secs(60)).await;
            true
        }
    }

    fn config(max: u64, threshold: u64, part: u64) -> DeliveryConfig {
        DeliveryConfig {
            max_file_size: max,
            split_threshold: threshold,
            part_size: part,
            download_timeout_secs: 1,
            ..Default::default()
        }
    }

    fn pdf() -> ResourceCandidate {
        ResourceCandidate::new("https://example.com/files/report.pdf".into(), MediaKind::Document)
    }

    fn dispatcher(transport: Arc<RecordingTransport>) -> NotificationDispatcher {
        NotificationDispatcher::new(transport, Duration::ZERO, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_fallback_chain_first_success_wins() {
        let failing = Arc::new(Failing(AtomicUsize::new(0)));
        let orchestrator = DownloadOrchestrator::new(
            vec![failing.clone(), Arc::new(Writing(b"%PDF-1.7".to_vec()))],
            &config(1024, 512, 128),
        );
        let transport = Arc::new(RecordingTransport::default());

        let delivered = orchestrator
            .deliver(&pdf(), 5, "Notices", None, &dispatcher(transport.clone()), None)
            .await
            .unwrap();

        assert_eq!(delivered, Delivered { size: 8, parts: 1 });
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            transport.sent(),
            vec![Sent::Media {
                user_id: 5,
                kind: MediaKind::Document,
                file_name: "report.pdf".into(),
                size: 8,
                caption: "Notices".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_all_methods_fail() {
        let orchestrator = DownloadOrchestrator::new(
            vec![
                Arc::new(Failing(AtomicUsize::new(0))),
                Arc::new(Failing(AtomicUsize::new(0))),
            ],
            &config(1024, 512, 128),
        );
        let transport = Arc::new(RecordingTransport::default());

        let err = orchestrator
            .deliver(&pdf(), 5, "", None, &dispatcher(transport.clone()), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PagewatchError::Download(DownloadError::Exhausted { attempts: 2, .. })
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_method_falls_through() {
        let orchestrator = DownloadOrchestrator::new(
            vec![Arc::new(Hanging), Arc::new(Writing(b"data".to_vec()))],
            &config(1024, 512, 128),
        );
        let transport = Arc::new(RecordingTransport::default());

        let delivered = orchestrator
            .deliver(&pdf(), 1, "", None, &dispatcher(transport.clone()), None)
            .await
            .unwrap();
        assert_eq!(delivered.size, 4);
    }

    #[tokio::test]
    async fn test_oversized_never_sent() {
        let orchestrator = DownloadOrchestrator::new(
            vec![Arc::new(Writing(vec![0u8; 100]))],
            &config(50, 40, 10),
        );
        let transport = Arc::new(RecordingTransport::default());

        let err = orchestrator
            .deliver(&pdf(), 1, "", None, &dispatcher(transport.clone()), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PagewatchError::Download(DownloadError::TooLarge { size: 100, limit: 50 })
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_size_hint_lowers_limit() {
        let orchestrator = DownloadOrchestrator::new(
            vec![Arc::new(Writing(vec![0u8; 100]))],
            &config(1000, 500, 100),
        );
        let transport = Arc::new(RecordingTransport::default());

        let err = orchestrator
            .deliver(&pdf(), 1, "", Some(80), &dispatcher(transport), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PagewatchError::Download(DownloadError::TooLarge { limit: 80, .. })
        ));
    }

    #[tokio::test]
    async fn test_large_file_split_sent_in_order_and_removed() {
        let orchestrator = DownloadOrchestrator::new(
            vec![Arc::new(Writing(vec![7u8; 10]))],
            &config(1000, 8, 4),
        );
        let transport = Arc::new(RecordingTransport::default());

        let delivered = orchestrator
            .deliver(&pdf(), 9, "Notices", None, &dispatcher(transport.clone()), None)
            .await
            .unwrap();
        assert_eq!(delivered, Delivered { size: 10, parts: 3 });

        let sent: Vec<_> = transport
            .sent()
            .into_iter()
            .map(|s| match s {
                Sent::Media { file_name, size, caption, .. } => (file_name, size, caption),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            sent,
            vec![
                ("report.pdf.part001".into(), 4, "Notices (part 1/3)".into()),
                ("report.pdf.part002".into(), 4, "Notices (part 2/3)".into()),
                ("report.pdf.part003".into(), 2, "Notices (part 3/3)".into()),
            ]
        );

        let seen = transport.seen_paths.lock().unwrap().clone();
        for path in &seen {
            assert!(!path.exists());
        }
        assert!(!seen[0].parent().unwrap().exists(), "temp dir removed");
    }

    #[tokio::test]
    async fn test_failed_part_still_removed() {
        let orchestrator = DownloadOrchestrator::new(
            vec![Arc::new(Writing(vec![1u8; 10]))],
            &config(1000, 8, 4),
        );
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_media.store(true, Ordering::SeqCst);

        let err = orchestrator
            .deliver(&pdf(), 1, "", None, &dispatcher(transport.clone()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PagewatchError::Delivery(_)));

        let seen = transport.seen_paths.lock().unwrap().clone();
        assert_eq!(seen.len(), 1, "stops at the first failed part");
        assert!(!seen[0].exists());
        assert!(!seen[0].parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_download_dir_used_for_workdir() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = config(1000, 500, 100);
        cfg.download_dir = Some(root.path().to_path_buf());

        let orchestrator = DownloadOrchestrator::new(vec![Arc::new(Writing(b"x".to_vec()))], &cfg);
        let transport = Arc::new(RecordingTransport::default());
        orchestrator
            .deliver(&pdf(), 1, "", None, &dispatcher(transport.clone()), None)
            .await
            .unwrap();

        let seen = transport.seen_paths.lock().unwrap().clone();
        assert!(seen[0].starts_with(root.path()));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
