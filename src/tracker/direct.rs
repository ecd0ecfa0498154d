//! One-off downloads requested by a user, outside any tracked page.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use super::Tracker;
use crate::app::Result;
use crate::domain::{MediaKind, NotificationSettings, ResourceCandidate};
use crate::download::Delivered;
use crate::notify::{format_size, Progress, ProgressObserver};
use crate::store::Store;

/// How often the status message is refreshed while an upload runs.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Keeps only the newest progress report.
#[derive(Default)]
struct LatestProgress(Mutex<Option<Progress>>);

impl LatestProgress {
    fn take(&self) -> Option<Progress> {
        self.0.lock().ok().and_then(|mut latest| latest.take())
    }
}

impl ProgressObserver for LatestProgress {
    fn on_progress(&self, progress: Progress) {
        if let Ok(mut latest) = self.0.lock() {
            *latest = Some(progress);
        }
    }
}

fn progress_text(file_name: &str, progress: &Progress) -> String {
    let percent = if progress.bytes_total > 0 {
        progress.bytes_sent * 100 / progress.bytes_total
    } else {
        0
    };
    format!(
        "📤 Uploading {}\n{}% ({} / {})",
        file_name,
        percent,
        format_size(progress.bytes_sent),
        format_size(progress.bytes_total)
    )
}

impl<S: Store + Send + Sync + 'static> Tracker<S> {
    /// Downloads `url` through the downloader chain and sends it to
    /// `user_id`, editing a single status message as the upload advances.
    pub async fn download(&self, user_id: i64, url: &str) -> Result<Delivered> {
        let kind = self
            .extractor
            .classify(url)
            .unwrap_or(MediaKind::Document);
        let candidate = ResourceCandidate::new(url.to_string(), kind);
        let file_name = candidate.file_name();
        let settings = self
            .store
            .get_settings(user_id)?
            .unwrap_or_else(|| NotificationSettings::new(user_id));

        let status_id = self
            .dispatcher
            .send_status(user_id, &format!("📥 Downloading {}", url))
            .await?;

        let latest = Arc::new(LatestProgress::default());
        let observer: Arc<dyn ProgressObserver> = latest.clone();
        let delivery = self.orchestrator.deliver(
            &candidate,
            user_id,
            &file_name,
            settings.filters.max_size_hint,
            &self.dispatcher,
            Some(observer),
        );
        tokio::pin!(delivery);

        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        ticker.tick().await;
        let result = loop {
            tokio::select! {
                result = &mut delivery => break result,
                _ = ticker.tick() => {
                    if let Some(progress) = latest.take() {
                        self.edit_status_quietly(user_id, status_id, &progress_text(&file_name, &progress))
                            .await;
                    }
                }
            }
        };

        let summary = match &result {
            Ok(delivered) => {
                info!(
                    "Delivered {} to user {} in {} part(s)",
                    url, user_id, delivered.parts
                );
                format!(
                    "✅ Sent {} ({}, {} part(s))",
                    file_name,
                    format_size(delivered.size),
                    delivered.parts
                )
            }
            Err(e) => {
                warn!("Download of {} for user {} failed: {}", url, user_id, e);
                format!("❌ Download failed: {}", e)
            }
        };
        self.edit_status_quietly(user_id, status_id, &summary).await;

        result
    }

    async fn edit_status_quietly(&self, user_id: i64, message_id: i64, text: &str) {
        if let Err(e) = self.dispatcher.edit_status(user_id, message_id, text).await {
            warn!("Could not update status message {}: {}", message_id, e);
        }
    }
}
