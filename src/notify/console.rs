use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use crate::app::Result;
use crate::domain::{MediaKind, MessageFormat};
use crate::notify::{format_size, ProgressCallback, Transport};

/// Prints deliveries to stdout. Used when no bot token is configured.
#[derive(Debug, Default)]
pub struct ConsoleTransport {
    next_id: AtomicI64,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn media(
        &self,
        user_id: i64,
        kind: MediaKind,
        path: &Path,
        caption: &str,
        progress: ProgressCallback,
    ) -> Result<()> {
        let size = tokio::fs::metadata(path).await?.len();
        progress(size, size);
        println!(
            "[user {}] {} {} ({}) {}",
            user_id,
            kind,
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            format_size(size),
            caption
        );
        Ok(())
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_text(&self, user_id: i64, text: &str, _format: MessageFormat) -> Result<i64> {
        println!("[user {}] {}", user_id, text);
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn send_document(&self, user_id: i64, path: &Path, caption: &str, progress: ProgressCallback) -> Result<()> {
        self.media(user_id, MediaKind::Document, path, caption, progress)
            .await
    }

    async fn send_photo(&self, user_id: i64, path: &Path, caption: &str, progress: ProgressCallback) -> Result<()> {
        self.media(user_id, MediaKind::Image, path, caption, progress)
            .await
    }

    async fn send_audio(&self, user_id: i64, path: &Path, caption: &str, progress: ProgressCallback) -> Result<()> {
        self.media(user_id, MediaKind::Audio, path, caption, progress)
            .await
    }

    async fn send_video(&self, user_id: i64, path: &Path, caption: &str, progress: ProgressCallback) -> Result<()> {
        self.media(user_id, MediaKind::Video, path, caption, progress)
            .await
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        println!("[user {} / message {}] {}", chat_id, message_id, text);
        Ok(())
    }
}
