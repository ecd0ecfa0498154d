//! Outbound messages and media.
//!
//! The [`Transport`] trait is the boundary to the chat service. The
//! [`NotificationDispatcher`] sits in front of it and enforces the service's
//! limits: message chunking, caption truncation, inter-message delay and
//! per-call timeouts.

mod console;
mod telegram;

pub use console::ConsoleTransport;
pub use telegram::TelegramTransport;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::app::{PagewatchError, Result};
use crate::detector::Change;
use crate::domain::{MediaKind, MessageFormat};

/// Longest text message the transport accepts, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;
/// Longest media caption the transport accepts, in characters.
pub const MAX_CAPTION_LENGTH: usize = 1024;

/// Raw upload progress, invoked by the transport as `(bytes_sent, bytes_total)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the id of the sent message.
    async fn send_text(&self, user_id: i64, text: &str, format: MessageFormat) -> Result<i64>;

    async fn send_document(
        &self,
        user_id: i64,
        path: &Path,
        caption: &str,
        progress: ProgressCallback,
    ) -> Result<()>;

    async fn send_photo(
        &self,
        user_id: i64,
        path: &Path,
        caption: &str,
        progress: ProgressCallback,
    ) -> Result<()>;

    async fn send_audio(
        &self,
        user_id: i64,
        path: &Path,
        caption: &str,
        progress: ProgressCallback,
    ) -> Result<()>;

    async fn send_video(
        &self,
        user_id: i64,
        path: &Path,
        caption: &str,
        progress: ProgressCallback,
    ) -> Result<()>;

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub elapsed: Duration,
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: Progress);
}

/// Logs upload progress at debug level.
#[derive(Debug, Clone)]
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressObserver for LogProgress {
    fn on_progress(&self, progress: Progress) {
        let percent = if progress.bytes_total > 0 {
            progress.bytes_sent as f64 / progress.bytes_total as f64 * 100.0
        } else {
            0.0
        };
        debug!(
            "Uploading {}: {:.1}% ({} / {}, {:.1}s)",
            self.label,
            percent,
            format_size(progress.bytes_sent),
            format_size(progress.bytes_total),
            progress.elapsed.as_secs_f64()
        );
    }
}

pub struct NotificationDispatcher {
    transport: Arc<dyn Transport>,
    message_delay: Duration,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn Transport>, message_delay: Duration, send_timeout: Duration) -> Self {
        Self {
            transport,
            message_delay,
            send_timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Sends `text` in chunks of at most [`MAX_MESSAGE_LENGTH`] characters,
    /// pausing between chunks. HTML is cut with [`chunk_html`] so that every
    /// chunk parses on its own.
    pub async fn send_text(&self, user_id: i64, text: &str, format: MessageFormat) -> Result<()> {
        let chunks = match format {
            MessageFormat::Html => chunk_html(text, MAX_MESSAGE_LENGTH),
            MessageFormat::Text => chunk_text(text, MAX_MESSAGE_LENGTH)
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        let count = chunks.len();

        for (i, chunk) in chunks.iter().enumerate() {
            self.bounded(self.transport.send_text(user_id, chunk, format))
                .await?;
            if i + 1 < count {
                tokio::time::sleep(self.message_delay).await;
            }
        }

        Ok(())
    }

    pub async fn send_media(
        &self,
        user_id: i64,
        kind: MediaKind,
        path: &Path,
        caption: &str,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<()> {
        let caption = truncate_chars(caption, MAX_CAPTION_LENGTH);
        let started = Instant::now();
        let progress: ProgressCallback = Arc::new(move |sent, total| {
            if let Some(observer) = &observer {
                observer.on_progress(Progress {
                    bytes_sent: sent,
                    bytes_total: total,
                    elapsed: started.elapsed(),
                });
            }
        });

        let transport = &self.transport;
        match kind {
            MediaKind::Document => {
                self.bounded(transport.send_document(user_id, path, caption, progress))
                    .await
            }
            MediaKind::Image => {
                self.bounded(transport.send_photo(user_id, path, caption, progress))
                    .await
            }
            MediaKind::Audio => {
                self.bounded(transport.send_audio(user_id, path, caption, progress))
                    .await
            }
            MediaKind::Video => {
                self.bounded(transport.send_video(user_id, path, caption, progress))
                    .await
            }
        }
    }

    /// Sends one plain message meant to be edited later; returns its id.
    pub async fn send_status(&self, user_id: i64, text: &str) -> Result<i64> {
        let text = truncate_chars(text, MAX_MESSAGE_LENGTH);
        self.bounded(self.transport.send_text(user_id, text, MessageFormat::Text))
            .await
    }

    pub async fn edit_status(&self, user_id: i64, message_id: i64, text: &str) -> Result<()> {
        let text = truncate_chars(text, MAX_MESSAGE_LENGTH);
        self.bounded(self.transport.edit_message(user_id, message_id, text))
            .await
    }

    /// Sends the user-facing notice for a detected change, if there is one.
    pub async fn notify_change(
        &self,
        user_id: i64,
        url: &str,
        change: &Change,
        format: MessageFormat,
    ) -> Result<bool> {
        match format_change(url, change, format) {
            Some(text) => {
                self.send_text(user_id, &text, format).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn bounded<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.send_timeout, call)
            .await
            .map_err(|_| {
                PagewatchError::Delivery(format!("transport call timed out after {:?}", self.send_timeout))
            })?
    }
}

pub fn format_change(url: &str, change: &Change, format: MessageFormat) -> Option<String> {
    match (change, format) {
        (Change::Unchanged, _) => None,
        (Change::InitialSnapshot, MessageFormat::Text) => {
            Some(format!("🔍 Initial content saved: {}", url))
        }
        (Change::InitialSnapshot, MessageFormat::Html) => Some(format!(
            "🔍 <b>Initial content saved</b>: {}",
            html_escape::encode_text(url)
        )),
        (Change::ChangedWithDiff(diff), MessageFormat::Text) => {
            Some(format!("🔄 Content updated: {}\n{}", url, diff))
        }
        (Change::ChangedWithDiff(diff), MessageFormat::Html) => Some(format!(
            "🔄 <b>Content updated</b>: {}\n<pre>{}</pre>",
            html_escape::encode_text(url),
            html_escape::encode_text(diff)
        )),
    }
}

/// Splits on char boundaries into pieces of at most `max_chars` characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(split);
        chunks.push(chunk);
        rest = tail;
    }

    chunks
}

/// Splits HTML into pieces of at most `max_chars` characters.
///
/// Cuts never fall inside a tag or an entity. Tags open at a cut are closed
/// at the end of the piece and reopened at the start of the next.
pub fn chunk_html(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut open: Vec<(&str, &str)> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    let mut carried = 0;

    for token in html_tokens(text) {
        let token_len = token.chars().count();
        let closers: usize = open.iter().map(|(_, name)| closer_len(name)).sum();
        let reserve = match parse_tag(token) {
            Some(Tag::Open(name)) => closers + closer_len(name),
            Some(Tag::Close(name)) if open.iter().any(|(_, n)| *n == name) => {
                closers - closer_len(name)
            }
            _ => closers,
        };

        if current_len > carried && current_len + token_len + reserve > max_chars {
            close_all(&mut current, &open);
            chunks.push(std::mem::take(&mut current));
            for (tag, _) in &open {
                current.push_str(tag);
            }
            current_len = current.chars().count();
            carried = current_len;
        }

        match parse_tag(token) {
            Some(Tag::Open(name)) => open.push((token, name)),
            Some(Tag::Close(name)) => {
                if let Some(pos) = open.iter().rposition(|(_, n)| *n == name) {
                    open.truncate(pos);
                }
            }
            None => {}
        }
        current.push_str(token);
        current_len += token_len;
    }

    if current_len > carried {
        close_all(&mut current, &open);
        chunks.push(current);
    }

    chunks
}

enum Tag<'a> {
    Open(&'a str),
    Close(&'a str),
}

fn parse_tag(token: &str) -> Option<Tag<'_>> {
    let inner = token.strip_prefix('<')?.strip_suffix('>')?;
    if inner.ends_with('/') {
        return None;
    }
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let name = inner.split(char::is_whitespace).next()?;
    if name.is_empty() {
        return None;
    }
    Some(if closing { Tag::Close(name) } else { Tag::Open(name) })
}

fn closer_len(name: &str) -> usize {
    name.chars().count() + 3
}

fn close_all(out: &mut String, open: &[(&str, &str)]) {
    for (_, name) in open.iter().rev() {
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
}

/// Tags, entities and single characters.
fn html_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        let len = match c {
            '<' => rest.find('>').map_or(1, |end| end + 1),
            '&' => rest
                .char_indices()
                .take(12)
                .find(|&(_, ch)| ch == ';')
                .map_or(1, |(end, _)| end + 1),
            _ => c.len_utf8(),
        };
        let (token, tail) = rest.split_at(len);
        tokens.push(token);
        rest = tail;
    }

    tokens
}

pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB * KIB {
        format!("{:.2} GB", b / KIB / KIB / KIB)
    } else if b >= KIB * KIB {
        format!("{:.2} MB", b / KIB / KIB)
    } else if b >= KIB {
        format!("{:.2} KB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::{RecordingTransport, Sent};
    use super::*;

    fn dispatcher(transport: Arc<RecordingTransport>) -> NotificationDispatcher {
        NotificationDispatcher::new(transport, Duration::from_millis(1), Duration::from_secs(5))
    }

    #[test]
    fn test_chunk_text_sizes() {
        let text = "a".repeat(MAX_MESSAGE_LENGTH * 2 + 10);
        let chunks = chunk_text(&text, MAX_MESSAGE_LENGTH);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), MAX_MESSAGE_LENGTH);
        assert_eq!(chunks[2].len(), 10);
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn test_chunk_text_multibyte() {
        let text = "é".repeat(5);
        let chunks = chunk_text(&text, 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_format_change() {
        assert_eq!(format_change("u", &Change::Unchanged, MessageFormat::Text), None);
        assert!(format_change("u", &Change::InitialSnapshot, MessageFormat::Text)
            .unwrap()
            .contains("Initial content saved"));

        let html = format_change(
            "https://e.com/?a=1&b=2",
            &Change::ChangedWithDiff("-<p>\n+<div>".into()),
            MessageFormat::Html,
        )
        .unwrap();
        assert!(html.contains("&lt;p&gt;"));
        assert!(html.contains("a=1&amp;b=2"));
        assert!(html.contains("<pre>"));
    }

    #[tokio::test]
    async fn test_send_text_chunks_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        let text = format!("{}{}", "x".repeat(MAX_MESSAGE_LENGTH), "tail");

        dispatcher(transport.clone())
            .send_text(7, &text, MessageFormat::Text)
            .await
            .unwrap();

        let texts = transport.texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0].chars().count(), MAX_MESSAGE_LENGTH);
        assert_eq!(texts[1], "tail");
    }

    #[test]
    fn test_chunk_html_reopens_tags_at_cuts() {
        assert_eq!(
            chunk_html("<pre>abcdef</pre>", 14),
            vec!["<pre>abc</pre>", "<pre>def</pre>"]
        );
        assert_eq!(chunk_html("a &amp; b", 4), vec!["a ", "&amp;", " b"]);
        assert!(chunk_html("", 10).is_empty());
    }

    fn balanced(chunk: &str) -> bool {
        chunk.matches("<pre>").count() == chunk.matches("</pre>").count()
            && chunk.matches("<b>").count() == chunk.matches("</b>").count()
    }

    fn entities_whole(chunk: &str) -> bool {
        match chunk.rfind('&') {
            Some(idx) => chunk[idx..].contains(';'),
            None => true,
        }
    }

    #[tokio::test]
    async fn test_large_html_diff_sent_as_well_formed_chunks() {
        let old: String = (0..600).map(|i| format!("<p>row {}</p>\n", i)).collect();
        let new: String = (0..600).map(|i| format!("<p>row {} & more</p>\n", i)).collect();
        let diff = crate::detector::ChangeDetector::default().diff(&old, &new);
        let text = format_change(
            "https://example.com/?a=1&b=2",
            &Change::ChangedWithDiff(diff),
            MessageFormat::Html,
        )
        .unwrap();
        assert!(text.chars().count() > MAX_MESSAGE_LENGTH);

        let transport = Arc::new(RecordingTransport::default());
        dispatcher(transport.clone())
            .send_text(1, &text, MessageFormat::Html)
            .await
            .unwrap();

        let texts = transport.texts();
        assert!(texts.len() > 1);
        for chunk in &texts {
            assert!(chunk.chars().count() <= MAX_MESSAGE_LENGTH);
            assert!(balanced(chunk), "unbalanced chunk: {}", chunk);
            assert!(entities_whole(chunk));
        }
        assert!(texts[1].starts_with("<pre>"));
        assert_eq!(texts.concat().replace("</pre><pre>", ""), text);
    }

    #[tokio::test]
    async fn test_send_media_routes_by_kind_and_truncates_caption() {
        let transport = Arc::new(RecordingTransport::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"0123456789").unwrap();

        let caption = "c".repeat(MAX_CAPTION_LENGTH + 100);
        dispatcher(transport.clone())
            .send_media(3, MediaKind::Video, &path, &caption, None)
            .await
            .unwrap();

        match &transport.sent()[0] {
            Sent::Media { kind, caption, size, .. } => {
                assert_eq!(*kind, MediaKind::Video);
                assert_eq!(caption.chars().count(), MAX_CAPTION_LENGTH);
                assert_eq!(*size, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_message_edited_in_place() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher(transport.clone());

        let id = dispatcher.send_status(4, "starting").await.unwrap();
        dispatcher
            .edit_status(4, id, &"y".repeat(MAX_MESSAGE_LENGTH + 5))
            .await
            .unwrap();

        let edits = transport.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, id);
        assert_eq!(edits[0].1.chars().count(), MAX_MESSAGE_LENGTH);
    }

    struct Collect(Mutex<Vec<Progress>>);

    impl ProgressObserver for Collect {
        fn on_progress(&self, progress: Progress) {
            self.0.lock().unwrap().push(progress);
        }
    }

    #[tokio::test]
    async fn test_progress_forwarded_to_observer() {
        let transport = Arc::new(RecordingTransport::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let observer = Arc::new(Collect(Mutex::new(Vec::new())));
        dispatcher(transport)
            .send_media(1, MediaKind::Document, &path, "doc", Some(observer.clone()))
            .await
            .unwrap();

        let seen = observer.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!((seen[0].bytes_sent, seen[0].bytes_total), (50, 100));
        assert_eq!((seen[1].bytes_sent, seen[1].bytes_total), (100, 100));
    }
}
