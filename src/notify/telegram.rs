use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;

use crate::app::{PagewatchError, Result};
use crate::domain::MessageFormat;
use crate::notify::{ProgressCallback, Transport};

const UPLOAD_CHUNK: usize = 64 * 1024;

/// Bot API envelope: `{"ok": bool, "result": ..., "description": ...}`.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<serde_json::Value>,
}

/// Sends messages through the Telegram Bot HTTP API.
pub struct TelegramTransport {
    client: Client,
    endpoint: String,
}

impl TelegramTransport {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PagewatchError::Delivery(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    async fn check(response: reqwest::Response, method: &str) -> Result<Option<serde_json::Value>> {
        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| PagewatchError::Delivery(format!("{}: unreadable response ({})", method, e)))?;

        if !body.ok {
            return Err(PagewatchError::Delivery(format!(
                "{} failed with {}: {}",
                method,
                status,
                body.description.unwrap_or_else(|| "no description".into())
            )));
        }
        Ok(body.result)
    }

    async fn upload(
        &self,
        method: &str,
        field: &'static str,
        user_id: i64,
        path: &Path,
        caption: &str,
        progress: ProgressCallback,
    ) -> Result<()> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        progress(0, total);
        let stream = futures::stream::unfold(
            (file, 0u64, progress),
            move |(mut file, sent, progress)| async move {
                let mut buf = vec![0u8; UPLOAD_CHUNK];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        let sent = sent + n as u64;
                        progress(sent, total);
                        Some((Ok::<_, std::io::Error>(buf), (file, sent, progress)))
                    }
                    Err(e) => Some((Err(e), (file, sent, progress))),
                }
            },
        );

        let part = Part::stream_with_length(Body::wrap_stream(stream), total).file_name(file_name);
        let form = Form::new()
            .text("chat_id", user_id.to_string())
            .text("caption", caption.to_string())
            .part(field, part);

        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PagewatchError::Delivery(format!("{}: {}", method, e)))?;

        Self::check(response, method).await.map(|_| ())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, user_id: i64, text: &str, format: MessageFormat) -> Result<i64> {
        let mut payload = json!({
            "chat_id": user_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if format == MessageFormat::Html {
            payload["parse_mode"] = json!("HTML");
        }

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| PagewatchError::Delivery(format!("sendMessage: {}", e)))?;

        let result = Self::check(response, "sendMessage").await?;
        Ok(result
            .and_then(|r| r.get("message_id").and_then(|id| id.as_i64()))
            .unwrap_or_default())
    }

    async fn send_document(&self, user_id: i64, path: &Path, caption: &str, progress: ProgressCallback) -> Result<()> {
        self.upload("sendDocument", "document", user_id, path, caption, progress)
            .await
    }

    async fn send_photo(&self, user_id: i64, path: &Path, caption: &str, progress: ProgressCallback) -> Result<()> {
        self.upload("sendPhoto", "photo", user_id, path, caption, progress)
            .await
    }

    async fn send_audio(&self, user_id: i64, path: &Path, caption: &str, progress: ProgressCallback) -> Result<()> {
        self.upload("sendAudio", "audio", user_id, path, caption, progress)
            .await
    }

    async fn send_video(&self, user_id: i64, path: &Path, caption: &str, progress: ProgressCallback) -> Result<()> {
        self.upload("sendVideo", "video", user_id, path, caption, progress)
            .await
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("editMessageText"))
            .json(&json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| PagewatchError::Delivery(format!("editMessageText: {}", e)))?;

        Self::check(response, "editMessageText").await.map(|_| ())
    }
}
