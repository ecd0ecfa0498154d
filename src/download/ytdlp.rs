use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::download::Downloader;

/// Delegates to an external `yt-dlp` binary.
///
/// The child is killed if the attempt is cancelled by the orchestrator's
/// timeout.
pub struct YtDlpDownloader {
    program: String,
}

impl YtDlpDownloader {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, url: &str, dest: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--no-playlist")
            .arg("--no-progress")
            .arg("--quiet")
            .arg("--force-overwrites")
            .arg("-o")
            .arg(dest)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn attempt(&self, url: &str, dest: &Path) -> bool {
        let output = match self.command(url, dest).output().await {
            Ok(output) => output,
            Err(e) => {
                debug!("Could not run {}: {}", self.program, e);
                return false;
            }
        };

        if !output.status.success() {
            debug!(
                "{} exited with {} for {}: {}",
                self.program,
                output.status,
                url,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return false;
        }

        tokio::fs::try_exists(dest).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_fails_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = YtDlpDownloader::new("pagewatch-no-such-binary");
        assert!(
            !downloader
                .attempt("https://example.com/a.mp4", &dir.path().join("a.mp4"))
                .await
        );
    }

    #[test]
    fn test_command_arguments() {
        let downloader = YtDlpDownloader::new("yt-dlp");
        let cmd = downloader.command("https://example.com/a.mp4", Path::new("/tmp/a.mp4"));
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/a.mp4"));
        assert!(args.windows(2).any(|w| w[0] == "-o" && w[1] == "/tmp/a.mp4"));
    }
}
