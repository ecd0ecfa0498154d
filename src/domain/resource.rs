use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Classification of a downloadable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Document,
    Image,
    Audio,
    Video,
}

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "flac", "aac", "opus"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v"];

impl MediaKind {
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Document,
        MediaKind::Image,
        MediaKind::Audio,
        MediaKind::Video,
    ];

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Document => DOCUMENT_EXTENSIONS,
            MediaKind::Image => IMAGE_EXTENSIONS,
            MediaKind::Audio => AUDIO_EXTENSIONS,
            MediaKind::Video => VIDEO_EXTENSIONS,
        }
    }

    /// Classify a lowercase extension without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.extensions().contains(&ext.as_str()))
    }

    /// Classify a local file, falling back to `Document` for anything unknown.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .unwrap_or(MediaKind::Document)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Document => "document",
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downloadable asset discovered on a tracked page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCandidate {
    pub url: String,
    pub kind: MediaKind,
    pub fingerprint: String,
}

impl ResourceCandidate {
    pub fn new(url: String, kind: MediaKind) -> Self {
        let fingerprint = fingerprint(&url);
        Self {
            url,
            kind,
            fingerprint,
        }
    }

    /// Last path segment of the URL, used as the local file name.
    pub fn file_name(&self) -> String {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        let name = path.rsplit('/').next().unwrap_or_default();
        let sanitized: String = name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();

        if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
            format!("download.{}", self.kind.extensions()[0])
        } else {
            sanitized
        }
    }
}

/// Deterministic SHA-256 fingerprint of a resource URL or page content.
pub fn fingerprint(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
