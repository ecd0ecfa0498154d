//! Per-user export of tracked pages, statistics and archives.
//!
//! JSON carries everything, archived snapshots included. CSV is one row per
//! tracked page with its counters flattened into columns.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::app::{PagewatchError, Result};
use crate::domain::{ArchiveEntry, Counter, StatRecord, StatsSummary};
use crate::stats::summarize_records;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = PagewatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(PagewatchError::Validation(format!(
                "Invalid export format: {} (use json or csv)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserExport {
    pub user_id: i64,
    pub exported_at: DateTime<Utc>,
    pub summary: StatsSummary,
    pub targets: Vec<TargetExport>,
    /// Every stats row of the user, untracked pages included.
    pub stats: Vec<StatRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetExport {
    pub url: String,
    pub name: Option<String>,
    pub night_mode: bool,
    pub created_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub resources: Vec<String>,
    pub files_sent: usize,
    pub checks: Counter,
    pub downloads: Counter,
    pub content_changes: Counter,
    /// Newest first.
    pub archives: Vec<ArchiveEntry>,
}

/// Gathers everything stored for `user_id`.
pub fn collect<S: Store>(store: &S, user_id: i64, now: DateTime<Utc>) -> Result<UserExport> {
    let stats = store.get_stats(user_id)?;
    let targets = store.get_targets_for_user(user_id)?;

    let mut exported = Vec::with_capacity(targets.len());
    for target in targets {
        let record = stats
            .iter()
            .find(|r| r.url == target.url)
            .cloned()
            .unwrap_or_default();
        let archives = store.get_archives(&target.key())?;

        exported.push(TargetExport {
            files_sent: target.sent_hashes.len(),
            url: target.url,
            name: target.name,
            night_mode: target.night_mode,
            created_at: target.created_at,
            last_checked: target.last_checked,
            content_hash: target.content_hash,
            resources: target.resources,
            checks: record.checks,
            downloads: record.downloads,
            content_changes: record.content_changes,
            archives,
        });
    }

    Ok(UserExport {
        user_id,
        exported_at: now,
        summary: summarize_records(exported.len() as i64, &stats),
        targets: exported,
        stats,
    })
}

pub fn write<W: Write>(export: &UserExport, format: ExportFormat, out: W) -> Result<()> {
    match format {
        ExportFormat::Json => write_json(export, out),
        ExportFormat::Csv => write_csv(export, out),
    }
}

pub fn write_json<W: Write>(export: &UserExport, mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, export)?;
    out.write_all(b"\n")?;
    Ok(())
}

const CSV_HEADER: [&str; 16] = [
    "user_id",
    "url",
    "name",
    "night_mode",
    "created_at",
    "last_checked",
    "resources",
    "files_sent",
    "checks_success",
    "checks_failure",
    "checks_suppressed",
    "downloads_success",
    "downloads_failure",
    "content_changes",
    "archives",
    "latest_archive",
];

pub fn write_csv<W: Write>(export: &UserExport, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(CSV_HEADER)?;

    let timestamp = |dt: &DateTime<Utc>| dt.to_rfc3339_opts(SecondsFormat::Secs, true);

    for target in &export.targets {
        writer.write_record([
            export.user_id.to_string(),
            target.url.clone(),
            target.name.clone().unwrap_or_default(),
            target.night_mode.to_string(),
            timestamp(&target.created_at),
            target.last_checked.as_ref().map(timestamp).unwrap_or_default(),
            target.resources.len().to_string(),
            target.files_sent.to_string(),
            target.checks.success.to_string(),
            target.checks.failure.to_string(),
            target.checks.suppressed.to_string(),
            target.downloads.success.to_string(),
            target.downloads.failure.to_string(),
            target.content_changes.success.to_string(),
            target.archives.len().to_string(),
            target
                .archives
                .first()
                .map(|a| timestamp(&a.timestamp))
                .unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
