use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use url::Url;

use crate::app::{AppContext, PagewatchError, Result};
use crate::domain::{MediaKind, NotificationSettings, TargetKey, TrackedTarget};
use crate::export::{self, ExportFormat};
use crate::notify::{format_size, truncate_chars};
use crate::store::Store;
use crate::tracker::CycleStatus;

/// Rejects anything that is not an absolute http(s) URL.
pub fn validate_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim())?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(PagewatchError::Validation(format!(
            "Unsupported URL scheme: {}",
            other
        ))),
    }
}

fn target_key(user_id: i64, url: &str) -> Result<TargetKey> {
    Ok(TargetKey::new(user_id, validate_url(url)?))
}

pub async fn track(
    ctx: &AppContext,
    user_id: i64,
    url: &str,
    name: Option<String>,
    night_mode: bool,
) -> Result<()> {
    let url = validate_url(url)?;
    let mut target = TrackedTarget::new(user_id, url.clone());
    target.name = name;
    target.night_mode = night_mode;

    if !ctx.store.add_target(&target)? {
        println!("Already tracking: {}", url);
        return Ok(());
    }
    println!("Tracking {}", url);

    let report = ctx.tracker.check_target(&target.key()).await;
    match report.status {
        CycleStatus::Completed => {
            println!("Initial snapshot saved, {} resources found", report.resources);
            if report.delivered > 0 {
                println!("Delivered {} files", report.delivered);
            }
        }
        CycleStatus::Suppressed => {
            println!("Night mode is active; the first check will run in the daytime window")
        }
        CycleStatus::Failed(e) => eprintln!("First check failed: {}", e),
        CycleStatus::Busy | CycleStatus::Missing => {}
    }

    Ok(())
}

pub fn untrack(ctx: &AppContext, user_id: i64, url: &str, purge: bool) -> Result<()> {
    let key = target_key(user_id, url)?;
    if !ctx.store.delete_target(&key)? {
        return Err(PagewatchError::TargetNotFound(key.to_string()));
    }
    println!("Stopped tracking {}", url);

    if purge {
        let archives = ctx.store.delete_archives(&key)?;
        let stats = ctx.store.delete_stats(&key)?;
        println!("Deleted {} archives and {} stat rows", archives, stats);
    }

    Ok(())
}

pub fn list(ctx: &AppContext, user_id: i64) -> Result<()> {
    let targets = ctx.store.get_targets_for_user(user_id)?;

    if targets.is_empty() {
        println!("No tracked pages");
        return Ok(());
    }

    for target in targets {
        let checked = target
            .last_checked
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let night = if target.night_mode { ", night mode" } else { "" };

        println!(
            "{} ({} files sent, checked {}{})\n  {}",
            target.display_name(),
            target.sent_hashes.len(),
            checked,
            night,
            target.url
        );
    }

    Ok(())
}

pub fn resources(ctx: &AppContext, user_id: i64, url: &str) -> Result<()> {
    let key = target_key(user_id, url)?;
    let target = ctx
        .store
        .get_target(&key)?
        .ok_or_else(|| PagewatchError::TargetNotFound(key.to_string()))?;

    if target.resources.is_empty() {
        println!("No resources found at the last check");
        return Ok(());
    }

    for resource in &target.resources {
        let sent = if target
            .sent_hashes
            .contains(&crate::domain::fingerprint(resource))
        {
            "sent"
        } else {
            "    "
        };
        println!("{} {}", sent, resource);
    }

    Ok(())
}

pub fn set_night_mode(ctx: &AppContext, user_id: i64, url: &str, enabled: bool) -> Result<()> {
    let key = target_key(user_id, url)?;
    if !ctx.store.set_night_mode(&key, enabled)? {
        return Err(PagewatchError::TargetNotFound(key.to_string()));
    }
    println!(
        "Night mode {} for {}",
        if enabled { "enabled" } else { "disabled" },
        url
    );
    Ok(())
}

pub async fn check(ctx: &AppContext) -> Result<()> {
    let report = ctx.tracker.scan().await?;

    if report.cycles.is_empty() {
        println!("No tracked pages");
        return Ok(());
    }

    for cycle in &report.cycles {
        if let CycleStatus::Failed(e) = &cycle.status {
            eprintln!("  Error checking {}: {}", cycle.key.url, e);
        } else if cycle.delivered > 0 {
            println!("  {} files delivered from {}", cycle.delivered, cycle.key.url);
        }
    }

    println!(
        "Check complete: {} checked, {} changed, {} delivered, {} failed, {} suppressed",
        report.completed(),
        report.changed(),
        report.delivered(),
        report.failed(),
        report.suppressed()
    );
    Ok(())
}

pub fn stats(ctx: &AppContext, user_id: i64) -> Result<()> {
    let summary = ctx.tracker.stats().summarize(user_id)?;

    println!("Tracked pages:        {}", summary.total_tracked);
    println!(
        "Checks:               {} ok, {} failed, {} suppressed",
        summary.success_checks, summary.failed_checks, summary.suppressed_checks
    );
    println!(
        "Downloads:            {} ok, {} failed",
        summary.success_downloads, summary.failed_downloads
    );
    println!("Content changes:      {}", summary.content_changes);
    println!("Uptime:               {:.1}%", summary.uptime_percentage());
    Ok(())
}

pub fn archives(ctx: &AppContext, user_id: i64, url: &str, limit: usize) -> Result<()> {
    let key = target_key(user_id, url)?;
    let entries = ctx.tracker.archives().list(key.user_id, &key.url)?;

    if entries.is_empty() {
        println!("No archives");
        return Ok(());
    }

    for entry in entries.iter().take(limit) {
        let preview: String = truncate_chars(&entry.content, 80)
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();
        println!(
            "{} ({} bytes) {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.content.len(),
            preview
        );
    }

    if entries.len() > limit {
        println!("... {} more", entries.len() - limit);
    }
    Ok(())
}

pub fn sweep(ctx: &AppContext) -> Result<()> {
    let deleted = ctx.tracker.sweep_archives()?;
    println!(
        "Deleted {} archives older than {} days",
        deleted, ctx.config.archive.retention_days
    );
    Ok(())
}

pub async fn download(ctx: &AppContext, user_id: i64, url: &str) -> Result<()> {
    let url = validate_url(url)?;
    let delivered = ctx.tracker.download(user_id, &url).await?;
    println!(
        "Sent {} ({}) in {} part(s)",
        url,
        format_size(delivered.size),
        delivered.parts
    );
    Ok(())
}

pub fn export(ctx: &AppContext, user_id: i64, format: &str, output: Option<&Path>) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    let data = export::collect(ctx.store.as_ref(), user_id, chrono::Utc::now())?;

    match output {
        Some(path) => {
            export::write(&data, format, BufWriter::new(File::create(path)?))?;
            println!(
                "Exported {} pages for user {} to {}",
                data.targets.len(),
                user_id,
                path.display()
            );
        }
        None => export::write(&data, format, io::stdout().lock())?,
    }
    Ok(())
}

/// Changes applied by `pagewatch settings`.
#[derive(Debug, Default)]
pub struct SettingsUpdate {
    pub format: Option<String>,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub kinds: Vec<String>,
    pub keywords: Vec<String>,
    pub max_size: Option<u64>,
    pub clear: bool,
}

impl SettingsUpdate {
    fn is_empty(&self) -> bool {
        self.format.is_none()
            && self.allow.is_empty()
            && self.deny.is_empty()
            && self.kinds.is_empty()
            && self.keywords.is_empty()
            && self.max_size.is_none()
            && !self.clear
    }

    pub fn apply(self, settings: &mut NotificationSettings) -> Result<()> {
        if self.clear {
            settings.filters = Default::default();
        }
        if let Some(format) = self.format {
            settings.format = format.parse()?;
        }

        let filters = &mut settings.filters;
        if !self.allow.is_empty() {
            filters.allow_extensions = normalize_extensions(self.allow);
        }
        if !self.deny.is_empty() {
            filters.deny_extensions = normalize_extensions(self.deny);
        }
        if !self.kinds.is_empty() {
            filters.kinds = self
                .kinds
                .iter()
                .map(|k| parse_kind(k))
                .collect::<Result<_>>()?;
        }
        if !self.keywords.is_empty() {
            filters.keywords = self.keywords;
        }
        if self.max_size.is_some() {
            filters.max_size_hint = self.max_size;
        }
        Ok(())
    }
}

fn normalize_extensions(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn parse_kind(s: &str) -> Result<MediaKind> {
    MediaKind::ALL
        .into_iter()
        .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| PagewatchError::Validation(format!("Unknown media kind: {}", s)))
}

pub fn settings(ctx: &AppContext, user_id: i64, update: SettingsUpdate) -> Result<()> {
    let mut settings = ctx
        .store
        .get_settings(user_id)?
        .unwrap_or_else(|| NotificationSettings::new(user_id));

    if !update.is_empty() {
        update.apply(&mut settings)?;
        ctx.store.save_settings(&settings)?;
        println!("Settings saved");
    }

    let filters = &settings.filters;
    let or_any = |list: &[String]| {
        if list.is_empty() {
            "any".to_string()
        } else {
            list.join(", ")
        }
    };
    let kinds: Vec<String> = filters.kinds.iter().map(|k| k.to_string()).collect();

    println!("Format:     {}", settings.format.as_str());
    println!("Allow:      {}", or_any(&filters.allow_extensions));
    println!("Deny:       {}", filters.deny_extensions.join(", "));
    println!("Kinds:      {}", or_any(&kinds));
    println!("Keywords:   {}", or_any(&filters.keywords));
    println!(
        "Max size:   {}",
        filters
            .max_size_hint
            .map(format_size)
            .unwrap_or_else(|| "default".to_string())
    );
    Ok(())
}
