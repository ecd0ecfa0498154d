//! The per-target check cycle and the scan that drives it.
//!
//! ```text
//! Idle → Fetching → (SkippedNightMode | Fetched) → Diffing → ExtractingResources
//!      → Filtering → Downloading(1..n) → Notifying → Persisting → Idle
//! ```
//!
//! Any step may fail. A failure is recorded as a failed check and logged;
//! it never escapes [`Tracker::check_target`], so one broken page cannot
//! stop a scan.

mod direct;
mod lease;
mod night;

pub use lease::{Lease, LeaseMap};
pub use night::NightWindow;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::app::{PagewatchError, Result};
use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::dedup::DedupSet;
use crate::detector::{Change, ChangeDetector};
use crate::domain::{
    CheckUpdate, EventKind, NotificationSettings, Outcome, ResourceCandidate, TargetKey,
    TrackedTarget,
};
use crate::download::{DownloadOrchestrator, Downloader};
use crate::extractor::{parse_page, ResourceExtractor};
use crate::fetcher::Fetcher;
use crate::filter::{ResourceFilter, RuleFilter};
use crate::notify::{LogProgress, NotificationDispatcher, ProgressObserver, Transport};
use crate::stats::StatisticsAggregator;
use crate::store::Store;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    SkippedNightMode,
    Fetched,
    Diffing,
    ExtractingResources,
    Filtering,
    Downloading(usize),
    Notifying,
    Persisting,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Downloading(n) => write!(f, "Downloading({})", n),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleStatus {
    Completed,
    /// Night mode is on and the local clock is outside the active window.
    Suppressed,
    /// Another cycle holds the lease, or the tracker is shutting down.
    Busy,
    /// Untracked between listing and checking.
    Missing,
    Failed(String),
}

/// What one check cycle did. Request-scoped; the persistent record of the
/// same facts lives in the stats table.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub key: TargetKey,
    pub status: CycleStatus,
    pub change: Option<Change>,
    /// Classified resources found on the page.
    pub resources: usize,
    pub delivered: usize,
    pub failed_downloads: usize,
    /// Filtered out or already delivered.
    pub skipped: usize,
}

impl CycleReport {
    fn new(key: TargetKey) -> Self {
        Self {
            key,
            status: CycleStatus::Completed,
            change: None,
            resources: 0,
            delivered: 0,
            failed_downloads: 0,
            skipped: 0,
        }
    }

    fn with_status(key: TargetKey, status: CycleStatus) -> Self {
        Self {
            status,
            ..Self::new(key)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub cycles: Vec<CycleReport>,
    pub elapsed: Duration,
}

impl ScanReport {
    pub fn count(&self, pred: impl Fn(&CycleStatus) -> bool) -> usize {
        self.cycles.iter().filter(|c| pred(&c.status)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|s| *s == CycleStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, CycleStatus::Failed(_)))
    }

    pub fn suppressed(&self) -> usize {
        self.count(|s| *s == CycleStatus::Suppressed)
    }

    pub fn busy(&self) -> usize {
        self.count(|s| *s == CycleStatus::Busy)
    }

    pub fn changed(&self) -> usize {
        self.cycles
            .iter()
            .filter(|c| matches!(c.change, Some(Change::ChangedWithDiff(_))))
            .count()
    }

    pub fn delivered(&self) -> usize {
        self.cycles.iter().map(|c| c.delivered).sum()
    }
}

pub struct Tracker<S: Store> {
    store: Arc<S>,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    detector: ChangeDetector,
    extractor: ResourceExtractor,
    filter: Arc<dyn ResourceFilter>,
    orchestrator: DownloadOrchestrator,
    dispatcher: NotificationDispatcher,
    stats: StatisticsAggregator<S>,
    archives: ArchiveStore<S>,
    night: NightWindow,
    retention: chrono::Duration,
    leases: LeaseMap,
    workers: usize,
    clock: Clock,
}

impl<S: Store + Send + Sync + 'static> Tracker<S> {
    pub fn new(
        store: Arc<S>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        transport: Arc<dyn Transport>,
        downloaders: Vec<Arc<dyn Downloader>>,
        config: &Config,
    ) -> Result<Self> {
        let night = NightWindow::from_config(&config.night_mode)
            .map_err(|e| PagewatchError::Config(e.to_string()))?;

        Ok(Self {
            filter: Arc::new(RuleFilter::new(store.clone())),
            stats: StatisticsAggregator::new(store.clone()),
            archives: ArchiveStore::new(store.clone()),
            store,
            fetcher,
            detector: ChangeDetector::default(),
            extractor: ResourceExtractor::new(),
            orchestrator: DownloadOrchestrator::new(downloaders, &config.delivery),
            dispatcher: NotificationDispatcher::new(
                transport,
                config.delivery.message_delay(),
                config.delivery.send_timeout(),
            ),
            night,
            retention: config.archive.retention(),
            leases: LeaseMap::new(),
            workers: config.scheduler.workers.max(1),
            clock: Arc::new(Utc::now),
        })
    }

    pub fn with_filter(mut self, filter: Arc<dyn ResourceFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn stats(&self) -> &StatisticsAggregator<S> {
        &self.stats
    }

    pub fn archives(&self) -> &ArchiveStore<S> {
        &self.archives
    }

    pub fn leases(&self) -> &LeaseMap {
        &self.leases
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn transition(&self, key: &TargetKey, state: CycleState) {
        debug!("{} -> {}", key, state);
    }

    /// Checks every tracked target, at most `workers` at a time, and waits
    /// for all of them.
    pub async fn scan(self: &Arc<Self>) -> Result<ScanReport> {
        let started = Instant::now();
        let targets = self.store.get_all_targets()?;
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let tracker = Arc::clone(self);
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let key = target.key();
                match semaphore.acquire().await {
                    Ok(_permit) => tracker.check_target(&key).await,
                    Err(_) => CycleReport::with_status(key, CycleStatus::Busy),
                }
            }));
        }

        let mut report = ScanReport::default();
        for handle in handles {
            match handle.await {
                Ok(cycle) => report.cycles.push(cycle),
                Err(e) => error!("Check task join error: {}", e),
            }
        }
        report.elapsed = started.elapsed();

        info!(
            "Scan complete: {} checked, {} changed, {} delivered, {} failed, {} suppressed, {} busy ({:.1}s)",
            report.completed(),
            report.changed(),
            report.delivered(),
            report.failed(),
            report.suppressed(),
            report.busy(),
            report.elapsed.as_secs_f64()
        );

        Ok(report)
    }

    /// Runs one full cycle for `key` under its lease. Never fails: errors
    /// end up in the report and the stats table.
    pub async fn check_target(&self, key: &TargetKey) -> CycleReport {
        let Some(_lease) = self.leases.try_acquire(key) else {
            debug!("{} is busy, skipping this tick", key);
            return CycleReport::with_status(key.clone(), CycleStatus::Busy);
        };

        let mut report = CycleReport::new(key.clone());
        if let Err(e) = self.run_cycle(key, &mut report).await {
            warn!("Check of {} failed: {}", key, e);
            self.transition(key, CycleState::Persisting);
            self.stats
                .record_quietly(EventKind::Checks, key.user_id, &key.url, Outcome::Failure);
            report.status = CycleStatus::Failed(e.to_string());
        }

        self.transition(key, CycleState::Idle);
        report
    }

    async fn run_cycle(&self, key: &TargetKey, report: &mut CycleReport) -> Result<()> {
        let Some(target) = self.store.get_target(key)? else {
            debug!("{} was untracked before its check", key);
            report.status = CycleStatus::Missing;
            return Ok(());
        };

        let now = self.now();
        if self.night.suppresses(target.night_mode, now) {
            self.transition(key, CycleState::SkippedNightMode);
            self.stats
                .record(EventKind::Checks, key.user_id, &key.url, Outcome::Suppressed)?;
            report.status = CycleStatus::Suppressed;
            return Ok(());
        }

        self.transition(key, CycleState::Fetching);
        let fetched = self.fetcher.fetch(&target.url).await?;
        self.transition(key, CycleState::Fetched);
        let page = parse_page(&fetched.final_url, &fetched.body);

        self.transition(key, CycleState::Diffing);
        let detection = self
            .detector
            .detect(&target.content_hash, target.content.as_deref(), &page.text);
        self.archives.append(key.user_id, &key.url, &page.text, now)?;

        self.transition(key, CycleState::ExtractingResources);
        let candidates = self.extractor.extract(&page.links);
        report.resources = candidates.len();

        self.transition(key, CycleState::Filtering);
        let settings = self
            .store
            .get_settings(key.user_id)?
            .unwrap_or_else(|| NotificationSettings::new(key.user_id));
        let mut dedup = DedupSet::new(target.sent_hashes.clone());
        let eligible: Vec<_> = candidates
            .iter()
            .filter(|c| dedup.is_new(&c.fingerprint) && self.filter.accept(c, key.user_id))
            .collect();
        report.skipped = candidates.len() - eligible.len();

        for (i, candidate) in eligible.iter().enumerate() {
            self.transition(key, CycleState::Downloading(i + 1));
            let file_name = candidate.file_name();
            let caption = format!("{}: {}", target.display_name(), file_name);
            let observer: Arc<dyn ProgressObserver> = Arc::new(LogProgress::new(file_name));

            match self
                .orchestrator
                .deliver(
                    candidate,
                    key.user_id,
                    &caption,
                    settings.filters.max_size_hint,
                    &self.dispatcher,
                    Some(observer),
                )
                .await
            {
                Ok(delivered) => {
                    dedup.mark_sent(&candidate.fingerprint);
                    report.delivered += 1;
                    info!(
                        "Delivered {} to user {} in {} part(s)",
                        candidate.url, key.user_id, delivered.parts
                    );
                    self.stats.record_quietly(
                        EventKind::Downloads,
                        key.user_id,
                        &key.url,
                        Outcome::Success,
                    );
                }
                Err(e) => {
                    report.failed_downloads += 1;
                    warn!("Could not deliver {}: {}", candidate.url, e);
                    self.stats.record_quietly(
                        EventKind::Downloads,
                        key.user_id,
                        &key.url,
                        Outcome::Failure,
                    );
                }
            }
        }

        self.transition(key, CycleState::Notifying);
        let notified = match self
            .dispatcher
            .notify_change(key.user_id, &key.url, &detection.change, settings.format)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Could not notify user {} about {}: {}", key.user_id, key.url, e);
                false
            }
        };
        if let Change::ChangedWithDiff(_) = detection.change {
            let outcome = if notified {
                Outcome::Success
            } else {
                Outcome::Failure
            };
            self.stats
                .record_quietly(EventKind::ContentChanges, key.user_id, &key.url, outcome);
        }

        self.transition(key, CycleState::Persisting);
        let update = check_update(
            &target,
            detection.content_hash,
            page.text,
            notified,
            now,
            &candidates,
            &dedup,
        );
        match self.store.commit_check(key, &update) {
            Err(PagewatchError::TargetNotFound(_)) => {
                debug!("{} was untracked during its check", key);
                report.status = CycleStatus::Missing;
                report.change = Some(detection.change);
                return Ok(());
            }
            result => result?,
        }
        self.stats
            .record(EventKind::Checks, key.user_id, &key.url, Outcome::Success)?;

        report.change = Some(detection.change);
        Ok(())
    }

    /// Deletes archives past the configured retention.
    pub fn sweep_archives(&self) -> Result<usize> {
        self.archives.sweep(self.retention, self.now())
    }

    /// Stops new cycles from starting. Cycles already holding a lease finish.
    pub fn shutdown(&self) {
        self.leases.close();
    }
}

/// An unsent change notice keeps the previous hash so the change is
/// reported again next cycle.
fn check_update(
    target: &TrackedTarget,
    content_hash: String,
    content: String,
    notified: bool,
    now: DateTime<Utc>,
    candidates: &[ResourceCandidate],
    dedup: &DedupSet,
) -> CheckUpdate {
    let (content_hash, content) = if notified {
        (content_hash, content)
    } else {
        (
            target.content_hash.clone(),
            target.content.clone().unwrap_or_default(),
        )
    };

    CheckUpdate {
        content_hash,
        content,
        last_checked: now,
        resources: candidates.iter().map(|c| c.url.clone()).collect(),
        new_sent_hashes: dedup.newly_sent().to_vec(),
    }
}
