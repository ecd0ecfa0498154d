//! Background daemon that scans tracked pages on a fixed interval.
//!
//! Each tick spawns a scan and sweeps expired archives. A slow scan may still
//! be running when the next tick fires; per-target leases make the overlap
//! harmless. On SIGINT/SIGTERM no new cycles start, running ones finish, and
//! the daemon waits for them before removing its PID file.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::{AppContext, PagewatchError};
use crate::config::SchedulerConfig;
use crate::store::SqliteStore;
use crate::tracker::Tracker;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Scan interval in seconds (default: 1800 = 30 minutes)
    pub interval_secs: u64,
    /// Whether to scan immediately on start
    pub check_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for DaemonConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            interval_secs: config.interval().as_secs(),
            check_on_start: config.check_on_start,
        }
    }
}

impl DaemonConfig {
    /// Parse interval string like "1h", "30m", "6h", "1d"
    pub fn parse_interval(s: &str) -> Result<u64, String> {
        let s = s.trim().to_lowercase();

        let secs = if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| h * 3600)
                .map_err(|_| format!("Invalid hours: {}", hours))
        } else if let Some(minutes) = s.strip_suffix('m') {
            minutes
                .parse::<u64>()
                .map(|m| m * 60)
                .map_err(|_| format!("Invalid minutes: {}", minutes))
        } else if let Some(days) = s.strip_suffix('d') {
            days.parse::<u64>()
                .map(|d| d * 86400)
                .map_err(|_| format!("Invalid days: {}", days))
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map_err(|_| format!("Invalid seconds: {}", secs))
        } else {
            s.parse::<u64>()
                .map_err(|_| format!("Invalid interval: {}. Use format like '30m', '1h', '1d'", s))
        }?;

        if secs == 0 {
            return Err("Interval must be positive".to_string());
        }
        Ok(secs)
    }

    /// Format interval for display
    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs.is_multiple_of(86400) {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs.is_multiple_of(3600) {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs.is_multiple_of(60) {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

/// Daemon runner
pub struct Daemon {
    tracker: Arc<Tracker<SqliteStore>>,
    config: DaemonConfig,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Daemon {
    pub fn new(ctx: &AppContext, config: DaemonConfig) -> Self {
        Self::with_tracker(ctx.tracker.clone(), config)
    }

    pub fn with_tracker(tracker: Arc<Tracker<SqliteStore>>, config: DaemonConfig) -> Self {
        Self {
            tracker,
            config,
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get the PID file path
    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("pagewatch").join("daemon.pid"))
    }

    /// Check if another daemon is already running
    pub fn is_running() -> bool {
        read_pid().is_some_and(Self::process_exists)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(&self) -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    /// Run the daemon until a shutdown signal arrives.
    pub async fn run(&self) -> crate::app::Result<()> {
        if Self::is_running() {
            return Err(PagewatchError::Other(
                "Another daemon instance is already running".to_string(),
            ));
        }

        self.write_pid_file().map_err(|e| {
            PagewatchError::Other(format!("Failed to write PID file: {}", e))
        })?;

        let running = self.running.clone();
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown_signal().await {
                error!("Failed to listen for shutdown signals: {}", e);
                return;
            }
            info!("Shutdown requested, letting in-flight checks finish");
            running.store(false, Ordering::SeqCst);
            tracker.shutdown();
            shutdown.notify_one();
        });

        info!(
            "pagewatch daemon started (interval: {}, PID: {})",
            DaemonConfig::format_interval(self.config.interval_secs),
            std::process::id()
        );

        self.run_loop().await;

        info!("Daemon shutting down");
        self.remove_pid_file();
        Ok(())
    }

    async fn run_loop(&self) {
        let mut scans: Vec<JoinHandle<()>> = Vec::new();

        if self.config.check_on_start {
            info!("Running initial scan");
            scans.push(self.spawn_tick());
        }

        let mut timer = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // Skip the first immediate tick

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = timer.tick() => {}
                _ = self.shutdown.notified() => break,
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            scans.retain(|handle| !handle.is_finished());
            if !scans.is_empty() {
                warn!("Previous scan still running; busy targets will be skipped");
            }
            info!("Running scheduled scan");
            scans.push(self.spawn_tick());
        }

        for handle in scans {
            if let Err(e) = handle.await {
                error!("Scan task join error: {}", e);
            }
        }
    }

    fn spawn_tick(&self) -> JoinHandle<()> {
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker.scan().await {
                error!("Scan failed: {}", e);
            }
            if let Err(e) = tracker.sweep_archives() {
                error!("Archive sweep failed: {}", e);
            }
        })
    }

    /// Stop the daemon (called externally)
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.tracker.shutdown();
        self.shutdown.notify_one();
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

fn read_pid() -> Option<u32> {
    let pid_path = Daemon::pid_file_path()?;
    fs::read_to_string(pid_path).ok()?.trim().parse().ok()
}

/// Stop a running daemon by reading PID file and sending signal
pub fn stop_daemon() -> Result<(), String> {
    let pid_path =
        Daemon::pid_file_path().ok_or_else(|| "Could not determine PID file path".to_string())?;

    if !pid_path.exists() {
        return Err("No daemon is running (PID file not found)".to_string());
    }

    let pid = read_pid().ok_or_else(|| "Invalid PID in PID file".to_string())?;

    #[cfg(unix)]
    {
        use std::process::Command;
        let status = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status()
            .map_err(|e| format!("Failed to send signal: {}", e))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("Failed to stop daemon (PID {})", pid))
        }
    }

    #[cfg(windows)]
    {
        use std::process::Command;
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .status()
            .map_err(|e| format!("Failed to stop process: {}", e))?;

        if status.success() {
            let _ = fs::remove_file(&pid_path);
            Ok(())
        } else {
            Err(format!("Failed to stop daemon (PID {})", pid))
        }
    }
}

/// Check daemon status
pub fn daemon_status() -> String {
    let has_pid_file = Daemon::pid_file_path().is_some_and(|p| p.exists());
    match read_pid() {
        Some(pid) if Daemon::process_exists(pid) => format!("Daemon is running (PID: {})", pid),
        Some(_) => "Daemon is not running (stale PID file)".to_string(),
        None if has_pid_file => "Daemon is not running (unreadable PID file)".to_string(),
        None => "Daemon is not running".to_string(),
    }
}
