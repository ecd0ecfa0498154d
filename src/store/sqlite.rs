use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{PagewatchError, Result};
use crate::domain::{
    ArchiveEntry, CheckUpdate, EventKind, FilterRules, NotificationSettings, Outcome, StatRecord,
    TargetKey, TrackedTarget,
};
use crate::store::Store;

const TARGET_COLUMNS: &str =
    "user_id, url, name, content_hash, content, last_checked, night_mode, resources, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| PagewatchError::Other(format!("Migration failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            PagewatchError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    /// Fixed-width UTC timestamps so that text comparison matches time order.
    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn row_to_target(row: &Row<'_>) -> rusqlite::Result<TrackedTarget> {
        Ok(TrackedTarget {
            user_id: row.get(0)?,
            url: row.get(1)?,
            name: row.get(2)?,
            content_hash: row.get(3)?,
            content: row.get(4)?,
            last_checked: row
                .get::<_, Option<String>>(5)?
                .and_then(|s| Self::parse_datetime(&s)),
            night_mode: row.get::<_, i32>(6)? != 0,
            sent_hashes: HashSet::new(),
            resources: serde_json::from_str(&row.get::<_, String>(7)?).unwrap_or_default(),
            created_at: row
                .get::<_, String>(8)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    fn load_sent_hashes(conn: &Connection, user_id: i64, url: &str) -> Result<HashSet<String>> {
        let mut stmt = conn.prepare(
            "SELECT fingerprint FROM sent_hashes WHERE user_id = ?1 AND url = ?2",
        )?;
        let hashes = stmt
            .query_map(params![user_id, url], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(hashes)
    }

    fn query_targets(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<TrackedTarget>> {
        let mut stmt = conn.prepare(sql)?;
        let mut targets = stmt
            .query_map(args, Self::row_to_target)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for target in &mut targets {
            target.sent_hashes = Self::load_sent_hashes(conn, target.user_id, &target.url)?;
        }

        Ok(targets)
    }
}

impl Store for SqliteStore {
    fn add_target(&self, target: &TrackedTarget) -> Result<bool> {
        let conn = self.conn()?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO targets (user_id, url, name, night_mode, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target.user_id,
                target.url,
                target.name,
                target.night_mode as i32,
                Self::format_datetime(&target.created_at)
            ],
        )?;

        Ok(inserted > 0)
    }

    fn get_target(&self, key: &TargetKey) -> Result<Option<TrackedTarget>> {
        let conn = self.conn()?;

        let target = conn
            .query_row(
                &format!(
                    "SELECT {} FROM targets WHERE user_id = ?1 AND url = ?2",
                    TARGET_COLUMNS
                ),
                params![key.user_id, key.url],
                Self::row_to_target,
            )
            .optional()?;

        match target {
            Some(mut target) => {
                target.sent_hashes = Self::load_sent_hashes(&conn, key.user_id, &key.url)?;
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    fn get_targets_for_user(&self, user_id: i64) -> Result<Vec<TrackedTarget>> {
        let conn = self.conn()?;
        Self::query_targets(
            &conn,
            &format!(
                "SELECT {} FROM targets WHERE user_id = ?1 ORDER BY created_at, url",
                TARGET_COLUMNS
            ),
            params![user_id],
        )
    }

    fn get_all_targets(&self) -> Result<Vec<TrackedTarget>> {
        let conn = self.conn()?;
        Self::query_targets(
            &conn,
            &format!("SELECT {} FROM targets ORDER BY user_id, url", TARGET_COLUMNS),
            [],
        )
    }

    fn delete_target(&self, key: &TargetKey) -> Result<bool> {
        let conn = self.conn()?;

        let deleted = conn.execute(
            "DELETE FROM targets WHERE user_id = ?1 AND url = ?2",
            params![key.user_id, key.url],
        )?;

        Ok(deleted > 0)
    }

    fn set_night_mode(&self, key: &TargetKey, enabled: bool) -> Result<bool> {
        let conn = self.conn()?;

        let updated = conn.execute(
            "UPDATE targets SET night_mode = ?1 WHERE user_id = ?2 AND url = ?3",
            params![enabled as i32, key.user_id, key.url],
        )?;

        Ok(updated > 0)
    }

    fn commit_check(&self, key: &TargetKey, update: &CheckUpdate) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE targets SET content_hash = ?1, content = ?2, last_checked = ?3, resources = ?4
             WHERE user_id = ?5 AND url = ?6",
            params![
                update.content_hash,
                update.content,
                Self::format_datetime(&update.last_checked),
                serde_json::to_string(&update.resources)?,
                key.user_id,
                key.url
            ],
        )?;

        if updated == 0 {
            // Untracked while the check was running; dropping the tx rolls back.
            return Err(PagewatchError::TargetNotFound(key.to_string()));
        }

        let sent_at = Self::format_datetime(&update.last_checked);
        for fingerprint in &update.new_sent_hashes {
            tx.execute(
                "INSERT OR IGNORE INTO sent_hashes (user_id, url, fingerprint, sent_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.user_id, key.url, fingerprint, sent_at],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn increment_stat(
        &self,
        user_id: i64,
        url: &str,
        kind: EventKind,
        outcome: Outcome,
    ) -> Result<()> {
        let conn = self.conn()?;

        let (success, failure, suppressed) = match outcome {
            Outcome::Success => (1, 0, 0),
            Outcome::Failure => (0, 1, 0),
            Outcome::Suppressed => (0, 0, 1),
        };

        conn.execute(
            "INSERT INTO stats (user_id, url, event_kind, success, failure, suppressed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, url, event_kind) DO UPDATE SET
                 success = success + excluded.success,
                 failure = failure + excluded.failure,
                 suppressed = suppressed + excluded.suppressed",
            params![user_id, url, kind.as_str(), success, failure, suppressed],
        )?;

        Ok(())
    }

    fn get_stats(&self, user_id: i64) -> Result<Vec<StatRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT url, event_kind, success, failure, suppressed
             FROM stats WHERE user_id = ?1 ORDER BY url",
        )?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records: BTreeMap<String, StatRecord> = BTreeMap::new();
        for (url, kind, success, failure, suppressed) in rows {
            let kind: EventKind = kind.parse()?;
            let record = records.entry(url.clone()).or_insert_with(|| StatRecord {
                user_id,
                url,
                ..Default::default()
            });
            let counter = record.counter_mut(kind);
            counter.success = success;
            counter.failure = failure;
            counter.suppressed = suppressed;
        }

        Ok(records.into_values().collect())
    }

    fn delete_stats(&self, key: &TargetKey) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM stats WHERE user_id = ?1 AND url = ?2",
            params![key.user_id, key.url],
        )?;
        Ok(deleted)
    }

    fn add_archive(
        &self,
        user_id: i64,
        url: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO archives (user_id, url, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, url, content, Self::format_datetime(&timestamp)],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_archives(&self, key: &TargetKey) -> Result<Vec<ArchiveEntry>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, url, content, timestamp FROM archives
             WHERE user_id = ?1 AND url = ?2 ORDER BY timestamp DESC, id DESC",
        )?;

        let entries = stmt
            .query_map(params![key.user_id, key.url], |row| {
                Ok(ArchiveEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    url: row.get(2)?,
                    content: row.get(3)?,
                    timestamp: row
                        .get::<_, String>(4)
                        .ok()
                        .and_then(|s| Self::parse_datetime(&s))
                        .unwrap_or_else(Utc::now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn delete_archives_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM archives WHERE timestamp < ?1",
            params![Self::format_datetime(&cutoff)],
        )?;
        Ok(deleted)
    }

    fn delete_archives(&self, key: &TargetKey) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM archives WHERE user_id = ?1 AND url = ?2",
            params![key.user_id, key.url],
        )?;
        Ok(deleted)
    }

    fn get_settings(&self, user_id: i64) -> Result<Option<NotificationSettings>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                "SELECT format, filters FROM notification_settings WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((format, filters)) => Ok(Some(NotificationSettings {
                user_id,
                format: format.parse().unwrap_or_default(),
                filters: serde_json::from_str::<FilterRules>(&filters)?,
            })),
            None => Ok(None),
        }
    }

    fn save_settings(&self, settings: &NotificationSettings) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO notification_settings (user_id, format, filters) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET format = ?2, filters = ?3",
            params![
                settings.user_id,
                settings.format.as_str(),
                serde_json::to_string(&settings.filters)?
            ],
        )?;

        Ok(())
    }
}
