//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::HistoryStore;

/// Nanosecond precision keeps load/save round-trips exact.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut MonitoredTarget) -> Result<i64, DbError> {
        dedup_subscribers(&mut target.subscribers);
        let subscribers = encode_subscribers(&target.subscribers);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (name, url, owner, subscribers, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target.name,
                target.url,
                target.owner,
                subscribers,
                format_db_time(target.created_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<MonitoredTarget>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, url, owner, subscribers, created_at FROM targets ORDER BY id ASC",
        )?;

        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<MonitoredTarget, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, url, owner, subscribers, created_at FROM targets WHERE id = ?1",
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Delete a target and its history.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM status_periods WHERE target_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    /// Add a subscriber to a target. Adding an existing subscriber is a no-op.
    pub fn add_subscriber(&self, id: i64, subscriber: &str) -> Result<MonitoredTarget, DbError> {
        self.update_subscribers(id, |subs| {
            if !subs.iter().any(|s| s == subscriber) {
                subs.push(subscriber.to_string());
            }
        })
    }

    /// Remove a subscriber from a target.
    pub fn remove_subscriber(&self, id: i64, subscriber: &str) -> Result<MonitoredTarget, DbError> {
        self.update_subscribers(id, |subs| subs.retain(|s| s != subscriber))
    }

    fn update_subscribers<F>(&self, id: i64, f: F) -> Result<MonitoredTarget, DbError>
    where
        F: FnOnce(&mut Vec<String>),
    {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut target = tx
            .query_row(
                "SELECT id, name, url, owner, subscribers, created_at FROM targets WHERE id = ?1",
                params![id],
                target_from_row,
            )
            .optional()?
            .ok_or(DbError::NotFound)?;
        f(&mut target.subscribers);

        let updated = tx.execute(
            "UPDATE targets SET subscribers = ?1 WHERE id = ?2",
            params![encode_subscribers(&target.subscribers), id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit()?;
        Ok(target)
    }

    // --- Status history ---

    /// Get the status history of a target, oldest period first.
    pub fn get_history(&self, target_id: i64) -> Result<Vec<StatusPeriod>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, status_code, from_time, to_time FROM status_periods
             WHERE target_id = ?1 ORDER BY seq ASC",
        )?;

        let history = stmt
            .query_map(params![target_id], |row| {
                let status: String = row.get(0)?;
                let to_time: Option<String> = row.get(3)?;
                Ok(StatusPeriod {
                    status: status.parse().map_err(|e: String| conversion_error(0, e))?,
                    status_code: row.get(1)?,
                    from: time_column(row, 2)?,
                    to: to_time.map(|s| parse_time_column(3, &s)).transpose()?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(history)
    }

    /// Replace the status history of a target in a single transaction.
    pub fn replace_history(&self, target_id: i64, history: &[StatusPeriod]) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM targets WHERE id = ?1",
            params![target_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(DbError::NotFound);
        }

        tx.execute("DELETE FROM status_periods WHERE target_id = ?1", params![target_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO status_periods (target_id, seq, status, status_code, from_time, to_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for (seq, period) in history.iter().enumerate() {
                stmt.execute(params![
                    target_id,
                    seq as i64,
                    period.status.as_str(),
                    period.status_code,
                    format_db_time(period.from),
                    period.to.map(format_db_time),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

impl HistoryStore for Store {
    fn list_targets(&self) -> Result<Vec<MonitoredTarget>, DbError> {
        self.get_targets()
    }

    fn load_history(&self, target_id: i64) -> Result<Vec<StatusPeriod>, DbError> {
        self.get_history(target_id)
    }

    fn save_history(&self, target_id: i64, history: &[StatusPeriod]) -> Result<(), DbError> {
        self.replace_history(target_id, history)
    }
}

fn target_from_row(row: &Row<'_>) -> SqlResult<MonitoredTarget> {
    let subscribers: String = row.get(4)?;
    Ok(MonitoredTarget {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        owner: row.get(3)?,
        subscribers: serde_json::from_str(&subscribers)
            .map_err(|e| conversion_error(4, e.to_string()))?,
        created_at: time_column(row, 5)?,
    })
}

fn encode_subscribers(subscribers: &[String]) -> String {
    serde_json::to_string(subscribers).unwrap_or_else(|_| "[]".to_string())
}

fn dedup_subscribers(subscribers: &mut Vec<String>) {
    let mut seen = Vec::with_capacity(subscribers.len());
    subscribers.retain(|s| {
        if seen.contains(s) {
            false
        } else {
            seen.push(s.clone());
            true
        }
    });
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_time_column(idx, &s)
}

fn parse_time_column(idx: usize, s: &str) -> SqlResult<DateTime<Utc>> {
    parse_db_time(s).ok_or_else(|| conversion_error(idx, format!("invalid timestamp: {}", s)))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::NamedTempFile;

    fn new_target(name: &str) -> MonitoredTarget {
        MonitoredTarget {
            name: name.to_string(),
            url: "https://example.com".to_string(),
            owner: "alice".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_target_crud() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut target = new_target("Test");
        target.subscribers = vec!["bob".to_string(), "bob".to_string()];
        let id = store.add_target(&mut target).unwrap();
        assert!(id > 0);

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.name, "Test");
        assert_eq!(fetched.subscribers, vec!["bob".to_string()]);
        assert_eq!(store.get_targets().unwrap().len(), 1);

        store.delete_target(id).unwrap();
        assert!(matches!(store.get_target(id), Err(DbError::NotFound)));
        assert!(matches!(store.delete_target(id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_subscribers() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let id = store.add_target(&mut new_target("Subs")).unwrap();

        store.add_subscriber(id, "carol").unwrap();
        let target = store.add_subscriber(id, "carol").unwrap();
        assert_eq!(target.subscribers, vec!["carol".to_string()]);

        let target = store.remove_subscriber(id, "carol").unwrap();
        assert!(target.subscribers.is_empty());
        assert!(store.get_target(id).unwrap().subscribers.is_empty());

        assert!(matches!(store.add_subscriber(999, "x"), Err(DbError::NotFound)));
    }

    #[test]
    fn test_concurrent_subscriber_updates_are_kept() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let id = store.add_target(&mut new_target("Busy")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..20 {
                        store.add_subscriber(id, &format!("u{}-{}", i, j)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_target(id).unwrap().subscribers.len(), 160);
    }

    #[test]
    fn test_subscriber_update_on_deleted_target() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let id = store.add_target(&mut new_target("Gone")).unwrap();
        store.delete_target(id).unwrap();

        assert!(matches!(store.remove_subscriber(id, "x"), Err(DbError::NotFound)));
    }

    #[test]
    fn test_history_round_trip_is_exact() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let id = store.add_target(&mut new_target("History")).unwrap();

        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::nanoseconds(123_456_789);
        let t1 = t0 + Duration::seconds(120);
        let history = vec![
            StatusPeriod {
                status: Status::Online,
                status_code: 200,
                from: t0,
                to: Some(t1),
            },
            StatusPeriod::open(Observation::offline(0), t1),
        ];

        store.save_history(id, &history).unwrap();
        assert_eq!(store.load_history(id).unwrap(), history);

        // A shorter history replaces the previous one entirely.
        store.save_history(id, &history[1..]).unwrap();
        assert_eq!(store.load_history(id).unwrap(), history[1..].to_vec());
    }

    #[test]
    fn test_history_for_unknown_target() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        assert!(store.load_history(42).unwrap().is_empty());
        let history = vec![StatusPeriod::open(Observation::online(200), Utc::now())];
        assert!(matches!(store.save_history(42, &history), Err(DbError::NotFound)));
    }

    #[test]
    fn test_delete_target_removes_history() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let id = store.add_target(&mut new_target("Gone")).unwrap();
        let history = vec![StatusPeriod::open(Observation::online(200), Utc::now())];
        store.save_history(id, &history).unwrap();

        store.delete_target(id).unwrap();
        assert!(store.load_history(id).unwrap().is_empty());
    }

    #[test]
    fn test_parse_db_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_db_time("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_db_time("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_db_time("not a time"), None);
    }
}
