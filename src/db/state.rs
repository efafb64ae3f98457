use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Transaction};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::SyncState;

const KEY_SERVICE_STARTED: &str = "serviceStarted";
const KEY_LAST_ARTICLE_URL: &str = "lastArticleUrl";
const KEY_LAST_DOWNLOAD_TIME: &str = "lastDownloadTime";
const KEY_INTERVAL_MINUTES: &str = "intervalMinutes";
const KEY_FOREGROUND_FLAG: &str = "foregroundFlag";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Access to the persisted sync state.
///
/// Every read-modify-write runs as a single closure on the connection
/// thread, so concurrent callers never interleave inside one update.
#[derive(Clone)]
pub struct StateStore {
    conn: Connection,
    default_interval: u32,
}

impl StateStore {
    pub fn new(conn: Connection, default_interval: u32) -> Self {
        Self {
            conn,
            default_interval: default_interval.max(1),
        }
    }

    pub async fn load(&self) -> Result<SyncState> {
        let default_interval = self.default_interval;
        let state = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let state = SyncState {
                    last_sync: read(&tx, KEY_LAST_DOWNLOAD_TIME)?
                        .and_then(|s| parse_timestamp(&s)),
                    last_notified_url: read(&tx, KEY_LAST_ARTICLE_URL)?,
                    interval_minutes: read(&tx, KEY_INTERVAL_MINUTES)?
                        .and_then(|s| parse_interval(&s))
                        .unwrap_or(default_interval),
                    service_started: read(&tx, KEY_SERVICE_STARTED)?
                        .map(|s| s == "true")
                        .unwrap_or(false),
                    foreground_flag: read(&tx, KEY_FOREGROUND_FLAG)?
                        .map(|s| s == "true")
                        .unwrap_or(false),
                };
                Ok(state)
            })
            .await?;
        Ok(state)
    }

    pub async fn interval_minutes(&self) -> Result<u32> {
        let value = self.get(KEY_INTERVAL_MINUTES).await?;
        Ok(value
            .and_then(|s| parse_interval(&s))
            .unwrap_or(self.default_interval))
    }

    pub async fn set_interval_minutes(&self, minutes: u32) -> Result<()> {
        if minutes == 0 {
            return Err(AppError::Config(
                "interval must be at least one minute".to_string(),
            ));
        }
        self.set(KEY_INTERVAL_MINUTES, minutes.to_string()).await
    }

    pub async fn last_sync(&self) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .get(KEY_LAST_DOWNLOAD_TIME)
            .await?
            .and_then(|s| parse_timestamp(&s)))
    }

    /// Store the time of a successful sync. The stored value never moves
    /// backwards; the effective timestamp is returned.
    pub async fn record_sync(&self, at: NaiveDateTime) -> Result<NaiveDateTime> {
        let effective = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let current = read(&tx, KEY_LAST_DOWNLOAD_TIME)?.and_then(|s| parse_timestamp(&s));
                let effective = match current {
                    Some(previous) if previous > at => previous,
                    _ => at,
                };
                write(&tx, KEY_LAST_DOWNLOAD_TIME, &format_timestamp(effective))?;
                tx.commit()?;
                Ok(effective)
            })
            .await?;
        Ok(effective)
    }

    /// Forget the last sync time so the next run is not debounced.
    pub async fn clear_last_sync(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "DELETE FROM sync_state WHERE key = ?1",
                    params![KEY_LAST_DOWNLOAD_TIME],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn last_notified_url(&self) -> Result<Option<String>> {
        self.get(KEY_LAST_ARTICLE_URL).await
    }

    pub async fn set_last_notified_url(&self, url: &str) -> Result<()> {
        self.set(KEY_LAST_ARTICLE_URL, url.to_string()).await
    }

    pub async fn service_started(&self) -> Result<bool> {
        Ok(self.get(KEY_SERVICE_STARTED).await?.as_deref() == Some("true"))
    }

    pub async fn set_service_started(&self, started: bool) -> Result<()> {
        self.set(KEY_SERVICE_STARTED, started.to_string()).await
    }

    #[cfg(test)]
    pub async fn foreground_flag(&self) -> Result<bool> {
        Ok(self.get(KEY_FOREGROUND_FLAG).await?.as_deref() == Some("true"))
    }

    pub async fn set_foreground_flag(&self, value: bool) -> Result<()> {
        self.set(KEY_FOREGROUND_FLAG, value.to_string()).await
    }

    /// Atomically replace the foreground flag, returning the previous value.
    pub async fn swap_foreground_flag(&self, value: bool) -> Result<bool> {
        let previous = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let previous = read(&tx, KEY_FOREGROUND_FLAG)?.as_deref() == Some("true");
                write(&tx, KEY_FOREGROUND_FLAG, &value.to_string())?;
                tx.commit()?;
                Ok(previous)
            })
            .await?;
        Ok(previous)
    }

    async fn get(&self, key: &'static str) -> Result<Option<String>> {
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM sync_state WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &'static str, value: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO sync_state (key, value) VALUES (?1, ?2)
                       ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn read(tx: &Transaction, key: &str) -> rusqlite::Result<Option<String>> {
    tx.query_row(
        "SELECT value FROM sync_state WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn write(tx: &Transaction, key: &str, value: &str) -> rusqlite::Result<()> {
    tx.execute(
        r#"INSERT INTO sync_state (key, value) VALUES (?1, ?2)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        params![key, value],
    )?;
    Ok(())
}

// Unparseable values fall back to defaults, same as a missing key.
fn parse_interval(s: &str) -> Option<u32> {
    s.trim().parse::<u32>().ok().filter(|m| *m >= 1)
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    s.parse::<NaiveDateTime>().ok()
}

fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
