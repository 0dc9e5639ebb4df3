//! Runtime settings with a versioned read-through cache.
//!
//! Writes bump a process-wide version counter; readers compare their cached
//! version against it and re-read from the database only when it changed.
//! Secret values are redacted from metadata listings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;
use tokio_rusqlite::Connection;

use crate::errors::StoreResult;
use crate::util::{dt_to_ts, ts_to_dt};

/// Keys whose values never appear in diagnostic output.
pub const SECRET_KEYS: &[&str] = &["model_api_key"];

/// Defaults seeded on first start; operators change them through the API.
const DEFAULT_SETTINGS: &[(&str, &str, &str, &str)] = &[
    (
        "model_api_base",
        "http://127.0.0.1:8000/v1",
        "model",
        "OpenAI-compatible inference endpoint",
    ),
    ("model_api_key", "", "model", "API key for the inference endpoint"),
    (
        "model_name",
        "openai/qwen-2.5-coder-32b",
        "model",
        "Model identifier passed to the assistant",
    ),
    (
        "assistant_map_tokens",
        "262144",
        "assistant",
        "Whole-repository context map token budget",
    ),
    (
        "assistant_no_repo_map",
        "false",
        "assistant",
        "Disable the repository context map",
    ),
    (
        "assistant_timeout_secs",
        "1800",
        "assistant",
        "Wall-clock timeout per assistant batch",
    ),
    (
        "assistant_retry_count",
        "0",
        "assistant",
        "Extra attempts per batch after a non-zero exit",
    ),
    (
        "max_tokens_per_batch",
        "100000",
        "review",
        "Token budget per review batch",
    ),
    (
        "git_api_base",
        "",
        "git",
        "Default platform API base URL for repos without an override",
    ),
    (
        "enable_comment",
        "true",
        "git",
        "Post review reports back to the platform",
    ),
    (
        "polling_interval_minutes",
        "5",
        "polling",
        "Default poll interval for repositories",
    ),
];

/// A setting row with metadata, as exposed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct SettingMeta {
    pub key: String,
    pub value: String,
    pub category: String,
    pub description: String,
    pub updated_at: Option<String>,
}

struct CacheState {
    version: u64,
    values: HashMap<String, String>,
}

pub(crate) struct SettingsShared {
    version: AtomicU64,
    cache: RwLock<Option<CacheState>>,
}

impl SettingsShared {
    pub(crate) fn new() -> Self {
        Self {
            version: AtomicU64::new(1),
            cache: RwLock::new(None),
        }
    }
}

#[derive(Clone)]
pub struct SettingsStore {
    conn: Connection,
    shared: Arc<SettingsShared>,
}

impl SettingsStore {
    pub(crate) fn new(conn: Connection, shared: Arc<SettingsShared>) -> Self {
        Self { conn, shared }
    }

    /// Seeds defaults for keys that do not exist yet.
    pub async fn init_defaults(&self) -> StoreResult<()> {
        let now = dt_to_ts(&Utc::now());
        self.conn
            .call(move |db| {
                for (key, value, category, description) in DEFAULT_SETTINGS {
                    db.execute(
                        "INSERT OR IGNORE INTO settings (key, value, category, description, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![key, value, category, description, now],
                    )?;
                }
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await?;
        self.invalidate();
        Ok(())
    }

    /// All key/value pairs, served from the cache when its version is current.
    pub async fn get_all(&self) -> StoreResult<HashMap<String, String>> {
        let version = self.shared.version.load(Ordering::Acquire);
        if let Some(state) = self.shared.cache.read().expect("settings cache lock").as_ref() {
            if state.version == version {
                return Ok(state.values.clone());
            }
        }

        let values = self
            .conn
            .call(|db| {
                let mut stmt = db.prepare("SELECT key, value FROM settings")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut map = HashMap::new();
                for row in rows {
                    let (k, v) = row?;
                    map.insert(k, v);
                }
                Ok::<_, tokio_rusqlite::Error>(map)
            })
            .await?;

        *self.shared.cache.write().expect("settings cache lock") = Some(CacheState {
            version,
            values: values.clone(),
        });
        Ok(values)
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.get_all().await?.get(key).cloned())
    }

    pub async fn get_or(&self, key: &str, default: &str) -> StoreResult<String> {
        Ok(self
            .get(key)
            .await?
            .unwrap_or_else(|| default.to_string()))
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> StoreResult<bool> {
        Ok(match self.get(key).await? {
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        })
    }

    pub async fn get_u64(&self, key: &str, default: u64) -> StoreResult<u64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    pub async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        let now = dt_to_ts(&Utc::now());
        self.conn
            .call(move |db| {
                db.execute(
                    "INSERT INTO settings (key, value, category, description, updated_at) \
                     VALUES (?1, ?2, 'other', '', ?3) \
                     ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
                    rusqlite::params![key, value, now],
                )?;
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await?;
        self.invalidate();
        Ok(())
    }

    pub async fn set_many(&self, entries: HashMap<String, String>) -> StoreResult<()> {
        let now = dt_to_ts(&Utc::now());
        self.conn
            .call(move |db| {
                let tx = db.transaction()?;
                for (key, value) in &entries {
                    tx.execute(
                        "INSERT INTO settings (key, value, category, description, updated_at) \
                         VALUES (?1, ?2, 'other', '', ?3) \
                         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
                        rusqlite::params![key, value, now],
                    )?;
                }
                tx.commit()?;
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await?;
        self.invalidate();
        Ok(())
    }

    /// Full listing with metadata; secret values are replaced by a mask.
    pub async fn list_with_meta(&self) -> StoreResult<Vec<SettingMeta>> {
        let rows = self
            .conn
            .call(|db| {
                let mut stmt = db.prepare(
                    "SELECT key, value, category, description, updated_at \
                     FROM settings ORDER BY category, key",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                    ))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|(key, value, category, description, updated_at)| {
                let value = if SECRET_KEYS.contains(&key.as_str()) && !value.is_empty() {
                    "***".to_string()
                } else {
                    value
                };
                SettingMeta {
                    key,
                    value,
                    category,
                    description,
                    updated_at: updated_at.map(|ts| ts_to_dt(ts).to_rfc3339()),
                }
            })
            .collect())
    }

    /// Current version of the settings state; bumped on every write.
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        self.shared.version.fetch_add(1, Ordering::AcqRel);
    }
}
