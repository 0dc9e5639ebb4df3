//! Durable state for the review engine, backed by a single SQLite file.
//!
//! One `tokio_rusqlite` connection serves the whole process; its worker
//! thread serializes every read and write, which is the single-writer
//! discipline the engine relies on for the at-most-one task rule and the
//! marker compare-and-advance.

pub mod db;
pub mod errors;
pub mod models;
pub mod repos;
pub mod revisions;
pub mod schema;
pub mod settings;
pub mod stats;
pub mod tasks;
mod util;

use std::path::Path;
use std::sync::Arc;

use crate::errors::StoreResult;
use crate::repos::RepoStore;
use crate::revisions::RevisionStore;
use crate::settings::{SettingsShared, SettingsStore};
use crate::stats::StatsStore;
use crate::tasks::TaskStore;

pub use errors::StoreError;

/// Facade over the shared connection; clones are cheap handles.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
    settings_shared: Arc<SettingsShared>,
}

impl Store {
    /// Opens the database at `path`, migrating the schema forward as needed,
    /// and seeds default settings.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let conn = db::open_db(path).await?;
        let store = Self {
            conn,
            settings_shared: Arc::new(SettingsShared::new()),
        };
        store.settings().init_defaults().await?;
        Ok(store)
    }

    /// In-memory store with the full schema; used by tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = db::open_in_memory().await?;
        let store = Self {
            conn,
            settings_shared: Arc::new(SettingsShared::new()),
        };
        store.settings().init_defaults().await?;
        Ok(store)
    }

    pub fn tasks(&self) -> TaskStore {
        TaskStore::new(self.conn.clone())
    }

    pub fn revisions(&self) -> RevisionStore {
        RevisionStore::new(self.conn.clone())
    }

    pub fn repos(&self) -> RepoStore {
        RepoStore::new(self.conn.clone())
    }

    pub fn settings(&self) -> SettingsStore {
        SettingsStore::new(self.conn.clone(), self.settings_shared.clone())
    }

    pub fn stats(&self) -> StatsStore {
        StatsStore::new(self.conn.clone())
    }
}
