//! Revision marker store.
//!
//! One marker per (repo, branch, kind). Markers only move forward, and only
//! through `compare_and_advance`: the caller names the value it believes is
//! current, and the advance is rejected if the stored value differs. The
//! single serialized connection makes the compare-and-set atomic with respect
//! to concurrent pollers.

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::errors::StoreResult;
use crate::models::{RevisionKind, RevisionMarker};
use crate::util::{dt_to_ts, ts_to_dt};

#[derive(Clone)]
pub struct RevisionStore {
    conn: Connection,
}

impl RevisionStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn get(
        &self,
        repo_id: &str,
        branch: &str,
        kind: RevisionKind,
    ) -> StoreResult<Option<RevisionMarker>> {
        let repo_id = repo_id.to_string();
        let branch = branch.to_string();
        let marker = self
            .conn
            .call(move |db| {
                let row = db
                    .query_row(
                        "SELECT last_seen_id, last_seen_at FROM revision_markers \
                         WHERE repo_id = ?1 AND branch = ?2 AND kind = ?3",
                        rusqlite::params![repo_id, branch, kind.as_str()],
                        |row| {
                            Ok(RevisionMarker {
                                last_seen_id: row.get(0)?,
                                last_seen_at: ts_to_dt(row.get(1)?),
                            })
                        },
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                Ok::<_, tokio_rusqlite::Error>(row)
            })
            .await?;
        Ok(marker)
    }

    /// Advances the marker to `new_id` iff the stored value equals
    /// `expected_prev` (`None` meaning "no marker yet"). Returns whether the
    /// advance happened.
    pub async fn compare_and_advance(
        &self,
        repo_id: &str,
        branch: &str,
        kind: RevisionKind,
        expected_prev: Option<&str>,
        new_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let repo = repo_id.to_string();
        let br = branch.to_string();
        let expected = expected_prev.map(str::to_string);
        let new = new_id.to_string();
        let ts = dt_to_ts(&at);

        let advanced = self
            .conn
            .call(move |db| {
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let current: Option<String> = tx
                    .query_row(
                        "SELECT last_seen_id FROM revision_markers \
                         WHERE repo_id = ?1 AND branch = ?2 AND kind = ?3",
                        rusqlite::params![repo, br, kind.as_str()],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                if current.as_deref() != expected.as_deref() {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO revision_markers (repo_id, branch, kind, last_seen_id, last_seen_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(repo_id, branch, kind) \
                     DO UPDATE SET last_seen_id = ?4, last_seen_at = ?5",
                    rusqlite::params![repo, br, kind.as_str(), new, ts],
                )?;
                tx.commit()?;
                Ok::<_, tokio_rusqlite::Error>(true)
            })
            .await?;

        if !advanced {
            debug!(
                repo_id,
                branch,
                kind = kind.as_str(),
                new_id,
                "marker advance rejected: expected_prev no longer current"
            );
        }
        Ok(advanced)
    }
}
