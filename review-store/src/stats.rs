//! Statistical queries over finished reviews for the dashboard API.

use serde::Serialize;
use tokio_rusqlite::Connection;

use crate::errors::StoreResult;

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_reviews: i64,
    pub completed_reviews: i64,
    pub failed_reviews: i64,
    pub pending_reviews: i64,
    pub total_issues: i64,
    pub critical_issues: i64,
    pub warning_issues: i64,
    pub suggestion_issues: i64,
    pub avg_processing_time: f64,
    pub avg_quality_score: f64,
    pub commit_reviews: i64,
    pub mr_reviews: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPoint {
    pub date: String,
    pub count: i64,
    pub issues: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorStat {
    pub author_name: String,
    pub review_count: i64,
    pub total_issues: i64,
    pub critical_issues: i64,
    pub avg_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HotspotFile {
    pub file_path: String,
    pub issue_count: i64,
    pub critical_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Clone)]
pub struct StatsStore {
    conn: Connection,
}

impl StatsStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn overview(&self) -> StoreResult<Overview> {
        self.conn
            .call(|db| {
                let row = db.query_row(
                    "SELECT COUNT(*), \
                        COALESCE(SUM(status = 'completed'), 0), \
                        COALESCE(SUM(status = 'failed'), 0), \
                        COALESCE(SUM(status IN ('pending','processing')), 0), \
                        COALESCE(SUM(issues_count), 0), \
                        COALESCE(SUM(critical_count), 0), \
                        COALESCE(SUM(warning_count), 0), \
                        COALESCE(SUM(suggestion_count), 0), \
                        COALESCE(AVG(processing_time_seconds), 0.0), \
                        COALESCE(AVG(quality_score), 0.0), \
                        COALESCE(SUM(strategy = 'commit'), 0), \
                        COALESCE(SUM(strategy = 'merge_request'), 0) \
                     FROM tasks",
                    [],
                    |row| {
                        Ok(Overview {
                            total_reviews: row.get(0)?,
                            completed_reviews: row.get(1)?,
                            failed_reviews: row.get(2)?,
                            pending_reviews: row.get(3)?,
                            total_issues: row.get(4)?,
                            critical_issues: row.get(5)?,
                            warning_issues: row.get(6)?,
                            suggestion_issues: row.get(7)?,
                            avg_processing_time: row.get(8)?,
                            avg_quality_score: row.get(9)?,
                            commit_reviews: row.get(10)?,
                            mr_reviews: row.get(11)?,
                        })
                    },
                )?;
                Ok::<_, tokio_rusqlite::Error>(row)
            })
            .await
            .map_err(Into::into)
    }

    /// Reviews and issues per day for the last `days` days.
    pub async fn daily_trend(&self, days: u32) -> StoreResult<Vec<DailyPoint>> {
        let days = days.clamp(1, 365) as i64;
        self.conn
            .call(move |db| {
                let mut stmt = db.prepare(
                    "SELECT date(created_at, 'unixepoch') AS day, COUNT(*), \
                        COALESCE(SUM(issues_count), 0) \
                     FROM tasks \
                     WHERE created_at >= unixepoch('now', ?1) \
                     GROUP BY day ORDER BY day",
                )?;
                let rows = stmt.query_map([format!("-{days} days")], |row| {
                    Ok(DailyPoint {
                        date: row.get(0)?,
                        count: row.get(1)?,
                        issues: row.get(2)?,
                    })
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await
            .map_err(Into::into)
    }

    pub async fn authors(&self, limit: u32) -> StoreResult<Vec<AuthorStat>> {
        let limit = limit.clamp(1, 200) as i64;
        self.conn
            .call(move |db| {
                let mut stmt = db.prepare(
                    "SELECT author_name, COUNT(*), COALESCE(SUM(issues_count), 0), \
                        COALESCE(SUM(critical_count), 0), COALESCE(AVG(quality_score), 0.0) \
                     FROM tasks WHERE author_name IS NOT NULL \
                     GROUP BY author_name ORDER BY COUNT(*) DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    Ok(AuthorStat {
                        author_name: row.get(0)?,
                        review_count: row.get(1)?,
                        total_issues: row.get(2)?,
                        critical_issues: row.get(3)?,
                        avg_score: row.get(4)?,
                    })
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await
            .map_err(Into::into)
    }

    /// Files accumulating the most issues across all reviews.
    pub async fn hotspots(&self, limit: u32) -> StoreResult<Vec<HotspotFile>> {
        let limit = limit.clamp(1, 200) as i64;
        self.conn
            .call(move |db| {
                let mut stmt = db.prepare(
                    "SELECT file_path, COUNT(*), \
                        COALESCE(SUM(severity = 'critical'), 0) \
                     FROM issues WHERE file_path IS NOT NULL \
                     GROUP BY file_path ORDER BY COUNT(*) DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    Ok(HotspotFile {
                        file_path: row.get(0)?,
                        issue_count: row.get(1)?,
                        critical_count: row.get(2)?,
                    })
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await
            .map_err(Into::into)
    }

    pub async fn categories(&self) -> StoreResult<Vec<CategoryCount>> {
        self.conn
            .call(|db| {
                let mut stmt = db.prepare(
                    "SELECT COALESCE(category, 'uncategorized'), COUNT(*) \
                     FROM issues GROUP BY category ORDER BY COUNT(*) DESC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(CategoryCount {
                        category: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<_, tokio_rusqlite::Error>(out)
            })
            .await
            .map_err(Into::into)
    }
}
