//! Small column encode/decode helpers shared by the store modules.

use chrono::{DateTime, Utc};

/// Unix seconds for an INTEGER column.
pub(crate) fn dt_to_ts(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// INTEGER column back to a UTC instant; out-of-range values clamp to epoch.
pub(crate) fn ts_to_dt(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Wraps a non-sqlite error for transport out of a `call` closure.
pub(crate) fn other_err<E>(e: E) -> tokio_rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    tokio_rusqlite::Error::Other(Box::new(e))
}

/// Column-level decode failure (bad enum tag, bad JSON, bad uuid).
pub(crate) fn bad_col(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}
