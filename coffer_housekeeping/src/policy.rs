//! Retention policy knobs: how long an `OldVersion` or
//! `Deleted` entry is kept around before housekeeping marks it
//! `RemoveASAP`. No single default is specified upstream, so these are
//! exposed as configuration rather than baked-in constants;
//! `coffer_server::config::ServerConfig` surfaces them.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub old_version_retention: Duration,
    pub deleted_retention: Duration,
}

impl RetentionPolicy {
    pub fn new(old_version_retention: Duration, deleted_retention: Duration) -> Self {
        Self { old_version_retention, deleted_retention }
    }
}

impl Default for RetentionPolicy {
    /// 30 days for superseded versions, 7 days for tombstones — a
    /// deliberately conservative starting point, not derived from the
    /// original (which left this as an operator-configured value).
    fn default() -> Self {
        Self {
            old_version_retention: Duration::from_secs(30 * 24 * 3600),
            deleted_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}
