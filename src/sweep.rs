//! Periodic reclamation of inactive chat rooms.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::db::Database;

/// Rooms with no activity for this long are deleted.
const INACTIVITY_WINDOW_HOURS: i64 = 12;
/// How often the sweep runs.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(3600);

/// Background loop: sweeps once right away, then every `period`.
pub async fn run_room_cleanup(db: Arc<Database>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match sweep_once(&db) {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "removed inactive rooms"),
            Err(err) => error!(error = %err, "room sweep failed"),
        }
    }
}

/// One pass over stale rooms. A failure on one room is logged and skipped so
/// the rest of the sweep still runs. Returns the number of rooms deleted.
pub fn sweep_once(db: &Database) -> Result<usize, rusqlite::Error> {
    // Matches the store's `datetime('now')` format, so plain string
    // comparison orders timestamps correctly.
    let cutoff = (Utc::now() - chrono::Duration::hours(INACTIVITY_WINDOW_HOURS))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    let candidates = db.rooms_created_before(&cutoff)?;

    let mut deleted = 0;
    for room in candidates {
        let newest = match db.newest_message_at(&room.id) {
            Ok(timestamp) => timestamp,
            Err(err) => {
                warn!(room = %room.id, error = %err, "skipping room, could not read last message");
                continue;
            }
        };
        let last_activity = newest.unwrap_or_else(|| room.created_at.clone());
        if last_activity >= cutoff {
            continue;
        }
        match db.delete_room_if_inactive(&room.id, &cutoff) {
            Ok(true) => deleted += 1,
            // Vetoed: a message arrived between the activity check and the
            // delete.
            Ok(false) => {}
            Err(err) => warn!(room = %room.id, error = %err, "skipping room, delete failed"),
        }
    }
    Ok(deleted)
}
