use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::MediaFile;
use crate::store;

/// Where a channel's virtual playhead sits inside its looping playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayheadPosition {
    pub file_index: usize,
    pub offset_seconds: i64,
    pub elapsed_seconds: i64,
}

/// Stateless virtual timeline: the anchor instant plus the materialized
/// playlist fully determine the playhead. Restarts, viewer churn, and
/// crashes cannot shift it because nothing else is consulted.
#[derive(Clone)]
pub struct TimelineService {
    pool: SqlitePool,
}

impl TimelineService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Anchor the channel's timeline to now, only if it has never been
    /// anchored. Safe to call on every stream start.
    pub async fn initialize(&self, channel_id: &str) -> Result<()> {
        if store::init_anchor(&self.pool, channel_id, Utc::now()).await? {
            info!(channel_id = %channel_id, "timeline anchor initialized");
        } else {
            debug!(channel_id = %channel_id, "timeline already anchored");
        }
        Ok(())
    }

    /// Clear the anchor. Administrative only; the channel goes off its
    /// timeline until the next initialize.
    pub async fn reset(&self, channel_id: &str) -> Result<()> {
        store::clear_anchor(&self.pool, channel_id).await?;
        info!(channel_id = %channel_id, "timeline anchor cleared");
        Ok(())
    }

    /// Overwrite the anchor to adjust the timeline.
    pub async fn set_anchor(&self, channel_id: &str, instant: DateTime<Utc>) -> Result<()> {
        store::set_anchor(&self.pool, channel_id, instant).await?;
        info!(channel_id = %channel_id, anchor = %instant, "timeline anchor set");
        Ok(())
    }

    /// The playhead at `instant`, or None when the channel was never
    /// anchored. Pure with respect to playback state: no writes.
    pub async fn current_position(
        &self,
        channel_id: &str,
        playlist: &[MediaFile],
        instant: DateTime<Utc>,
    ) -> Result<Option<PlayheadPosition>> {
        let channel = store::get_channel(&self.pool, channel_id).await?;
        let Some(anchor) = channel.schedule_start_time else {
            return Ok(None);
        };
        Ok(Some(position_in_playlist(anchor, playlist, instant)))
    }
}

/// Map elapsed-since-anchor onto the looping playlist.
pub fn position_in_playlist(anchor: DateTime<Utc>, playlist: &[MediaFile], instant: DateTime<Utc>) -> PlayheadPosition {
    let raw = (instant - anchor).num_seconds();
    // An anchor in the future pins the playhead to the very start
    if raw < 0 {
        return PlayheadPosition {
            file_index: 0,
            offset_seconds: 0,
            elapsed_seconds: 0,
        };
    }

    let total: i64 = playlist.iter().map(|f| f.duration).sum();
    if total <= 0 {
        return PlayheadPosition {
            file_index: 0,
            offset_seconds: 0,
            elapsed_seconds: raw,
        };
    }

    let normalized = raw % total;
    let mut remaining = normalized;
    for (i, file) in playlist.iter().enumerate() {
        if remaining < file.duration {
            return PlayheadPosition {
                file_index: i,
                offset_seconds: remaining,
                elapsed_seconds: raw,
            };
        }
        remaining -= file.duration;
    }

    // normalized < total, so the walk above always lands in a file
    unreachable!("playlist walk exhausted with remaining {remaining}")
}
