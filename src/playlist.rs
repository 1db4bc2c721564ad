use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::seq::SliceRandom;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{MediaFile, PlaybackMode, ScheduleBlock};
use crate::schedule::ScheduleResolver;
use crate::store;

/// Maps a channel and an instant to the ordered list of files it is playing.
/// One concrete implementation; the trait is the seam callers compose
/// against.
#[async_trait]
pub trait PlaylistResolver: Send + Sync {
    /// Ordered playable files for the channel at `instant`. An empty list is
    /// a valid answer ("nothing scheduled"), never an error.
    async fn resolve(&self, channel_id: &str, instant: DateTime<Utc>) -> Result<Vec<MediaFile>>;
}

pub struct ChannelPlaylistResolver {
    pool: SqlitePool,
    schedule: ScheduleResolver,
    tz: Tz,
}

impl ChannelPlaylistResolver {
    pub fn new(pool: SqlitePool, schedule: ScheduleResolver, tz: Tz) -> Self {
        Self { pool, schedule, tz }
    }

    /// Apply the block's playback mode to the bucket's positioned member
    /// list, returning media ids in playback order.
    async fn apply_mode(
        &self,
        channel_id: &str,
        block: &ScheduleBlock,
        bucket_id: &str,
        mut ids: Vec<String>,
        instant: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        match block.playback_mode {
            PlaybackMode::Sequential => {
                // Progression only makes sense when the bucket is one series;
                // a mixed bucket always starts from the top.
                if store::bucket_distinct_show_count(&self.pool, bucket_id).await? > 1 {
                    debug!(bucket_id = %bucket_id, "multi-series bucket, progression disabled");
                    return Ok(ids);
                }
                match store::get_progression(&self.pool, channel_id, bucket_id).await? {
                    None => {}
                    Some(p) if (0..ids.len() as i64).contains(&p.current_position) => {
                        ids.rotate_left(p.current_position as usize);
                    }
                    Some(p) => {
                        warn!(
                            bucket_id = %bucket_id,
                            position = p.current_position,
                            members = ids.len(),
                            "saved progression out of bounds, resetting to 0"
                        );
                        store::upsert_progression(&self.pool, channel_id, bucket_id, 0, None).await?;
                    }
                }
                Ok(ids)
            }
            PlaybackMode::Shuffle => {
                // Stable for the whole calendar day, varies per day and block
                let day = instant.with_timezone(&self.tz).date_naive().format("%Y-%m-%d");
                let seed = format!("{day}{}", block.id);
                deterministic_shuffle(&mut ids, &seed);
                Ok(ids)
            }
            PlaybackMode::Random => {
                ids.shuffle(&mut rand::rng());
                Ok(ids)
            }
        }
    }

    /// Look up media rows for the ordered id list, dropping records that are
    /// absent from the catalog or flagged missing on disk.
    async fn materialize(&self, ids: &[String]) -> Result<Vec<MediaFile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = store::get_media_by_ids(&self.pool, ids).await?;
        let by_id: HashMap<&str, &MediaFile> = rows.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            match by_id.get(id.as_str()) {
                Some(m) if m.file_exists => files.push((*m).clone()),
                Some(m) => warn!(path = %m.path, "dropping media file flagged missing on disk"),
                None => warn!(media_id = %id, "bucket references a media id absent from the catalog"),
            }
        }
        if files.is_empty() {
            warn!("bucket resolved to no playable media (inconsistent catalog)");
        }
        Ok(files)
    }

    /// Union of bucket members across the channel's enabled blocks, walked in
    /// block priority order, deduplicated. `exclude_block` drops the (empty
    /// or bucketless) active block from the union.
    async fn union_block_bucket_ids(&self, channel_id: &str, exclude_block: Option<&str>) -> Result<Vec<String>> {
        let mut rows = store::enabled_blocks_for_channel(&self.pool, channel_id).await?;
        rows.retain(|r| r.bucket_id.is_some());
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut seen_buckets = HashSet::new();
        let mut seen_media = HashSet::new();
        let mut media_ids = Vec::new();
        for row in rows {
            if exclude_block.is_some_and(|id| id == row.id) {
                continue;
            }
            let Some(bucket_id) = row.bucket_id else { continue };
            if !seen_buckets.insert(bucket_id.clone()) {
                continue;
            }
            for member in store::bucket_members(&self.pool, &bucket_id).await? {
                if seen_media.insert(member.media_file_id.clone()) {
                    media_ids.push(member.media_file_id);
                }
            }
        }
        Ok(media_ids)
    }

    /// Members of the buckets attached directly to the channel (legacy path).
    async fn attached_bucket_media_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        let mut seen_media = HashSet::new();
        let mut media_ids = Vec::new();
        for bucket_id in store::channel_bucket_ids(&self.pool, channel_id).await? {
            for member in store::bucket_members(&self.pool, &bucket_id).await? {
                if seen_media.insert(member.media_file_id.clone()) {
                    media_ids.push(member.media_file_id);
                }
            }
        }
        Ok(media_ids)
    }
}

#[async_trait]
impl PlaylistResolver for ChannelPlaylistResolver {
    async fn resolve(&self, channel_id: &str, instant: DateTime<Utc>) -> Result<Vec<MediaFile>> {
        let active = self.schedule.active_block(channel_id, instant).await?;

        // Tier 1: the active block's own bucket
        if let Some(block) = &active
            && let Some(bucket_id) = &block.bucket_id
        {
            let members = store::bucket_members(&self.pool, bucket_id).await?;
            if !members.is_empty() {
                let ids: Vec<String> = members.into_iter().map(|m| m.media_file_id).collect();
                let ordered = self.apply_mode(channel_id, block, bucket_id, ids, instant).await?;
                debug!(channel_id = %channel_id, block = %block.name, files = ordered.len(), "resolved playlist from active block");
                return self.materialize(&ordered).await;
            }
        }

        // Tier 2: active block exists but has no usable bucket
        if let Some(block) = &active {
            let ids = self.union_block_bucket_ids(channel_id, Some(&block.id)).await?;
            if !ids.is_empty() {
                warn!(
                    channel_id = %channel_id,
                    block = %block.name,
                    "active block has no playable bucket, falling back to sibling block buckets"
                );
                return self.materialize(&ids).await;
            }
        } else {
            // Tier 3: nothing on air, union of every enabled block's bucket
            let ids = self.union_block_bucket_ids(channel_id, None).await?;
            if !ids.is_empty() {
                warn!(channel_id = %channel_id, "no active block, falling back to all block buckets");
                return self.materialize(&ids).await;
            }
        }

        // Tier 4: buckets attached directly to the channel
        let ids = self.attached_bucket_media_ids(channel_id).await?;
        if !ids.is_empty() {
            warn!(channel_id = %channel_id, "falling back to channel-attached buckets");
            return self.materialize(&ids).await;
        }

        debug!(channel_id = %channel_id, "nothing to play");
        Ok(Vec::new())
    }
}

/// Advance a channel's sequential cursor one step (modulo bucket size),
/// recording what just aired. Refuses multi-series buckets, where the cursor
/// carries no meaning. Returns the new position, or None when nothing moved.
pub async fn advance_progression(pool: &SqlitePool, channel_id: &str, bucket_id: &str) -> Result<Option<i64>> {
    let members = store::bucket_members(pool, bucket_id).await?;
    if members.is_empty() {
        return Ok(None);
    }
    if store::bucket_distinct_show_count(pool, bucket_id).await? > 1 {
        debug!(bucket_id = %bucket_id, "multi-series bucket, not advancing progression");
        return Ok(None);
    }

    let len = members.len() as i64;
    let current = store::get_progression(pool, channel_id, bucket_id)
        .await?
        .map(|p| p.current_position)
        .filter(|p| (0..len).contains(p))
        .unwrap_or(0);
    let next = (current + 1) % len;
    let last_played = &members[current as usize].media_file_id;

    store::upsert_progression(pool, channel_id, bucket_id, next, Some(last_played)).await?;
    debug!(channel_id = %channel_id, bucket_id = %bucket_id, position = next, "advanced progression");
    Ok(Some(next))
}

/// Seeded PRNG behind deterministic shuffle: a 31-multiplier rolling string
/// hash feeding a (9301, 49297, 233280) linear congruential generator. The
/// constants are load-bearing; orderings must be reproducible across
/// implementations.
struct SeededRng {
    seed: u64,
}

impl SeededRng {
    fn from_seed_str(s: &str) -> Self {
        let mut hash: i32 = 0;
        for c in s.chars() {
            hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(c as i32);
        }
        SeededRng {
            seed: u64::from(hash.unsigned_abs()) % 233280,
        }
    }

    fn next(&mut self) -> f64 {
        self.seed = (self.seed * 9301 + 49297) % 233280;
        self.seed as f64 / 233280.0
    }
}

/// Fisher–Yates driven by the seeded PRNG.
fn deterministic_shuffle<T>(items: &mut [T], seed: &str) {
    let mut rng = SeededRng::from_seed_str(seed);
    for i in (1..items.len()).rev() {
        let j = (rng.next() * (i as f64 + 1.0)).floor() as usize;
        items.swap(i, j);
    }
}
