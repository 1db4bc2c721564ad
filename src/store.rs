use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{BucketMember, BucketProgression, Channel, MediaBucket, MediaFile, ScheduleBlockRow};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// All media_files columns in SELECT order (must match MediaFile field order).
const MEDIA_COLUMNS: &str = "id, path, duration, show_name, season, episode, file_exists";

const BLOCK_COLUMNS: &str = "id, channel_id, name, days_of_week, start_time, end_time,
    bucket_id, playback_mode, priority, enabled, created_at";

fn fmt_instant(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

// ── Channels ───────────────────────────────────────────────────────────

pub async fn get_channel(pool: &SqlitePool, id: &str) -> Result<Channel> {
    sqlx::query_as::<_, Channel>("SELECT id, name, schedule_start_time FROM channels WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("channel", id))
}

pub async fn get_channel_by_name(pool: &SqlitePool, name: &str) -> Result<Channel> {
    sqlx::query_as::<_, Channel>("SELECT id, name, schedule_start_time FROM channels WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("channel", name))
}

pub async fn list_channels(pool: &SqlitePool) -> Result<Vec<Channel>> {
    Ok(
        sqlx::query_as::<_, Channel>("SELECT id, name, schedule_start_time FROM channels ORDER BY name")
            .fetch_all(pool)
            .await?,
    )
}

/// Set the timeline anchor only if it is currently unset. The condition lives
/// in the UPDATE itself so two racing first-start events cannot both win.
/// Returns true if this call set the anchor.
pub async fn init_anchor(pool: &SqlitePool, channel_id: &str, instant: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE channels SET schedule_start_time = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ? AND schedule_start_time IS NULL",
    )
    .bind(fmt_instant(instant))
    .bind(channel_id)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }
    // Distinguish "already anchored" from "no such channel"
    get_channel(pool, channel_id).await?;
    Ok(false)
}

/// Overwrite the timeline anchor unconditionally (administrative adjustment).
pub async fn set_anchor(pool: &SqlitePool, channel_id: &str, instant: DateTime<Utc>) -> Result<()> {
    let result = sqlx::query(
        "UPDATE channels SET schedule_start_time = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?",
    )
    .bind(fmt_instant(instant))
    .bind(channel_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::not_found("channel", channel_id));
    }
    Ok(())
}

/// Clear the timeline anchor (administrative reset).
pub async fn clear_anchor(pool: &SqlitePool, channel_id: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE channels SET schedule_start_time = NULL, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?",
    )
    .bind(channel_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::not_found("channel", channel_id));
    }
    Ok(())
}

// ── Schedule blocks ────────────────────────────────────────────────────

pub async fn enabled_blocks_for_channel(pool: &SqlitePool, channel_id: &str) -> Result<Vec<ScheduleBlockRow>> {
    let query = format!("SELECT {BLOCK_COLUMNS} FROM schedule_blocks WHERE channel_id = ? AND enabled = 1");
    Ok(sqlx::query_as::<_, ScheduleBlockRow>(&query)
        .bind(channel_id)
        .fetch_all(pool)
        .await?)
}

// ── Buckets and members ────────────────────────────────────────────────

pub async fn create_bucket(pool: &SqlitePool, name: &str, bucket_type: &str) -> Result<MediaBucket> {
    if name.is_empty() {
        return Err(Error::Validation("bucket name must not be empty".to_string()));
    }

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM media_buckets WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Err(Error::Conflict(format!("bucket '{name}' already exists")));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO media_buckets (id, name, bucket_type) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(bucket_type)
        .execute(pool)
        .await?;

    debug!(name = %name, id = %id, "created bucket");
    Ok(MediaBucket {
        id,
        name: name.to_string(),
        bucket_type: bucket_type.to_string(),
    })
}

pub async fn get_bucket_by_name(pool: &SqlitePool, name: &str) -> Result<MediaBucket> {
    sqlx::query_as::<_, MediaBucket>("SELECT id, name, bucket_type FROM media_buckets WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("bucket", name))
}

/// Delete a bucket. Members go with it (FK cascade); blocks referencing it
/// fall back to NULL buckets.
pub async fn delete_bucket(pool: &SqlitePool, bucket_id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM media_buckets WHERE id = ?")
        .bind(bucket_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("bucket", bucket_id));
    }
    Ok(())
}

/// Append a media file to the end of a bucket. Returns the assigned position.
pub async fn add_bucket_member(pool: &SqlitePool, bucket_id: &str, media_file_id: &str) -> Result<i64> {
    // FK violations would catch these too, but the typed errors are clearer
    get_media_file(pool, media_file_id).await?;
    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM media_buckets WHERE id = ?")
        .bind(bucket_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(Error::not_found("bucket", bucket_id));
    }

    let (position,): (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(position) + 1, 0) FROM bucket_media WHERE bucket_id = ?")
            .bind(bucket_id)
            .fetch_one(pool)
            .await?;

    sqlx::query("INSERT INTO bucket_media (bucket_id, media_file_id, position) VALUES (?, ?, ?)")
        .bind(bucket_id)
        .bind(media_file_id)
        .bind(position)
        .execute(pool)
        .await?;

    Ok(position)
}

/// Members of a bucket in playback order.
pub async fn bucket_members(pool: &SqlitePool, bucket_id: &str) -> Result<Vec<BucketMember>> {
    Ok(sqlx::query_as::<_, BucketMember>(
        "SELECT media_file_id, position FROM bucket_media WHERE bucket_id = ? ORDER BY position ASC",
    )
    .bind(bucket_id)
    .fetch_all(pool)
    .await?)
}

/// Rewrite member positions to match `order` exactly, in one transaction.
/// `order` must be a permutation of the current membership.
pub async fn reorder_bucket_members(pool: &SqlitePool, bucket_id: &str, order: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;

    let current: Vec<(String,)> = sqlx::query_as("SELECT media_file_id FROM bucket_media WHERE bucket_id = ?")
        .bind(bucket_id)
        .fetch_all(&mut *tx)
        .await?;

    let mut have: Vec<&str> = current.iter().map(|(id,)| id.as_str()).collect();
    let mut want: Vec<&str> = order.iter().map(String::as_str).collect();
    have.sort_unstable();
    want.sort_unstable();
    if have != want {
        return Err(Error::Validation(format!(
            "reorder must be a permutation of the bucket's {} members",
            have.len()
        )));
    }

    sqlx::query("DELETE FROM bucket_media WHERE bucket_id = ?")
        .bind(bucket_id)
        .execute(&mut *tx)
        .await?;

    for (position, media_file_id) in order.iter().enumerate() {
        sqlx::query("INSERT INTO bucket_media (bucket_id, media_file_id, position) VALUES (?, ?, ?)")
            .bind(bucket_id)
            .bind(media_file_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    debug!(bucket_id = %bucket_id, members = order.len(), "reordered bucket");
    Ok(())
}

/// Count of distinct show names among a bucket's members (NULLs excluded).
/// Two or more means the bucket mixes series and sequential progression is
/// not meaningful for it.
pub async fn bucket_distinct_show_count(pool: &SqlitePool, bucket_id: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT m.show_name)
         FROM bucket_media b
         JOIN media_files m ON m.id = b.media_file_id
         WHERE b.bucket_id = ?",
    )
    .bind(bucket_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

// ── Channel ↔ bucket attachments (legacy fallback path) ────────────────

/// Replace a channel's directly-attached buckets in one transaction.
pub async fn set_channel_buckets(pool: &SqlitePool, channel_id: &str, buckets: &[(String, i64)]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM channel_buckets WHERE channel_id = ?")
        .bind(channel_id)
        .execute(&mut *tx)
        .await?;

    for (bucket_id, priority) in buckets {
        sqlx::query("INSERT INTO channel_buckets (channel_id, bucket_id, priority) VALUES (?, ?, ?)")
            .bind(channel_id)
            .bind(bucket_id)
            .bind(priority)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Directly-attached bucket ids for a channel, highest priority first.
pub async fn channel_bucket_ids(pool: &SqlitePool, channel_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT bucket_id FROM channel_buckets WHERE channel_id = ? ORDER BY priority DESC, bucket_id ASC",
    )
    .bind(channel_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ── Progression ────────────────────────────────────────────────────────

pub async fn get_progression(pool: &SqlitePool, channel_id: &str, bucket_id: &str) -> Result<Option<BucketProgression>> {
    Ok(sqlx::query_as::<_, BucketProgression>(
        "SELECT channel_id, bucket_id, current_position, last_played_media_id
         FROM bucket_progression WHERE channel_id = ? AND bucket_id = ?",
    )
    .bind(channel_id)
    .bind(bucket_id)
    .fetch_optional(pool)
    .await?)
}

/// Single-row upsert; concurrent writers race benignly (last writer wins).
pub async fn upsert_progression(
    pool: &SqlitePool,
    channel_id: &str,
    bucket_id: &str,
    position: i64,
    last_played_media_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO bucket_progression (channel_id, bucket_id, current_position, last_played_media_id, updated_at)
         VALUES (?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         ON CONFLICT(channel_id, bucket_id) DO UPDATE SET
           current_position = excluded.current_position,
           last_played_media_id = excluded.last_played_media_id,
           updated_at = excluded.updated_at",
    )
    .bind(channel_id)
    .bind(bucket_id)
    .bind(position)
    .bind(last_played_media_id)
    .execute(pool)
    .await?;
    Ok(())
}

// ── Media catalog ──────────────────────────────────────────────────────

pub async fn insert_media_file(
    pool: &SqlitePool,
    path: &str,
    duration: i64,
    show_name: Option<&str>,
    season: Option<i64>,
    episode: Option<i64>,
) -> Result<MediaFile> {
    if duration < 0 {
        return Err(Error::Validation(format!("duration {duration} must be >= 0")));
    }

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM media_files WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Err(Error::Conflict(format!("media file '{path}' already registered")));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO media_files (id, path, duration, show_name, season, episode) VALUES (?, ?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(path)
        .bind(duration)
        .bind(show_name)
        .bind(season)
        .bind(episode)
        .execute(pool)
        .await?;

    debug!(path = %path, id = %id, "registered media file");
    Ok(MediaFile {
        id,
        path: path.to_string(),
        duration,
        show_name: show_name.map(String::from),
        season,
        episode,
        file_exists: true,
    })
}

pub async fn get_media_by_path(pool: &SqlitePool, path: &str) -> Result<MediaFile> {
    let query = format!("SELECT {MEDIA_COLUMNS} FROM media_files WHERE path = ?");
    sqlx::query_as::<_, MediaFile>(&query)
        .bind(path)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("media file", path))
}

pub async fn get_media_file(pool: &SqlitePool, id: &str) -> Result<MediaFile> {
    let query = format!("SELECT {MEDIA_COLUMNS} FROM media_files WHERE id = ?");
    sqlx::query_as::<_, MediaFile>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("media file", id))
}

/// Fetch media records by id. Order of the result is NOT the order of `ids`;
/// callers that care about order re-sort against their id list. Missing ids
/// are silently absent (catalog inconsistency is the caller's call).
pub async fn get_media_by_ids(pool: &SqlitePool, ids: &[String]) -> Result<Vec<MediaFile>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
    let query = format!(
        "SELECT {MEDIA_COLUMNS} FROM media_files WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut q = sqlx::query_as::<_, MediaFile>(&query);
    for id in ids {
        q = q.bind(id);
    }

    Ok(q.fetch_all(pool).await?)
}

pub async fn list_media_files(pool: &SqlitePool) -> Result<Vec<MediaFile>> {
    let query = format!("SELECT {MEDIA_COLUMNS} FROM media_files ORDER BY path");
    Ok(sqlx::query_as::<_, MediaFile>(&query).fetch_all(pool).await?)
}

pub async fn set_media_exists(pool: &SqlitePool, id: &str, file_exists: bool) -> Result<()> {
    sqlx::query(
        "UPDATE media_files SET file_exists = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?",
    )
    .bind(file_exists)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

// ── Config → DB sync ───────────────────────────────────────────────────

/// Sync declared channels and schedule blocks from config to the DB.
/// Channels and blocks not in config are deleted (cascading to progression
/// and attachments); existing channels keep their anchor untouched.
pub async fn sync_config_to_db(pool: &SqlitePool, config: &Config) -> Result<()> {
    let mut config_names: Vec<&str> = Vec::new();

    for channel_cfg in &config.channel {
        config_names.push(&channel_cfg.name);

        let channel_id = match get_channel_by_name(pool, &channel_cfg.name).await {
            Ok(c) => c.id,
            Err(Error::NotFound { .. }) => {
                let id = Uuid::new_v4().to_string();
                sqlx::query("INSERT INTO channels (id, name) VALUES (?, ?)")
                    .bind(&id)
                    .bind(&channel_cfg.name)
                    .execute(pool)
                    .await?;
                debug!(name = %channel_cfg.name, id = %id, "created channel");
                id
            }
            Err(e) => return Err(e),
        };

        let mut config_blocks: Vec<&str> = Vec::new();
        for block in &channel_cfg.block {
            config_blocks.push(&block.name);

            let bucket_id = match &block.bucket {
                None => None,
                Some(name) => match get_bucket_by_name(pool, name).await {
                    Ok(b) => Some(b.id),
                    Err(Error::NotFound { .. }) => {
                        warn!(channel = %channel_cfg.name, block = %block.name, bucket = %name,
                            "block references unknown bucket, storing without one");
                        None
                    }
                    Err(e) => return Err(e),
                },
            };

            // validate_config already vetted the day list
            let days_json = block
                .day_numbers()
                .map_err(Error::Validation)?
                .map(|days| serde_json::to_string(&days).unwrap_or_default());

            upsert_schedule_block(pool, &channel_id, block, bucket_id.as_deref(), days_json.as_deref()).await?;
        }

        // Prune blocks dropped from config
        let db_blocks: Vec<(String, String)> =
            sqlx::query_as("SELECT id, name FROM schedule_blocks WHERE channel_id = ?")
                .bind(&channel_id)
                .fetch_all(pool)
                .await?;
        for (id, name) in &db_blocks {
            if !config_blocks.contains(&name.as_str()) {
                sqlx::query("DELETE FROM schedule_blocks WHERE id = ?")
                    .bind(id)
                    .execute(pool)
                    .await?;
                debug!(channel = %channel_cfg.name, block = %name, "deleted orphaned block");
            }
        }
    }

    // Prune channels dropped from config
    let db_channels: Vec<(String, String)> = sqlx::query_as("SELECT id, name FROM channels")
        .fetch_all(pool)
        .await?;
    for (id, name) in &db_channels {
        if !config_names.contains(&name.as_str()) {
            sqlx::query("DELETE FROM channels WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await?;
            debug!(name = %name, "deleted orphaned channel");
        }
    }

    Ok(())
}

async fn upsert_schedule_block(
    pool: &SqlitePool,
    channel_id: &str,
    block: &crate::config::BlockConfig,
    bucket_id: Option<&str>,
    days_json: Option<&str>,
) -> Result<()> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM schedule_blocks WHERE channel_id = ? AND name = ?")
            .bind(channel_id)
            .bind(&block.name)
            .fetch_optional(pool)
            .await?;

    if let Some((id,)) = existing {
        sqlx::query(
            "UPDATE schedule_blocks SET days_of_week = ?, start_time = ?, end_time = ?, bucket_id = ?,
             playback_mode = ?, priority = ?, enabled = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE id = ?",
        )
        .bind(days_json)
        .bind(&block.start)
        .bind(&block.end)
        .bind(bucket_id)
        .bind(&block.mode)
        .bind(block.priority)
        .bind(block.enabled)
        .bind(&id)
        .execute(pool)
        .await?;
        debug!(block = %block.name, id = %id, "updated schedule block");
    } else {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO schedule_blocks (id, channel_id, name, days_of_week, start_time, end_time,
             bucket_id, playback_mode, priority, enabled)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(channel_id)
        .bind(&block.name)
        .bind(days_json)
        .bind(&block.start)
        .bind(&block.end)
        .bind(bucket_id)
        .bind(&block.mode)
        .bind(block.priority)
        .bind(block.enabled)
        .execute(pool)
        .await?;
        debug!(block = %block.name, id = %id, "created schedule block");
    }

    Ok(())
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Insert a channel directly (tests bypass config sync).
    pub async fn insert_channel(pool: &SqlitePool, name: &str) -> Channel {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO channels (id, name) VALUES (?, ?)")
            .bind(&id)
            .bind(name)
            .execute(pool)
            .await
            .unwrap();
        Channel {
            id,
            name: name.to_string(),
            schedule_start_time: None,
        }
    }

    /// Insert a schedule block with explicit created_at (tie-break tests).
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_block(
        pool: &SqlitePool,
        channel_id: &str,
        name: &str,
        days_json: Option<&str>,
        start: &str,
        end: &str,
        bucket_id: Option<&str>,
        mode: &str,
        priority: i64,
        created_at: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO schedule_blocks (id, channel_id, name, days_of_week, start_time, end_time,
             bucket_id, playback_mode, priority, enabled, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(channel_id)
        .bind(name)
        .bind(days_json)
        .bind(start)
        .bind(end)
        .bind(bucket_id)
        .bind(mode)
        .bind(priority)
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    /// Bucket with members built from (path, duration, show_name) triples.
    pub async fn bucket_with_media(pool: &SqlitePool, name: &str, media: &[(&str, i64, Option<&str>)]) -> (String, Vec<String>) {
        let bucket = create_bucket(pool, name, "general").await.unwrap();
        let mut media_ids = Vec::new();
        for (path, duration, show) in media {
            let file = insert_media_file(pool, path, *duration, *show, None, None).await.unwrap();
            add_bucket_member(pool, &bucket.id, &file.id).await.unwrap();
            media_ids.push(file.id);
        }
        (bucket.id, media_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::memory_pool;
    use test_support::*;

    #[tokio::test]
    async fn bucket_create_is_unique() {
        let pool = memory_pool().await;
        create_bucket(&pool, "cartoons", "general").await.unwrap();
        assert!(matches!(
            create_bucket(&pool, "cartoons", "general").await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            create_bucket(&pool, "", "general").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn members_append_in_order() {
        let pool = memory_pool().await;
        let (bucket_id, media_ids) = bucket_with_media(
            &pool,
            "b",
            &[("/m/a.mkv", 30, None), ("/m/b.mkv", 60, None), ("/m/c.mkv", 10, None)],
        )
        .await;

        let members = bucket_members(&pool, &bucket_id).await.unwrap();
        assert_eq!(members.len(), 3);
        for (i, member) in members.iter().enumerate() {
            assert_eq!(member.position, i as i64);
            assert_eq!(member.media_file_id, media_ids[i]);
        }
    }

    #[tokio::test]
    async fn reorder_rewrites_positions() {
        let pool = memory_pool().await;
        let (bucket_id, ids) = bucket_with_media(
            &pool,
            "b",
            &[("/m/a.mkv", 30, None), ("/m/b.mkv", 60, None), ("/m/c.mkv", 10, None)],
        )
        .await;

        let order = vec![ids[2].clone(), ids[0].clone(), ids[1].clone()];
        reorder_bucket_members(&pool, &bucket_id, &order).await.unwrap();

        let members = bucket_members(&pool, &bucket_id).await.unwrap();
        let got: Vec<&str> = members.iter().map(|m| m.media_file_id.as_str()).collect();
        assert_eq!(got, vec![ids[2].as_str(), ids[0].as_str(), ids[1].as_str()]);
        let positions: Vec<i64> = members.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);

        // Not a permutation: rejected, membership untouched
        let bad = vec![ids[0].clone(), ids[1].clone()];
        assert!(matches!(
            reorder_bucket_members(&pool, &bucket_id, &bad).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(bucket_members(&pool, &bucket_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn deleting_bucket_removes_members() {
        let pool = memory_pool().await;
        let (bucket_id, _) = bucket_with_media(&pool, "b", &[("/m/a.mkv", 30, None)]).await;
        delete_bucket(&pool, &bucket_id).await.unwrap();

        let leftover: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bucket_media WHERE bucket_id = ?")
            .bind(&bucket_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(leftover.0, 0);
    }

    #[tokio::test]
    async fn progression_upserts() {
        let pool = memory_pool().await;
        let channel = insert_channel(&pool, "retro").await;
        let (bucket_id, ids) = bucket_with_media(&pool, "b", &[("/m/a.mkv", 30, None)]).await;

        assert!(get_progression(&pool, &channel.id, &bucket_id).await.unwrap().is_none());

        upsert_progression(&pool, &channel.id, &bucket_id, 2, Some(&ids[0])).await.unwrap();
        let p = get_progression(&pool, &channel.id, &bucket_id).await.unwrap().unwrap();
        assert_eq!(p.current_position, 2);
        assert_eq!(p.last_played_media_id.as_deref(), Some(ids[0].as_str()));

        upsert_progression(&pool, &channel.id, &bucket_id, 0, None).await.unwrap();
        let p = get_progression(&pool, &channel.id, &bucket_id).await.unwrap().unwrap();
        assert_eq!(p.current_position, 0);
        assert!(p.last_played_media_id.is_none());
    }

    #[tokio::test]
    async fn anchor_initializes_once() {
        let pool = memory_pool().await;
        let channel = insert_channel(&pool, "retro").await;

        let first = "2025-01-01T00:00:00Z".parse().unwrap();
        let second = "2025-06-01T00:00:00Z".parse().unwrap();

        assert!(init_anchor(&pool, &channel.id, first).await.unwrap());
        assert!(!init_anchor(&pool, &channel.id, second).await.unwrap());
        assert_eq!(
            get_channel(&pool, &channel.id).await.unwrap().schedule_start_time,
            Some(first)
        );

        // Explicit overwrite and reset are the only escape hatches
        set_anchor(&pool, &channel.id, second).await.unwrap();
        assert_eq!(
            get_channel(&pool, &channel.id).await.unwrap().schedule_start_time,
            Some(second)
        );
        clear_anchor(&pool, &channel.id).await.unwrap();
        assert!(get_channel(&pool, &channel.id).await.unwrap().schedule_start_time.is_none());

        assert!(matches!(
            init_anchor(&pool, "no-such-id", first).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn channel_buckets_replace_atomically() {
        let pool = memory_pool().await;
        let channel = insert_channel(&pool, "retro").await;
        let a = create_bucket(&pool, "a", "general").await.unwrap();
        let b = create_bucket(&pool, "b", "general").await.unwrap();

        set_channel_buckets(&pool, &channel.id, &[(a.id.clone(), 1), (b.id.clone(), 5)])
            .await
            .unwrap();
        assert_eq!(
            channel_bucket_ids(&pool, &channel.id).await.unwrap(),
            vec![b.id.clone(), a.id.clone()]
        );

        set_channel_buckets(&pool, &channel.id, &[(a.id.clone(), 0)]).await.unwrap();
        assert_eq!(channel_bucket_ids(&pool, &channel.id).await.unwrap(), vec![a.id.clone()]);
    }

    #[tokio::test]
    async fn media_paths_are_unique() {
        let pool = memory_pool().await;
        insert_media_file(&pool, "/m/a.mkv", 30, None, None, None).await.unwrap();
        assert!(matches!(
            insert_media_file(&pool, "/m/a.mkv", 30, None, None, None).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            insert_media_file(&pool, "/m/b.mkv", -1, None, None, None).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn distinct_show_count_ignores_nulls() {
        let pool = memory_pool().await;
        let (bucket_id, _) = bucket_with_media(
            &pool,
            "b",
            &[
                ("/m/x1.mkv", 30, Some("X")),
                ("/m/x2.mkv", 30, Some("X")),
                ("/m/ad.mkv", 10, None),
            ],
        )
        .await;
        assert_eq!(bucket_distinct_show_count(&pool, &bucket_id).await.unwrap(), 1);
    }

    fn config_with_channels(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[tokio::test]
    async fn sync_creates_updates_and_prunes() {
        let pool = memory_pool().await;
        create_bucket(&pool, "cartoons", "general").await.unwrap();

        let config = config_with_channels(
            r#"
            [aircast]
            [[channel]]
            name = "retro"
            [[channel.block]]
            name = "morning"
            days = ["mon"]
            start = "06:00"
            end = "09:00"
            bucket = "cartoons"
            mode = "shuffle"
            priority = 5
            "#,
        );
        sync_config_to_db(&pool, &config).await.unwrap();

        let channel = get_channel_by_name(&pool, "retro").await.unwrap();
        let blocks = enabled_blocks_for_channel(&pool, &channel.id).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].playback_mode, "shuffle");
        assert_eq!(blocks[0].days_of_week.as_deref(), Some("[1]"));

        // Anchor survives a re-sync
        let anchor = "2025-01-01T00:00:00Z".parse().unwrap();
        init_anchor(&pool, &channel.id, anchor).await.unwrap();
        sync_config_to_db(&pool, &config).await.unwrap();
        assert_eq!(
            get_channel(&pool, &channel.id).await.unwrap().schedule_start_time,
            Some(anchor)
        );
        // Same block row (created_at-stable upsert, not delete/recreate)
        let blocks_after = enabled_blocks_for_channel(&pool, &channel.id).await.unwrap();
        assert_eq!(blocks_after[0].id, blocks[0].id);

        // Dropping the channel from config prunes it
        let empty = config_with_channels("[aircast]\n");
        sync_config_to_db(&pool, &empty).await.unwrap();
        assert!(matches!(
            get_channel_by_name(&pool, "retro").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn sync_tolerates_unknown_bucket() {
        let pool = memory_pool().await;
        let config = config_with_channels(
            r#"
            [aircast]
            [[channel]]
            name = "retro"
            [[channel.block]]
            name = "morning"
            start = "06:00"
            end = "09:00"
            bucket = "missing"
            "#,
        );
        sync_config_to_db(&pool, &config).await.unwrap();
        let channel = get_channel_by_name(&pool, "retro").await.unwrap();
        let blocks = enabled_blocks_for_channel(&pool, &channel.id).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].bucket_id.is_none());
    }
}
