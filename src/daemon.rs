use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::models::{Channel, PlaybackMode};
use crate::playlist::{ChannelPlaylistResolver, PlaylistResolver};
use crate::schedule::ScheduleResolver;
use crate::timeline::TimelineService;
use crate::{db, store, sweep};

pub async fn run(config: Config) -> Result<()> {
    let pool = db::create_pool(&config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    store::sync_config_to_db(&pool, &config)
        .await
        .context("syncing config to database")?;
    info!("config synced to database");

    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    let tick_handle = tokio::spawn(tick_loop(pool.clone(), config.clone(), cancel.clone()));
    let sweep_handle = tokio::spawn(sweep::sweep_loop(pool.clone(), config.clone(), cancel.clone()));

    wait_for_shutdown().await;
    info!("shutdown signal received");

    cancel.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tick_handle.await;
        let _ = sweep_handle.await;
    })
    .await;

    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

/// Timeline tick loop. On every tick the playhead of each anchored channel is
/// recomputed; when it crosses into a different bucket member on a sequential
/// single-series block, the progression cursor is persisted so the series
/// resumes from the right episode after schedule changes or restarts.
async fn tick_loop(pool: SqlitePool, config: Arc<Config>, cancel: CancellationToken) {
    info!("timeline tick loop started");

    let tz = config.timezone();
    let schedule = ScheduleResolver::new(pool.clone(), tz);
    let resolver = ChannelPlaylistResolver::new(pool.clone(), schedule.clone(), tz);
    let timeline = TimelineService::new(pool.clone());

    let interval =
        humantime::parse_duration(&config.aircast.tick_interval).unwrap_or(std::time::Duration::from_secs(15));

    // Last observed member index per (channel, bucket). Resets on restart,
    // which only delays the next progression write by one boundary.
    let mut last_member: HashMap<(String, String), i64> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("timeline tick loop shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let channels = match store::list_channels(&pool).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to load channels for ticking");
                continue;
            }
        };

        let now = Utc::now();
        for channel in &channels {
            if channel.schedule_start_time.is_none() {
                continue; // not broadcasting yet
            }
            if let Err(e) = track_progression(&pool, &schedule, &resolver, &timeline, channel, now, &mut last_member).await {
                error!(channel = %channel.name, error = %e, "progression tick failed");
            }
        }
    }
}

/// One progression check for one channel. Only sequential single-series
/// blocks carry a cursor; everything else is a no-op.
async fn track_progression(
    pool: &SqlitePool,
    schedule: &ScheduleResolver,
    resolver: &ChannelPlaylistResolver,
    timeline: &TimelineService,
    channel: &Channel,
    now: DateTime<Utc>,
    last_member: &mut HashMap<(String, String), i64>,
) -> crate::error::Result<()> {
    let Some(block) = schedule.active_block(&channel.id, now).await? else {
        return Ok(());
    };
    if block.playback_mode != PlaybackMode::Sequential {
        return Ok(());
    }
    let Some(bucket_id) = block.bucket_id.clone() else {
        return Ok(());
    };
    if store::bucket_distinct_show_count(pool, &bucket_id).await? > 1 {
        return Ok(());
    }

    let playlist = resolver.resolve(&channel.id, now).await?;
    if playlist.is_empty() {
        return Ok(());
    }
    let Some(position) = timeline.current_position(&channel.id, &playlist, now).await? else {
        return Ok(());
    };

    let members = store::bucket_members(pool, &bucket_id).await?;
    let current_file = &playlist[position.file_index];
    let Some(member_index) = members.iter().position(|m| m.media_file_id == current_file.id) else {
        return Ok(()); // playing out of a fallback tier, nothing to track
    };
    let member_index = member_index as i64;

    let key = (channel.id.clone(), bucket_id.clone());
    match last_member.get(&key) {
        Some(prev) if *prev == member_index => {}
        Some(_) => {
            store::upsert_progression(pool, &channel.id, &bucket_id, member_index, Some(&current_file.id)).await?;
            info!(
                channel = %channel.name,
                bucket_id = %bucket_id,
                position = member_index,
                path = %current_file.path,
                "progression advanced at file boundary"
            );
            last_member.insert(key, member_index);
        }
        None => {
            // First observation since startup; just remember it
            debug!(channel = %channel.name, position = member_index, "progression tracking primed");
            last_member.insert(key, member_index);
        }
    }

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::store::test_support::{bucket_with_media, insert_block, insert_channel};

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn boundary_crossing_persists_progression() {
        let pool = memory_pool().await;
        let channel = insert_channel(&pool, "retro").await;
        let (bucket_id, ids) = bucket_with_media(
            &pool,
            "show",
            &[
                ("/m/e1.mkv", 30, Some("X")),
                ("/m/e2.mkv", 60, Some("X")),
                ("/m/e3.mkv", 10, Some("X")),
            ],
        )
        .await;
        insert_block(
            &pool, &channel.id, "all day", None, "00:00:00", "00:00:00",
            Some(&bucket_id), "sequential", 0, "2025-01-01T00:00:00Z",
        )
        .await;
        store::set_anchor(&pool, &channel.id, utc("2025-01-01T00:00:00Z")).await.unwrap();
        let channel = store::get_channel(&pool, &channel.id).await.unwrap();

        let schedule = ScheduleResolver::new(pool.clone(), chrono_tz::UTC);
        let resolver = ChannelPlaylistResolver::new(pool.clone(), schedule.clone(), chrono_tz::UTC);
        let timeline = TimelineService::new(pool.clone());
        let mut last_member = HashMap::new();

        // First tick inside e1 primes the tracker without writing
        track_progression(
            &pool, &schedule, &resolver, &timeline, &channel,
            utc("2025-01-01T00:00:10Z"), &mut last_member,
        )
        .await
        .unwrap();
        assert!(store::get_progression(&pool, &channel.id, &bucket_id).await.unwrap().is_none());

        // Tick inside e2 crosses the boundary and persists the cursor
        track_progression(
            &pool, &schedule, &resolver, &timeline, &channel,
            utc("2025-01-01T00:00:45Z"), &mut last_member,
        )
        .await
        .unwrap();
        let p = store::get_progression(&pool, &channel.id, &bucket_id).await.unwrap().unwrap();
        assert_eq!(p.current_position, 1);
        assert_eq!(p.last_played_media_id.as_deref(), Some(ids[1].as_str()));

        // Another tick in the same file writes nothing new
        track_progression(
            &pool, &schedule, &resolver, &timeline, &channel,
            utc("2025-01-01T00:00:50Z"), &mut last_member,
        )
        .await
        .unwrap();
        let p = store::get_progression(&pool, &channel.id, &bucket_id).await.unwrap().unwrap();
        assert_eq!(p.current_position, 1);
    }

    #[tokio::test]
    async fn shuffle_blocks_do_not_track_progression() {
        let pool = memory_pool().await;
        let channel = insert_channel(&pool, "retro").await;
        let (bucket_id, _) = bucket_with_media(&pool, "mix", &[("/m/a.mkv", 30, None), ("/m/b.mkv", 30, None)]).await;
        insert_block(
            &pool, &channel.id, "all day", None, "00:00:00", "00:00:00",
            Some(&bucket_id), "shuffle", 0, "2025-01-01T00:00:00Z",
        )
        .await;
        store::set_anchor(&pool, &channel.id, utc("2025-01-01T00:00:00Z")).await.unwrap();
        let channel = store::get_channel(&pool, &channel.id).await.unwrap();

        let schedule = ScheduleResolver::new(pool.clone(), chrono_tz::UTC);
        let resolver = ChannelPlaylistResolver::new(pool.clone(), schedule.clone(), chrono_tz::UTC);
        let timeline = TimelineService::new(pool.clone());
        let mut last_member = HashMap::new();

        for at in ["2025-01-01T00:00:10Z", "2025-01-01T00:00:45Z"] {
            track_progression(&pool, &schedule, &resolver, &timeline, &channel, utc(at), &mut last_member)
                .await
                .unwrap();
        }
        assert!(store::get_progression(&pool, &channel.id, &bucket_id).await.unwrap().is_none());
    }
}
