mod cli;
mod config;
mod daemon;
mod db;
mod error;
mod models;
mod playlist;
mod schedule;
mod store;
mod sweep;
mod timeline;

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use sqlx::SqlitePool;
use tracing::info;

use crate::cli::{BucketCommands, Cli, Commands, MediaCommands};
use crate::config::Config;
use crate::playlist::{ChannelPlaylistResolver, PlaylistResolver};
use crate::schedule::ScheduleResolver;
use crate::timeline::TimelineService;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.aircast.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config::validate_config(&config).context("config validation failed")?;

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        Some(command) => {
            let pool = db::create_pool(&config).await.context("creating database")?;
            store::sync_config_to_db(&pool, &config)
                .await
                .context("syncing config to database")?;
            info!("config synced to database");

            run_command(command, &config, &pool).await?;
            pool.close().await;
        }
        None => {
            daemon::run(config).await?;
        }
    }

    Ok(())
}

async fn run_command(command: Commands, config: &Config, pool: &SqlitePool) -> Result<()> {
    let tz = config.timezone();

    match command {
        // Handled before the pool exists
        Commands::Validate => {}

        Commands::Status { channel, at } => {
            let at = match at {
                Some(s) => s
                    .parse::<DateTime<Utc>>()
                    .with_context(|| format!("invalid --at instant '{s}' (expected RFC 3339)"))?,
                None => Utc::now(),
            };
            let ch = store::get_channel_by_name(pool, &channel).await?;

            let schedule = ScheduleResolver::new(pool.clone(), tz);
            let resolver = ChannelPlaylistResolver::new(pool.clone(), schedule.clone(), tz);
            let timeline = TimelineService::new(pool.clone());

            match schedule.active_block(&ch.id, at).await? {
                Some(b) => println!(
                    "Active block: {} ({}, priority {})",
                    b.name,
                    b.playback_mode.as_str(),
                    b.priority
                ),
                None => println!("Active block: none"),
            }

            let playlist = resolver.resolve(&ch.id, at).await?;
            let total: i64 = playlist.iter().map(|f| f.duration).sum();
            println!("Playlist: {} files, {total}s per cycle", playlist.len());

            match timeline.current_position(&ch.id, &playlist, at).await? {
                None => println!("Not broadcasting: no timeline anchor. Run 'aircast init {channel}'."),
                Some(pos) => match playlist.get(pos.file_index) {
                    Some(file) => println!(
                        "Playing {} (file {}/{}) at {}s in, {}s since anchor",
                        file.path,
                        pos.file_index + 1,
                        playlist.len(),
                        pos.offset_seconds,
                        pos.elapsed_seconds
                    ),
                    None => println!("Anchored, but nothing to play."),
                },
            }
        }

        Commands::Next { channel } => {
            let ch = store::get_channel_by_name(pool, &channel).await?;
            let schedule = ScheduleResolver::new(pool.clone(), tz);
            match schedule.next_transition(&ch.id, Utc::now()).await? {
                Some(t) => println!("Next transition: {} ({} local)", t.to_rfc3339(), t.with_timezone(&tz)),
                None => println!("No transition within the next 7 days."),
            }
        }

        Commands::Init { channel } => {
            let ch = store::get_channel_by_name(pool, &channel).await?;
            TimelineService::new(pool.clone()).initialize(&ch.id).await?;
            let ch = store::get_channel(pool, &ch.id).await?;
            match ch.schedule_start_time {
                Some(anchor) => println!("Channel '{channel}' anchored at {}.", anchor.to_rfc3339()),
                None => println!("Channel '{channel}' has no anchor."),
            }
        }

        Commands::Reset { channel } => {
            let ch = store::get_channel_by_name(pool, &channel).await?;
            TimelineService::new(pool.clone()).reset(&ch.id).await?;
            println!("Channel '{channel}' timeline anchor cleared.");
        }

        Commands::SetAnchor { channel, instant } => {
            let instant = instant
                .parse::<DateTime<Utc>>()
                .with_context(|| format!("invalid instant '{instant}' (expected RFC 3339)"))?;
            let ch = store::get_channel_by_name(pool, &channel).await?;
            TimelineService::new(pool.clone()).set_anchor(&ch.id, instant).await?;
            println!("Channel '{channel}' anchored at {}.", instant.to_rfc3339());
        }

        Commands::Media { command } => match command {
            MediaCommands::Add {
                path,
                duration,
                show,
                season,
                episode,
            } => {
                let file = store::insert_media_file(pool, &path, duration, show.as_deref(), season, episode).await?;
                println!("Registered {} ({}s) as {}.", file.path, file.duration, file.id);
            }
            MediaCommands::Sweep => {
                let (flagged, restored) = sweep::run_sweep(pool).await?;
                println!("Sweep done: {flagged} flagged missing, {restored} restored.");
            }
        },

        Commands::Bucket { command } => match command {
            BucketCommands::Create { name, bucket_type } => {
                let bucket = store::create_bucket(pool, &name, &bucket_type).await?;
                println!("Created bucket '{}' ({}).", bucket.name, bucket.id);
            }
            BucketCommands::Add { bucket, path } => {
                let b = store::get_bucket_by_name(pool, &bucket).await?;
                let file = store::get_media_by_path(pool, &path).await?;
                let position = store::add_bucket_member(pool, &b.id, &file.id).await?;
                println!("Added {} to '{bucket}' at position {position}.", file.path);
            }
            BucketCommands::Show { bucket } => {
                let b = store::get_bucket_by_name(pool, &bucket).await?;
                let members = store::bucket_members(pool, &b.id).await?;
                let ids: Vec<String> = members.iter().map(|m| m.media_file_id.clone()).collect();
                let media = store::get_media_by_ids(pool, &ids).await?;
                let by_id: HashMap<&str, &models::MediaFile> = media.iter().map(|m| (m.id.as_str(), m)).collect();

                println!("Bucket '{}' ({}): {} members", b.name, b.bucket_type, members.len());
                for member in &members {
                    match by_id.get(member.media_file_id.as_str()) {
                        Some(m) => {
                            let show = m.show_name.as_deref().unwrap_or("-");
                            let missing = if m.file_exists { "" } else { "  [missing]" };
                            println!(
                                "  {:>4}  {}s  {}  {} ({}){missing}",
                                member.position, m.duration, m.id, m.path, show
                            );
                        }
                        None => println!("  {:>4}  <unknown media {}>", member.position, member.media_file_id),
                    }
                }
            }
            BucketCommands::Reorder { bucket, media_ids } => {
                let b = store::get_bucket_by_name(pool, &bucket).await?;
                store::reorder_bucket_members(pool, &b.id, &media_ids).await?;
                println!("Reordered '{bucket}' with {} members.", media_ids.len());
            }
        },

        Commands::Attach { channel, buckets } => {
            let ch = store::get_channel_by_name(pool, &channel).await?;
            // First listed bucket gets the highest priority
            let mut with_priority = Vec::with_capacity(buckets.len());
            for (index, name) in buckets.iter().enumerate() {
                let b = store::get_bucket_by_name(pool, name).await?;
                with_priority.push((b.id, (buckets.len() - index) as i64));
            }
            store::set_channel_buckets(pool, &ch.id, &with_priority).await?;
            println!("Channel '{channel}' now has {} attached bucket(s).", with_priority.len());
        }
    }

    Ok(())
}
