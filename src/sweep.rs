use std::path::Path;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::store;

/// Catalog existence sweep loop. Flags media rows whose file vanished from
/// disk and restores ones that came back.
pub async fn sweep_loop(pool: SqlitePool, config: Arc<Config>, cancel: CancellationToken) {
    info!("catalog sweep started");

    let interval = humantime::parse_duration(&config.aircast.sweep_interval)
        .unwrap_or(std::time::Duration::from_secs(3600));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("catalog sweep shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match run_sweep(&pool).await {
            Ok((flagged, restored)) => {
                if flagged > 0 || restored > 0 {
                    info!(flagged, restored, "catalog sweep updated media files");
                }
            }
            Err(e) => {
                error!(error = %e, "catalog sweep failed");
            }
        }
    }
}

/// Single sweep pass. Returns (flagged missing, restored) counts.
pub async fn run_sweep(pool: &SqlitePool) -> Result<(u64, u64)> {
    let files = store::list_media_files(pool).await?;

    let mut flagged = 0;
    let mut restored = 0;
    for file in files {
        let on_disk = Path::new(&file.path).exists();
        if on_disk != file.file_exists {
            store::set_media_exists(pool, &file.id, on_disk).await?;
            if on_disk {
                info!(path = %file.path, "media file reappeared");
                restored += 1;
            } else {
                info!(path = %file.path, "media file missing from disk");
                flagged += 1;
            }
        }
    }

    Ok((flagged, restored))
}
