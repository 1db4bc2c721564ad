use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::ScheduleBlock;
use crate::store;

/// Resolves which schedule block is on air for a channel at a given instant,
/// and when the next block boundary occurs. All weekday and time-of-day math
/// happens in the configured schedule timezone.
#[derive(Clone)]
pub struct ScheduleResolver {
    pool: SqlitePool,
    tz: Tz,
}

fn seconds_of_day(t: NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64
}

impl ScheduleResolver {
    pub fn new(pool: SqlitePool, tz: Tz) -> Self {
        Self { pool, tz }
    }

    /// Load the channel's enabled blocks, skipping malformed rows with a
    /// warning. A bad row must never take the whole channel off air.
    async fn load_blocks(&self, channel_id: &str) -> Result<Vec<ScheduleBlock>> {
        let rows = store::enabled_blocks_for_channel(&self.pool, channel_id).await?;
        let mut blocks = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row.name.clone();
            match ScheduleBlock::from_row(row) {
                Ok(block) => blocks.push(block),
                Err(e) => warn!(block = %name, error = %e, "skipping malformed schedule block"),
            }
        }
        Ok(blocks)
    }

    /// The block on air at `instant`, or None when nothing is scheduled.
    ///
    /// Candidates are blocks applicable to the local weekday, plus wraparound
    /// blocks from the previous weekday (still running past midnight, judged
    /// against their tail only). Higher priority wins; equal priority falls
    /// back to earlier created_at, then id.
    pub async fn active_block(&self, channel_id: &str, instant: DateTime<Utc>) -> Result<Option<ScheduleBlock>> {
        let local = instant.with_timezone(&self.tz);
        let weekday = local.weekday().num_days_from_sunday() as u8;
        let prev_weekday = (weekday + 6) % 7;
        let second = local.num_seconds_from_midnight() as i64;

        let blocks = self.load_blocks(channel_id).await?;

        // (block, judged as previous-day tail)
        let mut candidates: Vec<(&ScheduleBlock, bool)> = Vec::new();
        for block in &blocks {
            if block.applies_on(weekday) {
                candidates.push((block, false));
            }
            if block.wraps_midnight() && block.applies_on(prev_weekday) {
                candidates.push((block, true));
            }
        }

        candidates.sort_by(|(a, _), (b, _)| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut active: Vec<&ScheduleBlock> = Vec::new();
        for (block, prev_day_tail) in candidates {
            let start = seconds_of_day(block.start_time);
            let end = seconds_of_day(block.end_time);
            let is_active = if prev_day_tail {
                second < end
            } else if end > start {
                start <= second && second < end
            } else {
                second >= start || second < end
            };
            if is_active && !active.iter().any(|b| b.id == block.id) {
                active.push(block);
            }
        }

        let Some(winner) = active.first() else {
            debug!(channel_id = %channel_id, "no block on air");
            return Ok(None);
        };

        if let Some(runner_up) = active.get(1)
            && runner_up.priority == winner.priority
            && runner_up.created_at == winner.created_at
        {
            warn!(
                channel_id = %channel_id,
                block = %winner.name,
                other = %runner_up.name,
                "blocks tie on priority and created_at, picking by id"
            );
        }

        debug!(channel_id = %channel_id, block = %winner.name, "resolved active block");
        Ok(Some((*winner).clone()))
    }

    /// The earliest start boundary of any enabled block with a bucket,
    /// strictly after `instant`. None when no boundary falls within the next
    /// 7 days. Used by EPG-style callers to schedule their next refresh.
    pub async fn next_transition(&self, channel_id: &str, instant: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let blocks = self.load_blocks(channel_id).await?;
        let today = instant.with_timezone(&self.tz).date_naive();

        let mut earliest: Option<DateTime<Utc>> = None;
        for block in blocks.iter().filter(|b| b.bucket_id.is_some()) {
            for day_offset in 0..=7i64 {
                let date = today + Duration::days(day_offset);
                if !block.applies_on(date.weekday().num_days_from_sunday() as u8) {
                    continue;
                }
                // earliest() skips times that don't exist locally (DST gap)
                let Some(candidate) = self.tz.from_local_datetime(&date.and_time(block.start_time)).earliest() else {
                    continue;
                };
                let candidate = candidate.with_timezone(&Utc);
                if candidate > instant {
                    if earliest.is_none_or(|best| candidate < best) {
                        earliest = Some(candidate);
                    }
                    break;
                }
            }
        }

        Ok(earliest)
    }
}
