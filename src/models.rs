use chrono::{DateTime, NaiveTime, Utc};
use sqlx::FromRow;

use crate::error::{Error, Result};

#[derive(Debug, Clone, FromRow)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub schedule_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MediaFile {
    pub id: String,
    pub path: String,
    pub duration: i64,
    pub show_name: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub file_exists: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct MediaBucket {
    pub id: String,
    pub name: String,
    pub bucket_type: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct BucketMember {
    pub media_file_id: String,
    pub position: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct BucketProgression {
    pub channel_id: String,
    pub bucket_id: String,
    pub current_position: i64,
    pub last_played_media_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Sequential,
    Shuffle,
    Random,
}

impl PlaybackMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sequential" => Some(PlaybackMode::Sequential),
            "shuffle" => Some(PlaybackMode::Shuffle),
            "random" => Some(PlaybackMode::Random),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackMode::Sequential => "sequential",
            PlaybackMode::Shuffle => "shuffle",
            PlaybackMode::Random => "random",
        }
    }
}

/// Raw schedule block row as stored. Day sets are JSON text (NULL = all days)
/// and times are HH:MM:SS text; both are validated on parse, not on read.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduleBlockRow {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    pub days_of_week: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub bucket_id: Option<String>,
    pub playback_mode: String,
    pub priority: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A schedule block with its time fields parsed and validated.
#[derive(Debug, Clone)]
pub struct ScheduleBlock {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    /// `None` means every day; otherwise weekday numbers, 0 = Sunday.
    pub days_of_week: Option<Vec<u8>>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub bucket_id: Option<String>,
    pub playback_mode: PlaybackMode,
    pub priority: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl ScheduleBlock {
    /// Parse a stored row. Malformed rows fail with `ConfigInvalid`; the
    /// resolver skips them with a warning instead of failing the lookup.
    pub fn from_row(row: ScheduleBlockRow) -> Result<Self> {
        let days_of_week = match &row.days_of_week {
            None => None,
            Some(raw) => {
                let days: Vec<u8> = serde_json::from_str(raw).map_err(|e| {
                    Error::ConfigInvalid(format!("block '{}': bad day set '{raw}': {e}", row.name))
                })?;
                if days.is_empty() {
                    return Err(Error::ConfigInvalid(format!(
                        "block '{}': empty day set",
                        row.name
                    )));
                }
                if let Some(bad) = days.iter().find(|d| **d > 6) {
                    return Err(Error::ConfigInvalid(format!(
                        "block '{}': weekday {bad} out of range 0-6",
                        row.name
                    )));
                }
                Some(days)
            }
        };

        let start_time = parse_time_of_day(&row.start_time)
            .ok_or_else(|| Error::ConfigInvalid(format!("block '{}': bad start time '{}'", row.name, row.start_time)))?;
        let end_time = parse_time_of_day(&row.end_time)
            .ok_or_else(|| Error::ConfigInvalid(format!("block '{}': bad end time '{}'", row.name, row.end_time)))?;

        let playback_mode = PlaybackMode::parse(&row.playback_mode).ok_or_else(|| {
            Error::ConfigInvalid(format!(
                "block '{}': unknown playback mode '{}'",
                row.name, row.playback_mode
            ))
        })?;

        Ok(ScheduleBlock {
            id: row.id,
            channel_id: row.channel_id,
            name: row.name,
            days_of_week,
            start_time,
            end_time,
            bucket_id: row.bucket_id,
            playback_mode,
            priority: row.priority,
            enabled: row.enabled,
            created_at: row.created_at,
        })
    }

    /// Whether the block spans midnight (`end <= start`).
    pub fn wraps_midnight(&self) -> bool {
        self.end_time <= self.start_time
    }

    /// Whether the block applies on the given weekday (0 = Sunday).
    pub fn applies_on(&self, weekday: u8) -> bool {
        match &self.days_of_week {
            None => true,
            Some(days) => days.contains(&weekday),
        }
    }
}

/// Parse a time-of-day string, accepting HH:MM:SS or HH:MM.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn row(days: Option<&str>, start: &str, end: &str, mode: &str) -> ScheduleBlockRow {
        ScheduleBlockRow {
            id: "blk-1".into(),
            channel_id: "ch-1".into(),
            name: "late night".into(),
            days_of_week: days.map(String::from),
            start_time: start.into(),
            end_time: end.into(),
            bucket_id: None,
            playback_mode: mode.into(),
            priority: 0,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parses_full_row() {
        let block = ScheduleBlock::from_row(row(Some("[1,2,3]"), "23:00:00", "01:00", "shuffle")).unwrap();
        assert_eq!(block.days_of_week, Some(vec![1, 2, 3]));
        assert_eq!(block.start_time.hour(), 23);
        assert_eq!(block.end_time.hour(), 1);
        assert_eq!(block.playback_mode, PlaybackMode::Shuffle);
        assert!(block.wraps_midnight());
        assert!(block.applies_on(2));
        assert!(!block.applies_on(0));
    }

    #[test]
    fn null_days_means_every_day() {
        let block = ScheduleBlock::from_row(row(None, "06:00", "09:00", "sequential")).unwrap();
        assert!(block.days_of_week.is_none());
        for day in 0..=6 {
            assert!(block.applies_on(day));
        }
        assert!(!block.wraps_midnight());
    }

    #[test]
    fn equal_start_and_end_wraps() {
        let block = ScheduleBlock::from_row(row(None, "00:00:00", "00:00:00", "random")).unwrap();
        assert!(block.wraps_midnight());
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(matches!(
            ScheduleBlock::from_row(row(None, "25:00", "09:00", "sequential")),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            ScheduleBlock::from_row(row(Some("[]"), "06:00", "09:00", "sequential")),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            ScheduleBlock::from_row(row(Some("[7]"), "06:00", "09:00", "sequential")),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            ScheduleBlock::from_row(row(Some("not json"), "06:00", "09:00", "sequential")),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            ScheduleBlock::from_row(row(None, "06:00", "09:00", "looping")),
            Err(Error::ConfigInvalid(_))
        ));
    }
}
