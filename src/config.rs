use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::Error;
use crate::models::{PlaybackMode, parse_time_of_day};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub aircast: AircastConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub channel: Vec<ChannelConfig>,
}

#[derive(Debug, Deserialize)]
pub struct AircastConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Timezone used for all schedule math (weekday and time-of-day).
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Cadence of the daemon's timeline tick (progression tracking).
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
    /// Cadence of the catalog existence sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_tick_interval() -> String {
    "15s".to_string()
}
fn default_sweep_interval() -> String {
    "1h".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> String {
    "aircast.db".to_string()
}
fn default_max_connections() -> u32 {
    5
}

/// A channel declared in config. Synced to the database at startup; channels
/// removed from config are deleted along with their blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub block: Vec<BlockConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockConfig {
    pub name: String,
    /// Weekday names or numbers (0 = Sunday). Omitted means every day.
    pub days: Option<Vec<String>>,
    pub start: String,
    pub end: String,
    /// Bucket name, resolved to an id at sync time.
    pub bucket: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_block_enabled")]
    pub enabled: bool,
}

fn default_mode() -> String {
    "sequential".to_string()
}
fn default_block_enabled() -> bool {
    true
}

impl BlockConfig {
    /// Resolve the configured day list to weekday numbers, 0 = Sunday.
    pub fn day_numbers(&self) -> Result<Option<Vec<u8>>, String> {
        let Some(days) = &self.days else {
            return Ok(None);
        };
        if days.is_empty() {
            return Err(format!("block '{}': empty day list (omit 'days' for every day)", self.name));
        }
        let mut numbers = Vec::with_capacity(days.len());
        for day in days {
            numbers.push(parse_weekday(day).ok_or_else(|| format!("block '{}': unknown day '{day}'", self.name))?);
        }
        Ok(Some(numbers))
    }
}

fn parse_weekday(s: &str) -> Option<u8> {
    match s.to_lowercase().as_str() {
        "sunday" | "sun" | "0" => Some(0),
        "monday" | "mon" | "1" => Some(1),
        "tuesday" | "tue" | "2" => Some(2),
        "wednesday" | "wed" | "3" => Some(3),
        "thursday" | "thu" | "4" => Some(4),
        "friday" | "fri" | "5" => Some(5),
        "saturday" | "sat" | "6" => Some(6),
        _ => None,
    }
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.database.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.aircast.data_dir.join(db_path)
        }
    }

    /// The configured schedule timezone. Valid after `validate_config`.
    pub fn timezone(&self) -> chrono_tz::Tz {
        self.aircast.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).context("reading config file")?;
    let config: Config = toml::from_str(&content).context("parsing config file")?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    // Timezone drives every schedule computation; fail early if it's unknown
    config
        .aircast
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|_| Error::Validation(format!("unknown timezone '{}'", config.aircast.timezone)))?;

    humantime::parse_duration(&config.aircast.tick_interval)
        .map_err(|e| Error::Validation(format!("tick_interval '{}': {e}", config.aircast.tick_interval)))?;
    humantime::parse_duration(&config.aircast.sweep_interval)
        .map_err(|e| Error::Validation(format!("sweep_interval '{}': {e}", config.aircast.sweep_interval)))?;

    if config.database.max_connections == 0 {
        return Err(Error::Validation("database.max_connections must be at least 1".to_string()).into());
    }

    let mut channel_names = HashSet::new();
    for channel in &config.channel {
        if channel.name.is_empty() {
            return Err(Error::Validation("channel with empty name".to_string()).into());
        }
        if !channel_names.insert(&channel.name) {
            return Err(Error::Validation(format!("duplicate channel name: '{}'", channel.name)).into());
        }

        let mut block_names = HashSet::new();
        for block in &channel.block {
            if !block_names.insert(&block.name) {
                return Err(Error::Validation(format!(
                    "channel '{}': duplicate block name '{}'",
                    channel.name, block.name
                ))
                .into());
            }

            block
                .day_numbers()
                .map_err(|e| Error::Validation(format!("channel '{}': {e}", channel.name)))?;

            for (label, value) in [("start", &block.start), ("end", &block.end)] {
                if parse_time_of_day(value).is_none() {
                    return Err(Error::Validation(format!(
                        "channel '{}' block '{}': invalid {label} time '{value}' (expected HH:MM or HH:MM:SS)",
                        channel.name, block.name
                    ))
                    .into());
                }
            }

            if PlaybackMode::parse(&block.mode).is_none() {
                return Err(Error::Validation(format!(
                    "channel '{}' block '{}': unknown playback mode '{}' \
                     (expected sequential, shuffle, or random)",
                    channel.name, block.name, block.mode
                ))
                .into());
            }
        }
    }

    Ok(())
}
