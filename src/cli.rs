use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aircast", about = "Virtual linear-broadcast engine — always-on TV-style channels")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Show what a channel is playing
    Status {
        /// Channel name
        channel: String,

        /// Evaluate at this instant (RFC 3339) instead of now
        #[arg(long)]
        at: Option<String>,
    },

    /// Show a channel's next schedule boundary
    Next {
        /// Channel name
        channel: String,
    },

    /// Anchor a channel's timeline (no-op if already anchored)
    Init {
        /// Channel name
        channel: String,
    },

    /// Clear a channel's timeline anchor
    Reset {
        /// Channel name
        channel: String,
    },

    /// Overwrite a channel's timeline anchor
    SetAnchor {
        /// Channel name
        channel: String,

        /// New anchor instant (RFC 3339)
        instant: String,
    },

    /// Media catalog management
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },

    /// Bucket management
    Bucket {
        #[command(subcommand)]
        command: BucketCommands,
    },

    /// Attach buckets directly to a channel (fallback programming)
    Attach {
        /// Channel name
        channel: String,

        /// Bucket names, highest priority first; empty clears the set
        buckets: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum MediaCommands {
    /// Register a media file in the catalog
    Add {
        /// Absolute path of the file
        path: String,

        /// Duration in seconds
        #[arg(long)]
        duration: i64,

        /// Series name (sequential progression only works single-series)
        #[arg(long)]
        show: Option<String>,

        #[arg(long)]
        season: Option<i64>,

        #[arg(long)]
        episode: Option<i64>,
    },

    /// Run one catalog existence sweep
    Sweep,
}

#[derive(Subcommand)]
pub enum BucketCommands {
    /// Create an empty bucket
    Create {
        /// Bucket name
        name: String,

        #[arg(long, default_value = "general")]
        bucket_type: String,
    },

    /// Append a registered media file (by path) to a bucket
    Add {
        /// Bucket name
        bucket: String,

        /// Media file path as registered in the catalog
        path: String,
    },

    /// List a bucket's members in playback order
    Show {
        /// Bucket name
        bucket: String,
    },

    /// Rewrite a bucket's playback order (media ids, new order)
    Reorder {
        /// Bucket name
        bucket: String,

        /// Every member's media id, in the desired order
        media_ids: Vec<String>,
    },
}
