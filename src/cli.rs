use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "malwatch",
    version,
    about = "Match streaming-site titles against your MyAnimeList and watch a page for new episodes"
)]
pub struct Cli {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one monitor cycle against the configured page.
    Check,
    /// Run monitor cycles until interrupted.
    Watch {
        /// Minutes between cycles (15-60); defaults to the stored setting.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Show the list status of page titles (read from stdin when none given).
    Label {
        titles: Vec<String>,
        /// Only consult the list, never the search API.
        #[arg(long)]
        no_search: bool,
    },
    /// Re-fetch the list, ignoring the cache.
    Refresh,
    /// Verify and store the MyAnimeList username.
    User { name: String },
    /// Show or change settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show past release notifications.
    History {
        /// Delete all stored notifications.
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    Show,
    Set { key: String, value: String },
    Unset { key: String },
}
