use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
        .usage(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Yellow.on_default())
        .error(AnsiColor::Red.on_default().effects(Effects::BOLD))
        .valid(AnsiColor::Green.on_default())
        .invalid(AnsiColor::Red.on_default())
}

/// Dart league player identity resolution and repair
///
/// Resolves scraped `(name, team, time)` observations to stable player
/// identities and repairs wrong resolutions after the fact.
///
/// Repair commands are dry runs unless `--force` is given: they perform
/// every read and scoring step and print what would change.
/// The exit code is non-zero when any unit of work failed.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(styles = get_styles())]
pub struct Cli {
    /// Identity database path. Overrides the config file and DART_IDENTITY_DB.
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<String>,

    /// Specify a custom log file path. If not provided, logs will be written to the default location.
    #[arg(long = "log-file", global = true, value_name = "PATH")]
    pub log_file: Option<String>,

    /// Also print logs to the terminal (stderr).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import raw observations from a JSON file.
    Import {
        /// JSON array of observations
        file: PathBuf,
        /// Resolve and report without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show how a raw name would be resolved. Never writes.
    Match {
        /// Raw player name as scraped
        name: String,
        /// Team label the name was seen under
        #[arg(long, short)]
        team: Option<String>,
    },

    /// Detect one player name covering different people at the same time.
    Overlap {
        #[command(subcommand)]
        action: OverlapCommand,
    },

    /// Split overlapping identities into club-specific ones.
    Split {
        #[command(subcommand)]
        action: SplitCommand,
    },

    /// Merge duplicate identities.
    Consolidate {
        #[command(subcommand)]
        action: ConsolidateCommand,
    },

    /// Review and apply global mappings.
    Mappings {
        #[command(subcommand)]
        action: MappingsCommand,
    },

    /// Per-observation identity corrections.
    Overrides {
        #[command(subcommand)]
        action: OverridesCommand,
    },

    /// Show or create the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum OverlapCommand {
    /// Analyze one player.
    Analyze { player: String },
    /// Scan every active player seen under two or more team labels.
    Batch {
        /// Minimum total matches (default from config)
        #[arg(long)]
        min_matches: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a player's activity periods per club.
    Timeline { player: String },
}

#[derive(Subcommand, Debug)]
pub enum SplitCommand {
    /// Show the split plan for one player.
    Analyze { player: String },
    /// Split one player.
    Apply {
        player: String,
        #[arg(long)]
        force: bool,
    },
    /// Split every player flagged by an overlap scan.
    Batch {
        #[arg(long)]
        min_matches: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConsolidateCommand {
    /// Merge names that differ only by case.
    Case {
        #[arg(long)]
        force: bool,
    },
    /// Review and merge single-typo name pairs in batches.
    Typo {
        /// 1-based batch number to show or act on
        #[arg(long, default_value_t = 1)]
        batch: usize,
        /// Comma-separated 1-based item numbers within the batch to merge
        #[arg(long, value_delimiter = ',')]
        approve: Vec<usize>,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum MappingsCommand {
    /// Suggest mapping SOURCE onto TARGET.
    Suggest {
        source: String,
        target: String,
        #[arg(long = "type", default_value = "manual")]
        mapping_type: String,
        #[arg(long, default_value_t = 90)]
        confidence: u8,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Suggest mappings from duplicate-looking names inside team rosters.
    Generate {
        /// Only teams whose label contains this text
        #[arg(long)]
        team: Option<String>,
        #[arg(long)]
        min_confidence: Option<u8>,
        #[arg(long)]
        force: bool,
    },
    /// List mappings.
    List {
        /// suggested, confirmed or rejected
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Confirm a mapping.
    Approve {
        id: i64,
        #[arg(long)]
        by: Option<String>,
    },
    /// Reject a mapping.
    Reject {
        id: i64,
        #[arg(long)]
        note: Option<String>,
    },
    /// Apply confirmed mappings: one by id, or every pending one.
    Apply {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<i64>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        force: bool,
    },
    /// Write mappings to a JSON file.
    Export {
        path: PathBuf,
        #[arg(long)]
        status: Option<String>,
    },
    /// Report applied mappings whose source has observations again.
    Verify,
    /// Delete players nothing references.
    Cleanup {
        /// Include multi-word names, not only bare first names
        #[arg(long)]
        all: bool,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum OverridesCommand {
    /// Redirect one observation of ORIGINAL to TARGET.
    Add {
        sub_match: i64,
        original: String,
        target: String,
        #[arg(long, default_value_t = 100)]
        confidence: u8,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// Replace the existing override for one observation.
    Supersede {
        sub_match: i64,
        original: String,
        target: String,
        #[arg(long, default_value_t = 100)]
        confidence: u8,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// List overrides from or to a player.
    List { player: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration.
    Show,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
