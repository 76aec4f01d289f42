//! Application-wide constants and configuration values
//!
//! Confidence tiers, detection thresholds and other tuning knobs live here so
//! the matcher, the repair tools and the configuration defaults agree on them.

/// Default SQLite busy timeout in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default database file name inside the data directory
pub const DEFAULT_DATABASE_FILE: &str = "dart_identity.sqlite";

/// Default log file name
pub const DEFAULT_LOG_FILE: &str = "dart_identity.log";

/// Confidence values attached to matcher decisions (0-100)
pub mod confidence {
    /// Exact name match
    pub const EXACT: u8 = 100;

    /// Case variant redirected to the most used spelling
    pub const CASE_VARIATION_PRIMARY: u8 = 95;

    /// Existing club-specific separated identity with an exact club match
    pub const CLUB_VARIANT_EXACT: u8 = 95;

    /// Existing club-specific separated identity matched after standardization
    pub const CLUB_VARIANT_STANDARDIZED: u8 = 93;

    /// Contextual first-name override reused for the same club
    pub const FIRST_NAME_CONTEXT: u8 = 90;

    /// A new club-specific identity should be created
    pub const CREATE_CLUB_VARIANT: u8 = 90;

    /// Confirmed global mapping
    pub const GLOBAL_MAPPING: u8 = 90;

    /// Several case-insensitive candidates, most referenced one chosen
    pub const CASE_INSENSITIVE_PRIORITIZED: u8 = 88;

    /// Exactly one case-insensitive candidate
    pub const CASE_INSENSITIVE: u8 = 85;

    /// Confidence recorded for contextual first-name overrides created on import
    pub const CONTEXTUAL_OVERRIDE: u8 = 85;

    /// Hyphen/space spelling variant
    pub const HYPHEN_VARIANT: u8 = 80;

    /// No candidate at all
    pub const NONE: u8 = 0;

    /// Decisions at or above this value are accepted without review
    pub const HIGH_TIER: u8 = 90;

    /// Decisions at or above this value are accepted with a warning
    pub const MEDIUM_TIER: u8 = 75;
}

/// Bare first-name handling
pub mod bare_name {
    /// Shortest token treated as a bare first name
    pub const MIN_LEN: usize = 3;

    /// Longest token treated as a bare first name
    pub const MAX_LEN: usize = 15;
}

/// Overlap detection and identity splitting thresholds
pub mod overlap {
    /// Minimum matches a club needs before its activity counts as significant
    pub const MIN_CLUB_MATCHES: usize = 5;

    /// Overlapping days tolerated before two clubs are flagged
    pub const TOLERANCE_DAYS: i64 = 14;

    /// Clusters at the same club closer than this are merged when splitting
    pub const MERGE_GAP_DAYS: i64 = 30;

    /// Gap inside one team label that starts a new activity cluster
    pub const SEASON_GAP_DAYS: i64 = 120;

    /// Minimum total matches for a player to be scanned in batch mode
    pub const SCAN_MIN_TOTAL_MATCHES: usize = 30;
}

/// Duplicate consolidation
pub mod consolidation {
    /// Typo pairs shown per review batch
    pub const TYPO_BATCH_SIZE: usize = 20;

    /// Shortest name part that may differ in a typo pair
    pub const TYPO_MIN_PART_LEN: usize = 4;

    /// Shorter part length from which two edits are allowed
    pub const TYPO_LONG_PART_LEN: usize = 10;

    /// Similarity at which two roster names are proposed as one player
    pub const SUGGESTION_SIMILARITY: f64 = 0.85;

    /// Default lowest confidence a roster suggestion needs
    pub const SUGGESTION_MIN_CONFIDENCE: u8 = 70;
}

/// Environment variable names
pub mod env_vars {
    /// Environment variable for database path override
    pub const DATABASE: &str = "DART_IDENTITY_DB";

    /// Environment variable for log file path override
    pub const LOG_FILE: &str = "DART_IDENTITY_LOG_FILE";

    /// Environment variable for SQLite busy timeout override in milliseconds
    pub const BUSY_TIMEOUT_MS: &str = "DART_IDENTITY_BUSY_TIMEOUT_MS";
}

/// Retry configuration for lock contention on the shared database
pub mod retry {
    /// Maximum number of attempts per unit of work
    pub const MAX_ATTEMPTS: u32 = 5;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 50;

    /// Upper bound for a single backoff delay (milliseconds)
    pub const MAX_DELAY_MS: u64 = 2_000;

    /// Maximum random jitter added to each delay (milliseconds)
    pub const JITTER_MS: u64 = 25;
}

/// Size of the resolved team-label cache owned by each matcher
pub const CLUB_CACHE_SIZE: usize = 512;
