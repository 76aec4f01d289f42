use crate::constants::{self, consolidation, env_vars, overlap};
use crate::error::AppError;
use crate::identity::{ClubContextResolver, NameNormalizer, OverlapSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub mod paths;
pub mod validation;

use paths::{get_config_path, get_default_database_path, get_log_dir_path};
use validation::validate_config;

/// Matcher tuning.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MatcherConfig {
    /// Resolved team labels kept in the matcher's LRU cache.
    pub club_cache_size: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            club_cache_size: constants::CLUB_CACHE_SIZE,
        }
    }
}

/// Overlap detection and split thresholds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct OverlapConfig {
    pub min_club_matches: usize,
    pub tolerance_days: i64,
    pub merge_gap_days: i64,
    pub season_gap_days: i64,
    /// Minimum total matches for `overlap batch`.
    pub scan_min_total_matches: usize,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            min_club_matches: overlap::MIN_CLUB_MATCHES,
            tolerance_days: overlap::TOLERANCE_DAYS,
            merge_gap_days: overlap::MERGE_GAP_DAYS,
            season_gap_days: overlap::SEASON_GAP_DAYS,
            scan_min_total_matches: overlap::SCAN_MIN_TOTAL_MATCHES,
        }
    }
}

/// Duplicate consolidation and mapping suggestion settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub typo_batch_size: usize,
    /// Lowest confidence `mappings generate` proposes.
    pub suggestion_min_confidence: u8,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            typo_batch_size: consolidation::TYPO_BATCH_SIZE,
            suggestion_min_confidence: consolidation::SUGGESTION_MIN_CONFIDENCE,
        }
    }
}

/// Configuration structure for the application.
/// Handles loading, saving, and managing application settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path to the identity database. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    /// Path to the log file. If not specified, logs will be written to a default location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Attempts per unit of work under lock contention.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub overlap: OverlapConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Extra team label aliases, label -> canonical club.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub club_aliases: BTreeMap<String, String>,
    /// Extra parenthesized club abbreviations the normalizer keeps upper case.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub club_abbreviations: Vec<String>,
}

fn default_busy_timeout_ms() -> u64 {
    constants::DEFAULT_BUSY_TIMEOUT_MS
}

fn default_max_attempts() -> u32 {
    constants::retry::MAX_ATTEMPTS
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: None,
            log_file_path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            max_attempts: default_max_attempts(),
            matcher: MatcherConfig::default(),
            overlap: OverlapConfig::default(),
            consolidation: ConsolidationConfig::default(),
            club_aliases: BTreeMap::new(),
            club_abbreviations: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from the default config file location.
    /// A missing file means defaults. Environment variables override file values.
    ///
    /// # Environment Variables
    /// - `DART_IDENTITY_DB` - Override database path
    /// - `DART_IDENTITY_LOG_FILE` - Override log file path
    /// - `DART_IDENTITY_BUSY_TIMEOUT_MS` - Override SQLite busy timeout
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(AppError)` - The file exists but cannot be read, parsed or validated
    pub async fn load() -> Result<Self, AppError> {
        let config_path = get_config_path();

        let mut config = if Path::new(&config_path).exists() {
            Self::load_from_path(&config_path).await?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Applies `DART_IDENTITY_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(db_path) = std::env::var(env_vars::DATABASE) {
            self.database_path = Some(db_path);
        }

        if let Ok(log_file_path) = std::env::var(env_vars::LOG_FILE) {
            self.log_file_path = Some(log_file_path);
        }

        if let Some(timeout) = std::env::var(env_vars::BUSY_TIMEOUT_MS)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.busy_timeout_ms = timeout;
        }
    }

    /// Validates the configuration settings
    pub fn validate(&self) -> Result<(), AppError> {
        validate_config(self)
    }

    /// Saves current configuration to the default config file location.
    pub async fn save(&self) -> Result<(), AppError> {
        let config_path = get_config_path();
        self.save_to_path(&config_path).await
    }

    /// Returns the platform-specific path for the config file.
    pub fn get_config_path() -> String {
        paths::get_config_path()
    }

    /// Returns the platform-specific path for the log directory.
    pub fn get_log_dir_path() -> String {
        paths::get_log_dir_path()
    }

    /// Database path with the default filled in.
    pub fn database_path(&self) -> String {
        self.database_path
            .clone()
            .unwrap_or_else(get_default_database_path)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn overlap_settings(&self) -> OverlapSettings {
        OverlapSettings {
            min_club_matches: self.overlap.min_club_matches,
            tolerance_days: self.overlap.tolerance_days,
            merge_gap_days: self.overlap.merge_gap_days,
            season_gap_days: self.overlap.season_gap_days,
        }
    }

    /// Name normalizer with the configured extra abbreviations.
    pub fn normalizer(&self) -> NameNormalizer {
        NameNormalizer::with_abbreviations(&self.club_abbreviations)
    }

    /// Club resolver with the configured extra aliases.
    pub fn club_resolver(&self) -> ClubContextResolver {
        ClubContextResolver::with_aliases(&self.club_aliases)
    }

    /// Human-readable summary for `config show`.
    pub fn render(&self) -> String {
        let line = "────────────────────────────────────";
        let mut out = String::new();
        out.push_str("\nCurrent Configuration\n");
        out.push_str(&format!("{line}\nConfig Location:\n{}\n", get_config_path()));
        out.push_str(&format!("{line}\nDatabase:\n{}\n", self.database_path()));
        out.push_str(&format!("{line}\nLog File Location:\n"));
        match &self.log_file_path {
            Some(custom_path) => out.push_str(&format!("{custom_path}\n")),
            None => out.push_str(&format!(
                "{}/{}\n(Default location)\n",
                get_log_dir_path(),
                constants::DEFAULT_LOG_FILE
            )),
        }
        out.push_str(&format!(
            "{line}\nBusy timeout: {} ms, {} attempts per unit\n",
            self.busy_timeout_ms, self.max_attempts
        ));
        out.push_str(&format!(
            "Overlap: {} matches per club, {} days tolerance, merge gap {} days, season gap {} days\n",
            self.overlap.min_club_matches,
            self.overlap.tolerance_days,
            self.overlap.merge_gap_days,
            self.overlap.season_gap_days
        ));
        out.push_str(&format!(
            "Typo batch size: {}, suggestion confidence >= {}\n",
            self.consolidation.typo_batch_size, self.consolidation.suggestion_min_confidence
        ));
        out.push_str(&format!(
            "Extra club aliases: {}, extra abbreviations: {}\n",
            self.club_aliases.len(),
            self.club_abbreviations.len()
        ));
        out
    }

    /// Saves configuration to a custom file path.
    ///
    /// Creates the parent directory if it doesn't exist.
    ///
    /// # Errors
    /// * `AppError::Config` - If the provided path has no parent directory
    /// * `AppError::Io` - If there's an I/O error creating directories or writing the file
    /// * `AppError::TomlSerialize` - If there's an error serializing the configuration
    pub async fn save_to_path(&self, path: &str) -> Result<(), AppError> {
        let config_dir = Path::new(path).parent().ok_or_else(|| {
            AppError::config_error(format!("Path '{path}' has no parent directory"))
        })?;

        if !config_dir.exists() {
            fs::create_dir_all(config_dir).await?;
        }
        let content = toml::to_string_pretty(self)?;
        let mut file = fs::File::create(path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Loads configuration from a custom file path without env overrides.
    pub async fn load_from_path(path: &str) -> Result<Self, AppError> {
        let content = fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
