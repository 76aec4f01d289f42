use crate::config::Config;
use crate::error::AppError;
use std::path::Path;

/// Validates the configuration settings
///
/// # Validation Rules
/// - Database and log file paths, when set, cannot be empty
/// - Log file path parent directory must exist or be creatable
/// - Busy timeout and retry attempts must be positive
/// - Overlap thresholds must be positive and the merge gap shorter than a season gap
/// - Typo batch size must be positive, suggestion confidence at most 100
/// - Club aliases and abbreviations cannot be blank
pub fn validate_config(config: &Config) -> Result<(), AppError> {
    if let Some(db_path) = &config.database_path
        && db_path.trim().is_empty()
    {
        return Err(AppError::config_error("Database path cannot be empty"));
    }

    if let Some(log_path) = &config.log_file_path {
        if log_path.trim().is_empty() {
            return Err(AppError::config_error("Log file path cannot be empty"));
        }

        // Check if parent directory exists or can be created
        if let Some(parent) = Path::new(log_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::config_error(format!(
                    "Cannot create log directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    if config.busy_timeout_ms == 0 {
        return Err(AppError::config_error("busy_timeout_ms must be greater than 0"));
    }
    if !(1..=20).contains(&config.max_attempts) {
        return Err(AppError::config_error(format!(
            "max_attempts must be within 1..=20, got {}",
            config.max_attempts
        )));
    }
    if config.matcher.club_cache_size == 0 {
        return Err(AppError::config_error("matcher.club_cache_size must be greater than 0"));
    }

    let overlap = &config.overlap;
    if overlap.min_club_matches == 0 {
        return Err(AppError::config_error("overlap.min_club_matches must be greater than 0"));
    }
    if overlap.tolerance_days < 0 || overlap.merge_gap_days < 0 {
        return Err(AppError::config_error("overlap day thresholds cannot be negative"));
    }
    if overlap.merge_gap_days >= overlap.season_gap_days {
        return Err(AppError::config_error(format!(
            "overlap.merge_gap_days ({}) must be shorter than overlap.season_gap_days ({})",
            overlap.merge_gap_days, overlap.season_gap_days
        )));
    }

    if config.consolidation.typo_batch_size == 0 {
        return Err(AppError::config_error(
            "consolidation.typo_batch_size must be greater than 0",
        ));
    }
    if config.consolidation.suggestion_min_confidence > 100 {
        return Err(AppError::config_error(
            "consolidation.suggestion_min_confidence cannot exceed 100",
        ));
    }

    if let Some((alias, _)) = config
        .club_aliases
        .iter()
        .find(|(alias, club)| alias.trim().is_empty() || club.trim().is_empty())
    {
        return Err(AppError::config_error(format!(
            "Club alias '{alias}' has an empty side"
        )));
    }
    if config.club_abbreviations.iter().any(|abbr| abbr.trim().is_empty()) {
        return Err(AppError::config_error("Club abbreviations cannot be empty"));
    }

    Ok(())
}
