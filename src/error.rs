use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to parse observation data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Log setup error: {0}")]
    LogSetup(String),

    // Integrity and lookup failures. These skip the current unit of work.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Player not found: {name}")]
    PlayerNotFound { name: String },

    #[error("Player id not found: {id}")]
    PlayerIdNotFound { id: i64 },

    #[error("Global mapping not found: {id}")]
    MappingNotFound { id: i64 },

    #[error("Mapping {id} cannot move from '{from}' to '{to}'")]
    InvalidTransition { id: i64, from: String, to: String },

    #[error("Batch finished with {failed} failed unit(s) out of {total}")]
    BatchFailed { failed: usize, total: usize },

    #[error("{0}")]
    Custom(String),
}

impl AppError {
    /// Create a configuration error with context
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a log setup error with context
    pub fn log_setup_error(msg: impl Into<String>) -> Self {
        Self::LogSetup(msg.into())
    }

    /// Create a validation error for a rejected write
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a player lookup error
    pub fn player_not_found(name: impl Into<String>) -> Self {
        Self::PlayerNotFound { name: name.into() }
    }

    /// Create an invalid status transition error
    pub fn invalid_transition(id: i64, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            id,
            from: from.into(),
            to: to.into(),
        }
    }

    /// Check if error is caused by lock contention on the shared database.
    ///
    /// Only `SQLITE_BUSY` and `SQLITE_LOCKED` qualify; every other failure is
    /// either an integrity problem or a programming error and retrying would
    /// not change the outcome.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Check if error is an integrity violation that should skip the unit
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::InvalidTransition { .. }
                | AppError::PlayerNotFound { .. }
                | AppError::PlayerIdNotFound { .. }
                | AppError::MappingNotFound { .. }
        )
    }

    /// Check if error indicates a missing record rather than a technical failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::PlayerNotFound { .. }
                | AppError::PlayerIdNotFound { .. }
                | AppError::MappingNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_helper() {
        let error = AppError::config_error("Invalid configuration");
        assert!(matches!(error, AppError::Config(_)));
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid configuration"
        );
    }

    #[test]
    fn test_log_setup_error_helper() {
        let error = AppError::log_setup_error("Failed to initialize logger");
        assert_eq!(
            error.to_string(),
            "Log setup error: Failed to initialize logger"
        );
    }

    #[test]
    fn test_validation_helper() {
        let error = AppError::validation("source and target are the same player");
        assert!(matches!(error, AppError::Validation(_)));
        assert!(error.is_validation());
        assert_eq!(
            error.to_string(),
            "Validation failed: source and target are the same player"
        );
    }

    #[test]
    fn test_player_not_found_helper() {
        let error = AppError::player_not_found("Mikael Granath");
        assert!(error.is_not_found());
        assert!(error.is_validation());
        assert_eq!(error.to_string(), "Player not found: Mikael Granath");
    }

    #[test]
    fn test_invalid_transition_display() {
        let error = AppError::invalid_transition(7, "rejected", "applied");
        assert_eq!(
            error.to_string(),
            "Mapping 7 cannot move from 'rejected' to 'applied'"
        );
    }

    #[test]
    fn test_batch_failed_display() {
        let error = AppError::BatchFailed { failed: 2, total: 40 };
        assert_eq!(
            error.to_string(),
            "Batch finished with 2 failed unit(s) out of 40"
        );
        assert!(!error.is_validation());
    }

    #[test]
    fn test_busy_database_is_retryable() {
        let busy = AppError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ));
        assert!(busy.is_retryable());

        let constraint = AppError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!constraint.is_retryable());
    }

    #[test]
    fn test_non_database_errors_are_not_retryable() {
        let errors = vec![
            AppError::config_error("invalid config"),
            AppError::validation("duplicate override"),
            AppError::log_setup_error("log setup failed"),
            AppError::Custom("custom error".to_string()),
        ];

        for error in errors {
            assert!(
                !error.is_retryable(),
                "Error {:?} should not be retryable",
                error
            );
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let app_error: AppError = io_error.into();
        assert!(matches!(app_error, AppError::Io(_)));
        assert!(app_error.to_string().contains("I/O error"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let app_error: AppError = json_error.into();
        assert!(matches!(app_error, AppError::Json(_)));
        assert!(
            app_error
                .to_string()
                .starts_with("Failed to parse observation data")
        );
    }
}
