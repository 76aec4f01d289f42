use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub type PlayerId = i64;
pub type SubMatchId = i64;

/// A canonical identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
}

/// Sub-match context every observation hangs off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMatch {
    pub id: SubMatchId,
    pub played_at: NaiveDateTime,
    pub team1_label: String,
    pub team2_label: String,
}

impl SubMatch {
    /// Label of the team on the given side, if the side is valid.
    pub fn team_label(&self, team_number: u8) -> Option<&str> {
        match team_number {
            1 => Some(&self.team1_label),
            2 => Some(&self.team2_label),
            _ => None,
        }
    }
}

/// One occurrence of a player in a sub-match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub sub_match_id: SubMatchId,
    pub player_id: PlayerId,
    pub team_number: u8,
    pub performance_value: f64,
}

/// An observation joined with the context needed by the repair tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationContext {
    pub observation_id: i64,
    pub sub_match_id: SubMatchId,
    pub player_id: PlayerId,
    pub team_label: String,
    pub played_at: NaiveDateTime,
}

/// Per-observation identity correction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationOverride {
    pub id: i64,
    pub sub_match_id: SubMatchId,
    pub original_player_id: PlayerId,
    pub target_player_id: PlayerId,
    pub target_name: String,
    pub confidence: u8,
    pub reason: String,
    pub created_at: NaiveDateTime,
}

/// Values for a new override row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOverride {
    pub sub_match_id: SubMatchId,
    pub original_player_id: PlayerId,
    pub target_player_id: PlayerId,
    pub target_name: String,
    pub confidence: u8,
    pub reason: String,
}

/// Review state of a global mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    Suggested,
    Confirmed,
    Rejected,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Suggested => "suggested",
            MappingStatus::Confirmed => "confirmed",
            MappingStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "suggested" => Ok(MappingStatus::Suggested),
            "confirmed" => Ok(MappingStatus::Confirmed),
            "rejected" => Ok(MappingStatus::Rejected),
            other => Err(AppError::validation(format!(
                "unknown mapping status '{other}'"
            ))),
        }
    }
}

impl FromSql for MappingStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: AppError| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for MappingStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Coarse merge suggestion from one identity into another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalMapping {
    pub id: i64,
    pub source_player_id: PlayerId,
    pub source_name: String,
    pub target_player_id: PlayerId,
    pub target_name: String,
    pub canonical_name: String,
    pub confidence: u8,
    pub mapping_type: String,
    pub status: MappingStatus,
    pub notes: Option<String>,
    pub approved_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub applied_at: Option<NaiveDateTime>,
}
