mod engine;
mod outcome;
mod store;
mod sweeper;

pub use engine::*;
pub use outcome::*;
pub use store::*;
pub use sweeper::*;

use receipt_league_core::{CompetitionMode, CompetitionStatusKind, Scope};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::infra::db::{
    parse_json_list, parse_optional_datetime, parse_optional_uuid, parse_required_datetime,
    parse_required_enum, parse_uuid,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCompetition {
    pub name: String,
    pub scope: Scope,
    pub mode: CompetitionMode,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: Uuid,
    pub name: String,
    pub scope: Scope,
    pub mode: CompetitionMode,
    /// Required for competitions without a goal, they can only finish by expiring
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub status: CompetitionStatusKind,
    pub winner_team_id: Option<Uuid>,
    pub winner_team_name: Option<String>,
    pub winner_points: Option<u64>,
    pub is_tied: bool,
    /// Only populated when `is_tied`, ordered the same way as the leaderboard
    pub tied_team_ids: Vec<Uuid>,
    pub tied_team_names: Vec<String>,
    pub team_count: u64,
    pub participant_count: u64,
    pub created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl Competition {
    pub fn is_completed(&self) -> bool {
        self.status == CompetitionStatusKind::Completed
    }

    pub fn has_ended(&self, now: OffsetDateTime) -> bool {
        self.end_date.is_some_and(|end_date| end_date <= now)
    }
}

impl FromRow<'_, SqliteRow> for Competition {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let scope = Scope::from_parts(&row.try_get::<String, _>("scope_kind")?, row.try_get("scope_name")?)
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "scope_kind".to_string(),
                source: Box::new(e),
            })?;

        let mode = if row.try_get::<bool, _>("has_goal")? {
            let goal: i64 = row.try_get("goal")?;
            CompetitionMode::Goal {
                threshold: goal.max(0) as u64,
            }
        } else {
            CompetitionMode::NoGoal
        };

        Ok(Competition {
            id: parse_uuid(row, "id")?,
            name: row.try_get("name")?,
            scope,
            mode,
            end_date: parse_optional_datetime(row, "end_date")?,
            status: parse_required_enum(row, "status")?,
            winner_team_id: parse_optional_uuid(row, "winner_team_id")?,
            winner_team_name: row.try_get("winner_team_name")?,
            winner_points: row
                .try_get::<Option<i64>, _>("winner_points")?
                .map(|points| points.max(0) as u64),
            is_tied: row.try_get("is_tied")?,
            tied_team_ids: parse_json_list(row, "tied_team_ids")?,
            tied_team_names: parse_json_list(row, "tied_team_names")?,
            team_count: row.try_get::<i64, _>("team_count")?.max(0) as u64,
            participant_count: row.try_get::<i64, _>("participant_count")?.max(0) as u64,
            created_by: row.try_get("created_by")?,
            created_at: parse_required_datetime(row, "created_at")?,
            completed_at: parse_optional_datetime(row, "completed_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub competition_id: Uuid,
    pub name: String,
    /// Member emails
    pub members: BTreeSet<String>,
    pub total_points: u64,
    pub receipts_count: u64,
    pub created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Team {
    pub fn is_member(&self, email: &str) -> bool {
        self.members.contains(email)
    }
}

/// Members live in their own table, the store fills them in after loading the row
impl FromRow<'_, SqliteRow> for Team {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Team {
            id: parse_uuid(row, "id")?,
            competition_id: parse_uuid(row, "competition_id")?,
            name: row.try_get("name")?,
            members: BTreeSet::new(),
            total_points: row.try_get::<i64, _>("total_points")?.max(0) as u64,
            receipts_count: row.try_get::<i64, _>("receipts_count")?.max(0) as u64,
            created_by: row.try_get("created_by")?,
            created_at: parse_required_datetime(row, "created_at")?,
        })
    }
}
