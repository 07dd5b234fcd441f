use itertools::Itertools;
use log::{debug, warn};
use receipt_league_core::{CompetitionMode, CompetitionStatusKind};
use sqlx::{sqlite::SqliteRow, FromRow, Row, Sqlite, Transaction};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::infra::db::{format_timestamp, parse_uuid, DBConnection};

use super::{Competition, NewCompetition, Outcome, Team};

const COMPETITION_COLUMNS: &str = "id, name, scope_kind, scope_name, has_goal, goal, end_date,
    status, winner_team_id, winner_team_name, winner_points, is_tied, tied_team_ids,
    tied_team_names, team_count, participant_count, created_by, created_at, completed_at";

const TEAM_COLUMNS: &str =
    "id, competition_id, name, total_points, receipts_count, created_by, created_at";

#[derive(Debug, Clone)]
pub struct CompetitionStore {
    db_connection: DBConnection,
}

impl CompetitionStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        self.db_connection.ping().await
    }

    pub async fn create_competition(
        &self,
        competition: NewCompetition,
    ) -> Result<Competition, sqlx::Error> {
        let id = Uuid::now_v7();
        let now = format_timestamp(OffsetDateTime::now_utc())?;
        let end_date = competition.end_date.map(format_timestamp).transpose()?;
        let (has_goal, goal) = match competition.mode {
            CompetitionMode::Goal { threshold } => (true, Some(threshold as i64)),
            CompetitionMode::NoGoal => (false, None),
        };

        let query = format!(
            "INSERT INTO competitions (
                id, name, scope_kind, scope_name, has_goal, goal, end_date, status,
                created_by, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)
            RETURNING {}",
            COMPETITION_COLUMNS
        );

        let created = self
            .db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, Competition>(&query)
                    .bind(id.to_string())
                    .bind(competition.name)
                    .bind(competition.scope.kind())
                    .bind(competition.scope.name().to_string())
                    .bind(has_goal)
                    .bind(goal)
                    .bind(end_date)
                    .bind(competition.created_by)
                    .bind(now)
                    .fetch_one(&pool)
                    .await
            })
            .await?;

        Ok(created)
    }

    pub async fn get_competition(&self, id: Uuid) -> Result<Option<Competition>, sqlx::Error> {
        let query = format!("SELECT {} FROM competitions WHERE id = ?", COMPETITION_COLUMNS);
        sqlx::query_as::<_, Competition>(&query)
            .bind(id.to_string())
            .fetch_optional(self.db_connection.read())
            .await
    }

    /// Rows that fail to decode are logged and skipped
    pub async fn get_active_competitions(&self) -> Result<Vec<Competition>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM competitions WHERE status = 'active' ORDER BY created_at, id",
            COMPETITION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(self.db_connection.read())
            .await?;

        let competitions = rows
            .iter()
            .filter_map(|row| match Competition::from_row(row) {
                Ok(competition) => Some(competition),
                Err(e) => {
                    let id: Option<String> = row.try_get("id").ok();
                    warn!("skipping unreadable competition {:?}: {}", id, e);
                    None
                }
            })
            .collect();
        Ok(competitions)
    }

    /// Persist the outcome only if the competition is still active.
    ///
    /// Returns false when another caller completed it first, the stored outcome wins.
    pub async fn finalize_competition(
        &self,
        competition_id: Uuid,
        outcome: &Outcome,
        completed_at: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let Some(primary) = outcome.primary().cloned() else {
            return Err(sqlx::Error::Protocol(format!(
                "outcome for competition {} has no teams",
                competition_id
            )));
        };
        let is_tied = outcome.is_tied();
        let (tied_ids, tied_names) = if is_tied {
            let ids: Vec<Uuid> = outcome.teams().iter().map(|team| team.id).collect();
            let names: Vec<&str> = outcome.teams().iter().map(|team| team.name.as_str()).collect();
            (
                Some(serde_json::to_string(&ids).map_err(|e| sqlx::Error::Encode(Box::new(e)))?),
                Some(serde_json::to_string(&names).map_err(|e| sqlx::Error::Encode(Box::new(e)))?),
            )
        } else {
            (None, None)
        };
        let winner_points = outcome.points() as i64;
        let completed_at = format_timestamp(completed_at)?;

        let updated = self
            .db_connection
            .execute_write(move |pool| async move {
                let result = sqlx::query(
                    "UPDATE competitions SET
                        status = 'completed',
                        winner_team_id = ?,
                        winner_team_name = ?,
                        winner_points = ?,
                        is_tied = ?,
                        tied_team_ids = ?,
                        tied_team_names = ?,
                        completed_at = ?
                    WHERE id = ? AND status = 'active'",
                )
                .bind(primary.id.to_string())
                .bind(primary.name)
                .bind(winner_points)
                .bind(is_tied)
                .bind(tied_ids)
                .bind(tied_names)
                .bind(completed_at)
                .bind(competition_id.to_string())
                .execute(&pool)
                .await?;
                Ok(result.rows_affected() == 1)
            })
            .await?;

        debug!(
            "finalize competition {} ({}): {}",
            competition_id,
            CompetitionStatusKind::Completed,
            if updated { "applied" } else { "already completed" }
        );
        Ok(updated)
    }

    pub async fn get_teams(&self, competition_id: Uuid) -> Result<Vec<Team>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM teams WHERE competition_id = ? ORDER BY created_at, id",
            TEAM_COLUMNS
        );
        let mut teams = sqlx::query_as::<_, Team>(&query)
            .bind(competition_id.to_string())
            .fetch_all(self.db_connection.read())
            .await?;

        let mut members = sqlx::query(
            "SELECT team_id, email FROM team_members WHERE competition_id = ? ORDER BY email",
        )
        .bind(competition_id.to_string())
        .try_map(|row: SqliteRow| Ok((parse_uuid(&row, "team_id")?, row.try_get::<String, _>("email")?)))
        .fetch_all(self.db_connection.read())
        .await?
        .into_iter()
        .into_group_map();

        for team in teams.iter_mut() {
            team.members = members
                .remove(&team.id)
                .map(BTreeSet::from_iter)
                .unwrap_or_default();
        }

        Ok(teams)
    }

    pub async fn get_team(&self, team_id: Uuid) -> Result<Option<Team>, sqlx::Error> {
        let query = format!("SELECT {} FROM teams WHERE id = ?", TEAM_COLUMNS);
        let Some(mut team) = sqlx::query_as::<_, Team>(&query)
            .bind(team_id.to_string())
            .fetch_optional(self.db_connection.read())
            .await?
        else {
            return Ok(None);
        };

        let members: Vec<String> =
            sqlx::query_scalar("SELECT email FROM team_members WHERE team_id = ? ORDER BY email")
                .bind(team_id.to_string())
                .fetch_all(self.db_connection.read())
                .await?;
        team.members = members.into_iter().collect();

        Ok(Some(team))
    }

    /// The team (if any) a member already belongs to in a competition
    pub async fn find_member_team(
        &self,
        competition_id: Uuid,
        email: &str,
    ) -> Result<Option<Team>, sqlx::Error> {
        let team_id: Option<String> = sqlx::query_scalar(
            "SELECT team_id FROM team_members WHERE competition_id = ? AND email = ?",
        )
        .bind(competition_id.to_string())
        .bind(email)
        .fetch_optional(self.db_connection.read())
        .await?;

        match team_id {
            Some(raw) => {
                let team_id = Uuid::parse_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
                    index: "team_id".to_string(),
                    source: Box::new(e),
                })?;
                self.get_team(team_id).await
            }
            None => Ok(None),
        }
    }

    /// Create a team with its creator as the first member and bump the competition counters
    pub async fn create_team(
        &self,
        competition_id: Uuid,
        name: String,
        created_by: String,
    ) -> Result<Team, sqlx::Error> {
        let team_id = Uuid::now_v7();
        let now = format_timestamp(OffsetDateTime::now_utc())?;
        let query = format!(
            "INSERT INTO teams (id, competition_id, name, total_points, receipts_count, created_by, created_at)
            VALUES (?, ?, ?, 0, 0, ?, ?)
            RETURNING {}",
            TEAM_COLUMNS
        );

        let mut team = self
            .db_connection
            .execute_write(move |pool| async move {
                let mut tx = pool.begin().await?;

                let team = sqlx::query_as::<_, Team>(&query)
                    .bind(team_id.to_string())
                    .bind(competition_id.to_string())
                    .bind(&name)
                    .bind(&created_by)
                    .bind(&now)
                    .fetch_one(&mut *tx)
                    .await?;

                insert_member(&mut tx, team_id, competition_id, &created_by, &now).await?;

                sqlx::query(
                    "UPDATE competitions SET
                        team_count = team_count + 1,
                        participant_count = participant_count + 1
                    WHERE id = ?",
                )
                .bind(competition_id.to_string())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(team)
            })
            .await?;

        team.members = BTreeSet::from([team.created_by.clone()]);
        Ok(team)
    }

    pub async fn add_member(
        &self,
        team_id: Uuid,
        competition_id: Uuid,
        email: String,
    ) -> Result<(), sqlx::Error> {
        let now = format_timestamp(OffsetDateTime::now_utc())?;

        self.db_connection
            .execute_write(move |pool| async move {
                let mut tx = pool.begin().await?;

                insert_member(&mut tx, team_id, competition_id, &email, &now).await?;

                sqlx::query(
                    "UPDATE competitions SET participant_count = participant_count + 1 WHERE id = ?",
                )
                .bind(competition_id.to_string())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(())
            })
            .await?;

        Ok(())
    }
}

async fn insert_member(
    tx: &mut Transaction<'_, Sqlite>,
    team_id: Uuid,
    competition_id: Uuid,
    email: &str,
    joined_at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO team_members (team_id, competition_id, email, joined_at) VALUES (?, ?, ?, ?)",
    )
    .bind(team_id.to_string())
    .bind(competition_id.to_string())
    .bind(email)
    .bind(joined_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
