use log::info;
use receipt_league_core::{validate_competition, validate_team_name, CompetitionMode, Scope};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    config::Settings,
    infra::{db::DBConnection, ImageStore, ReceiptReader},
};

use super::{
    rank_teams, Competition, CompetitionStore, Error, ExpirySweeper, NewCompetition,
    ProfileUpdate, Receipt, ReceiptIngestion, ReceiptStore, ReceiptSubmission, Session,
    SubmitResult, Team, UserProfile, UserStore, WinnerEngine, WinnerNotice, WinnerResult,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCompetition {
    pub name: String,
    pub scope: Scope,
    #[serde(default = "default_has_goal")]
    pub has_goal: bool,
    /// Falls back to the configured default goal
    pub goal: Option<u64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
}

fn default_has_goal() -> bool {
    true
}

/// Entry point for everything the api can ask of the league
#[derive(Clone)]
pub struct League {
    competition_store: CompetitionStore,
    receipt_store: ReceiptStore,
    user_store: UserStore,
    engine: WinnerEngine,
    ingestion: ReceiptIngestion,
    default_goal: u64,
    sweep_interval: Duration,
    reservation_ttl: Duration,
}

impl League {
    pub fn new(
        league_db: DBConnection,
        users_db: DBConnection,
        reader: Arc<dyn ReceiptReader>,
        images: Arc<dyn ImageStore>,
        settings: &Settings,
    ) -> Self {
        let competition_store = CompetitionStore::new(league_db.clone());
        let receipt_store = ReceiptStore::new(league_db);
        let engine = WinnerEngine::new(competition_store.clone());
        let ingestion = ReceiptIngestion::new(
            competition_store.clone(),
            receipt_store.clone(),
            engine.clone(),
            reader,
            images,
            settings.promotion_settings.clone().into(),
            settings.league_settings.max_image_bytes,
        );

        Self {
            competition_store,
            receipt_store,
            user_store: UserStore::new(users_db),
            engine,
            ingestion,
            default_goal: settings.league_settings.default_goal,
            sweep_interval: Duration::from_secs(settings.league_settings.sweep_interval_secs),
            reservation_ttl: Duration::from_secs(settings.league_settings.reservation_ttl_secs),
        }
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.competition_store.ping().await?;
        self.user_store.ping().await?;
        Ok(())
    }

    pub fn expiry_sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.competition_store.clone(),
            self.receipt_store.clone(),
            self.engine.clone(),
            self.sweep_interval,
            self.reservation_ttl,
        )
    }

    pub async fn create_competition(
        &self,
        session: &Session,
        request: CreateCompetition,
    ) -> Result<Competition, Error> {
        let mode = if request.has_goal {
            CompetitionMode::Goal {
                threshold: request.goal.unwrap_or(self.default_goal),
            }
        } else {
            CompetitionMode::NoGoal
        };
        validate_competition(&request.name, &mode, request.end_date)?;

        let competition = self
            .competition_store
            .create_competition(NewCompetition {
                name: request.name.trim().to_string(),
                scope: request.scope,
                mode,
                end_date: request.end_date,
                created_by: session.email().to_string(),
            })
            .await?;

        info!(
            "Created competition {} ({}) for {}",
            competition.id,
            competition.name,
            session.email()
        );
        Ok(competition)
    }

    pub async fn get_competition(&self, competition_id: Uuid) -> Result<Competition, Error> {
        self.competition_store
            .get_competition(competition_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("competition {} not found", competition_id)))
    }

    /// Teams in leaderboard order
    pub async fn get_teams(&self, competition_id: Uuid) -> Result<Vec<Team>, Error> {
        self.get_competition(competition_id).await?;
        let teams = self.competition_store.get_teams(competition_id).await?;
        Ok(rank_teams(&teams).into_iter().cloned().collect())
    }

    pub async fn get_team(&self, team_id: Uuid) -> Result<Team, Error> {
        self.competition_store
            .get_team(team_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("team {} not found", team_id)))
    }

    pub async fn get_team_receipts(&self, team_id: Uuid) -> Result<Vec<Receipt>, Error> {
        self.get_team(team_id).await?;
        Ok(self.receipt_store.get_team_receipts(team_id).await?)
    }

    pub async fn create_team(
        &self,
        session: &Session,
        competition_id: Uuid,
        name: String,
    ) -> Result<Team, Error> {
        validate_team_name(&name)?;
        let competition = self.open_competition(competition_id).await?;
        self.ensure_not_on_team(competition.id, session.email()).await?;

        let team = self
            .competition_store
            .create_team(
                competition.id,
                name.trim().to_string(),
                session.email().to_string(),
            )
            .await
            .map_err(|e| self.membership_conflict(e))?;

        info!(
            "{} created team {} in competition {}",
            session.email(),
            team.id,
            competition.id
        );
        Ok(team)
    }

    pub async fn join_team(&self, session: &Session, team_id: Uuid) -> Result<Team, Error> {
        let team = self.get_team(team_id).await?;
        self.open_competition(team.competition_id).await?;
        self.ensure_not_on_team(team.competition_id, session.email())
            .await?;

        self.competition_store
            .add_member(team.id, team.competition_id, session.email().to_string())
            .await
            .map_err(|e| self.membership_conflict(e))?;

        info!("{} joined team {}", session.email(), team.id);
        self.get_team(team_id).await
    }

    pub async fn submit_receipt(
        &self,
        session: &Session,
        submission: ReceiptSubmission,
    ) -> Result<SubmitResult, Error> {
        self.ingestion.submit_receipt(session, submission).await
    }

    /// Same check a receipt triggers, it never closes a competition for being past its end date
    pub async fn decide(&self, competition_id: Uuid) -> Result<WinnerResult, Error> {
        self.engine.decide_and_finalize(competition_id, false).await
    }

    pub async fn winner_message(
        &self,
        competition_id: Uuid,
        team_id: Uuid,
    ) -> Result<Option<WinnerNotice>, Error> {
        let team = self.get_team(team_id).await?;
        if team.competition_id != competition_id {
            return Err(Error::NotFound(format!(
                "team {} is not part of competition {}",
                team_id, competition_id
            )));
        }
        self.engine.winner_message(competition_id, team_id).await
    }

    pub async fn load_session(&self, email: &str) -> Result<Session, Error> {
        self.user_store.load_session(email).await
    }

    pub async fn get_profile(&self, email: &str) -> Result<UserProfile, Error> {
        self.user_store
            .get_profile(email)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no profile saved for {}", email)))
    }

    pub async fn update_profile(
        &self,
        session: &Session,
        update: ProfileUpdate,
    ) -> Result<UserProfile, Error> {
        if update.name.trim().is_empty() {
            return Err(Error::Validation("name cannot be empty".to_string()));
        }
        self.user_store.update_profile(session.email(), update).await
    }

    async fn open_competition(&self, competition_id: Uuid) -> Result<Competition, Error> {
        let competition = self.get_competition(competition_id).await?;
        if competition.is_completed() {
            return Err(Error::CompetitionClosed(competition.id));
        }
        Ok(competition)
    }

    async fn ensure_not_on_team(&self, competition_id: Uuid, email: &str) -> Result<(), Error> {
        match self
            .competition_store
            .find_member_team(competition_id, email)
            .await?
        {
            Some(team) => Err(Error::AlreadyOnTeam(team.name)),
            None => Ok(()),
        }
    }

    /// Two joins racing past `ensure_not_on_team` end on the unique member index
    fn membership_conflict(&self, error: sqlx::Error) -> Error {
        match &error {
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                Error::AlreadyOnTeam(String::from("another team"))
            }
            _ => Error::DbError(error),
        }
    }
}
