use log::{debug, info, warn};
use receipt_league_core::CompetitionStatusKind;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::Error;

use super::{decide, CompetitionStore, Decision, Outcome, TeamStanding};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerResult {
    /// True for any finalized competition, including one that expired below its goal
    pub has_winner: bool,
    pub winner_team: Option<TeamStanding>,
    pub message: Option<String>,
    pub new_status: CompetitionStatusKind,
    pub tied_teams: Option<Vec<TeamStanding>>,
    pub outcome: Option<Outcome>,
}

impl WinnerResult {
    pub fn undecided() -> Self {
        Self {
            has_winner: false,
            winner_team: None,
            message: None,
            new_status: CompetitionStatusKind::Active,
            tied_teams: None,
            outcome: None,
        }
    }

    pub fn from_outcome(outcome: Outcome) -> Self {
        Self {
            has_winner: true,
            winner_team: outcome.primary().cloned(),
            message: Some(outcome.message()),
            new_status: CompetitionStatusKind::Completed,
            tied_teams: outcome.is_tied().then(|| outcome.teams().to_vec()),
            outcome: Some(outcome),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerNotice {
    pub message: String,
    /// Whether the asking team won outright or is among the tied teams
    pub team_placed: bool,
}

#[derive(Debug, Clone)]
pub struct WinnerEngine {
    store: CompetitionStore,
}

impl WinnerEngine {
    pub fn new(store: CompetitionStore) -> Self {
        Self { store }
    }

    /// Decide whether a competition is over and persist the outcome if it is.
    ///
    /// Safe to call repeatedly and concurrently, a completed competition is never
    /// rewritten and every caller sees the outcome that was stored first.
    pub async fn decide_and_finalize(
        &self,
        competition_id: Uuid,
        finalize_because_ended: bool,
    ) -> Result<WinnerResult, Error> {
        let competition = self
            .store
            .get_competition(competition_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("competition {} not found", competition_id)))?;

        if competition.is_completed() {
            debug!("competition {} already completed", competition_id);
            return Ok(Outcome::from_persisted(&competition)
                .map(WinnerResult::from_outcome)
                .unwrap_or_else(completed_without_outcome));
        }

        let teams = self.store.get_teams(competition_id).await?;
        let outcome = match decide(&competition.mode, &teams, finalize_because_ended) {
            Decision::Undecided => {
                debug!(
                    "competition {} undecided ({} teams, ended: {})",
                    competition_id,
                    teams.len(),
                    finalize_because_ended
                );
                return Ok(WinnerResult::undecided());
            }
            Decision::Finalize(outcome) => outcome,
        };

        let applied = self
            .store
            .finalize_competition(competition_id, &outcome, OffsetDateTime::now_utc())
            .await?;

        if applied {
            info!(
                "competition {} completed: {}",
                competition_id,
                outcome.message()
            );
            return Ok(WinnerResult::from_outcome(outcome));
        }

        warn!(
            "competition {} was finalized by another caller, returning the stored outcome",
            competition_id
        );
        let stored = self
            .store
            .get_competition(competition_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("competition {} not found", competition_id)))?;

        Ok(Outcome::from_persisted(&stored)
            .map(WinnerResult::from_outcome)
            .unwrap_or_else(completed_without_outcome))
    }

    /// Read only, `None` until the competition has completed
    pub async fn winner_message(
        &self,
        competition_id: Uuid,
        team_id: Uuid,
    ) -> Result<Option<WinnerNotice>, Error> {
        let competition = self
            .store
            .get_competition(competition_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("competition {} not found", competition_id)))?;

        Ok(Outcome::from_persisted(&competition).map(|outcome| WinnerNotice {
            message: outcome.message(),
            team_placed: outcome.includes_team(team_id),
        }))
    }
}

fn completed_without_outcome() -> WinnerResult {
    WinnerResult {
        new_status: CompetitionStatusKind::Completed,
        ..WinnerResult::undecided()
    }
}
