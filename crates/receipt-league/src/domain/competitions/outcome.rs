//! Pure winner decision logic
//!
//! Nothing in here touches the store, the engine feeds it a fresh snapshot of the
//! competition's teams and persists whatever it decides.

use itertools::Itertools;
use receipt_league_core::{CompetitionMode, CompetitionStatusKind};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use uuid::Uuid;

use super::{Competition, Team};

/// A team's position at the moment a decision was made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStanding {
    pub id: Uuid,
    pub name: String,
    pub total_points: u64,
}

impl From<&Team> for TeamStanding {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
            total_points: team.total_points,
        }
    }
}

/// How a completed competition ended.
///
/// Both variants are stored as `completed` with the same winner columns, the
/// variant is recovered from the competition mode and `winner_points`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// The leading team(s) reached the goal, or the competition had no goal
    Winner { teams: Vec<TeamStanding>, points: u64 },
    /// The competition expired below its goal, the leading team(s) only came closest
    NoWinnerClosest { teams: Vec<TeamStanding>, points: u64 },
}

impl Outcome {
    pub fn teams(&self) -> &[TeamStanding] {
        match self {
            Outcome::Winner { teams, .. } | Outcome::NoWinnerClosest { teams, .. } => teams,
        }
    }

    pub fn points(&self) -> u64 {
        match self {
            Outcome::Winner { points, .. } | Outcome::NoWinnerClosest { points, .. } => *points,
        }
    }

    /// First team in leaderboard order, recorded as the winner even on a tie
    pub fn primary(&self) -> Option<&TeamStanding> {
        self.teams().first()
    }

    pub fn is_tied(&self) -> bool {
        self.teams().len() > 1
    }

    pub fn includes_team(&self, team_id: Uuid) -> bool {
        self.teams().iter().any(|team| team.id == team_id)
    }

    pub fn message(&self) -> String {
        let names = self.teams().iter().map(|team| team.name.as_str()).join(", ");
        match (self, self.is_tied()) {
            (Outcome::Winner { .. }, false) => format!("🏆 {} won the competition!", names),
            (Outcome::Winner { .. }, true) => format!("🏆 {} tied for first place!", names),
            (Outcome::NoWinnerClosest { points, .. }, false) => format!(
                "🏆 No one won! {} was the closest with {} points.",
                names,
                format_points(*points)
            ),
            (Outcome::NoWinnerClosest { points, .. }, true) => format!(
                "🏆 No one won! {} tied for closest with {} points.",
                names,
                format_points(*points)
            ),
        }
    }

    /// Rebuild the outcome from the persisted winner columns, `None` while still active
    pub fn from_persisted(competition: &Competition) -> Option<Self> {
        if competition.status != CompetitionStatusKind::Completed {
            return None;
        }
        let winner_id = competition.winner_team_id?;
        let points = competition.winner_points.unwrap_or(0);

        let teams: Vec<TeamStanding> =
            if competition.is_tied && competition.tied_team_ids.len() > 1 {
                competition
                    .tied_team_ids
                    .iter()
                    .zip(competition.tied_team_names.iter())
                    .map(|(id, name)| TeamStanding {
                        id: *id,
                        name: name.clone(),
                        total_points: points,
                    })
                    .collect()
            } else {
                vec![TeamStanding {
                    id: winner_id,
                    name: competition.winner_team_name.clone().unwrap_or_default(),
                    total_points: points,
                }]
            };

        Some(match competition.mode {
            CompetitionMode::NoGoal => Outcome::Winner { teams, points },
            CompetitionMode::Goal { threshold } if points >= threshold => {
                Outcome::Winner { teams, points }
            }
            CompetitionMode::Goal { .. } => Outcome::NoWinnerClosest { teams, points },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to persist, the competition stays active
    Undecided,
    Finalize(Outcome),
}

/// Leaderboard order: most points first, then the earliest created team, then id
pub fn rank_teams(teams: &[Team]) -> Vec<&Team> {
    teams
        .iter()
        .sorted_by_key(|team| (Reverse(team.total_points), team.created_at, team.id))
        .collect()
}

/// Decide whether a competition is over given a snapshot of its teams.
///
/// `finalize_because_ended` is only set once the end date has passed.
pub fn decide(mode: &CompetitionMode, teams: &[Team], finalize_because_ended: bool) -> Decision {
    let ranked = rank_teams(teams);
    let Some(leader) = ranked.first() else {
        return Decision::Undecided;
    };
    let highest = leader.total_points;
    let leaders: Vec<TeamStanding> = ranked
        .iter()
        .take_while(|team| team.total_points == highest)
        .map(|team| TeamStanding::from(*team))
        .collect();

    match mode {
        CompetitionMode::NoGoal if finalize_because_ended => Decision::Finalize(Outcome::Winner {
            teams: leaders,
            points: highest,
        }),
        CompetitionMode::NoGoal => Decision::Undecided,
        // every team sharing the top score has reached the goal when the leader has
        CompetitionMode::Goal { threshold } if highest >= *threshold => {
            Decision::Finalize(Outcome::Winner {
                teams: leaders,
                points: highest,
            })
        }
        CompetitionMode::Goal { .. } if finalize_because_ended => {
            Decision::Finalize(Outcome::NoWinnerClosest {
                teams: leaders,
                points: highest,
            })
        }
        CompetitionMode::Goal { .. } => Decision::Undecided,
    }
}

/// `49999` -> `49,999`
pub fn format_points(points: u64) -> String {
    let digits = points.to_string();
    let bytes = digits.as_bytes();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(*digit as char);
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use time::{Duration, OffsetDateTime};

    fn team(name: &str, points: u64, created_offset_secs: i64) -> Team {
        Team {
            id: Uuid::now_v7(),
            competition_id: Uuid::nil(),
            name: name.to_string(),
            members: BTreeSet::new(),
            total_points: points,
            receipts_count: 1,
            created_by: format!("{}@example.com", name.to_lowercase()),
            created_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(created_offset_secs),
        }
    }

    const GOAL: CompetitionMode = CompetitionMode::Goal { threshold: 50_000 };

    #[test]
    fn test_format_points() {
        assert_eq!(format_points(0), "0");
        assert_eq!(format_points(999), "999");
        assert_eq!(format_points(1_000), "1,000");
        assert_eq!(format_points(49_999), "49,999");
        assert_eq!(format_points(1_234_567), "1,234,567");
    }

    #[test]
    fn test_no_teams_is_undecided() {
        assert_eq!(decide(&GOAL, &[], true), Decision::Undecided);
        assert_eq!(decide(&CompetitionMode::NoGoal, &[], true), Decision::Undecided);
    }

    #[test]
    fn test_single_team_reaching_goal_wins() {
        let teams = vec![team("Hawks", 40_000, 0), team("Owls", 52_000, 1)];
        let Decision::Finalize(outcome) = decide(&GOAL, &teams, false) else {
            panic!("expected the goal to finalize the competition");
        };
        assert!(matches!(outcome, Outcome::Winner { .. }));
        assert_eq!(outcome.primary().unwrap().name, "Owls");
        assert!(!outcome.is_tied());
        assert_eq!(outcome.points(), 52_000);
        assert_eq!(outcome.message(), "🏆 Owls won the competition!");
    }

    #[test]
    fn test_goal_reached_by_several_only_top_score_wins() {
        let teams = vec![
            team("Hawks", 60_000, 0),
            team("Owls", 55_000, 1),
            team("Wrens", 10_000, 2),
        ];
        let Decision::Finalize(outcome) = decide(&GOAL, &teams, false) else {
            panic!("expected a winner");
        };
        assert_eq!(outcome.teams().len(), 1);
        assert_eq!(outcome.primary().unwrap().name, "Hawks");
    }

    #[test]
    fn test_tie_at_goal_lists_teams_in_creation_order() {
        let teams = vec![
            team("Owls", 50_000, 5),
            team("Hawks", 50_000, 1),
            team("Wrens", 49_000, 0),
        ];
        let Decision::Finalize(outcome) = decide(&GOAL, &teams, false) else {
            panic!("expected a tie to finalize");
        };
        assert!(outcome.is_tied());
        let names: Vec<_> = outcome.teams().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Hawks", "Owls"]);
        assert_eq!(outcome.message(), "🏆 Hawks, Owls tied for first place!");
    }

    #[test]
    fn test_goal_not_reached_stays_active_until_ended() {
        let teams = vec![team("Hawks", 49_999, 0), team("Owls", 100, 1)];
        assert_eq!(decide(&GOAL, &teams, false), Decision::Undecided);

        let Decision::Finalize(outcome) = decide(&GOAL, &teams, true) else {
            panic!("expected expiry to finalize");
        };
        assert!(matches!(outcome, Outcome::NoWinnerClosest { .. }));
        assert_eq!(outcome.points(), 49_999);
        assert_eq!(
            outcome.message(),
            "🏆 No one won! Hawks was the closest with 49,999 points."
        );
    }

    #[test]
    fn test_tied_for_closest_message() {
        let teams = vec![team("Hawks", 1_500, 0), team("Owls", 1_500, 1)];
        let Decision::Finalize(outcome) = decide(&GOAL, &teams, true) else {
            panic!("expected expiry to finalize");
        };
        assert_eq!(
            outcome.message(),
            "🏆 No one won! Hawks, Owls tied for closest with 1,500 points."
        );
    }

    #[test]
    fn test_no_goal_never_finalizes_before_end() {
        let teams = vec![team("Hawks", 1_000_000, 0)];
        assert_eq!(
            decide(&CompetitionMode::NoGoal, &teams, false),
            Decision::Undecided
        );

        let Decision::Finalize(outcome) = decide(&CompetitionMode::NoGoal, &teams, true) else {
            panic!("expected expiry to finalize");
        };
        assert!(matches!(outcome, Outcome::Winner { .. }));
        assert_eq!(outcome.message(), "🏆 Hawks won the competition!");
    }

    #[test]
    fn test_ties_fall_back_to_id_order() {
        let mut first = team("Hawks", 10, 0);
        let mut second = team("Owls", 10, 0);
        first.id = Uuid::from_u128(1);
        second.id = Uuid::from_u128(2);
        let teams = vec![second, first];
        let ranked = rank_teams(&teams);
        assert_eq!(ranked[0].name, "Hawks");
    }
}
