use anyhow::Result;
use receipt_league::domain::{CreateCompetition, Error};
use receipt_league_core::{CompetitionStatusKind, Scope};
use time::{Duration, OffsetDateTime};

use crate::helpers::{accepting_images, reader_with, reading, submission, TestContext};

#[tokio::test]
async fn test_reaching_the_goal_completes_the_competition() -> Result<()> {
    let context = TestContext::new(
        reader_with(vec![Ok(reading(1234, "Trader Joe's"))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let bob = context.member("bob@example.com", "Bob").await?;
    let competition = context.goal_competition(&alice, 10_000).await?;
    let giants = context.team(&alice, competition.id, "Green Giants").await?;
    let hawks = context.team(&bob, competition.id, "Hawks").await?;

    let result = context
        .league
        .submit_receipt(&alice, submission(giants.id, b"photo-1"))
        .await?;

    let winner = result.winner.expect("winner check runs after approval");
    assert!(winner.has_winner);
    assert_eq!(winner.new_status, CompetitionStatusKind::Completed);
    assert_eq!(winner.winner_team.map(|team| team.id), Some(giants.id));
    assert!(winner.tied_teams.is_none());

    let stored = context.league.get_competition(competition.id).await?;
    assert!(stored.is_completed());
    assert_eq!(stored.winner_team_id, Some(giants.id));
    assert_eq!(stored.winner_points, Some(12_340));
    assert!(stored.completed_at.is_some());

    let notice = context
        .league
        .winner_message(competition.id, giants.id)
        .await?
        .expect("completed competitions have a message");
    assert!(notice.team_placed);
    assert_eq!(notice.message, "🏆 Green Giants won the competition!");

    let notice = context
        .league
        .winner_message(competition.id, hawks.id)
        .await?
        .expect("every team sees the result");
    assert!(!notice.team_placed);
    Ok(())
}

#[tokio::test]
async fn test_completed_competition_is_closed() -> Result<()> {
    let context = TestContext::new(
        reader_with(vec![Ok(reading(1234, "Trader Joe's"))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let bob = context.member("bob@example.com", "Bob").await?;
    let competition = context.goal_competition(&alice, 10_000).await?;
    let giants = context.team(&alice, competition.id, "Green Giants").await?;

    context
        .league
        .submit_receipt(&alice, submission(giants.id, b"photo-1"))
        .await?;

    let err = context
        .league
        .submit_receipt(&alice, submission(giants.id, b"photo-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CompetitionClosed(id) if id == competition.id));

    let err = context.league.join_team(&bob, giants.id).await.unwrap_err();
    assert!(matches!(err, Error::CompetitionClosed(_)));

    let err = context
        .league
        .create_team(&bob, competition.id, String::from("Hawks"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CompetitionClosed(_)));
    Ok(())
}

#[tokio::test]
async fn test_decide_returns_the_stored_outcome() -> Result<()> {
    let context = TestContext::new(
        reader_with(vec![Ok(reading(1234, "Trader Joe's"))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 10_000).await?;
    let giants = context.team(&alice, competition.id, "Green Giants").await?;

    let first = context
        .league
        .submit_receipt(&alice, submission(giants.id, b"photo-1"))
        .await?
        .winner
        .expect("winner check runs after approval");
    let completed_at = context
        .league
        .get_competition(competition.id)
        .await?
        .completed_at;

    let again = context.league.decide(competition.id).await?;
    let and_again = context.league.decide(competition.id).await?;
    assert_eq!(first, again);
    assert_eq!(again, and_again);
    assert_eq!(
        context
            .league
            .get_competition(competition.id)
            .await?
            .completed_at,
        completed_at
    );
    Ok(())
}

#[tokio::test]
async fn test_expired_competition_closes_without_winner() -> Result<()> {
    let context = TestContext::new(
        reader_with(vec![Ok(reading(500, "Trader Joe's"))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let bob = context.member("bob@example.com", "Bob").await?;
    let competition = context
        .league
        .create_competition(
            &alice,
            CreateCompetition {
                name: String::from("Spring Drive"),
                scope: Scope::School {
                    name: String::from("Lincoln Elementary"),
                },
                has_goal: true,
                goal: Some(1_000_000),
                end_date: Some(OffsetDateTime::now_utc() - Duration::minutes(1)),
            },
        )
        .await?;
    let giants = context.team(&alice, competition.id, "Green Giants").await?;
    context.team(&bob, competition.id, "Hawks").await?;

    context
        .league
        .submit_receipt(&alice, submission(giants.id, b"photo-1"))
        .await?;

    // a manual check never closes a competition for being past its end date
    let undecided = context.league.decide(competition.id).await?;
    assert!(!undecided.has_winner);
    assert_eq!(undecided.new_status, CompetitionStatusKind::Active);

    let report = context.league.expiry_sweeper().sweep().await?;
    assert_eq!(report.examined, 1);
    assert_eq!(report.finalized, 1);
    assert_eq!(report.failed, 0);

    let stored = context.league.get_competition(competition.id).await?;
    assert!(stored.is_completed());
    assert_eq!(stored.winner_team_id, Some(giants.id));

    let notice = context
        .league
        .winner_message(competition.id, giants.id)
        .await?
        .expect("expired competitions have a message");
    assert!(notice.message.starts_with("🏆 No one won! Green Giants was the closest"));
    assert!(notice.team_placed);

    // nothing left for the next pass
    let report = context.league.expiry_sweeper().sweep().await?;
    assert_eq!(report.examined, 0);
    Ok(())
}

#[tokio::test]
async fn test_winner_message_checks_the_team() -> Result<()> {
    let context = TestContext::new(reader_with(vec![]), accepting_images()).await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let first = context.goal_competition(&alice, 10_000).await?;
    let second = context.goal_competition(&alice, 10_000).await?;
    let giants = context.team(&alice, first.id, "Green Giants").await?;

    assert!(context
        .league
        .winner_message(first.id, giants.id)
        .await?
        .is_none());
    let err = context
        .league
        .winner_message(second.id, giants.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    Ok(())
}
