use anyhow::{anyhow, Result};
use receipt_league::{
    domain::{Error, EXTRACTION_FAILED_MESSAGE},
    infra::ocr::Error as OcrError,
};
use receipt_league_core::{Amount, Confidence, ReceiptStatus};

use crate::helpers::{
    accepting_images, reader_with, reading, submission, MockImages, TestContext,
};

#[tokio::test]
async fn test_receipt_earns_ten_points_per_cent() -> Result<()> {
    let context = TestContext::new(
        reader_with(vec![Ok(reading(1234, "Trader Joe's"))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let result = context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-1"))
        .await?;

    assert_eq!(result.receipt.status, ReceiptStatus::Approved);
    assert_eq!(result.receipt.points, 12_340);
    assert_eq!(result.receipt.points_multiplier, 1);
    assert_eq!(result.receipt.submitter_name, "Alice");
    assert!(!result.promotion_applied);
    assert_eq!(result.notice, "✓ Receipt uploaded and points added!");

    let winner = result.winner.expect("approved receipts run the winner check");
    assert!(!winner.has_winner);

    let team = context.league.get_team(team.id).await?;
    assert_eq!(team.total_points, 12_340);
    assert_eq!(team.receipts_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_promoted_retailer_doubles_points() -> Result<()> {
    let context = TestContext::new(
        reader_with(vec![Ok(reading(1234, "CVS Pharmacy #1042"))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let result = context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-1"))
        .await?;

    assert!(result.promotion_applied);
    assert_eq!(result.receipt.base_points, 12_340);
    assert_eq!(result.receipt.points, 24_680);
    assert!(result.notice.ends_with("Promotion bonus: points doubled!"));
    assert_eq!(context.league.get_team(team.id).await?.total_points, 24_680);
    Ok(())
}

#[tokio::test]
async fn test_same_photo_is_rejected_across_teams() -> Result<()> {
    // the second upload never reaches the reader
    let context = TestContext::new(
        reader_with(vec![Ok(reading(1234, "Trader Joe's"))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let bob = context.member("bob@example.com", "Bob").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let giants = context.team(&alice, competition.id, "Green Giants").await?;
    let hawks = context.team(&bob, competition.id, "Hawks").await?;

    context
        .league
        .submit_receipt(&alice, submission(giants.id, b"photo-1"))
        .await?;
    let err = context
        .league
        .submit_receipt(&bob, submission(hawks.id, b"photo-1"))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        Error::Duplicate { original_submitter } if original_submitter == "Alice"
    ));
    assert_eq!(
        err.to_string(),
        "This receipt was already submitted by Alice"
    );
    assert_eq!(context.league.get_team(hawks.id).await?.total_points, 0);
    Ok(())
}

#[tokio::test]
async fn test_lookalike_receipt_is_rejected() -> Result<()> {
    let mut images = MockImages::new();
    images
        .expect_put()
        .times(1)
        .returning(|key, _, _| Ok(key.to_string()));
    images.expect_delete().times(0);

    let context = TestContext::new(
        reader_with(vec![
            Ok(reading(1234, "Trader Joe's")),
            Ok(reading(1235, "TRADER JOES")),
        ]),
        images,
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-1"))
        .await?;
    let err = context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-1-rotated"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Duplicate { .. }));
    assert_eq!(context.league.get_team_receipts(team.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_lookalike_rejection_frees_the_photo() -> Result<()> {
    let mut images = MockImages::new();
    images
        .expect_put()
        .times(2)
        .returning(|key, _, _| Ok(key.to_string()));

    let context = TestContext::new(
        reader_with(vec![
            Ok(reading(1234, "Trader Joe's")),
            Ok(reading(1235, "TRADER JOES")),
            Ok(reading(5610, "Whole Foods Market")),
        ]),
        images,
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 100_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-1"))
        .await?;
    let err = context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate { .. }));

    // a rejected lookalike must not keep its fingerprint reserved
    let result = context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-2"))
        .await?;
    assert_eq!(result.receipt.status, ReceiptStatus::Approved);
    assert_eq!(result.receipt.points, 56_100);
    assert_eq!(context.league.get_team_receipts(team.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_image_upload_can_be_retried() -> Result<()> {
    let mut images = MockImages::new();
    let mut attempts = 0;
    images.expect_put().times(2).returning(move |key, _, _| {
        attempts += 1;
        if attempts == 1 {
            Err(anyhow!("disk full"))
        } else {
            Ok(key.to_string())
        }
    });
    images.expect_delete().times(0);

    let context = TestContext::new(
        reader_with(vec![
            Ok(reading(1234, "Trader Joe's")),
            Ok(reading(1234, "Trader Joe's")),
        ]),
        images,
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let err = context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ImageStorage(_)));
    assert_eq!(context.league.get_team(team.id).await?.total_points, 0);

    let result = context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-1"))
        .await?;
    assert_eq!(result.receipt.status, ReceiptStatus::Approved);
    assert_eq!(context.league.get_team(team.id).await?.total_points, 12_340);
    Ok(())
}

#[tokio::test]
async fn test_sub_cent_total_is_floored() -> Result<()> {
    let mut sub_cent = reading(1234, "Trader Joe's");
    sub_cent.amount = Amount::from_dollars(12.349)?;
    let context = TestContext::new(reader_with(vec![Ok(sub_cent)]), accepting_images()).await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let result = context
        .league
        .submit_receipt(&alice, submission(team.id, b"photo-1"))
        .await?;

    assert_eq!(result.receipt.points, 12_349);
    let stored = context.league.get_team_receipts(team.id).await?;
    assert_eq!(stored[0].amount.mills(), 12_349);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_receipt_with_manual_total_waits_for_review() -> Result<()> {
    let context = TestContext::new(
        reader_with(vec![Err(OcrError::Parse("blurry".to_string()))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let mut upload = submission(team.id, b"faded-photo");
    upload.manual_amount = Some(Amount::from_cents(899)?);
    upload.description = Some(String::from("  Corner store  "));

    let result = context.league.submit_receipt(&alice, upload).await?;

    assert_eq!(result.receipt.status, ReceiptStatus::Pending);
    assert_eq!(result.receipt.ocr_confidence, Confidence::Manual);
    assert_eq!(result.receipt.store_name, "Corner store");
    assert_eq!(result.receipt.points, 8_990);
    assert!(result.winner.is_none());
    assert!(!result.promotion_applied);
    assert!(result.notice.contains("awaiting review"));

    let team = context.league.get_team(team.id).await?;
    assert_eq!(team.total_points, 0);
    assert_eq!(team.receipts_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_receipt_without_total_can_be_retried() -> Result<()> {
    let mut low = reading(1234, "Trader Joe's");
    low.confidence = Confidence::Low;

    let mut images = MockImages::new();
    images
        .expect_put()
        .times(1)
        .returning(|key, _, _| Ok(key.to_string()));

    let context = TestContext::new(reader_with(vec![Ok(low.clone()), Ok(low)]), images).await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let err = context
        .league
        .submit_receipt(&alice, submission(team.id, b"dark-photo"))
        .await
        .unwrap_err();
    assert!(matches!(&err, Error::Extraction(message) if message == EXTRACTION_FAILED_MESSAGE));

    // the failed attempt must not hold on to the photo's fingerprint
    let mut retry = submission(team.id, b"dark-photo");
    retry.manual_amount = Some("$12.34".parse()?);
    let result = context.league.submit_receipt(&alice, retry).await?;
    assert_eq!(result.receipt.status, ReceiptStatus::Pending);
    assert_eq!(result.receipt.store_name, "Unknown Store");
    Ok(())
}

#[tokio::test]
async fn test_only_members_can_submit() -> Result<()> {
    let context = TestContext::new(reader_with(vec![]), accepting_images()).await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let mallory = context.member("mallory@example.com", "Mallory").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let err = context
        .league
        .submit_receipt(&mallory, submission(team.id, b"photo-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotTeamMember));

    let err = context
        .league
        .submit_receipt(&alice, {
            let mut upload = submission(team.id, b"notes");
            upload.image.content_type = String::from("application/pdf");
            upload
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn test_one_team_per_competition() -> Result<()> {
    let context = TestContext::new(reader_with(vec![]), accepting_images()).await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let bob = context.member("bob@example.com", "Bob").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let giants = context.team(&alice, competition.id, "Green Giants").await?;

    let joined = context.league.join_team(&bob, giants.id).await?;
    assert!(joined.is_member("bob@example.com"));

    let err = context
        .league
        .create_team(&bob, competition.id, String::from("Hawks"))
        .await
        .unwrap_err();
    assert!(matches!(&err, Error::AlreadyOnTeam(name) if name == "Green Giants"));

    let competition = context.league.get_competition(competition.id).await?;
    assert_eq!(competition.team_count, 1);
    assert_eq!(competition.participant_count, 2);
    Ok(())
}
