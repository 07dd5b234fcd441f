use anyhow::Result;
use async_trait::async_trait;
use mockall::mock;
use receipt_league::{
    domain::{
        Competition, CompetitionStore, CreateCompetition, ImageUpload, League, ProfileUpdate,
        ReceiptSubmission, Session, Team,
    },
    infra::{
        create_folder,
        db::{DBConnection, DatabasePoolConfig, DatabaseType},
        ocr::Error as OcrError,
        ImageStore, ReceiptReader, ReceiptReading,
    },
    Settings,
};
use receipt_league_core::{Amount, Confidence, Scope};
use std::{
    collections::VecDeque,
    fs,
    path::PathBuf,
    sync::{Arc, Once},
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

static INIT_LOGGER: Once = Once::new();

pub fn setup_static_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

mock! {
    pub Reader { }

    #[async_trait]
    impl ReceiptReader for Reader {
        async fn extract(&self, image: &[u8], content_type: &str) -> Result<ReceiptReading, OcrError>;
    }
}

mock! {
    pub Images { }

    #[async_trait]
    impl ImageStore for Images {
        async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<String, anyhow::Error>;
        async fn delete(&self, location: &str) -> Result<(), anyhow::Error>;
    }
}

/// Hands out the given results in order, one per extraction
pub fn reader_with(results: Vec<Result<ReceiptReading, OcrError>>) -> MockReader {
    let mut reader = MockReader::new();
    let expected = results.len();
    let mut queue = VecDeque::from(results);
    reader
        .expect_extract()
        .times(expected)
        .returning(move |_, _| {
            queue
                .pop_front()
                .unwrap_or_else(|| Err(OcrError::Parse("no reading queued".to_string())))
        });
    reader
}

/// Accepts every upload and delete
pub fn accepting_images() -> MockImages {
    let mut images = MockImages::new();
    images
        .expect_put()
        .returning(|key, _, _| Ok(key.to_string()));
    images.expect_delete().returning(|_| Ok(()));
    images
}

pub fn reading(cents: i64, store_name: &str) -> ReceiptReading {
    ReceiptReading {
        amount: Amount::from_cents(cents).unwrap(),
        store_name: store_name.to_string(),
        date: OffsetDateTime::now_utc().date(),
        currency: String::from("USD"),
        confidence: Confidence::High,
        text: Some(format!("{} receipt total {}", store_name, cents)),
    }
}

pub fn submission(team_id: Uuid, photo: &[u8]) -> ReceiptSubmission {
    ReceiptSubmission {
        team_id,
        image: ImageUpload {
            file_name: String::from("receipt.jpg"),
            content_type: String::from("image/jpeg"),
            bytes: photo.to_vec(),
        },
        manual_amount: None,
        description: None,
    }
}

pub struct TestContext {
    pub league: League,
    pub competition_store: CompetitionStore,
    data_folder: PathBuf,
}

impl TestContext {
    pub async fn new(reader: MockReader, images: MockImages) -> Result<Self> {
        setup_static_logger();
        let data_folder =
            std::env::temp_dir().join(format!("receipt-league-test-{}", Uuid::now_v7()));
        let folder = data_folder.to_string_lossy().to_string();
        create_folder(&folder)?;

        let league_db = DBConnection::new(
            &folder,
            "league",
            DatabasePoolConfig::default(),
            DatabaseType::League,
        )
        .await?;
        let users_db = DBConnection::new(
            &folder,
            "users",
            DatabasePoolConfig::default(),
            DatabaseType::Users,
        )
        .await?;

        let mut settings = Settings::default();
        settings.promotion_settings.ends_on = OffsetDateTime::now_utc().date() + Duration::days(30);

        let competition_store = CompetitionStore::new(league_db.clone());
        let reader: Arc<dyn ReceiptReader> = Arc::new(reader);
        let images: Arc<dyn ImageStore> = Arc::new(images);
        let league = League::new(league_db, users_db, reader, images, &settings);

        Ok(Self {
            league,
            competition_store,
            data_folder,
        })
    }

    /// A member with a saved profile
    pub async fn member(&self, email: &str, name: &str) -> Result<Session> {
        let session = self.league.load_session(email).await?;
        self.league
            .update_profile(
                &session,
                ProfileUpdate {
                    name: name.to_string(),
                    school_name: None,
                    group_name: Some(String::from("Troop 12")),
                },
            )
            .await?;
        Ok(self.league.load_session(email).await?)
    }

    pub async fn goal_competition(&self, creator: &Session, goal: u64) -> Result<Competition> {
        Ok(self
            .league
            .create_competition(
                creator,
                CreateCompetition {
                    name: String::from("Fall Food Drive"),
                    scope: Scope::Group {
                        name: String::from("Troop 12"),
                    },
                    has_goal: true,
                    goal: Some(goal),
                    end_date: Some(OffsetDateTime::now_utc() + Duration::days(7)),
                },
            )
            .await?)
    }

    pub async fn team(&self, creator: &Session, competition_id: Uuid, name: &str) -> Result<Team> {
        Ok(self
            .league
            .create_team(creator, competition_id, name.to_string())
            .await?)
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.data_folder) {
            eprintln!("Failed to cleanup test data folder: {}", e);
        }
    }
}
