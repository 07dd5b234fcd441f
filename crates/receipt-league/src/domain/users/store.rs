use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use time::OffsetDateTime;

use crate::{
    domain::Error,
    infra::db::{format_timestamp, parse_required_datetime, DBConnection, DatabaseWriteError},
};

use super::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,
    pub name: String,
    pub school_name: Option<String>,
    pub group_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserProfile {
    pub fn new(email: &str, name: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            email: email.trim().to_lowercase(),
            name: name.trim().to_string(),
            school_name: None,
            group_name: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl FromRow<'_, SqliteRow> for UserProfile {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(UserProfile {
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            school_name: row.try_get("school_name")?,
            group_name: row.try_get("group_name")?,
            created_at: parse_required_datetime(row, "created_at")?,
            updated_at: parse_required_datetime(row, "updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub school_name: Option<String>,
    pub group_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserStore {
    db_connection: DBConnection,
}

impl UserStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        self.db_connection.ping().await
    }

    pub async fn get_profile(&self, email: &str) -> Result<Option<UserProfile>, Error> {
        let profile = sqlx::query_as::<_, UserProfile>(
            "SELECT email, name, school_name, group_name, created_at, updated_at
            FROM profiles
            WHERE email = ?",
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(self.db_connection.read())
        .await?;

        Ok(profile)
    }

    /// Insert or replace the profile, `created_at` survives updates
    pub async fn save_profile(&self, profile: &UserProfile) -> Result<UserProfile, Error> {
        let email = profile.email.trim().to_lowercase();
        let name = profile.name.trim().to_string();
        let school_name = non_blank(profile.school_name.as_deref());
        let group_name = non_blank(profile.group_name.as_deref());
        let created_at = format_timestamp(profile.created_at)?;
        let updated_at = format_timestamp(OffsetDateTime::now_utc())?;

        let saved = self
            .db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, UserProfile>(
                    "INSERT INTO profiles (email, name, school_name, group_name, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT (email) DO UPDATE SET
                        name = excluded.name,
                        school_name = excluded.school_name,
                        group_name = excluded.group_name,
                        updated_at = excluded.updated_at
                    RETURNING email, name, school_name, group_name, created_at, updated_at",
                )
                .bind(email)
                .bind(name)
                .bind(school_name)
                .bind(group_name)
                .bind(created_at)
                .bind(updated_at)
                .fetch_one(&pool)
                .await
            })
            .await
            .map_err(|e| match e {
                DatabaseWriteError::Sqlx(e) => Error::DbError(e),
                e => Error::BadRequest(e.to_string()),
            })?;

        Ok(saved)
    }

    pub async fn update_profile(
        &self,
        email: &str,
        update: ProfileUpdate,
    ) -> Result<UserProfile, Error> {
        let mut profile = self
            .get_profile(email)
            .await?
            .unwrap_or_else(|| UserProfile::new(email, &update.name));
        profile.name = update.name;
        profile.school_name = update.school_name;
        profile.group_name = update.group_name;
        self.save_profile(&profile).await
    }

    /// A caller without a saved profile gets a transient one named after their email
    pub async fn load_session(&self, email: &str) -> Result<Session, Error> {
        let profile = self
            .get_profile(email)
            .await?
            .unwrap_or_else(|| UserProfile::new(email, ""));
        Ok(Session::new(profile))
    }

    pub async fn save_session(&self, session: &Session) -> Result<Session, Error> {
        let profile = self.save_profile(session.profile()).await?;
        Ok(Session::new(profile))
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}
