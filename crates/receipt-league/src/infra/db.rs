use log::debug;
use sqlx::{
    migrate::{MigrateDatabase, Migrator},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, SqlitePool,
};
use std::{
    future::Future,
    hash::{DefaultHasher, Hash, Hasher},
    time::Duration as StdDuration,
};
use thiserror::Error;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
    UtcOffset,
};
use uuid::Uuid;

use crate::config::{DBSettings, SqliteConfigSerde};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteMode {
    ReadWriteCreate,
    ReadWrite,
    ReadOnly,
    Memory,
}

impl SqliteMode {
    fn parse(value: &str) -> Self {
        match value {
            "ReadWrite" => SqliteMode::ReadWrite,
            "ReadOnly" => SqliteMode::ReadOnly,
            "Memory" => SqliteMode::Memory,
            _ => SqliteMode::ReadWriteCreate,
        }
    }
}

/// Connection level settings applied to every pooled sqlite connection
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub mode: SqliteMode,
    pub shared_cache: bool,
    pub busy_timeout_ms: u32,
    pub journal_mode: String,
    pub synchronous: String,
    pub cache_size: i32,
    pub foreign_keys: bool,
    pub wal_autocheckpoint: Option<u32>,
    pub temp_store: String,
    pub mmap_size: Option<u64>,
    pub page_size: Option<u32>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfigSerde::default().into()
    }
}

impl From<SqliteConfigSerde> for SqliteConfig {
    fn from(config: SqliteConfigSerde) -> Self {
        Self {
            mode: SqliteMode::parse(&config.mode),
            shared_cache: config.cache != "Private",
            busy_timeout_ms: config.busy_timeout_ms,
            journal_mode: config.journal_mode.to_uppercase(),
            synchronous: config.synchronous.to_uppercase(),
            cache_size: config.cache_size,
            foreign_keys: config.foreign_keys,
            wal_autocheckpoint: config.wal_autocheckpoint,
            temp_store: config.temp_store.to_lowercase(),
            mmap_size: config.mmap_size,
            page_size: config.page_size,
        }
    }
}

impl SqliteConfig {
    pub fn testing() -> Self {
        SqliteConfigSerde::testing().into()
    }

    fn reader(&self) -> Self {
        match self.mode {
            // every connection to a memory db has to open the same shared uri
            SqliteMode::Memory => Self {
                cache_size: self.cache_size * 2,
                synchronous: String::from("OFF"),
                ..self.clone()
            },
            _ => Self {
                mode: SqliteMode::ReadOnly,
                synchronous: String::from("OFF"),
                foreign_keys: false,
                cache_size: self.cache_size * 2,
                ..self.clone()
            },
        }
    }

    fn writer(&self) -> Self {
        match self.mode {
            SqliteMode::Memory => self.clone(),
            _ => Self {
                mode: SqliteMode::ReadWrite,
                ..self.clone()
            },
        }
    }

    pub fn build_connect_options(&self, database_path: &str) -> SqliteConnectOptions {
        let busy_timeout = StdDuration::from_millis(self.busy_timeout_ms as u64);
        let options = SqliteConnectOptions::new();

        let options = match self.mode {
            SqliteMode::Memory => {
                // Hash the path so read and write pools of one database land on the same memory db
                let mut hasher = DefaultHasher::new();
                database_path.hash(&mut hasher);
                let memory_uri = format!("file:memdb_{}?mode=memory&cache=shared", hasher.finish());
                options.filename(&memory_uri).shared_cache(true)
            }
            SqliteMode::ReadOnly => {
                return options
                    .filename(database_path)
                    .read_only(true)
                    .shared_cache(self.shared_cache)
                    .busy_timeout(busy_timeout);
            }
            SqliteMode::ReadWrite => options
                .filename(database_path)
                .read_only(false)
                .shared_cache(self.shared_cache),
            SqliteMode::ReadWriteCreate => options
                .filename(database_path)
                .read_only(false)
                .create_if_missing(true)
                .shared_cache(self.shared_cache),
        };

        let mut options = options
            .busy_timeout(busy_timeout)
            .pragma("journal_mode", self.journal_mode.clone())
            .pragma("synchronous", self.synchronous.clone())
            .pragma("cache_size", self.cache_size.to_string())
            .pragma("temp_store", self.temp_store.clone());

        if self.foreign_keys {
            options = options.pragma("foreign_keys", "true");
        }
        if let Some(checkpoint) = self.wal_autocheckpoint {
            options = options.pragma("wal_autocheckpoint", checkpoint.to_string());
        }
        if let Some(mmap_size) = self.mmap_size {
            options = options.pragma("mmap_size", mmap_size.to_string());
        }
        if let Some(page_size) = self.page_size {
            options = options.pragma("page_size", page_size.to_string());
        }

        options
    }
}

#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub read_max_connections: u32,
    pub read_min_connections: u32,
    pub write_max_connections: u32,
    pub write_min_connections: u32,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub sqlite_config: SqliteConfig,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        DBSettings::default().into()
    }
}

impl DatabasePoolConfig {
    pub fn testing() -> Self {
        Self {
            read_max_connections: 2,
            read_min_connections: 1,
            write_max_connections: 1,
            acquire_timeout_secs: 5,
            sqlite_config: SqliteConfig::testing(),
            ..Default::default()
        }
    }
}

impl From<DBSettings> for DatabasePoolConfig {
    fn from(config: DBSettings) -> Self {
        Self {
            read_max_connections: config.read_max_connections,
            read_min_connections: config.read_min_connections,
            write_max_connections: config.write_max_connections,
            write_min_connections: config.write_min_connections,
            idle_timeout_secs: config.idle_timeout_secs,
            acquire_timeout_secs: config.acquire_timeout_secs,
            sqlite_config: config.sqlite_config.into(),
        }
    }
}

static LEAGUE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/league");
static USERS_MIGRATOR: Migrator = sqlx::migrate!("./migrations/users");

pub enum DatabaseType {
    /// Competitions, teams, receipts and fingerprint reservations
    League,
    /// Member profiles
    Users,
}

impl DatabaseType {
    fn migrator(&self) -> &'static Migrator {
        match self {
            DatabaseType::League => &LEAGUE_MIGRATOR,
            DatabaseType::Users => &USERS_MIGRATOR,
        }
    }
}

#[derive(Error, Debug)]
pub enum DatabaseWriteError {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("write did not finish within {0:?}")]
    Timeout(StdDuration),
}

impl From<DatabaseWriteError> for sqlx::Error {
    fn from(value: DatabaseWriteError) -> Self {
        match value {
            DatabaseWriteError::Sqlx(e) => e,
            e => sqlx::Error::Protocol(e.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DBConnection {
    pub database_name: String,
    pub database_path: String,
    read_pool: SqlitePool,
    write_pool: SqlitePool,
}

impl DBConnection {
    pub async fn new(
        path: &str,
        db_name: &str,
        database_pool_config: DatabasePoolConfig,
        db_type: DatabaseType,
    ) -> Result<Self, sqlx::Error> {
        let database_path = format!("{}/{}.db", path, db_name);

        if database_pool_config.sqlite_config.mode != SqliteMode::Memory {
            let database_url = format!("sqlite:{}", database_path);
            if !Sqlite::database_exists(&database_url).await? {
                Sqlite::create_database(&database_url).await?;
            }
        }

        let (read_pool, write_pool) =
            Self::create_pools(&database_path, &database_pool_config).await?;

        db_type
            .migrator()
            .run(&write_pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

        Ok(Self {
            database_name: db_name.to_string(),
            database_path,
            read_pool,
            write_pool,
        })
    }

    /// Wrap already migrated pools, used by tests that get a pool handed to them
    pub fn new_with_pools(
        database_name: String,
        database_path: String,
        read_pool: SqlitePool,
        write_pool: SqlitePool,
    ) -> Self {
        Self {
            database_name,
            database_path,
            read_pool,
            write_pool,
        }
    }

    async fn create_pools(
        database_path: &str,
        database_pool_config: &DatabasePoolConfig,
    ) -> Result<(SqlitePool, SqlitePool), sqlx::Error> {
        let acquire_timeout = StdDuration::from_secs(database_pool_config.acquire_timeout_secs);
        let idle_timeout = StdDuration::from_secs(database_pool_config.idle_timeout_secs);

        // Writer first so the file (or shared memory db) exists before readers attach
        let write_connection = database_pool_config
            .sqlite_config
            .writer()
            .build_connect_options(database_path);
        debug!("Write connection: {:?}", write_connection);

        let write_pool = SqlitePoolOptions::new()
            .max_connections(database_pool_config.write_max_connections)
            .min_connections(database_pool_config.write_min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(idle_timeout)
            .connect_with(write_connection)
            .await?;

        let read_connection = database_pool_config
            .sqlite_config
            .reader()
            .build_connect_options(database_path);
        debug!("Read connection: {:?}", read_connection);

        let read_pool = SqlitePoolOptions::new()
            .max_connections(database_pool_config.read_max_connections)
            .min_connections(database_pool_config.read_min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(idle_timeout)
            .connect_with(read_connection)
            .await?;

        Ok((read_pool, write_pool))
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.read_pool)
            .await?;
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.write_pool)
            .await?;

        Ok(())
    }

    pub async fn close(self) {
        self.read_pool.close().await;
        self.write_pool.close().await;
    }

    /// Run a write against the write pool, bounded by the pool's acquire timeout so a
    /// stuck writer surfaces as an error instead of hanging the caller
    pub async fn execute_write<F, Fut, T>(&self, operation: F) -> Result<T, DatabaseWriteError>
    where
        F: FnOnce(SqlitePool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let limit = self.write_pool.options().get_acquire_timeout() * 2;
        match tokio::time::timeout(limit, operation(self.write_pool.clone())).await {
            Ok(result) => result.map_err(DatabaseWriteError::Sqlx),
            Err(_) => Err(DatabaseWriteError::Timeout(limit)),
        }
    }

    pub fn read(&self) -> &SqlitePool {
        &self.read_pool
    }

    pub fn write(&self) -> &SqlitePool {
        &self.write_pool
    }
}

/// All timestamps are written as fixed-width UTC RFC 3339 text with nanosecond
/// precision, so text order matches time order
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, sqlx::Error> {
    value
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
        ))
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

pub fn format_date(value: Date) -> Result<String, sqlx::Error> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

pub fn parse_required_datetime(
    row: &SqliteRow,
    column: &str,
) -> Result<OffsetDateTime, sqlx::Error> {
    let date_str: String = row.try_get(column)?;
    OffsetDateTime::parse(&date_str, &Rfc3339).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

pub fn parse_optional_datetime(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<OffsetDateTime>, sqlx::Error> {
    row.try_get::<Option<String>, _>(column)?
        .map(|s| OffsetDateTime::parse(&s, &Rfc3339))
        .transpose()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

pub fn parse_optional_date(row: &SqliteRow, column: &str) -> Result<Option<Date>, sqlx::Error> {
    row.try_get::<Option<String>, _>(column)?
        .map(|s| Date::parse(&s, format_description!("[year]-[month]-[day]")))
        .transpose()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

pub fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

pub fn parse_optional_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, sqlx::Error> {
    row.try_get::<Option<String>, _>(column)?
        .map(|raw| Uuid::parse_str(&raw))
        .transpose()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

/// Decode a TEXT column holding a JSON array, NULL reads as empty
pub fn parse_json_list<T>(row: &SqliteRow, column: &str) -> Result<Vec<T>, sqlx::Error>
where
    T: serde::de::DeserializeOwned,
{
    match row.try_get::<Option<String>, _>(column)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        }),
        None => Ok(vec![]),
    }
}

/// Decode a TEXT column that must parse into a type via `FromStr`
pub fn parse_required_enum<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
