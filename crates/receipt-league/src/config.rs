use anyhow::anyhow;
use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use receipt_league_core::MAX_RECEIPT_IMAGE_BYTES;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};
use time::{format_description::well_known::Iso8601, macros::date, Date, OffsetDateTime};

time::serde::format_description!(pub(crate) calendar_date, Date, "[year]-[month]-[day]");

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to Settings.toml file holding configuration options
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level to run with the service (default: info)
    #[arg(short, long)]
    pub level: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    pub config: Option<String>,
    pub level: Option<String>,
    pub db_settings: DBSettings,
    pub api_settings: APISettings,
    pub league_settings: LeagueSettings,
    pub promotion_settings: PromotionSettings,
    pub ocr_settings: OcrSettings,
}

impl ConfigurableSettings for Settings {
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings) {
        if let Some(level) = &cli_settings.level {
            self.level = Some(level.clone());
        }
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/local.toml")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DBSettings {
    pub data_folder: String,
    pub read_max_connections: u32,
    pub read_min_connections: u32,
    pub write_max_connections: u32,
    pub write_min_connections: u32,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub sqlite_config: SqliteConfigSerde,
}

impl Default for DBSettings {
    fn default() -> Self {
        DBSettings {
            data_folder: String::from("./data"),
            read_max_connections: 12,
            read_min_connections: 2,
            write_max_connections: 5,
            write_min_connections: 1,
            idle_timeout_secs: 600,
            acquire_timeout_secs: 15,
            sqlite_config: SqliteConfigSerde::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SqliteConfigSerde {
    /// One of ReadWriteCreate, ReadWrite, ReadOnly, Memory
    pub mode: String,
    /// Shared or Private
    pub cache: String,
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

impl Default for SqliteConfigSerde {
    fn default() -> Self {
        Self {
            mode: "ReadWriteCreate".to_string(),
            cache: "Shared".to_string(),
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            cache_size: 1000000,
            foreign_keys: true,
            wal_autocheckpoint: Some(1000),
            temp_store: "Memory".to_string(),
            mmap_size: Some(268435456), // 256MB
            page_size: Some(4096),
        }
    }
}

impl SqliteConfigSerde {
    pub fn testing() -> Self {
        Self {
            mode: "Memory".to_string(),
            journal_mode: "MEMORY".to_string(),
            synchronous: "OFF".to_string(),
            busy_timeout_ms: 1000,
            cache_size: 10000,
            wal_autocheckpoint: None,
            mmap_size: None,
            page_size: None,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct APISettings {
    pub domain: String,
    pub port: String,
    pub origins: Vec<String>,
}

impl Default for APISettings {
    fn default() -> Self {
        APISettings {
            domain: String::from("127.0.0.1"),
            port: String::from("9990"),
            origins: vec![String::from("http://localhost:9990")],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeagueSettings {
    /// How often in seconds to look for active competitions past their end date
    pub sweep_interval_secs: u64,
    /// Goal used when a goal competition is created without one
    pub default_goal: u64,
    /// Unconfirmed fingerprint reservations older than this are released by the sweeper
    pub reservation_ttl_secs: u64,
    /// Where uploaded receipt photos are written
    pub image_folder: String,
    pub max_image_bytes: usize,
}

impl Default for LeagueSettings {
    fn default() -> Self {
        LeagueSettings {
            sweep_interval_secs: 30,
            default_goal: 50_000,
            reservation_ttl_secs: 900,
            image_folder: String::from("./data/receipts"),
            max_image_bytes: MAX_RECEIPT_IMAGE_BYTES,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromotionSettings {
    /// Lowercase fragments of the promoted retailer's name, matched against the store name
    pub retailer_variants: Vec<String>,
    pub multiplier: u64,
    /// Last day (inclusive) the multiplier applies
    #[serde(with = "calendar_date")]
    pub ends_on: Date,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        PromotionSettings {
            retailer_variants: [
                "cvs",
                "cvs pharmacy",
                "cvs health",
                "cvs caremark",
                "cvs minuteclinic",
                "cvs.com",
                "cvs/pharmacy",
                "cvs/health",
                "cvs/caremark",
                "cvs care",
                "cvs store",
                "cvs retail",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            multiplier: 2,
            ends_on: date!(2025 - 10 - 24),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Base url of an OpenAI compatible chat completions api
    pub base_url: String,
    pub model: String,
    /// File holding the api key, kept out of the settings file
    pub api_key_file: String,
    pub max_tokens: u32,
    /// Use the built in mock reader instead of calling the vision api (debug builds only)
    #[serde(default)]
    pub mock_enabled: bool,
}

impl Default for OcrSettings {
    fn default() -> Self {
        OcrSettings {
            base_url: String::from("https://api.openai.com/v1/"),
            model: String::from("gpt-4o-mini"),
            api_key_file: String::from("./creds/openai_api_key"),
            max_tokens: 500,
            mock_enabled: false,
        }
    }
}

pub fn get_settings() -> Result<Settings, anyhow::Error> {
    get_settings_with_cli(Cli::parse().into())
}

pub struct CliSettings {
    pub config: Option<String>,
    pub level: Option<String>,
}

impl From<Cli> for CliSettings {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            level: cli.level,
        }
    }
}

pub trait ConfigurableSettings: Serialize + for<'de> Deserialize<'de> + Default {
    /// Apply CLI settings after loading from file
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings);

    /// Get the default config file path
    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/settings.toml")
    }

    /// Get the config directory path
    fn config_directory() -> PathBuf {
        PathBuf::from("./config")
    }
}

pub fn get_settings_with_cli<T: ConfigurableSettings>(
    cli_settings: CliSettings,
) -> Result<T, anyhow::Error> {
    let mut settings: T = match &cli_settings.config {
        Some(config_path) => {
            let path = PathBuf::from(config_path);
            let absolute_path = if path.is_absolute() {
                path
            } else {
                env::current_dir()?.join(path)
            };
            let content = fs::read_to_string(&absolute_path)
                .map_err(|e| anyhow!("Failed to find file: {}", e))?;
            toml::from_str(&content)
                .map_err(|e| anyhow!("Failed to map config to settings: {}", e))?
        }
        None => {
            let default_path = T::default_config_path();
            match fs::read_to_string(&default_path) {
                Ok(content) => toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to parse default config: {}", e))?,
                Err(_) => write_default_settings::<T>(&default_path)?,
            }
        }
    };

    settings.apply_cli_overrides(&cli_settings);

    Ok(settings)
}

fn write_default_settings<T: ConfigurableSettings>(path: &PathBuf) -> Result<T, anyhow::Error> {
    let default_settings = T::default();

    fs::create_dir_all(T::config_directory())
        .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;

    let toml_content = toml::to_string(&default_settings)
        .map_err(|e| anyhow!("Failed to serialize default settings: {}", e))?;

    fs::write(path, toml_content).map_err(|e| anyhow!("Failed to write default config: {}", e))?;

    Ok(default_settings)
}

pub fn setup_logger(
    level: Option<String>,
    filter_targets: Vec<String>,
) -> Result<(), fern::InitError> {
    let rust_log = get_log_level(level);
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}: {}",
                OffsetDateTime::now_utc()
                    .format(&Iso8601::DEFAULT)
                    .unwrap_or_default(),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .level(rust_log)
        .filter(move |metadata| {
            !filter_targets
                .iter()
                .any(|filter| metadata.target().starts_with(filter))
        })
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

pub fn get_log_level(level: Option<String>) -> LevelFilter {
    let level = level.unwrap_or_else(|| env::var("RUST_LOG").unwrap_or_default());
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}
