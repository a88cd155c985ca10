//! Environment-driven configuration.
//!
//! Every deployment knob is an environment variable; `Config::from_env()`
//! never fails -- unparseable values fall back to the documented defaults so
//! the daemon can always start and complain in its logs instead.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub breaker: BreakerLimits,
    #[serde(default)]
    pub workspace: WorkspaceSettings,
    #[serde(default)]
    pub tester: TesterConfig,
}

impl Config {
    /// Assemble configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: env_parse("PORT", default_port()),
            },
            model: ModelConfig {
                api_key: std::env::var("MODEL_API_KEY").unwrap_or_default(),
                model: env_string("MODEL_NAME", default_model()),
                timeout_ms: env_parse("MODEL_TIMEOUT_MS", default_model_timeout_ms()),
            },
            store: StoreConfig {
                mode: std::env::var("DB_MODE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default(),
                data_dir: PathBuf::from(env_string("DB_DATA_DIR", default_data_dir())),
                // The flush tick never runs faster than the 30 s floor.
                flush_interval_ms: env_parse("DB_FLUSH_INTERVAL_MS", default_flush_ms())
                    .max(default_flush_ms()),
            },
            breaker: BreakerLimits {
                max_daily_tokens: env_parse("MAX_DAILY_TOKENS", default_daily_tokens()),
                max_task_tokens: env_parse("MAX_TASK_TOKENS", default_task_tokens()),
                max_concurrent_tasks: env_parse(
                    "MAX_CONCURRENT_TASKS",
                    default_concurrent_tasks(),
                ),
                max_retries: env_parse("MAX_RETRIES", default_max_retries()),
                token_window_ms: env_parse("TOKEN_WINDOW_MS", default_token_window_ms()),
                half_open_interval_ms: env_parse(
                    "HALF_OPEN_INTERVAL_MS",
                    default_half_open_ms(),
                ),
            },
            workspace: WorkspaceSettings {
                repo_url: std::env::var("REPO_URL").unwrap_or_default(),
                work_dir: PathBuf::from(env_string("WORK_DIR", default_work_dir())),
                snapshot_files: std::env::var("SNAPSHOT_FILES")
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_else(|_| default_snapshot_files()),
                max_snapshots: env_parse("SNAPSHOT_LIMIT", default_snapshot_limit()),
            },
            tester: TesterConfig {
                chrome_path: std::env::var("CHROME_PATH").ok(),
                app_url: env_string("APP_URL", default_app_url()),
                min_cases: env_parse("MIN_TEST_CASES", default_min_cases()),
            },
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8700
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_model_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            timeout_ms: default_model_timeout_ms(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_model_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DbMode {
    #[default]
    Memory,
    File,
}

impl FromStr for DbMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(DbMode::Memory),
            "file" => Ok(DbMode::File),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub mode: DbMode,
    #[serde(default = "default_data_dir_path")]
    pub data_dir: PathBuf,
    #[serde(default = "default_flush_ms")]
    pub flush_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: DbMode::Memory,
            data_dir: default_data_dir_path(),
            flush_interval_ms: default_flush_ms(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".into()
}
fn default_data_dir_path() -> PathBuf {
    PathBuf::from(default_data_dir())
}
fn default_flush_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerLimits {
    #[serde(default = "default_daily_tokens")]
    pub max_daily_tokens: u64,
    #[serde(default = "default_task_tokens")]
    pub max_task_tokens: u64,
    #[serde(default = "default_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_token_window_ms")]
    pub token_window_ms: u64,
    #[serde(default = "default_half_open_ms")]
    pub half_open_interval_ms: u64,
}

impl Default for BreakerLimits {
    fn default() -> Self {
        Self {
            max_daily_tokens: default_daily_tokens(),
            max_task_tokens: default_task_tokens(),
            max_concurrent_tasks: default_concurrent_tasks(),
            max_retries: default_max_retries(),
            token_window_ms: default_token_window_ms(),
            half_open_interval_ms: default_half_open_ms(),
        }
    }
}

fn default_daily_tokens() -> u64 {
    1_000_000
}
fn default_task_tokens() -> u64 {
    80_000
}
fn default_concurrent_tasks() -> usize {
    3
}
fn default_max_retries() -> u32 {
    3
}
fn default_token_window_ms() -> u64 {
    86_400_000
}
fn default_half_open_ms() -> u64 {
    600_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default = "default_work_dir_path")]
    pub work_dir: PathBuf,
    #[serde(default = "default_snapshot_files")]
    pub snapshot_files: Vec<String>,
    #[serde(default = "default_snapshot_limit")]
    pub max_snapshots: usize,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            work_dir: default_work_dir_path(),
            snapshot_files: default_snapshot_files(),
            max_snapshots: default_snapshot_limit(),
        }
    }
}

fn default_work_dir() -> String {
    "./workdir".into()
}
fn default_work_dir_path() -> PathBuf {
    PathBuf::from(default_work_dir())
}
fn default_snapshot_files() -> Vec<String> {
    vec!["src".into()]
}
fn default_snapshot_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesterConfig {
    #[serde(default)]
    pub chrome_path: Option<String>,
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default = "default_min_cases")]
    pub min_cases: usize,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            app_url: default_app_url(),
            min_cases: default_min_cases(),
        }
    }
}

fn default_app_url() -> String {
    "http://localhost:3000".into()
}
fn default_min_cases() -> usize {
    3
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
