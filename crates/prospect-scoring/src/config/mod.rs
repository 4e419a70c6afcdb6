use std::collections::HashSet;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub admission: AdmissionConfig,
    pub scoring: ScoringConfig,
    pub upstream: UpstreamConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let admission = AdmissionConfig {
            api_keys: parse_key_list(&env::var("SCORING_API_KEYS").unwrap_or_default()),
            rate_limit_per_minute: positive_var("RATE_LIMIT_PER_MINUTE", 60)?,
            max_concurrent_requests: positive_var("MAX_CONCURRENT_REQUESTS", 10)?,
        };

        let scoring = ScoringConfig {
            chunk_size: positive_var("SCORING_CHUNK_SIZE", 20)?,
            chunk_workers: positive_var("SCORING_CHUNK_WORKERS", 4)?,
            scorer_version: env::var("SCORER_VERSION").unwrap_or_else(|_| "1.0.0".to_string()),
        };

        let upstream = UpstreamConfig {
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            max_retries: parsed_var("OPENAI_MAX_RETRIES", 2u32)?,
            retry_backoff: seconds_var("OPENAI_RETRY_BACKOFF_S", 1.5)?,
            request_timeout: seconds_var("OPENAI_REQUEST_TIMEOUT_S", 30.0)?,
            temperature: parsed_var("OPENAI_TEMPERATURE", 0.0f32)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            admission,
            scoring,
            upstream,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Credential allow-set and the per-key / process-wide request budgets.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub api_keys: HashSet<String>,
    pub rate_limit_per_minute: usize,
    pub max_concurrent_requests: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            api_keys: HashSet::new(),
            rate_limit_per_minute: 60,
            max_concurrent_requests: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub chunk_size: usize,
    /// Chunks of one request dispatched to the model at the same time.
    pub chunk_workers: usize,
    pub scorer_version: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            chunk_workers: 4,
            scorer_version: "1.0.0".to_string(),
        }
    }
}

/// Connection and retry settings for the OpenAI-compatible scoring model.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
    pub temperature: f32,
}

fn parse_key_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

fn parsed_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidNumber {
            var_name: name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn positive_var(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let value = parsed_var(name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidNumber {
            var_name: name,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn seconds_var(name: &'static str, default: f64) -> Result<Duration, ConfigError> {
    let seconds = parsed_var(name, default)?;
    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::InvalidNumber {
        var_name: name,
        value: seconds.to_string(),
    })
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var_name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var_name, value } => {
                write!(f, "{var_name} has invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
