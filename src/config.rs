use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::render::ReceiptLayout;
use crate::scheduler::RetryScheduler;

const DEFAULT_VENDOR_ID: u16 = 0x1fc9;
const DEFAULT_PRODUCT_ID: u16 = 0x2016;

/// Deployment profile. Picks the upstream event server and the database file.
/// The dev server also listens on port 5001, so the local HTTP surface
/// uses 5080 in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Prod,
}

impl Mode {
    fn default_event_url(self) -> &'static str {
        match self {
            Mode::Dev => "http://localhost:5001",
            Mode::Prod => "http://cafe.kinocampus.it",
        }
    }

    fn default_listen_addr(self) -> &'static str {
        match self {
            Mode::Dev => "127.0.0.1:5080",
            Mode::Prod => "0.0.0.0:5080",
        }
    }

    fn default_database_url(self) -> &'static str {
        match self {
            Mode::Dev => "sqlite://spool-dev.db",
            Mode::Prod => "sqlite://spool.db",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Mode::Dev),
            "prod" | "production" => Ok(Mode::Prod),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub database_url: String,
    /// Socket.IO server publishing purchase events.
    pub event_url: String,
    pub event_namespace: String,
    pub event_name: String,
    pub listen_addr: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Network printer address. When set it replaces the USB lookup.
    pub printer_addr: Option<String>,
    pub printer_connect_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub poll_interval: Duration,
    pub error_pause: Duration,
    pub render_timeout: Duration,
    pub receipt_header: Vec<String>,
    pub receipt_width: usize,
    /// Image printed above the header, if any.
    pub receipt_logo: Option<PathBuf>,
}

impl Config {
    /// Read configuration from the environment (and `.env`), with `--mode`
    /// in `args` taking precedence over `SPOOLER_MODE`.
    pub fn from_env(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mode_flag = mode_from_args(args)?;
        Self::from_lookup(mode_flag, |key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mode_flag: Option<Mode>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match mode_flag {
            Some(mode) => mode,
            None => lookup("SPOOLER_MODE")
                .map(|m| m.parse::<Mode>())
                .transpose()?
                .unwrap_or(Mode::Dev),
        };

        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| mode.default_database_url().to_string());
        let event_url = lookup("EVENT_SERVER_URL").unwrap_or_else(|| mode.default_event_url().to_string());
        let event_namespace = lookup("EVENT_NAMESPACE").unwrap_or_else(|| "/purchase".to_string());
        let event_name = lookup("EVENT_NAME").unwrap_or_else(|| "purchase-created".to_string());
        let listen_addr = lookup("LISTEN_ADDR").unwrap_or_else(|| mode.default_listen_addr().to_string());

        let vendor_id = hex_id(&lookup, "PRINTER_VENDOR_ID", DEFAULT_VENDOR_ID)?;
        let product_id = hex_id(&lookup, "PRINTER_PRODUCT_ID", DEFAULT_PRODUCT_ID)?;
        let printer_addr = lookup("PRINTER_ADDR").filter(|addr| !addr.trim().is_empty());

        let max_attempts = number(&lookup, "MAX_ATTEMPTS", 5u32)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let receipt_header = lookup("RECEIPT_HEADER")
            .map(|h| h.split('|').map(|line| line.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Config {
            mode,
            database_url,
            event_url,
            event_namespace,
            event_name,
            listen_addr,
            vendor_id,
            product_id,
            printer_addr,
            printer_connect_timeout: millis(&lookup, "PRINTER_CONNECT_TIMEOUT_MS", 5_000)?,
            max_attempts,
            retry_base_delay: millis(&lookup, "RETRY_BASE_DELAY_MS", 5_000)?,
            poll_interval: millis(&lookup, "POLL_INTERVAL_MS", 5_000)?,
            error_pause: millis(&lookup, "ERROR_PAUSE_MS", 5_000)?,
            render_timeout: millis(&lookup, "RENDER_TIMEOUT_MS", 30_000)?,
            receipt_header,
            receipt_width: number(&lookup, "RECEIPT_WIDTH", 48usize)?,
            receipt_logo: lookup("RECEIPT_LOGO").filter(|p| !p.trim().is_empty()).map(PathBuf::from),
        })
    }

    pub fn retry_policy(&self) -> RetryScheduler {
        RetryScheduler::new(self.max_attempts, self.retry_base_delay)
    }

    pub fn receipt_layout(&self) -> ReceiptLayout {
        ReceiptLayout {
            width: self.receipt_width,
            header_lines: self.receipt_header.clone(),
            ..ReceiptLayout::default()
        }
    }
}

/// Accepts `--mode prod` and `--mode=prod`. Other arguments are ignored.
pub fn mode_from_args(args: impl IntoIterator<Item = String>) -> Result<Option<Mode>, ConfigError> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--mode=") {
            return value.parse().map(Some);
        }
        if arg == "--mode" {
            let value = args.next().ok_or(ConfigError::MissingModeValue)?;
            return value.parse().map(Some);
        }
    }
    Ok(None)
}

fn hex_id<F>(lookup: &F, key: &'static str, default: u16) -> Result<u16, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let digits = raw.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn millis<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    number(lookup, key, default).map(Duration::from_millis)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown mode '{0}', expected dev or prod")]
    InvalidMode(String),

    #[error("--mode requires a value")]
    MissingModeValue,

    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}
