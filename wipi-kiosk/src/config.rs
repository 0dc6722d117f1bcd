//! Kiosk configuration - `config.json` in WIPI_HOME

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::*;
use serde::{Deserialize, Serialize};
use wipi_tag::{SimulatedField, SimulatedReader, TagChannel};

use crate::qr::QrFormat;
use crate::writer::WriterOptions;

pub const CONFIG_FILE: &str = "config.json";

/// Get WIPI_HOME, falling back to `~/.wipi`
pub fn wipi_home() -> Result<PathBuf, ConfigError> {
    std::env::var("WIPI_HOME")
        .map(PathBuf::from)
        .or_else(|_| {
            dirs::home_dir()
                .map(|home| home.join(".wipi"))
                .ok_or(ConfigError::NoHome)
        })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no home directory, set WIPI_HOME")]
    NoHome,
    #[error("failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("{} is not a valid config: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Which reader the kiosk writes tags through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// PN532 on a serial port
    #[default]
    Pn532Uart,
    /// In-memory reader, tags are tapped from the console
    Simulated,
    /// QR code only
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub transport: Transport,
    pub device: String,
    pub baud_rate: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            device: "/dev/ttyS0".to_string(),
            baud_rate: 115_200,
        }
    }
}

/// The reader a config asks for
pub struct Reader {
    pub channel: Option<Box<dyn TagChannel>>,
    /// Set for the simulated transport, so tags can be tapped
    pub field: Option<SimulatedField>,
}

impl ReaderConfig {
    /// Build the configured reader; nothing is opened yet
    pub fn build(&self) -> Reader {
        match self.transport {
            Transport::None => Reader {
                channel: None,
                field: None,
            },
            Transport::Simulated => {
                let reader = SimulatedReader::new();
                let field = reader.field();
                Reader {
                    channel: Some(Box::new(reader)),
                    field: Some(field),
                }
            }
            Transport::Pn532Uart => Reader {
                channel: Some(Box::new(wipi_tag::Pn532Uart::new(&self.device, self.baud_rate))),
                field: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub poll_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub backoff_delay_ms: u64,
    pub verify_writes: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self::from(&WriterOptions::default())
    }
}

impl From<&WriterOptions> for WriterConfig {
    fn from(options: &WriterOptions) -> Self {
        Self {
            poll_timeout_ms: options.poll_timeout.as_millis() as u64,
            settle_delay_ms: options.settle_delay.as_millis() as u64,
            backoff_delay_ms: options.backoff_delay.as_millis() as u64,
            verify_writes: options.verify_writes,
        }
    }
}

impl WriterConfig {
    pub fn options(&self) -> WriterOptions {
        WriterOptions {
            // a zero timeout would spin the reader
            poll_timeout: Duration::from_millis(self.poll_timeout_ms.max(10)),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            backoff_delay: Duration::from_millis(self.backoff_delay_ms),
            verify_writes: self.verify_writes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QrConfig {
    pub format: QrFormat,
    /// Relative paths resolve against WIPI_HOME
    pub svg_path: PathBuf,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            format: QrFormat::default(),
            svg_path: PathBuf::from("wifi_qr.svg"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub reader: ReaderConfig,
    pub writer: WriterConfig,
    pub qr: QrConfig,
}

impl KioskConfig {
    /// Load `path`, writing the defaults there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let data = fs::read_to_string(path).map_err(io_err)?;
            let config = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            debug!("loaded config from {}", path.display());
            return Ok(config);
        }

        let config = Self::default();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, serde_json::to_string_pretty(&config)?).map_err(io_err)?;
        info!("wrote default config to {}", path.display());
        Ok(config)
    }

    pub fn svg_path(&self, home: &Path) -> PathBuf {
        home.join(&self.qr.svg_path)
    }
}
