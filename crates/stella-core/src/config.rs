//! Instrument identity and the user-editable configuration file.
//!
//! The configuration lives on the data card as a two-line CSV so it can be
//! edited in any spreadsheet:
//!
//! ```text
//! desired_sample_interval_s, averaging_number_of_samples, averaging_count_down, count_down_step_s
//! 0.75, 20, 3, 0.75
//! ```
//!
//! An optional fifth value, `record_on_startup`, may follow. A missing file
//! is created with the defaults; an unreadable one is reported and ignored.

use alloc::format;
use alloc::string::String;

use embassy_time::Duration;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::storage::{CONFIG_FILE, Storage};

pub const DEVICE_TYPE: &str = "STELLA-1.1";
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// UIDs are the MCU serial reduced to four decimal digits.
pub const UID_MODULUS: u32 = 10_000;

const CONFIG_HEADER: &str = "desired_sample_interval_s, averaging_number_of_samples, \
                             averaging_count_down, count_down_step_s";

/// What every record says about the unit that wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub device_type: &'static str,
    pub software_version: &'static str,
    pub uid: u32,
}

impl Identity {
    pub const fn new(uid: u32) -> Self {
        Self {
            device_type: DEVICE_TYPE,
            software_version: SOFTWARE_VERSION,
            uid: uid % UID_MODULUS,
        }
    }

    /// Derive the UID from the MCU's unique id bytes (big-endian).
    pub fn from_chip_id(id: &[u8]) -> Self {
        let uid = id
            .iter()
            .fold(0u32, |acc, byte| (acc * 256 + u32::from(*byte)) % UID_MODULUS);
        Self::new(uid)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration file has no values line")]
    MissingValues,

    #[error("configuration value {field} is not a number")]
    InvalidValue { field: &'static str },

    #[error("configuration value {field} is out of range")]
    OutOfRange { field: &'static str },
}

/// Timing of the acquisition loop and the averaging run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Minimum seconds between the starts of two acquisition cycles.
    pub sample_interval_s: f32,
    /// Spectral samples taken per averaging run.
    pub averaging_sample_count: u32,
    /// Countdown steps shown before an averaging run starts.
    pub averaging_countdown: u32,
    pub countdown_step_s: f32,
    /// Whether continuous mode starts out recording.
    pub record_on_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_interval_s: 0.75,
            averaging_sample_count: 20,
            averaging_countdown: 3,
            countdown_step_s: 0.75,
            record_on_startup: true,
        }
    }
}

fn parse_field<T: core::str::FromStr>(
    value: Option<&str>,
    field: &'static str,
) -> Result<T, ConfigError> {
    value
        .ok_or(ConfigError::MissingValues)?
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { field })
}

fn seconds(value: f32) -> Duration {
    Duration::from_micros(libm::roundf(value * 1_000_000.0) as u64)
}

impl Config {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .nth(1)
            .ok_or(ConfigError::MissingValues)?;
        let mut fields = values.split(',');

        let config = Self {
            sample_interval_s: parse_field(fields.next(), "desired_sample_interval_s")?,
            averaging_sample_count: parse_field(fields.next(), "averaging_number_of_samples")?,
            averaging_countdown: parse_field(fields.next(), "averaging_count_down")?,
            countdown_step_s: parse_field(fields.next(), "count_down_step_s")?,
            record_on_startup: match fields.next() {
                Some(value) => parse_field(Some(value), "record_on_startup")?,
                None => Self::default().record_on_startup,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_interval_s.is_finite() && self.sample_interval_s >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "desired_sample_interval_s",
            });
        }
        if self.averaging_sample_count == 0 {
            return Err(ConfigError::OutOfRange {
                field: "averaging_number_of_samples",
            });
        }
        if !(self.countdown_step_s.is_finite() && self.countdown_step_s >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "count_down_step_s",
            });
        }
        Ok(())
    }

    pub fn to_file_contents(&self) -> String {
        format!(
            "{}\n{}, {}, {}, {}\n",
            CONFIG_HEADER,
            self.sample_interval_s,
            self.averaging_sample_count,
            self.averaging_countdown,
            self.countdown_step_s
        )
    }

    /// Read the configuration file, creating it with defaults when missing.
    ///
    /// Never fails: any problem is logged and the defaults are used.
    pub fn load_or_create<S: Storage>(storage: &mut S) -> Self {
        match storage.read_prefix(CONFIG_FILE, 512) {
            Ok(Some(text)) => match Self::parse(&text) {
                Ok(config) => {
                    info!("Loaded {}: {:?}", CONFIG_FILE, config);
                    config
                }
                Err(e) => {
                    warn!("Ignoring {}: {}", CONFIG_FILE, e);
                    Self::default()
                }
            },
            Ok(None) => {
                let config = Self::default();
                match storage.write(CONFIG_FILE, &config.to_file_contents()) {
                    Ok(()) => info!("Created {} with defaults", CONFIG_FILE),
                    Err(e) => warn!("Could not create {}: {}", CONFIG_FILE, e),
                }
                config
            }
            Err(e) => {
                warn!("Could not read {}: {}", CONFIG_FILE, e);
                Self::default()
            }
        }
    }

    /// Re-read the configuration file without touching the card.
    ///
    /// `None` when the file is missing, unreadable or malformed; the caller
    /// keeps what it already has.
    pub fn reload<S: Storage>(storage: &mut S) -> Option<Self> {
        match storage.read_prefix(CONFIG_FILE, 512) {
            Ok(Some(text)) => match Self::parse(&text) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Ignoring {}: {}", CONFIG_FILE, e);
                    None
                }
            },
            Ok(None) => {
                warn!("{} missing, keeping current settings", CONFIG_FILE);
                None
            }
            Err(e) => {
                warn!("Could not read {}: {}", CONFIG_FILE, e);
                None
            }
        }
    }

    pub fn sample_interval(&self) -> Duration {
        seconds(self.sample_interval_s)
    }

    pub fn countdown_step(&self) -> Duration {
        seconds(self.countdown_step_s)
    }
}
