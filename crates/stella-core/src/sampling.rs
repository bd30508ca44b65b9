//! Averaged spectral runs.
//!
//! An averaging run takes N back-to-back readings of the two spectrometers and
//! writes them to a side file, `{UID}_{YYYYMMDD}_{batch}.csv`:
//!
//! - the header,
//! - one row per sample, numbered N down to 1,
//! - an `average` row with the per-channel means and the ancillary readings,
//! - a `standard_deviation` row (population form, no line terminator).
//!
//! Mean and deviation are accumulated online while the sample rows are
//! written, so the file is never read back.

use alloc::format;
use alloc::string::String;
use core::fmt::Write;

use embassy_futures::yield_now;
use embassy_time::{Duration, Timer};
use log::{error, info, warn};

use crate::app_state::SamplingProgress;
use crate::clock::{ClockSource, Timestamp};
use crate::config::{Config, Identity};
use crate::record::Reading;
use crate::sensors::{SPECTRAL_CHANNELS, SensorKit, Sensors};
use crate::storage::Storage;

pub const SAMPLING_HEADER: &str = "UID, batch_number, sample_number, \
irradiance_450nm_blue_irradiance_uW_per_cm_squared, \
irradiance_500nm_cyan_irradiance_uW_per_cm_squared, \
irradiance_550nm_green_irradiance_uW_per_cm_squared, \
irradiance_570nm_yellow_irradiance_uW_per_cm_squared, \
irradiance_600nm_orange_irradiance_uW_per_cm_squared, \
irradiance_650nm_red_irradiance_uW_per_cm_squared, \
irradiance_610nm_orange_irradiance_uW_per_cm_squared, \
irradiance_680nm_near_infrared_irradiance_uW_per_cm_squared, \
irradiance_730nm_near_infrared_irradiance_uW_per_cm_squared, \
irradiance_760nm_near_infrared_irradiance_uW_per_cm_squared, \
irradiance_810nm_near_infrared_irradiance_uW_per_cm_squared, \
irradiance_860nm_near_infrared_irradiance_uW_per_cm_squared,  \
VIS_sensor_temperature_C,  NIR_sensor_temperature_C, surface_temperature_C, \
air_temperature_C, relative_humidity_percent, range_m, timestamp_iso8601, device_type, \
software_version\n";

/// Ancillary columns a sample row leaves empty.
const SAMPLE_PADDING_COLUMNS: usize = 6;

/// Spectrometer die temperatures are not read on this hardware.
const SENSOR_TEMPERATURE_PLACEHOLDER: &str = "0";

pub fn sampling_filename(identity: &Identity, timestamp: &Timestamp, batch: u32) -> String {
    format!("{}_{}_{}.csv", identity.uid, timestamp.datestamp(), batch)
}

/// Welford's online mean and variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    count: u32,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / f64::from(self.count);
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Divides by N.
    pub fn population_std_dev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        libm::sqrt(self.m2 / f64::from(self.count))
    }
}

/// Per-channel statistics for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelStats {
    sums: [i64; SPECTRAL_CHANNELS],
    stats: [RunningStats; SPECTRAL_CHANNELS],
}

impl ChannelStats {
    pub fn push(&mut self, channels: &[i32; SPECTRAL_CHANNELS]) {
        for (c, value) in channels.iter().enumerate() {
            self.sums[c] += i64::from(*value);
            self.stats[c].push(f64::from(*value));
        }
    }

    /// `round(sum / N, 1)` per channel.
    pub fn averages(&self) -> [f64; SPECTRAL_CHANNELS] {
        core::array::from_fn(|c| {
            let count = self.stats[c].count().max(1);
            libm::round(self.sums[c] as f64 / f64::from(count) * 10.0) / 10.0
        })
    }

    pub fn standard_deviations(&self) -> [f64; SPECTRAL_CHANNELS] {
        core::array::from_fn(|c| self.stats[c].population_std_dev())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlan {
    pub sample_count: u32,
    pub countdown_steps: u32,
    pub countdown_step: Duration,
}

impl From<&Config> for SamplingPlan {
    fn from(config: &Config) -> Self {
        Self {
            sample_count: config.averaging_sample_count.max(1),
            countdown_steps: config.averaging_countdown,
            countdown_step: config.countdown_step(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingOutcome {
    pub filename: String,
    pub average: [f64; SPECTRAL_CHANNELS],
    pub standard_deviation: [f64; SPECTRAL_CHANNELS],
    /// Header, sample rows and average row all reached storage.
    pub samples_written: bool,
    /// The standard deviation row reached storage.
    pub deviation_written: bool,
}

/// Everything an averaging run borrows from the instrument.
pub struct Sampler<'a, K: SensorKit, S: Storage, C: ClockSource> {
    pub sensors: &'a mut Sensors<K>,
    pub storage: &'a mut S,
    pub clock: &'a C,
    pub identity: &'a Identity,
    pub batch: u32,
}

impl<K: SensorKit, S: Storage, C: ClockSource> Sampler<'_, K, S, C> {
    /// Run one averaging sequence. `ancillary` supplies the temperatures,
    /// humidity and range for the average row.
    ///
    /// Storage failures are logged and reported in the outcome; the run always
    /// completes and the statistics are always valid.
    pub async fn run(
        mut self,
        plan: SamplingPlan,
        ancillary: &Reading,
        mut progress: impl FnMut(SamplingProgress),
    ) -> SamplingOutcome {
        let identity = self.identity;
        let batch = self.batch;
        let filename = sampling_filename(identity, &ancillary.timestamp, batch);
        info!("Averaging {} samples into {}", plan.sample_count, filename);

        let mut samples_written = match self.storage.write(&filename, SAMPLING_HEADER) {
            Ok(()) => true,
            Err(e) => {
                error!("Could not create {}: {}", filename, e);
                false
            }
        };

        progress(SamplingProgress::Wait(plan.countdown_steps));
        for remaining in (0..plan.countdown_steps).rev() {
            Timer::after(plan.countdown_step).await;
            progress(SamplingProgress::Wait(remaining));
        }

        let mut stats = ChannelStats::default();
        for index in (1..=plan.sample_count).rev() {
            progress(SamplingProgress::Sample(index));
            let (visible, nir) = self.sensors.read_spectra().await;
            let mut reading = Reading::empty(self.clock.now());
            reading.visible = visible;
            reading.nir = nir;
            let channels = reading.spectral_channels();
            stats.push(&channels);

            if samples_written {
                let row = sample_row(identity, batch, index, &channels, &reading.timestamp);
                if let Err(e) = self.storage.append(&filename, &row) {
                    error!("Could not record sample {}: {}", index, e);
                    samples_written = false;
                }
            }
            yield_now().await;
        }

        let average = stats.averages();
        if samples_written {
            let row = average_row(identity, batch, &average, ancillary);
            if let Err(e) = self.storage.append(&filename, &row) {
                error!("Could not record average: {}", e);
                samples_written = false;
            }
        }

        progress(SamplingProgress::ComputingDeviation);
        let standard_deviation = stats.standard_deviations();
        let deviation_written = samples_written
            && match self
                .storage
                .append(&filename, &deviation_row(identity, batch, &standard_deviation))
            {
                Ok(()) => true,
                Err(e) => {
                    error!("Could not record standard deviation: {}", e);
                    false
                }
            };
        if !samples_written {
            warn!("Averaging run finished without a complete {}", filename);
        }

        progress(SamplingProgress::Finished { deviation_written });
        info!("Averaging done: {:?}", average);

        SamplingOutcome {
            filename,
            average,
            standard_deviation,
            samples_written,
            deviation_written,
        }
    }
}

fn sample_row(
    identity: &Identity,
    batch: u32,
    index: u32,
    channels: &[i32; SPECTRAL_CHANNELS],
    timestamp: &Timestamp,
) -> String {
    let mut row = format!("{},{}, {}, ", identity.uid, batch, index);
    for value in channels {
        let _ = write!(row, "{},", value);
    }
    for _ in 0..SAMPLE_PADDING_COLUMNS {
        row.push_str("0, ");
    }
    let _ = writeln!(row, "{}", timestamp.iso8601());
    row
}

fn average_row(
    identity: &Identity,
    batch: u32,
    average: &[f64; SPECTRAL_CHANNELS],
    ancillary: &Reading,
) -> String {
    let mut row = format!("{},{}, average, ", identity.uid, batch);
    for value in average {
        let _ = write!(row, "{:.1},", value);
    }
    let _ = writeln!(
        row,
        " {}, {}, {}, {}, {}, {}, {}, {}, {}",
        SENSOR_TEMPERATURE_PLACEHOLDER,
        SENSOR_TEMPERATURE_PLACEHOLDER,
        ancillary.surface.celsius,
        ancillary.air.celsius,
        ancillary.weather.relative_humidity_percent,
        ancillary.range.meters,
        ancillary.timestamp.iso8601(),
        identity.device_type,
        identity.software_version
    );
    row
}

fn deviation_row(
    identity: &Identity,
    batch: u32,
    deviations: &[f64; SPECTRAL_CHANNELS],
) -> String {
    let mut row = format!("{},{},standard_deviation,", identity.uid, batch);
    // `{:?}` keeps the fractional digit on whole values: 0.0, not 0
    for value in deviations {
        let _ = write!(row, "{:?},", value);
    }
    row
}
