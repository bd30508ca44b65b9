mod readings;

use alloc::string::String;
use core::convert::Infallible;
use core::marker::PhantomData;

use embassy_futures::yield_now;
use embassy_time::{Duration, Timer};
use log::warn;
use thiserror_no_std::Error;

use crate::clock::Timestamp;
use crate::record::Reading;

pub use readings::*;

/// How often a spectrometer is polled for a finished conversion.
pub const DATA_READY_INTERVAL: Duration = Duration::from_millis(10);

/// Polls before giving up on a conversion (half a second in total).
pub const DATA_READY_ATTEMPTS: u32 = 50;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} failed to {operation}: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },

    #[error("{sensor} initialization failed: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },

    #[error("{sensor} timed out waiting to {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },

    /// The device stopped answering on its bus. The slot treats it as
    /// unplugged from then on.
    #[error("{sensor} disconnected")]
    Disconnected { sensor: &'static str },
}

/// Trait for sensor reading data structures.
///
/// Readings know their own CSV columns so the record header and the record
/// values can never drift apart.
pub trait SensorReadings: Copy + Default {
    /// Append this reading's column names, comma separated.
    fn write_header(out: &mut String);

    /// Append this reading's values in the same order as the header.
    fn write_log(&self, out: &mut String);
}

/// Trait for sensors that produce typed readings.
pub trait Sensor {
    /// The type of readings this sensor produces.
    type Readings: SensorReadings;

    fn name(&self) -> &'static str;

    /// Read the sensor and return typed readings.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}

/// A sensor role that may or may not be fitted to this unit.
///
/// Reads never fail at this level: errors are logged and the role's default
/// reading is returned instead.
pub enum SensorSlot<S: Sensor> {
    Present { sensor: S, last: S::Readings },
    Absent,
}

impl<S: Sensor> From<Option<S>> for SensorSlot<S> {
    fn from(value: Option<S>) -> Self {
        match value {
            Some(sensor) => Self::present(sensor),
            None => Self::Absent,
        }
    }
}

impl<S: Sensor> SensorSlot<S> {
    pub fn present(sensor: S) -> Self {
        Self::Present {
            sensor,
            last: S::Readings::default(),
        }
    }

    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Take a fresh reading, falling back to the default on any failure.
    pub async fn read(&mut self) -> S::Readings {
        let Self::Present { sensor, last } = self else {
            return S::Readings::default();
        };

        let result = sensor.read().await;
        match result {
            Ok(readings) => {
                *last = readings;
                readings
            }
            Err(SensorError::Disconnected { sensor }) => {
                warn!("{} disconnected; recording defaults from now on", sensor);
                *self = Self::Absent;
                S::Readings::default()
            }
            Err(e) => {
                warn!("{}", e);
                *last = S::Readings::default();
                S::Readings::default()
            }
        }
    }

    /// The most recent reading, or the default when nothing is fitted.
    pub fn latest(&self) -> S::Readings {
        match self {
            Self::Present { last, .. } => *last,
            Self::Absent => S::Readings::default(),
        }
    }

    pub fn header(&self) -> String {
        let mut out = String::new();
        S::Readings::write_header(&mut out);
        out
    }

    pub fn log(&self) -> String {
        let mut out = String::new();
        self.latest().write_log(&mut out);
        out
    }
}

/// Placeholder for a role no hardware variant fills.
///
/// It cannot be constructed, so a slot of this type is always
/// [`SensorSlot::Absent`].
pub struct NotFitted<R> {
    never: Infallible,
    _readings: PhantomData<R>,
}

impl<R: SensorReadings> Sensor for NotFitted<R> {
    type Readings = R;

    fn name(&self) -> &'static str {
        match self.never {}
    }

    async fn read(&mut self) -> Result<R, SensorError> {
        match self.never {}
    }
}

/// Poll `is_ready` until it reports a finished conversion.
///
/// Bounded so a wedged device can't hang the acquisition loop.
pub async fn wait_for_data_ready<F, Fut>(
    sensor: &'static str,
    attempts: u32,
    interval: Duration,
    mut is_ready: F,
) -> Result<(), SensorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, SensorError>>,
{
    for attempt in 0..attempts {
        if is_ready().await? {
            return Ok(());
        }
        if attempt + 1 < attempts {
            Timer::after(interval).await;
        }
    }

    Err(SensorError::Timeout {
        sensor,
        operation: "wait for data ready",
    })
}

/// The concrete sensor type for every role on one hardware variant.
///
/// Use [`NotFitted`] for roles the variant never carries.
pub trait SensorKit {
    type SurfaceThermometer: Sensor<Readings = SurfaceTemperature>;
    type AirThermometer: Sensor<Readings = AirTemperature>;
    type WeatherSensor: Sensor<Readings = Weather>;
    type Rangefinder: Sensor<Readings = Range>;
    type VisibleSpectrometer: Sensor<Readings = VisibleSpectrum>;
    type NirSpectrometer: Sensor<Readings = NearInfraredSpectrum>;
    type Gps: Sensor<Readings = GpsFix>;
    type AirQualitySensor: Sensor<Readings = AirQuality>;
    type BatteryMonitor: Sensor<Readings = BatteryVoltage>;
}

/// Every sensor slot on the instrument, probed once at boot.
pub struct Sensors<K: SensorKit> {
    pub air: SensorSlot<K::AirThermometer>,
    pub surface: SensorSlot<K::SurfaceThermometer>,
    pub weather: SensorSlot<K::WeatherSensor>,
    pub range: SensorSlot<K::Rangefinder>,
    pub visible: SensorSlot<K::VisibleSpectrometer>,
    pub nir: SensorSlot<K::NirSpectrometer>,
    pub gps: SensorSlot<K::Gps>,
    pub air_quality: SensorSlot<K::AirQualitySensor>,
    pub battery: SensorSlot<K::BatteryMonitor>,
}

impl<K: SensorKit> Sensors<K> {
    /// All slots empty.
    pub fn none() -> Self {
        Self {
            air: SensorSlot::Absent,
            surface: SensorSlot::Absent,
            weather: SensorSlot::Absent,
            range: SensorSlot::Absent,
            visible: SensorSlot::Absent,
            nir: SensorSlot::Absent,
            gps: SensorSlot::Absent,
            air_quality: SensorSlot::Absent,
            battery: SensorSlot::Absent,
        }
    }

    /// Read every slot in a fixed order, yielding between sensors so input
    /// handling stays responsive.
    pub async fn read_all(&mut self, timestamp: Timestamp) -> Reading {
        let air = self.air.read().await;
        yield_now().await;
        let surface = self.surface.read().await;
        yield_now().await;
        let weather = self.weather.read().await;
        yield_now().await;
        let range = self.range.read().await;
        yield_now().await;
        let visible = self.visible.read().await;
        yield_now().await;
        let nir = self.nir.read().await;
        yield_now().await;
        let gps = read_optional(&mut self.gps).await;
        yield_now().await;
        let air_quality = read_optional(&mut self.air_quality).await;
        yield_now().await;
        let battery = self.battery.read().await;

        Reading {
            timestamp,
            surface,
            air,
            weather,
            range,
            visible,
            nir,
            gps,
            air_quality,
            battery,
        }
    }

    /// Read only the two spectrometers.
    pub async fn read_spectra(&mut self) -> (VisibleSpectrum, NearInfraredSpectrum) {
        let visible = self.visible.read().await;
        yield_now().await;
        let nir = self.nir.read().await;
        (visible, nir)
    }
}

/// Add-on sensors contribute columns only while fitted.
async fn read_optional<S: Sensor>(slot: &mut SensorSlot<S>) -> Option<S::Readings> {
    if !slot.is_present() {
        return None;
    }
    let readings = slot.read().await;
    slot.is_present().then_some(readings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, TestKit, full_kit};
    use core::cell::Cell;
    use embassy_futures::block_on;

    #[test]
    fn test_absent_slot_returns_default() {
        let mut slot: SensorSlot<Scripted<AirTemperature>> = SensorSlot::Absent;
        assert_eq!(block_on(slot.read()).celsius, -273.0);
        assert_eq!(slot.log(), "-273, 0.3");
        assert_eq!(slot.header(), "air_temperature_C, air_temperature_uncertainty_C");
    }

    #[test]
    fn test_failed_read_returns_default_and_keeps_slot() {
        let sensor = Scripted::new("MLX90614", SurfaceTemperature { celsius: 20.0 }).then_fail(
            SensorError::ReadFailed {
                sensor: "MLX90614",
                operation: "read object temperature",
                details: "nack",
            },
        );
        let mut slot = SensorSlot::present(sensor);

        assert_eq!(block_on(slot.read()).celsius, -273.0);
        assert!(slot.is_present());
        assert_eq!(block_on(slot.read()).celsius, 20.0);
        assert_eq!(slot.latest().celsius, 20.0);
    }

    #[test]
    fn test_disconnect_demotes_slot() {
        let sensor = Scripted::new("PA1010D", GpsFix::default())
            .then_fail(SensorError::Disconnected { sensor: "PA1010D" });
        let mut slot = SensorSlot::present(sensor);

        assert_eq!(block_on(read_optional(&mut slot)), None);
        assert!(!slot.is_present());
    }

    #[test]
    fn test_read_all_marks_missing_add_ons() {
        let mut sensors: Sensors<TestKit> = full_kit();
        sensors.gps = SensorSlot::Absent;

        let reading = block_on(sensors.read_all(Timestamp::UNSET));
        assert!(reading.gps.is_none());
        assert!(reading.air_quality.is_some());
        assert_eq!(reading.visible.channels, [450, 500, 550, 570, 600, 650]);
    }

    #[test]
    fn test_wait_for_data_ready_succeeds() {
        let polls = Cell::new(0);
        let result = block_on(wait_for_data_ready("AS7262", 5, Duration::from_ticks(0), || {
            polls.set(polls.get() + 1);
            let ready = polls.get() >= 3;
            async move { Ok(ready) }
        }));
        assert_eq!(result, Ok(()));
        assert_eq!(polls.get(), 3);
    }

    #[test]
    fn test_wait_for_data_ready_times_out() {
        let polls = Cell::new(0);
        let result = block_on(wait_for_data_ready("AS7263", 4, Duration::from_ticks(0), || {
            polls.set(polls.get() + 1);
            async { Ok(false) }
        }));
        assert_eq!(
            result,
            Err(SensorError::Timeout {
                sensor: "AS7263",
                operation: "wait for data ready"
            })
        );
        assert_eq!(polls.get(), 4);
    }
}
