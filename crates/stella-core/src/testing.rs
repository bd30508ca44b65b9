//! Scripted sensors and a hand-set clock for unit tests.

use alloc::collections::VecDeque;
use core::cell::Cell;

use crate::clock::{ClockSource, Timestamp};
use crate::sensors::*;

/// Replays queued results, then keeps returning `fallback`.
pub struct Scripted<R> {
    name: &'static str,
    script: VecDeque<Result<R, SensorError>>,
    fallback: R,
}

impl<R: SensorReadings> Scripted<R> {
    pub fn new(name: &'static str, fallback: R) -> Self {
        Self {
            name,
            script: VecDeque::new(),
            fallback,
        }
    }

    pub fn then(mut self, readings: R) -> Self {
        self.script.push_back(Ok(readings));
        self
    }

    pub fn then_fail(mut self, error: SensorError) -> Self {
        self.script.push_back(Err(error));
        self
    }

    pub fn push(&mut self, result: Result<R, SensorError>) {
        self.script.push_back(result);
    }
}

impl<R: SensorReadings> Sensor for Scripted<R> {
    type Readings = R;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn read(&mut self) -> Result<R, SensorError> {
        self.script.pop_front().unwrap_or(Ok(self.fallback))
    }
}

pub struct TestKit;

impl SensorKit for TestKit {
    type SurfaceThermometer = Scripted<SurfaceTemperature>;
    type AirThermometer = Scripted<AirTemperature>;
    type WeatherSensor = Scripted<Weather>;
    type Rangefinder = Scripted<Range>;
    type VisibleSpectrometer = Scripted<VisibleSpectrum>;
    type NirSpectrometer = Scripted<NearInfraredSpectrum>;
    type Gps = Scripted<GpsFix>;
    type AirQualitySensor = Scripted<AirQuality>;
    type BatteryMonitor = Scripted<BatteryVoltage>;
}

/// Every slot fitted with a sensor that reads the same values forever.
pub fn full_kit() -> Sensors<TestKit> {
    Sensors {
        air: SensorSlot::present(Scripted::new("SHT40", AirTemperature { celsius: 19.5 })),
        surface: SensorSlot::present(Scripted::new(
            "MLX90614",
            SurfaceTemperature { celsius: 21.5 },
        )),
        weather: SensorSlot::present(Scripted::new(
            "BME280",
            Weather {
                relative_humidity_percent: 40.0,
                pressure_hpa: 1013.0,
                altitude_m: 12.0,
            },
        )),
        range: SensorSlot::present(Scripted::new("VL53L4CD", Range { meters: 2.5 })),
        visible: SensorSlot::present(Scripted::new(
            "AS7262",
            VisibleSpectrum {
                channels: [450, 500, 550, 570, 600, 650],
            },
        )),
        nir: SensorSlot::present(Scripted::new(
            "AS7263",
            NearInfraredSpectrum {
                channels: [610, 680, 730, 760, 810, 860],
            },
        )),
        gps: SensorSlot::present(Scripted::new(
            "PA1010D",
            GpsFix {
                has_fix: true,
                latitude_deg: 43.07,
                longitude_deg: -89.4,
                altitude_m: 270.0,
            },
        )),
        air_quality: SensorSlot::present(Scripted::new("SCD41", AirQuality { co2_ppm: 415.0 })),
        battery: SensorSlot::present(Scripted::new("battery", BatteryVoltage { volts: 3.9 })),
    }
}

/// A clock the test moves by hand.
pub struct ManualClock {
    now: Cell<Timestamp>,
    battery_ok: bool,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Cell::new(now),
            battery_ok: true,
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.set(now);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }

    fn battery_ok(&self) -> bool {
        self.battery_ok
    }
}
