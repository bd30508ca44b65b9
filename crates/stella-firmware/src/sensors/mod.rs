//! Sensor drivers fitted to the ESP32-S3 board, and the kit that names them.

use core::marker::PhantomData;

use embedded_hal_async::i2c::I2c;
use log::{info, warn};
#[cfg(not(feature = "sensor-sht40"))]
use stella_core::sensors::AirTemperature;
use stella_core::sensors::{
    AirQuality, BatteryVoltage, GpsFix, NearInfraredSpectrum, NotFitted, Range, Sensor,
    SensorError, SensorKit, SurfaceTemperature, VisibleSpectrum, Weather,
};

#[cfg(feature = "sensor-sht40")]
mod sht40;

#[cfg(feature = "sensor-sht40")]
pub use sht40::Sht40Sensor;

const AXP2101_ADDRESS: u8 = 0x34;
const AXP2101_ADC_ENABLE: u8 = 0x30;
const AXP2101_VBAT_HIGH: u8 = 0x34;
const VBAT_ADC_ENABLE: u8 = 0x01;

/// Main battery voltage from the AXP2101 fuel ADC.
pub struct Axp2101Battery<I> {
    i2c: I,
}

impl<I: I2c> Axp2101Battery<I> {
    /// Switch on the battery voltage channel and take ownership of the handle.
    pub async fn enable(mut i2c: I) -> Option<Self> {
        let mut control = [0u8; 1];
        let result = match i2c
            .write_read(AXP2101_ADDRESS, &[AXP2101_ADC_ENABLE], &mut control)
            .await
        {
            Ok(()) => {
                i2c.write(AXP2101_ADDRESS, &[AXP2101_ADC_ENABLE, control[0] | VBAT_ADC_ENABLE])
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("Battery monitor ready");
                Some(Self { i2c })
            }
            Err(e) => {
                warn!("Battery ADC unavailable: {:?}", e);
                None
            }
        }
    }
}

impl<I: I2c> Sensor for Axp2101Battery<I> {
    type Readings = BatteryVoltage;

    fn name(&self) -> &'static str {
        "AXP2101"
    }

    async fn read(&mut self) -> Result<BatteryVoltage, SensorError> {
        let mut raw = [0u8; 2];
        self.i2c
            .write_read(AXP2101_ADDRESS, &[AXP2101_VBAT_HIGH], &mut raw)
            .await
            .map_err(|e| {
                log::error!("AXP2101 battery read failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "AXP2101",
                    operation: "read battery voltage",
                    details: "I2C communication error or PMIC not responding",
                }
            })?;

        // 14-bit millivolts, high byte first
        let millivolts = (u16::from(raw[0] & 0x3F) << 8) | u16::from(raw[1]);
        Ok(BatteryVoltage {
            volts: f32::from(millivolts) / 1000.0,
        })
    }
}

/// The sensors this board carries: `S` is the sensor bus, `P` the handle on
/// the power management bus. Roles without a driver read as absent and record
/// their defaults.
pub struct BoardKit<S, P>(PhantomData<(S, P)>);

impl<S: I2c, P: I2c> SensorKit for BoardKit<S, P> {
    type SurfaceThermometer = NotFitted<SurfaceTemperature>;
    #[cfg(feature = "sensor-sht40")]
    type AirThermometer = Sht40Sensor<S>;
    #[cfg(not(feature = "sensor-sht40"))]
    type AirThermometer = NotFitted<AirTemperature>;
    type WeatherSensor = NotFitted<Weather>;
    type Rangefinder = NotFitted<Range>;
    type VisibleSpectrometer = NotFitted<VisibleSpectrum>;
    type NirSpectrometer = NotFitted<NearInfraredSpectrum>;
    type Gps = NotFitted<GpsFix>;
    type AirQualitySensor = NotFitted<AirQuality>;
    type BatteryMonitor = Axp2101Battery<P>;
}
