use embedded_hal_async::i2c::I2c;
use sht4x::Sht4xAsync;
use stella_core::sensors::{AirTemperature, Sensor, SensorError};

pub struct Sht40Sensor<I> {
    sensor: Sht4xAsync<I, embassy_time::Delay>,
}

impl<I: I2c> Sht40Sensor<I> {
    /// Returns `None` when nothing answers at the SHT40 address.
    pub async fn probe(i2c: I) -> Option<Self> {
        let mut sensor = Sht4xAsync::<I, embassy_time::Delay>::new(i2c);
        match sensor.serial_number(&mut embassy_time::Delay).await {
            Ok(serial) => {
                log::info!("SHT40 found, serial {:08x}", serial);
                Some(Self { sensor })
            }
            Err(e) => {
                log::warn!("SHT40 not fitted: {:?}", e);
                None
            }
        }
    }
}

impl<I: I2c> Sensor for Sht40Sensor<I> {
    type Readings = AirTemperature;

    fn name(&self) -> &'static str {
        "SHT40"
    }

    async fn read(&mut self) -> Result<AirTemperature, SensorError> {
        let measurement = self
            .sensor
            .measure(sht4x::Precision::High, &mut embassy_time::Delay)
            .await
            .map_err(|e| {
                log::error!("SHT40 measurement failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "SHT40",
                    operation: "measure temperature/humidity",
                    details: "I2C communication error or sensor not responding",
                }
            })?;

        // Humidity is discarded. The weather columns belong to a barometric
        // sensor and carry pressure and altitude alongside it, which the SHT40
        // cannot supply; this board records them at their defaults.
        Ok(AirTemperature {
            celsius: measurement.temperature_celsius().to_num::<f32>(),
        })
    }
}
