//! Hardware initialization for the STELLA board
//!
//! Brings up the buses and the power rails in the order the peripherals
//! need them: power management first, since the sensor and SD card rails
//! hang off its LDOs.

use axp2101_embedded::AsyncAxp2101;
use esp_hal::Async;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::time::Rate;
use log::{info, warn};
use static_cell::StaticCell;

use crate::async_i2c_bus::{AsyncI2cDevice, SharedI2cBus};

pub type BoardI2c = I2c<'static, Async>;
pub type BoardI2cDevice = AsyncI2cDevice<'static, BoardI2c>;

/// Handles on the internal bus once power is up.
pub struct InternalBus {
    pub rtc: BoardI2cDevice,
    pub battery: BoardI2cDevice,
}

/// Enable the power rails and hand out devices for the RTC and the battery
/// monitor.
///
/// A power management failure is logged and boot carries on: the rails keep
/// their reset defaults, which is enough to record with whatever answers.
pub async fn init_i2c_hardware(i2c0: BoardI2c) -> InternalBus {
    static I2C0_BUS: StaticCell<SharedI2cBus<BoardI2c>> = StaticCell::new();
    let i2c0_bus = I2C0_BUS.init(SharedI2cBus::new(i2c0));

    info!("Configuring power management");
    let mut power = AsyncAxp2101::new(AsyncI2cDevice::new(i2c0_bus));

    match power.init().await {
        Ok(_) => info!("Power management ready"),
        Err(e) => warn!("Power init failed: {:?}", e),
    }

    if let Err(e) = power
        .set_charging_led_mode(axp2101_embedded::ChargeLedMode::On)
        .await
    {
        warn!("Charge LED not configured: {:?}", e);
    }

    // Sensor header, SD card and RTC backup rails
    let rails = [
        power.enable_aldo1().await,
        power.enable_aldo2().await,
        power.enable_aldo3().await,
        power.enable_aldo4().await,
        power.enable_bldo1().await,
        power.enable_bldo2().await,
        power.enable_dldo1().await,
        power.set_aldo4_voltage(3300).await,
    ];
    if rails.iter().any(Result::is_err) {
        warn!("Some power rails could not be configured");
    }

    InternalBus {
        rtc: AsyncI2cDevice::new(i2c0_bus),
        battery: AsyncI2cDevice::new(i2c0_bus),
    }
}

/// The internal bus: power management and RTC.
pub fn create_i2c_bus(
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: esp_hal::peripherals::GPIO12<'static>,
    scl: esp_hal::peripherals::GPIO11<'static>,
) -> BoardI2c {
    I2c::new(i2c0, I2cConfig::default().with_frequency(Rate::from_khz(400)))
        .expect("I2C0 configuration is valid")
        .with_sda(sda)
        .with_scl(scl)
        .into_async()
}

/// The external sensor port. Runs at standard speed for long cable runs.
pub fn create_sensor_bus(
    i2c1: esp_hal::peripherals::I2C1<'static>,
    sda: esp_hal::peripherals::GPIO2<'static>,
    scl: esp_hal::peripherals::GPIO1<'static>,
) -> BoardI2c {
    I2c::new(i2c1, I2cConfig::default().with_frequency(Rate::from_khz(100)))
        .expect("I2C1 configuration is valid")
        .with_sda(sda)
        .with_scl(scl)
        .into_async()
}

/// Wrap an SPI device and delay into an SD card handle.
pub fn init_spi_hardware<S, D>(sd_card_spi: S, delay: D) -> embedded_sdmmc::SdCard<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    embedded_sdmmc::SdCard::new(sd_card_spi, delay)
}
