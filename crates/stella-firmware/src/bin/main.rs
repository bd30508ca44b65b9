#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_futures::select::select;
use embassy_time::{Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use log::{info, warn};
use rtt_target::rprintln;

use stella_core::app_state::{INPUT_EVENTS, InputEvent};
use stella_core::sensors::{SensorSlot, Sensors};
use stella_core::storage::SdCardStorage;
use stella_core::{Identity, Instrument, SystemClock};
use stella_firmware::hardware::{
    BoardI2c, BoardI2cDevice, create_i2c_bus, create_sensor_bus, init_i2c_hardware,
    init_spi_hardware,
};
use stella_firmware::rtc::Bm8563;
use stella_firmware::sensors::{Axp2101Battery, BoardKit};

/// Ignore contact bounce for this long after a press.
const BUTTON_DEBOUNCE: Duration = Duration::from_millis(50);

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

/// Forward record-button presses (active low) to the instrument.
async fn watch_button(mut button: Input<'static>) {
    loop {
        button.wait_for_falling_edge().await;
        if INPUT_EVENTS.try_send(InputEvent::ButtonPressed).is_err() {
            warn!("Input queue full, button press dropped");
        }
        Timer::after(BUTTON_DEBOUNCE).await;
        button.wait_for_high().await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    rprintln!("Embassy initialized!");

    // 1. Power rails and the internal bus
    let i2c0 = create_i2c_bus(peripherals.I2C0, peripherals.GPIO12, peripherals.GPIO11);
    let internal = init_i2c_hardware(i2c0).await;

    // 2. Wall clock from the RTC
    let mut rtc = Bm8563::new(internal.rtc);
    let clock = SystemClock::synchronize(&mut rtc).await;

    // 3. Sensors: probe what is plugged in
    let sensor_bus = create_sensor_bus(peripherals.I2C1, peripherals.GPIO2, peripherals.GPIO1);
    #[cfg(feature = "sensor-sht40")]
    let air = SensorSlot::from(stella_firmware::sensors::Sht40Sensor::probe(sensor_bus).await);
    #[cfg(not(feature = "sensor-sht40"))]
    let air = {
        let _ = sensor_bus;
        SensorSlot::Absent
    };

    let sensors: Sensors<BoardKit<BoardI2c, BoardI2cDevice>> = Sensors {
        air,
        battery: SensorSlot::from(Axp2101Battery::enable(internal.battery).await),
        ..Sensors::none()
    };

    // 4. SD card on SPI2
    let spi_bus = Spi::new(
        peripherals.SPI2,
        SpiConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("SPI2 configuration is valid")
    .with_sck(peripherals.GPIO36)
    .with_mosi(peripherals.GPIO37)
    .with_miso(peripherals.GPIO35);
    let sd_cs = Output::new(peripherals.GPIO4, Level::High, OutputConfig::default());
    let sd_spi = ExclusiveDevice::new(spi_bus, sd_cs, embassy_time::Delay)
        .expect("SD chip select is a plain GPIO");
    let storage = SdCardStorage::new(init_spi_hardware(sd_spi, embassy_time::Delay), clock);

    // 5. Controls
    let button = Input::new(
        peripherals.GPIO9,
        InputConfig::default().with_pull(Pull::Up),
    );

    let identity = Identity::from_chip_id(&esp_hal::efuse::Efuse::mac_address());
    info!("UID {}", identity.uid);

    // No display on this build: fly as a drone
    let mut instrument = Instrument::boot(
        identity,
        sensors,
        storage,
        clock,
        INPUT_EVENTS.receiver(),
        None,
    );

    let _ = spawner;
    select(instrument.run(), watch_button(button)).await;

    info!("Acquisition loop ended");
    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
