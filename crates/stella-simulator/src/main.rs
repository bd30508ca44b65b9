//! Desktop simulator for the STELLA acquisition loop.
//!
//! Runs the same [`Instrument`] the firmware runs, against synthetic sensors,
//! the host clock and a directory standing in for the SD card. Display
//! updates are printed to the log.
//!
//! # Console commands
//!
//! | Input | Action                          |
//! |-------|---------------------------------|
//! | 1     | Continuous mode                 |
//! | 2     | Single-record mode              |
//! | 3     | Averaging mode                  |
//! | p     | Button press                    |
//! | b     | Start a new batch               |
//! | u     | Unplug the GPS                  |
//! | q     | Stop after the current cycle    |
//!
//! Usage: `stella-simulator [DATA_DIR]` (defaults to `./stella-data`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use embassy_executor::Spawner;
use embassy_futures::select::select;
use embassy_time::{Duration, Instant};
use log::{error, info, warn};

use stella_core::app_state::{
    DISPLAY_UPDATES, DataMode, DisplaySubscriber, DisplayUpdate, INPUT_EVENTS, InputEvent,
    InstrumentMode, SamplingProgress,
};
use stella_core::clock::{ClockError, HardwareClock};
use stella_core::sensors::{
    AirQuality, AirTemperature, BatteryVoltage, DATA_READY_ATTEMPTS, DATA_READY_INTERVAL, GpsFix,
    NearInfraredSpectrum, Range, Sensor, SensorError, SensorKit, SensorReadings, SensorSlot,
    Sensors, SurfaceTemperature, VisibleSpectrum, Weather, wait_for_data_ready,
};
use stella_core::storage::{Storage, StorageError};
use stella_core::{Identity, Instrument, SystemClock, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_DATA_DIR: &str = "./stella-data";

/// Stands in for the ESP32 base MAC the firmware derives its UID from.
const SIMULATED_CHIP_ID: [u8; 6] = [0x24, 0x6f, 0x28, 0x1a, 0x2b, 0x3c];

/// How long a synthetic spectrometer takes to integrate.
const SPECTROMETER_CONVERSION: Duration = Duration::from_millis(60);

/// Cleared by the `u` console command.
static GPS_PLUGGED: AtomicBool = AtomicBool::new(true);

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// A host directory standing in for the SD card root.
struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    fn open(root: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Storage for DirStorage {
    fn exists(&mut self, name: &str) -> Result<bool, StorageError> {
        self.path(name)
            .try_exists()
            .map_err(|e| StorageError::io("stat", name, e))
    }

    fn read_prefix(&mut self, name: &str, limit: usize) -> Result<Option<String>, StorageError> {
        let file = match File::open(self.path(name)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io("open", name, e)),
        };

        let mut bytes = Vec::new();
        file.take(limit as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| StorageError::io("read", name, e))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn write(&mut self, name: &str, contents: &str) -> Result<(), StorageError> {
        fs::write(self.path(name), contents).map_err(|e| StorageError::io("write", name, e))
    }

    fn append(&mut self, name: &str, contents: &str) -> Result<(), StorageError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))
            .and_then(|mut file| file.write_all(contents.as_bytes()))
            .map_err(|e| StorageError::io("append", name, e))
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// The host's UTC time, playing the part of the battery-backed RTC.
struct HostRtc;

impl HardwareClock for HostRtc {
    async fn datetime(&mut self) -> Result<Timestamp, ClockError> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| ClockError::InvalidTime)?;
        Ok(Timestamp::from_unix(since_epoch.as_secs() as i64))
    }

    async fn battery_low(&mut self) -> Result<bool, ClockError> {
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Synthetic sensors
// ---------------------------------------------------------------------------

/// Produces readings from a function of seconds since boot.
struct Synthetic<R> {
    name: &'static str,
    generate: fn(f64) -> R,
}

impl<R> Synthetic<R> {
    const fn new(name: &'static str, generate: fn(f64) -> R) -> Self {
        Self { name, generate }
    }
}

fn uptime_secs() -> f64 {
    Instant::now().as_millis() as f64 / 1000.0
}

impl<R: SensorReadings> Sensor for Synthetic<R> {
    type Readings = R;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn read(&mut self) -> Result<R, SensorError> {
        Ok((self.generate)(uptime_secs()))
    }
}

/// A spectrometer that has to be polled for its conversion like the real one.
struct Spectrometer<R> {
    inner: Synthetic<R>,
}

impl<R: SensorReadings> Sensor for Spectrometer<R> {
    type Readings = R;

    fn name(&self) -> &'static str {
        self.inner.name
    }

    async fn read(&mut self) -> Result<R, SensorError> {
        let ready_at = Instant::now() + SPECTROMETER_CONVERSION;
        wait_for_data_ready(self.inner.name, DATA_READY_ATTEMPTS, DATA_READY_INTERVAL, || async move {
            Ok(Instant::now() >= ready_at)
        })
        .await?;
        self.inner.read().await
    }
}

struct Gps;

impl Sensor for Gps {
    type Readings = GpsFix;

    fn name(&self) -> &'static str {
        "PA1010D"
    }

    async fn read(&mut self) -> Result<GpsFix, SensorError> {
        if !GPS_PLUGGED.load(Ordering::Relaxed) {
            return Err(SensorError::Disconnected { sensor: "PA1010D" });
        }
        let t = uptime_secs();
        Ok(GpsFix {
            has_fix: t > 5.0,
            latitude_deg: 43.0731 + 0.0001 * (t / 60.0).sin(),
            longitude_deg: -89.4012 + 0.0001 * (t / 60.0).cos(),
            altitude_m: 266.0,
        })
    }
}

struct SimulatorKit;

impl SensorKit for SimulatorKit {
    type SurfaceThermometer = Synthetic<SurfaceTemperature>;
    type AirThermometer = Synthetic<AirTemperature>;
    type WeatherSensor = Synthetic<Weather>;
    type Rangefinder = Synthetic<Range>;
    type VisibleSpectrometer = Spectrometer<VisibleSpectrum>;
    type NirSpectrometer = Spectrometer<NearInfraredSpectrum>;
    type Gps = Gps;
    type AirQualitySensor = Synthetic<AirQuality>;
    type BatteryMonitor = Synthetic<BatteryVoltage>;
}

/// Daylight-ish irradiance: a slow swell with some cloud flicker per band.
fn irradiance(t: f64, band: usize) -> f32 {
    let swell = 1.0 + 0.3 * (t / 90.0).sin();
    let flicker = 0.05 * (t * 1.7 + band as f64).sin();
    (400.0 * swell * (1.0 + flicker) * (1.0 - 0.06 * band as f64)) as f32
}

fn sensors() -> Sensors<SimulatorKit> {
    Sensors {
        air: SensorSlot::present(Synthetic::new("SHT40", |t| AirTemperature {
            celsius: (21.0 + 2.0 * (t / 120.0).sin()) as f32,
        })),
        surface: SensorSlot::present(Synthetic::new("MLX90614", |t| SurfaceTemperature {
            celsius: (24.0 + 4.0 * (t / 150.0).sin() + 0.5 * (t / 17.0).cos()) as f32,
        })),
        weather: SensorSlot::present(Synthetic::new("BME280", |t| Weather {
            relative_humidity_percent: (50.0 + 10.0 * (t / 180.0).sin()) as f32,
            pressure_hpa: (1013.0 + 2.0 * (t / 600.0).cos()) as f32,
            altitude_m: (110.0 - 16.0 * (t / 600.0).cos()) as f32,
        })),
        range: SensorSlot::present(Synthetic::new("VL53L4CD", |t| Range {
            meters: (1.5 + 0.2 * (t / 11.0).sin()) as f32,
        })),
        visible: SensorSlot::present(Spectrometer {
            inner: Synthetic::new("AS7262", |t| {
                VisibleSpectrum::from_calibrated(core::array::from_fn(|band| irradiance(t, band)))
            }),
        }),
        nir: SensorSlot::present(Spectrometer {
            inner: Synthetic::new("AS7263", |t| {
                NearInfraredSpectrum::from_calibrated(core::array::from_fn(|band| {
                    irradiance(t, band + 6)
                }))
            }),
        }),
        gps: SensorSlot::present(Gps),
        air_quality: SensorSlot::present(Synthetic::new("SCD41", |t| AirQuality {
            co2_ppm: (600.0 + 200.0 * (t / 300.0).sin()) as f32,
        })),
        // Drains slowly so the low-battery warning shows up in a long session
        battery: SensorSlot::present(Synthetic::new("battery", |t| BatteryVoltage {
            volts: (4.1 - t / 3600.0).max(3.0) as f32,
        })),
    }
}

// ---------------------------------------------------------------------------
// Console input and status output
// ---------------------------------------------------------------------------

fn console_event(command: &str) -> Option<InputEvent> {
    match command {
        "1" => Some(InputEvent::ModeChanged(InstrumentMode::Continuous)),
        "2" => Some(InputEvent::ModeChanged(InstrumentMode::Single)),
        "3" => Some(InputEvent::ModeChanged(InstrumentMode::Average)),
        "p" => Some(InputEvent::ButtonPressed),
        "b" => Some(InputEvent::BatchIncrementRequested),
        "q" => Some(InputEvent::Stop),
        _ => None,
    }
}

/// Forward console commands to the instrument from a plain thread, the way
/// an interrupt-driven button task would.
fn spawn_console() {
    std::thread::spawn(|| {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = line.trim();

            if command == "u" {
                GPS_PLUGGED.store(false, Ordering::Relaxed);
                info!("GPS unplugged");
                continue;
            }
            match console_event(command) {
                Some(event) => {
                    if INPUT_EVENTS.try_send(event).is_err() {
                        warn!("Input queue full, dropped {:?}", event);
                    }
                }
                None if command.is_empty() => {}
                None => warn!("Unknown command {:?}", command),
            }
        }
    });
}

async fn show_status(mut updates: DisplaySubscriber<'static>) {
    loop {
        match updates.next_message_pure().await {
            DisplayUpdate::Status(frame) => {
                let recording = match frame.data_mode {
                    DataMode::Recording => "REC",
                    DataMode::Paused => "paused",
                };
                info!(
                    target: "stella::display",
                    "{:?} {} batch {} | air {:.1} C surface {:.1} C | {} V{}{}{}",
                    frame.instrument_mode,
                    recording,
                    frame.batch,
                    frame.reading.air.celsius,
                    frame.reading.surface.celsius,
                    frame.reading.battery.volts,
                    if frame.low_battery { " LOW BATTERY" } else { "" },
                    if frame.clock_battery_ok { "" } else { " CLOCK BATTERY" },
                    if frame.storage_degraded { " STORAGE" } else { "" },
                );
            }
            DisplayUpdate::Sampling(progress) => match progress {
                SamplingProgress::Wait(steps) => info!(target: "stella::display", "Wait {}", steps),
                SamplingProgress::Sample(n) => info!(target: "stella::display", "Sample {}", n),
                SamplingProgress::ComputingDeviation => {
                    info!(target: "stella::display", "Computing standard deviation")
                }
                SamplingProgress::Finished { deviation_written } => info!(
                    target: "stella::display",
                    "Averaging finished{}",
                    if deviation_written { "" } else { " (deviation not saved)" }
                ),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    info!("Starting STELLA simulator, data in {}", data_dir.display());
    info!("Commands: 1=continuous 2=single 3=average p=button b=batch u=unplug GPS q=quit");

    let storage = match DirStorage::open(data_dir) {
        Ok(storage) => storage,
        Err(e) => {
            error!("Could not open data directory: {}", e);
            return;
        }
    };

    let clock = SystemClock::synchronize(&mut HostRtc).await;

    let (subscriber, publisher) = match (DISPLAY_UPDATES.subscriber(), DISPLAY_UPDATES.publisher()) {
        (Ok(subscriber), Ok(publisher)) => (subscriber, publisher),
        _ => {
            error!("Display channel unavailable");
            return;
        }
    };

    spawn_console();

    let mut instrument = Instrument::boot(
        Identity::from_chip_id(&SIMULATED_CHIP_ID),
        sensors(),
        storage,
        clock,
        INPUT_EVENTS.receiver(),
        Some(publisher),
    );

    select(instrument.run(), show_status(subscriber)).await;
    info!("Simulator exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stella-sim-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_dir_storage_round_trip() {
        let dir = scratch_dir("storage");
        let mut storage = DirStorage::open(dir.clone()).unwrap();

        assert_eq!(storage.exists("a.csv"), Ok(false));
        assert_eq!(storage.read_prefix("a.csv", 16), Ok(None));

        storage.append("a.csv", "h1, h2\n").unwrap();
        storage.append("a.csv", "1, 2\n").unwrap();
        assert_eq!(storage.exists("a.csv"), Ok(true));
        assert_eq!(storage.read_first_line("a.csv"), Ok(Some("h1, h2".to_string())));
        assert_eq!(storage.read_prefix("a.csv", 3), Ok(Some("h1,".to_string())));

        storage.write("a.csv", "x\n").unwrap();
        assert_eq!(fs::read_to_string(dir.join("a.csv")).unwrap(), "x\n");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_console_commands() {
        assert_eq!(
            console_event("3"),
            Some(InputEvent::ModeChanged(InstrumentMode::Average))
        );
        assert_eq!(console_event("p"), Some(InputEvent::ButtonPressed));
        assert_eq!(console_event("x"), None);
    }

    #[test]
    fn test_irradiance_stays_in_range() {
        for t in [0.0, 45.0, 1000.0] {
            let spectrum = VisibleSpectrum::from_calibrated(core::array::from_fn(|b| irradiance(t, b)));
            assert!(spectrum.channels.iter().all(|c| (0..=99_999).contains(c)));
        }
    }
}
