//! The acquisition loop.
//!
//! Each cycle reads every sensor in a fixed order, mirrors the reading to the
//! log, records it when recording, runs an averaging pass when one was
//! triggered, and then waits out the rest of the sample interval while
//! listening for input. Nothing in here is allowed to end the loop except an
//! explicit [`InputEvent::Stop`]: sensor, clock and storage problems all
//! degrade to defaults and flags.

use embassy_futures::select::{Either, select};
use embassy_time::{Instant, Timer};
use log::{debug, error, info, warn};

use crate::app_state::{
    DataMode, DisplayPublisher, DisplayUpdate, EventEffect, InputEvent, InputReceiver,
    InstrumentMode, InstrumentState, StatusFrame,
};
use crate::clock::{ClockSource, Datestamp, Timestamp};
use crate::config::{Config, Identity};
use crate::record::Reading;
use crate::sampling::{Sampler, SamplingOutcome, SamplingPlan};
use crate::sensors::{SensorKit, Sensors};
use crate::storage::{BatchTracker, FileSession, Storage};

/// Log target for the per-cycle diagnostic mirror.
pub const MIRROR_TARGET: &str = "stella::mirror";

/// Below this the main battery needs charging.
pub const LOW_BATTERY_VOLTS: f32 = 3.1;

pub struct Instrument<'a, K: SensorKit, S: Storage, C: ClockSource> {
    identity: Identity,
    config: Config,
    sensors: Sensors<K>,
    storage: S,
    clock: C,
    state: InstrumentState,
    batches: BatchTracker,
    session: FileSession,
    inputs: InputReceiver<'a>,
    /// `None` in drone mode.
    display: Option<DisplayPublisher<'a>>,
    current_day: Option<Datestamp>,
}

impl<'a, K: SensorKit, S: Storage, C: ClockSource> Instrument<'a, K, S, C> {
    /// Load the configuration and open the boot batch.
    pub fn boot(
        identity: Identity,
        sensors: Sensors<K>,
        mut storage: S,
        clock: C,
        inputs: InputReceiver<'a>,
        display: Option<DisplayPublisher<'a>>,
    ) -> Self {
        let config = Config::load_or_create(&mut storage);
        let now = clock.now();

        if !clock.battery_ok() {
            warn!("Clock battery low");
        }
        if display.is_none() {
            info!("No display attached, running in drone mode");
        }

        let mut instrument = Self {
            identity,
            config,
            sensors,
            storage,
            clock,
            state: InstrumentState::new(config.record_on_startup),
            batches: BatchTracker::new(),
            session: FileSession::new(),
            inputs,
            display,
            current_day: now.is_set().then(|| now.datestamp()),
        };
        instrument.new_batch(&now);

        info!(
            "{} {} UID {} ready, {:?}",
            identity.device_type, identity.software_version, identity.uid, instrument.state.data_mode
        );
        instrument
    }

    pub fn state(&self) -> &InstrumentState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Cycle until a [`InputEvent::Stop`] arrives.
    pub async fn run(&mut self) {
        while !self.state.stop_requested {
            self.cycle().await;
        }
        info!("Acquisition stopped");
    }

    /// One pass of the loop, including the wait for the next one.
    pub async fn cycle(&mut self) -> Reading {
        let started = Instant::now();
        self.drain_inputs();

        let timestamp = self.clock.now();
        self.check_day_rollover(&timestamp);

        let reading = self.sensors.read_all(timestamp).await;
        info!(target: MIRROR_TARGET, "{}", reading.mirror_line(&self.identity, self.state.batch));

        if self.state.batch_due() {
            self.new_batch(&timestamp);
        }
        if self.state.data_mode == DataMode::Recording {
            self.record(&reading);
        }
        self.publish_status(&reading);

        if self.state.instrument_mode == InstrumentMode::Average
            && self.state.data_mode == DataMode::Recording
        {
            self.sample_and_average(&reading).await;
        }
        self.state.finish_cycle();

        if !self.state.stop_requested {
            self.wait_until(started + self.config.sample_interval()).await;
        }
        reading
    }

    fn drain_inputs(&mut self) {
        while let Ok(event) = self.inputs.try_receive() {
            self.handle_input(event);
        }
    }

    /// Returns whether the event should cut the current wait short.
    fn handle_input(&mut self, event: InputEvent) -> bool {
        debug!("Input {:?}", event);
        match self.state.apply(event) {
            EventEffect::Interrupt => true,
            EventEffect::NewBatch => {
                let now = self.clock.now();
                self.new_batch(&now);
                false
            }
        }
    }

    async fn wait_until(&mut self, deadline: Instant) {
        loop {
            let next = select(Timer::at(deadline), self.inputs.receive()).await;
            match next {
                Either::First(()) => return,
                Either::Second(event) => {
                    if self.handle_input(event) {
                        return;
                    }
                }
            }
        }
    }

    fn new_batch(&mut self, now: &Timestamp) {
        self.state.batch = self.batches.next_batch(&mut self.storage, &now.datestamp());
    }

    fn check_day_rollover(&mut self, now: &Timestamp) {
        if !now.is_set() {
            return;
        }
        let today = now.datestamp();
        let rolled_over = matches!(&self.current_day, Some(day) if *day != today);
        self.current_day = Some(today);

        if rolled_over {
            info!("Calendar day changed");
            self.new_batch(now);
        }
    }

    fn record(&mut self, reading: &Reading) {
        let batch = self.state.batch;
        let header = reading.header();

        let written = self
            .session
            .resolve(&mut self.storage, &self.identity, &reading.timestamp, batch, &header)
            .and_then(|file| {
                self.storage
                    .append(&file, &reading.to_row(&self.identity, batch))
                    .map(|()| file)
            });

        match written {
            Ok(file) => debug!("Recorded to {}", file),
            Err(e) => {
                error!("Record not saved: {}", e);
                self.mark_storage_degraded();
            }
        }
    }

    fn mark_storage_degraded(&mut self) {
        if !self.state.storage_degraded {
            warn!("Storage degraded; will keep retrying every cycle");
        }
        self.state.storage_degraded = true;
    }

    fn publish_status(&mut self, reading: &Reading) {
        let low_battery =
            self.sensors.battery.is_present() && reading.battery.volts < LOW_BATTERY_VOLTS;
        if low_battery && !self.state.low_battery {
            warn!("Battery low: {:.2} V", reading.battery.volts);
        }
        self.state.low_battery = low_battery;

        if let Some(display) = &self.display {
            display.publish_immediate(DisplayUpdate::Status(StatusFrame {
                reading: *reading,
                batch: self.state.batch,
                instrument_mode: self.state.instrument_mode,
                data_mode: self.state.data_mode,
                low_battery,
                clock_battery_ok: self.clock.battery_ok(),
                storage_degraded: self.state.storage_degraded,
            }));
        }
    }

    async fn sample_and_average(&mut self, reading: &Reading) -> SamplingOutcome {
        // Picks up averaging edits made in the field since the last run. The
        // loop interval stays as booted.
        if let Some(edited) = Config::reload(&mut self.storage) {
            self.config.averaging_sample_count = edited.averaging_sample_count;
            self.config.averaging_countdown = edited.averaging_countdown;
            self.config.countdown_step_s = edited.countdown_step_s;
        }

        let display = self.display.as_ref();
        let outcome = Sampler {
            sensors: &mut self.sensors,
            storage: &mut self.storage,
            clock: &self.clock,
            identity: &self.identity,
            batch: self.state.batch,
        }
        .run(SamplingPlan::from(&self.config), reading, |progress| {
            if let Some(display) = display {
                display.publish_immediate(DisplayUpdate::Sampling(progress));
            }
        })
        .await;

        if !outcome.samples_written {
            self.mark_storage_degraded();
        }
        if !outcome.deviation_written {
            warn!("Standard deviation missing from {}", outcome.filename);
        }
        outcome
    }
}
