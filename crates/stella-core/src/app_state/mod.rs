//! Operating modes, user input and what the display is told.
//!
//! Input arrives on [`INPUT_EVENTS`] from whatever drives the controls (a
//! button task, a touch panel, a serial console). Status goes out on
//! [`DISPLAY_UPDATES`]; an instrument flown without a screen simply never
//! publishes.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver};
use embassy_sync::pubsub::{PubSubChannel, Publisher, Subscriber};
use log::info;

use crate::record::Reading;

pub const INPUT_QUEUE_DEPTH: usize = 8;
pub const DISPLAY_QUEUE_DEPTH: usize = 4;
pub const DISPLAY_SUBSCRIBERS: usize = 2;
pub const DISPLAY_PUBLISHERS: usize = 1;

pub type InputChannel = Channel<CriticalSectionRawMutex, InputEvent, INPUT_QUEUE_DEPTH>;
pub type InputReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, InputEvent, INPUT_QUEUE_DEPTH>;

pub type DisplayChannel = PubSubChannel<
    CriticalSectionRawMutex,
    DisplayUpdate,
    DISPLAY_QUEUE_DEPTH,
    DISPLAY_SUBSCRIBERS,
    DISPLAY_PUBLISHERS,
>;
pub type DisplayPublisher<'a> = Publisher<
    'a,
    CriticalSectionRawMutex,
    DisplayUpdate,
    DISPLAY_QUEUE_DEPTH,
    DISPLAY_SUBSCRIBERS,
    DISPLAY_PUBLISHERS,
>;
pub type DisplaySubscriber<'a> = Subscriber<
    'a,
    CriticalSectionRawMutex,
    DisplayUpdate,
    DISPLAY_QUEUE_DEPTH,
    DISPLAY_SUBSCRIBERS,
    DISPLAY_PUBLISHERS,
>;

/// User input from the controls.
pub static INPUT_EVENTS: InputChannel = Channel::new();

/// Status frames and averaging progress for the display.
pub static DISPLAY_UPDATES: DisplayChannel = PubSubChannel::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentMode {
    /// Record every cycle while recording is on.
    Continuous,
    /// One record per button press.
    Single,
    /// One averaged spectral run per button press.
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    Recording,
    Paused,
}

impl DataMode {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Recording => Self::Paused,
            Self::Paused => Self::Recording,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    ModeChanged(InstrumentMode),
    ButtonPressed,
    /// Start a new batch without changing modes.
    BatchIncrementRequested,
    /// Leave the acquisition loop after the current cycle.
    Stop,
}

/// What handling an event asks of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum EventEffect {
    /// Cut the inter-cycle wait short.
    Interrupt,
    NewBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingProgress {
    /// Countdown before sampling; steps remaining.
    Wait(u32),
    /// Taking sample n (counts down to 1).
    Sample(u32),
    ComputingDeviation,
    Finished { deviation_written: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusFrame {
    pub reading: Reading,
    pub batch: u32,
    pub instrument_mode: InstrumentMode,
    pub data_mode: DataMode,
    pub low_battery: bool,
    pub clock_battery_ok: bool,
    pub storage_degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayUpdate {
    Status(StatusFrame),
    Sampling(SamplingProgress),
}

/// Mode bookkeeping for the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentState {
    pub instrument_mode: InstrumentMode,
    pub data_mode: DataMode,
    /// Data mode as of the end of the previous cycle.
    last_data_mode: DataMode,
    pub batch: u32,
    /// Set on the first failed write and never cleared until reboot.
    pub storage_degraded: bool,
    pub low_battery: bool,
    pub stop_requested: bool,
}

impl InstrumentState {
    pub const fn new(record_on_startup: bool) -> Self {
        let data_mode = if record_on_startup {
            DataMode::Recording
        } else {
            DataMode::Paused
        };
        Self {
            instrument_mode: InstrumentMode::Continuous,
            data_mode,
            last_data_mode: data_mode,
            batch: 0,
            storage_degraded: false,
            low_battery: false,
            stop_requested: false,
        }
    }

    pub fn apply(&mut self, event: InputEvent) -> EventEffect {
        match event {
            InputEvent::ModeChanged(mode) => {
                let previous = self.instrument_mode;
                self.instrument_mode = mode;
                self.data_mode = match mode {
                    // Selecting continuous again works like a button press
                    InstrumentMode::Continuous if previous == InstrumentMode::Continuous => {
                        self.data_mode.toggled()
                    }
                    InstrumentMode::Continuous => DataMode::Recording,
                    InstrumentMode::Single | InstrumentMode::Average => DataMode::Paused,
                };
                info!("Mode {:?}, {:?}", self.instrument_mode, self.data_mode);
                EventEffect::Interrupt
            }
            InputEvent::ButtonPressed => {
                self.data_mode = match self.instrument_mode {
                    InstrumentMode::Continuous => self.data_mode.toggled(),
                    InstrumentMode::Single | InstrumentMode::Average => DataMode::Recording,
                };
                info!("Button: {:?}", self.data_mode);
                EventEffect::Interrupt
            }
            InputEvent::BatchIncrementRequested => EventEffect::NewBatch,
            InputEvent::Stop => {
                self.stop_requested = true;
                EventEffect::Interrupt
            }
        }
    }

    /// Whether this cycle starts a new batch: every triggered record, and the
    /// first record after continuous recording resumes.
    pub fn batch_due(&self) -> bool {
        match (self.instrument_mode, self.data_mode) {
            (_, DataMode::Paused) => false,
            (InstrumentMode::Continuous, DataMode::Recording) => {
                self.last_data_mode != DataMode::Recording
            }
            (InstrumentMode::Single | InstrumentMode::Average, DataMode::Recording) => true,
        }
    }

    /// End-of-cycle transitions: triggered modes fall back to paused.
    pub fn finish_cycle(&mut self) {
        if self.instrument_mode != InstrumentMode::Continuous {
            self.data_mode = DataMode::Paused;
        }
        self.last_data_mode = self.data_mode;
    }
}
