//! Hardware-independent core library for the STELLA instruments
//!
//! This crate contains the platform-agnostic acquisition logic: the sensor
//! abstraction, the CSV record layout, batch and data-file bookkeeping, the
//! spectral averaging run, and the instrument loop that ties them together.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod acquisition;
pub mod app_state;
pub mod clock;
pub mod config;
pub mod record;
pub mod sampling;
pub mod sensors;
pub mod storage;

#[cfg(test)]
mod testing;

pub use acquisition::Instrument;
pub use clock::{ClockSource, SystemClock, Timestamp};
pub use config::{Config, Identity};
pub use record::Reading;
