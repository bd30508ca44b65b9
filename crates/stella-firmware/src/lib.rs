//! Board support for the STELLA instrument on ESP32-S3.
//!
//! Everything hardware-specific lives here: bus bring-up, the power
//! management chip, the RTC and the concrete sensor drivers. The acquisition
//! logic itself is in `stella-core`.

#![no_std]

extern crate alloc;

pub mod async_i2c_bus;
pub mod hardware;
pub mod rtc;
pub mod sensors;
