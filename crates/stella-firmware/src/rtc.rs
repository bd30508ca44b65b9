//! BM8563 real-time clock (PCF8563 compatible).
//!
//! The chip keeps BCD calendar time in registers 0x02..=0x08. Bit 7 of the
//! seconds register (VL) is set when the backup supply dropped far enough
//! that the time can no longer be trusted.

use embedded_hal_async::i2c::I2c;
use stella_core::clock::{ClockError, HardwareClock, Timestamp};

pub const BM8563_ADDRESS: u8 = 0x51;

const REG_SECONDS: u8 = 0x02;
const VOLTAGE_LOW: u8 = 0x80;

pub struct Bm8563<I> {
    i2c: I,
}

impl<I: I2c> Bm8563<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    async fn read_registers(&mut self) -> Result<[u8; 7], ClockError> {
        let mut registers = [0u8; 7];
        self.i2c
            .write_read(BM8563_ADDRESS, &[REG_SECONDS], &mut registers)
            .await
            .map_err(|e| {
                log::error!("BM8563 read failed: {:?}", e);
                ClockError::NotResponding {
                    details: "I2C communication error or RTC not responding",
                }
            })?;
        Ok(registers)
    }
}

impl<I: I2c> HardwareClock for Bm8563<I> {
    async fn datetime(&mut self) -> Result<Timestamp, ClockError> {
        decode(&self.read_registers().await?)
    }

    async fn battery_low(&mut self) -> Result<bool, ClockError> {
        Ok(self.read_registers().await?[0] & VOLTAGE_LOW != 0)
    }
}

fn from_bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

/// The weekday register is recomputed from the date rather than trusted.
fn decode(registers: &[u8; 7]) -> Result<Timestamp, ClockError> {
    let raw = Timestamp {
        second: from_bcd(registers[0] & 0x7F),
        minute: from_bcd(registers[1] & 0x7F),
        hour: from_bcd(registers[2] & 0x3F),
        day: from_bcd(registers[3] & 0x3F),
        weekday: 0,
        month: from_bcd(registers[5] & 0x1F),
        year: 2000 + u16::from(from_bcd(registers[6])),
    };

    let in_range = (1..=12).contains(&raw.month)
        && (1..=31).contains(&raw.day)
        && raw.hour < 24
        && raw.minute < 60
        && raw.second < 60;
    if !in_range {
        return Err(ClockError::InvalidTime);
    }

    let epoch = raw.to_unix().ok_or(ClockError::InvalidTime)?;
    Ok(Timestamp::from_unix(epoch))
}
