//! Sharing one async I2C peripheral between several drivers.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation, SevenBitAddress};

pub type SharedI2cBus<BUS> = AsyncMutex<CriticalSectionRawMutex, BUS>;

/// One driver's handle on a shared bus. Each transaction holds the bus lock
/// for its full duration.
pub struct AsyncI2cDevice<'a, BUS> {
    bus: &'a SharedI2cBus<BUS>,
}

impl<'a, BUS> AsyncI2cDevice<'a, BUS> {
    pub fn new(bus: &'a SharedI2cBus<BUS>) -> Self {
        Self { bus }
    }
}

impl<BUS: ErrorType> ErrorType for AsyncI2cDevice<'_, BUS> {
    type Error = BUS::Error;
}

impl<BUS: I2c> I2c for AsyncI2cDevice<'_, BUS> {
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.transaction(address, operations).await
    }
}
