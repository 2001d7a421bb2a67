// TGM Wearable — I2C sensor bus

use esp_idf_hal::i2c::I2cDriver;

use crate::config::I2C_TIMEOUT_TICKS;
use crate::drivers::RegisterBus;
use crate::error::BusError;

/// Longest register write the drivers issue, plus the address byte.
const MAX_WRITE: usize = 8;

/// The board's I2C controller. Owned by the work queue thread.
pub struct I2cBus {
    driver: I2cDriver<'static>,
}

impl I2cBus {
    pub fn new(driver: I2cDriver<'static>) -> Self {
        Self { driver }
    }
}

impl RegisterBus for I2cBus {
    fn read_regs(&mut self, device: u8, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.driver
            .write_read(device, &[register], buf, I2C_TIMEOUT_TICKS)
            .map_err(|e| {
                log::debug!("I2C read 0x{:02X}@0x{:02X}: {}", register, device, e);
                BusError { device, register }
            })
    }

    fn write_regs(&mut self, device: u8, register: u8, data: &[u8]) -> Result<(), BusError> {
        let mut frame: heapless::Vec<u8, MAX_WRITE> = heapless::Vec::new();
        if frame.push(register).is_err() || frame.extend_from_slice(data).is_err() {
            return Err(BusError { device, register });
        }

        self.driver
            .write(device, &frame, I2C_TIMEOUT_TICKS)
            .map_err(|e| {
                log::debug!("I2C write 0x{:02X}@0x{:02X}: {}", register, device, e);
                BusError { device, register }
            })
    }
}
