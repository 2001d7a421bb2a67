// TGM Wearable — Battery Monitor
//
// Periodically switches on the battery divider, samples it through the ADC,
// and publishes the scaled voltage. The cached value also answers client
// reads of the battery characteristic from the Bluetooth host task.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::*;
use crate::error::AdcError;
use crate::events::Channel;
use crate::service::{BatteryProvider, NotificationService, Transport};

/// Battery sense path: a switchable resistor divider in front of an ADC pin.
pub trait BatteryAdc {
    fn enable_divider(&mut self, enabled: bool) -> Result<(), AdcError>;

    /// Calibrated voltage at the ADC pin.
    fn read_millivolts(&mut self) -> Result<i32, AdcError>;
}

/// Last measured battery voltage in millivolts, shared with the host task.
#[derive(Debug, Clone, Default)]
pub struct BatteryLevel(Arc<AtomicI32>);

impl BatteryLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, mv: i32) {
        self.0.store(mv, Ordering::Relaxed);
    }
}

impl BatteryProvider for BatteryLevel {
    fn battery_mv(&self) -> i32 {
        self.get()
    }
}

pub struct BatteryMonitor<A> {
    adc: A,
    level: BatteryLevel,
}

impl<A: BatteryAdc> BatteryMonitor<A> {
    pub fn new(adc: A, level: BatteryLevel) -> Self {
        Self { adc, level }
    }

    /// Take one measurement and push it. Returns the delay until the next one.
    pub fn measure<T: Transport>(&mut self, service: &mut NotificationService<T>) -> Duration {
        if let Err(e) = self.adc.enable_divider(true) {
            log::error!("Failed to enable battery divider: {}", e);
            return BATTERY_RETRY_INTERVAL;
        }
        thread::sleep(BATTERY_SETTLE);

        match self.adc.read_millivolts() {
            Ok(pin_mv) => {
                let mv = pin_mv * BATTERY_DIVIDER_SCALE;
                self.level.set(mv);
                log::info!("Battery: {} mV", mv);
                if let Err(e) = service.send(Channel::Battery, &mv) {
                    log::error!("Failed to send battery notification: {}", e);
                }
            }
            Err(e) => log::error!("Failed to read battery voltage: {}", e),
        }

        if let Err(e) = self.adc.enable_divider(false) {
            log::error!("Failed to disable battery divider: {}", e);
        }
        BATTERY_INTERVAL
    }
}
