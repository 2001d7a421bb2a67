// TGM Wearable — Temperature Sampler
//
// Reads the accelerometer's die temperature on a fixed period and pushes it
// as a one-sample frame. The same reading feeds wear detection.

use crate::drivers::lis2dtw12::Lis2dtw12;
use crate::drivers::RegisterBus;
use crate::events::{Channel, Frame, TempSample};
use crate::service::{NotificationService, Transport};

pub type TempFrame = Frame<TempSample, 1>;

pub struct TemperatureSampler {
    sensor: Lis2dtw12,
}

impl TemperatureSampler {
    pub fn new(sensor: Lis2dtw12) -> Self {
        Self { sensor }
    }

    /// One sampling cycle. `None` when the sensor could not be read.
    pub fn sample<B: RegisterBus, T: Transport>(
        &self,
        bus: &mut B,
        service: &mut NotificationService<T>,
    ) -> Option<TempSample> {
        let temperature = match self.sensor.read_temperature(bus) {
            Ok(t) => t,
            Err(e) => {
                log::error!("Failed to read temperature: {}", e);
                return None;
            }
        };

        let mut frame = TempFrame::new(service.next_counter(Channel::Temperature));
        // A fresh frame always has room for its single sample.
        let _ = frame.samples.push(temperature);
        log::debug!("Temperature: {:.2} C", temperature.celsius());

        if let Err(e) = service.send(Channel::Temperature, &frame) {
            log::error!("Failed to send temperature notification: {}", e);
        }
        Some(temperature)
    }
}
