// TGM Wearable — Acquisition Worker
//
// One worker per FIFO sensor. The interrupt line only marks the deferred
// read pending; the work queue thread then drains the FIFO and pushes one
// counter-tagged frame to the client.

use crate::drivers::{FifoSensor, FifoStatus, RegisterBus};
use crate::error::{BusError, InitError};
use crate::events::{Channel, Frame};
use crate::service::{Delivery, NotificationService, Transport};
use crate::workqueue::{Work, WorkQueue};

/// A sensor interrupt pin and the deferred task it arms.
#[derive(Debug, Clone, Copy)]
pub struct InterruptLine {
    pin: i32,
    work: Work,
}

impl InterruptLine {
    pub const fn new(pin: i32, work: Work) -> Self {
        Self { pin, work }
    }

    pub fn pin(&self) -> i32 {
        self.pin
    }

    /// ISR body. Ignores pins other than our own. Never touches the bus.
    pub fn on_interrupt(&self, pin: i32, queue: &WorkQueue) -> bool {
        if pin != self.pin {
            return false;
        }
        queue.submit(self.work);
        true
    }
}

pub struct AcquisitionWorker<S, const N: usize> {
    sensor: S,
    channel: Channel,
}

impl<S: FifoSensor, const N: usize> AcquisitionWorker<S, N> {
    pub fn new(sensor: S, channel: Channel) -> Self {
        Self { sensor, channel }
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// Verify the part and start sampling.
    pub fn start<B: RegisterBus>(&self, bus: &mut B) -> Result<(), InitError> {
        let result = self
            .sensor
            .probe(bus)
            .and_then(|()| self.sensor.start(bus).map_err(InitError::from));
        if let Err(e) = &result {
            log::error!("Failed to start {} acquisition: {}", S::NAME, e);
        }
        result
    }

    pub fn stop<B: RegisterBus>(&self, bus: &mut B) -> Result<(), BusError> {
        let result = self.sensor.stop(bus);
        if let Err(e) = &result {
            log::error!("Failed to stop {} acquisition: {}", S::NAME, e);
        }
        result
    }

    /// Deferred half of the interrupt: drain the FIFO and deliver one frame.
    /// A failed read drops the cycle; the next interrupt tries again.
    pub fn process<B: RegisterBus, T: Transport>(
        &self,
        bus: &mut B,
        service: &mut NotificationService<T>,
    ) {
        let mut frame: Frame<S::Sample, N> = Frame::default();
        let status = match self.sensor.read_burst(bus, &mut frame.samples) {
            Ok(status) => status,
            Err(e) => {
                log::error!("Failed to read {} FIFO: {}", S::NAME, e);
                return;
            }
        };

        frame.counter = service.next_counter(self.channel);
        match service.send(self.channel, &frame) {
            Ok(Delivery::Sent) => log::debug!(
                "{} frame {} sent ({} samples{})",
                self.channel.name(),
                frame.counter,
                frame.samples.len(),
                if status == FifoStatus::Overflow { ", overflow" } else { "" }
            ),
            Ok(Delivery::Unsubscribed) => log::debug!(
                "{} frame {} dropped, not subscribed",
                self.channel.name(),
                frame.counter
            ),
            Err(e) => log::warn!(
                "Failed to send {} frame {}: {}",
                self.channel.name(),
                frame.counter,
                e
            ),
        }
    }
}
