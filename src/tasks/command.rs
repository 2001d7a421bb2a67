// TGM Wearable — Register Command Worker
//
// The client can peek and poke optical-sensor registers through two command
// characteristics. Writes arrive on the Bluetooth host task and are parked in
// a single slot; the transaction itself runs on the work queue thread, which
// owns the bus.

use std::sync::{Arc, Mutex, PoisonError};

use crate::drivers::{FifoSensor, RegisterBus};
use crate::error::InvalidCommand;
use crate::events::{Channel, CommandKind, RegisterTransaction};
use crate::service::{NotificationService, Transport};
use crate::workqueue::{Work, WorkQueue};

/// Single-slot mailbox between the host task and the command worker.
///
/// A command that arrives while an earlier one is still pending overwrites
/// it: the earlier command is lost and only the newer one is answered.
pub struct CommandInbox {
    slot: Mutex<Option<RegisterTransaction>>,
    queue: Arc<WorkQueue>,
}

impl CommandInbox {
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self {
            slot: Mutex::new(None),
            queue,
        }
    }

    /// Validate a characteristic write and schedule it. A rejected write
    /// leaves the slot untouched and schedules nothing.
    pub fn on_write(
        &self,
        kind: CommandKind,
        offset: u16,
        value: &[u8],
    ) -> Result<(), InvalidCommand> {
        let transaction = RegisterTransaction::parse(kind, offset, value).map_err(|e| {
            log::warn!("Rejected {:?} register command: {}", kind, e);
            e
        })?;

        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(transaction);
        if let Some(lost) = previous {
            log::warn!("Register command {:?} overwritten before it ran", lost);
        }

        self.queue.submit(Work::RegisterCommand);
        Ok(())
    }

    pub fn take(&self) -> Option<RegisterTransaction> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

pub struct CommandWorker<S> {
    sensor: S,
    inbox: Arc<CommandInbox>,
    /// Last value read from the device, replied when a readback fails.
    last_value: u8,
}

impl<S: FifoSensor> CommandWorker<S> {
    pub fn new(sensor: S, inbox: Arc<CommandInbox>) -> Self {
        Self {
            sensor,
            inbox,
            last_value: 0,
        }
    }

    pub fn process<B: RegisterBus, T: Transport>(
        &mut self,
        bus: &mut B,
        service: &mut NotificationService<T>,
    ) {
        let Some(transaction) = self.inbox.take() else {
            return;
        };

        let channel = match transaction {
            RegisterTransaction::Read { register } => {
                match self.sensor.read_register(bus, register) {
                    Ok(value) => self.last_value = value,
                    Err(e) => {
                        log::error!(
                            "Failed to read {} register 0x{:02X}: {}",
                            S::NAME,
                            register,
                            e
                        );
                        return;
                    }
                }
                Channel::RegisterRead
            }
            RegisterTransaction::Write { register, data } => {
                if let Err(e) = self.sensor.write_register(bus, register, data) {
                    log::error!("Failed to write {} register 0x{:02X}: {}", S::NAME, register, e);
                }
                match self.sensor.read_register(bus, register) {
                    Ok(value) => self.last_value = value,
                    Err(e) => log::error!(
                        "Failed to read {} register 0x{:02X} after writing: {}",
                        S::NAME,
                        register,
                        e
                    ),
                }
                Channel::RegisterWrite
            }
        };

        log::info!(
            "{} register 0x{:02X} = 0x{:02X}",
            S::NAME,
            transaction.register(),
            self.last_value
        );
        if let Err(e) = service.send(channel, &self.last_value) {
            log::error!("Failed to send register value notification: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::I2C_ADDR_MAXM86161;
    use crate::drivers::maxm86161::Maxm86161;
    use crate::service::Subscriptions;
    use crate::testing::{CountingDoorbell, FakeBus, RecordingTransport};
    use pretty_assertions::assert_eq;

    const PPG: u8 = I2C_ADDR_MAXM86161;

    struct Fixture {
        queue: Arc<WorkQueue>,
        inbox: Arc<CommandInbox>,
        worker: CommandWorker<Maxm86161>,
        service: NotificationService<RecordingTransport>,
        bus: FakeBus,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(WorkQueue::new(CountingDoorbell::default()));
        let inbox = Arc::new(CommandInbox::new(queue.clone()));
        let subs = Arc::new(Subscriptions::new());
        subs.set(Channel::RegisterRead, true);
        subs.set(Channel::RegisterWrite, true);

        Fixture {
            queue,
            worker: CommandWorker::new(Maxm86161::new(PPG), inbox.clone()),
            inbox,
            service: NotificationService::new(RecordingTransport::default(), subs),
            bus: FakeBus::new(),
        }
    }

    #[test]
    fn short_write_command_is_rejected() {
        let mut f = fixture();

        assert_eq!(
            f.inbox.on_write(CommandKind::Write, 0, &[0x23]),
            Err(InvalidCommand::InvalidAttributeLength(1))
        );
        assert!(!f.queue.is_pending(Work::RegisterCommand));

        f.worker.process(&mut f.bus, &mut f.service);
        assert!(f.service.transport().sent.is_empty());
        assert_eq!(f.bus.transactions(), 0);
    }

    #[test]
    fn nonzero_offset_is_rejected() {
        let f = fixture();
        assert_eq!(
            f.inbox.on_write(CommandKind::Read, 2, &[0x23]),
            Err(InvalidCommand::InvalidOffset(2))
        );
        assert!(f.inbox.take().is_none());
    }

    #[test]
    fn write_replies_once_with_readback() {
        let mut f = fixture();
        // Only the low bits of this register are writable.
        f.bus.read_only(PPG, 0x10, 0x03);

        f.inbox.on_write(CommandKind::Write, 0, &[0x10, 0xFF]).unwrap();
        assert!(f.queue.is_pending(Work::RegisterCommand));
        f.worker.process(&mut f.bus, &mut f.service);

        assert_eq!(f.bus.writes_to(PPG, 0x10), vec![vec![0xFF]]);
        assert_eq!(f.service.transport().sent, vec![(Channel::RegisterWrite, vec![0x03])]);
    }

    #[test]
    fn read_replies_on_read_channel() {
        let mut f = fixture();
        f.bus.set_register(PPG, 0xFF, 0x36);

        f.inbox.on_write(CommandKind::Read, 0, &[0xFF]).unwrap();
        f.worker.process(&mut f.bus, &mut f.service);

        assert_eq!(f.service.transport().sent, vec![(Channel::RegisterRead, vec![0x36])]);
    }

    #[test]
    fn failed_read_sends_nothing() {
        let mut f = fixture();
        f.bus.fail_register(PPG, 0x11);

        f.inbox.on_write(CommandKind::Read, 0, &[0x11]).unwrap();
        f.worker.process(&mut f.bus, &mut f.service);

        assert!(f.service.transport().sent.is_empty());
    }

    #[test]
    fn readback_attempted_after_failed_write() {
        let mut f = fixture();
        f.bus.set_register(PPG, 0x12, 0x08);
        f.bus.fail_writes(PPG, 0x12);

        f.inbox.on_write(CommandKind::Write, 0, &[0x12, 0x55]).unwrap();
        f.worker.process(&mut f.bus, &mut f.service);

        assert_eq!(f.bus.reads_of(PPG, 0x12), 1);
        assert_eq!(f.service.transport().sent, vec![(Channel::RegisterWrite, vec![0x08])]);
    }

    #[test]
    fn failed_readback_replies_last_value() {
        let mut f = fixture();
        f.bus.set_register(PPG, 0x20, 0x23);
        f.inbox.on_write(CommandKind::Read, 0, &[0x20]).unwrap();
        f.worker.process(&mut f.bus, &mut f.service);

        f.bus.fail_register(PPG, 0x21);
        f.inbox.on_write(CommandKind::Write, 0, &[0x21, 0x01]).unwrap();
        f.worker.process(&mut f.bus, &mut f.service);

        assert_eq!(
            f.service.transport().sent,
            vec![
                (Channel::RegisterRead, vec![0x23]),
                (Channel::RegisterWrite, vec![0x23]),
            ]
        );
    }

    #[test]
    fn newer_command_overwrites_pending_one() {
        let mut f = fixture();
        f.bus.set_register(PPG, 0x01, 0xAA);
        f.bus.set_register(PPG, 0x02, 0xBB);

        f.inbox.on_write(CommandKind::Read, 0, &[0x01]).unwrap();
        f.inbox.on_write(CommandKind::Read, 0, &[0x02]).unwrap();
        f.worker.process(&mut f.bus, &mut f.service);
        f.worker.process(&mut f.bus, &mut f.service);

        assert_eq!(f.service.transport().sent, vec![(Channel::RegisterRead, vec![0xBB])]);
    }
}
