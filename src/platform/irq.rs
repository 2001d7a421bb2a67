// TGM Wearable — GPIO interrupts and the work queue doorbell
//
// Interrupt pins are `PinDriver` inputs with a subscribed callback. The HAL
// masks a pin after every interrupt, so each callback unmasks it again and
// does nothing else but re-arm (charge pin) and submit work.

use core::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use esp_idf_hal::delay::{TickType, BLOCK};
use esp_idf_hal::gpio::{AnyInputPin, Input, InterruptType, Pin, PinDriver, Pull};
use esp_idf_hal::task::notification::{Notification, Notifier};
use esp_idf_sys as sys;

use crate::config::PIN_CHARGE_STAT;
use crate::tasks::acquisition::InterruptLine;
use crate::tasks::state::{is_charging_level, next_trigger, TriggerLevel};
use crate::tasks::ChargeStatus;
use crate::workqueue::{Doorbell, Waiter, Work, WorkQueue};

// ---------------------------------------------------------------------------
// Doorbell
// ---------------------------------------------------------------------------

/// Task notification of the work queue thread.
pub struct NotifierDoorbell(Arc<Notifier>);

impl NotifierDoorbell {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self(notifier)
    }
}

impl Doorbell for NotifierDoorbell {
    fn ring(&self) {
        // SAFETY: the notified task is the work queue thread, which never exits.
        unsafe {
            self.0.notify_and_yield(NonZeroU32::MIN);
        }
    }
}

/// Must be created on the thread that waits on it.
pub struct NotificationWaiter(Notification);

impl NotificationWaiter {
    pub fn new(notification: Notification) -> Self {
        Self(notification)
    }
}

impl Waiter for NotificationWaiter {
    fn wait(&mut self, timeout: Option<Duration>) {
        let ticks = timeout.map_or(BLOCK, |t| TickType::from(t).ticks());
        self.0.wait(ticks);
    }
}

// ---------------------------------------------------------------------------
// Sensor interrupts
// ---------------------------------------------------------------------------

pub type IrqPin = PinDriver<'static, AnyInputPin, Input>;

/// Route a sensor's interrupt pin to its acquisition task.
pub fn attach_sensor_interrupt(
    pin: AnyInputPin,
    line: InterruptLine,
    active_low: bool,
    queue: Arc<WorkQueue>,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        pin.pin() == line.pin(),
        "GPIO{} is not the interrupt pin of {:?}",
        pin.pin(),
        line
    );

    let mut input = PinDriver::input(pin)?;
    let (pull, trigger) = if active_low {
        (Pull::Up, InterruptType::NegEdge)
    } else {
        (Pull::Down, InterruptType::PosEdge)
    };
    input.set_pull(pull)?;
    input.set_interrupt_type(trigger)?;

    // SAFETY: the callback runs in interrupt context and only touches the
    // lock-free work queue.
    unsafe {
        input
            .subscribe(move || {
                line.on_interrupt(line.pin(), &queue);
                sys::gpio_intr_enable(line.pin());
            })
            .with_context(|| format!("interrupt pin GPIO{}", line.pin()))?;
    }
    input.enable_interrupt()?;
    log::info!("GPIO{} interrupt -> {:?}", line.pin(), line);

    // Dropping the driver would unsubscribe the callback.
    Box::leak(Box::new(input));
    Ok(())
}

// ---------------------------------------------------------------------------
// Charge status
// ---------------------------------------------------------------------------

fn trigger_for(level: TriggerLevel) -> InterruptType {
    match level {
        TriggerLevel::High => InterruptType::HighLevel,
        TriggerLevel::Low => InterruptType::LowLevel,
    }
}

fn raw_trigger_for(level: TriggerLevel) -> sys::gpio_int_type_t {
    match level {
        TriggerLevel::High => sys::gpio_int_type_t_GPIO_INTR_HIGH_LEVEL,
        TriggerLevel::Low => sys::gpio_int_type_t_GPIO_INTR_LOW_LEVEL,
    }
}

/// Charger STAT pin, level triggered on whichever level it is not at.
pub struct ChargePin {
    input: IrqPin,
}

impl ChargePin {
    pub fn attach(pin: AnyInputPin, queue: Arc<WorkQueue>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            pin.pin() == PIN_CHARGE_STAT,
            "GPIO{} is not the charge status pin",
            pin.pin()
        );

        let mut input = PinDriver::input(pin).context("charge status pin")?;
        input.set_pull(Pull::Up)?;
        input.set_interrupt_type(trigger_for(next_trigger(input.is_high())))?;

        // SAFETY: interrupt context; raw GPIO register access and the
        // lock-free work queue only.
        unsafe {
            input.subscribe(move || {
                let level_high = sys::gpio_get_level(PIN_CHARGE_STAT) != 0;
                let trigger = raw_trigger_for(next_trigger(level_high));
                sys::gpio_set_intr_type(PIN_CHARGE_STAT, trigger);
                sys::gpio_intr_enable(PIN_CHARGE_STAT);
                queue.submit(Work::ChargeChanged);
            })?;
        }
        input.enable_interrupt()?;
        Ok(Self { input })
    }
}

impl ChargeStatus for ChargePin {
    fn is_charging(&mut self) -> bool {
        is_charging_level(self.input.is_high())
    }
}
