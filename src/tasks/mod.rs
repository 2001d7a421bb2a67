// TGM Wearable — Deferred Tasks
//
// Everything that touches the sensor bus runs here, on the single work queue
// thread. `App` owns the bus, the drivers, the notification service and the
// device state; interrupt handlers and the Bluetooth host task only reach it
// through the work queue.

pub mod acquisition;
pub mod command;
pub mod power;
pub mod state;
pub mod thermal;

use std::sync::Arc;
use std::time::Duration;

use crate::config::*;
use crate::drivers::lis2dtw12::Lis2dtw12;
use crate::drivers::maxm86161::Maxm86161;
use crate::drivers::RegisterBus;
use crate::events::{Channel, DeviceState};
use crate::service::{NotificationService, Transport};
use crate::workqueue::{Handler, Timers, Work};

use acquisition::AcquisitionWorker;
use command::{CommandInbox, CommandWorker};
use power::{BatteryAdc, BatteryMonitor};
use state::{DeviceStateMachine, LedControl};
use thermal::TemperatureSampler;

/// Current level of the charger STAT line.
pub trait ChargeStatus {
    fn is_charging(&mut self) -> bool;
}

pub struct App<B, T, C, A> {
    bus: B,
    service: NotificationService<T>,
    optical: AcquisitionWorker<Maxm86161, PPG_SAMPLES_PER_FRAME>,
    motion: AcquisitionWorker<Lis2dtw12, ACC_SAMPLES_PER_FRAME>,
    commands: CommandWorker<Maxm86161>,
    thermal: TemperatureSampler,
    state: DeviceStateMachine,
    charge: C,
    battery: BatteryMonitor<A>,
}

impl<B, T, C, A> App<B, T, C, A>
where
    B: RegisterBus,
    T: Transport,
    C: ChargeStatus,
    A: BatteryAdc,
{
    pub fn new(
        bus: B,
        service: NotificationService<T>,
        inbox: Arc<CommandInbox>,
        charge: C,
        battery: BatteryMonitor<A>,
    ) -> Self {
        let ppg = Maxm86161::new(I2C_ADDR_MAXM86161);
        let acc = Lis2dtw12::new(I2C_ADDR_LIS2DTW12);

        Self {
            bus,
            service,
            optical: AcquisitionWorker::new(ppg, Channel::Optical),
            motion: AcquisitionWorker::new(acc, Channel::Motion),
            commands: CommandWorker::new(ppg, inbox),
            thermal: TemperatureSampler::new(acc),
            state: DeviceStateMachine::new(WearThresholds::default()),
            charge,
            battery,
        }
    }

    /// Bring up both sensors, leave `initializing`, and arm the periodic
    /// tasks. A sensor that fails to start stays off; the rest keeps running.
    pub fn start(&mut self, timers: &mut Timers) {
        if self.optical.start(&mut self.bus).is_err() {
            log::warn!("Optical acquisition disabled");
        }
        if self.motion.start(&mut self.bus).is_err() {
            log::warn!("Motion acquisition disabled");
        }

        let charging = self.charge.is_charging();
        self.state
            .start(charging, &mut LedControl::new(self.optical.sensor(), &mut self.bus));

        timers.reschedule(Work::SampleTemperature, Duration::ZERO);
        timers.reschedule(Work::MeasureBattery, Duration::ZERO);
        log::info!("Acquisition started");
    }

    pub fn state(&self) -> DeviceState {
        self.state.state()
    }

    #[cfg(test)]
    fn service(&self) -> &NotificationService<T> {
        &self.service
    }
}

impl<B, T, C, A> Handler for App<B, T, C, A>
where
    B: RegisterBus,
    T: Transport,
    C: ChargeStatus,
    A: BatteryAdc,
{
    fn handle(&mut self, work: Work, timers: &mut Timers) {
        match work {
            Work::ReadOptical => self.optical.process(&mut self.bus, &mut self.service),
            Work::ReadMotion => self.motion.process(&mut self.bus, &mut self.service),
            Work::RegisterCommand => self.commands.process(&mut self.bus, &mut self.service),
            Work::ChargeChanged => {
                let charging = self.charge.is_charging();
                self.state.on_charging(
                    charging,
                    &mut LedControl::new(self.optical.sensor(), &mut self.bus),
                );
            }
            Work::SampleTemperature => {
                if let Some(temperature) = self.thermal.sample(&mut self.bus, &mut self.service) {
                    self.state.on_temperature(
                        temperature,
                        &mut LedControl::new(self.optical.sensor(), &mut self.bus),
                    );
                }
                timers.reschedule(Work::SampleTemperature, TEMPERATURE_INTERVAL);
            }
            Work::MeasureBattery => {
                let delay = self.battery.measure(&mut self.service);
                timers.reschedule(Work::MeasureBattery, delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    use super::power::BatteryLevel;
    use super::*;
    use crate::drivers::{lis2dtw12, maxm86161};
    use crate::error::AdcError;
    use crate::events::CommandKind;
    use crate::service::Subscriptions;
    use crate::testing::{CountingDoorbell, FakeBus, RecordingTransport};
    use crate::workqueue::{Executor, Waiter, WorkQueue};
    use pretty_assertions::assert_eq;

    const PPG: u8 = I2C_ADDR_MAXM86161;
    const ACC: u8 = I2C_ADDR_LIS2DTW12;

    struct Charger(Arc<AtomicBool>);

    impl ChargeStatus for Charger {
        fn is_charging(&mut self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// `None` models a divider that cannot be switched on.
    struct FixedAdc(Option<i32>);

    impl BatteryAdc for FixedAdc {
        fn enable_divider(&mut self, _enabled: bool) -> Result<(), AdcError> {
            self.0.map(|_| ()).ok_or_else(|| AdcError("divider gpio".into()))
        }

        fn read_millivolts(&mut self) -> Result<i32, AdcError> {
            self.0.ok_or_else(|| AdcError("no divider".into()))
        }
    }

    struct NoWait;

    impl Waiter for NoWait {
        fn wait(&mut self, _timeout: Option<Duration>) {}
    }

    type TestApp = App<FakeBus, RecordingTransport, Charger, FixedAdc>;

    struct Rig {
        queue: Arc<WorkQueue>,
        inbox: Arc<CommandInbox>,
        charging: Arc<AtomicBool>,
        level: BatteryLevel,
        executor: Executor<NoWait>,
        app: TestApp,
    }

    fn rig(bus: FakeBus) -> Rig {
        rig_with(bus, FixedAdc(Some(360)))
    }

    fn rig_with(bus: FakeBus, adc: FixedAdc) -> Rig {
        let queue = Arc::new(WorkQueue::new(CountingDoorbell::default()));
        let inbox = Arc::new(CommandInbox::new(queue.clone()));
        let charging = Arc::new(AtomicBool::new(false));
        let level = BatteryLevel::new();

        let subs = Arc::new(Subscriptions::new());
        for channel in Channel::ALL {
            subs.set(channel, true);
        }

        let app = App::new(
            bus,
            NotificationService::new(RecordingTransport::default(), subs),
            inbox.clone(),
            Charger(charging.clone()),
            BatteryMonitor::new(adc, level.clone()),
        );

        Rig {
            executor: Executor::new(queue.clone(), NoWait),
            queue,
            inbox,
            charging,
            level,
            app,
        }
    }

    fn led_writes(bus: &FakeBus) -> usize {
        [maxm86161::reg::LED1_PA, maxm86161::reg::LED2_PA, maxm86161::reg::LED3_PA]
            .iter()
            .map(|&register| bus.writes_to(PPG, register).len())
            .sum()
    }

    fn healthy_bus() -> FakeBus {
        let mut bus = FakeBus::new();
        bus.set_register(PPG, maxm86161::reg::PART_ID, 0x36);
        bus.set_register(ACC, lis2dtw12::reg::WHO_AM_I, 0x44);
        bus
    }

    #[test]
    fn start_runs_periodic_tasks_immediately() {
        let mut r = rig(healthy_bus());
        r.app.start(r.executor.timers_mut());
        assert_eq!(r.app.state(), DeviceState::Idle);

        assert_eq!(r.executor.run_once(&mut r.app, Instant::now()), 2);
        assert_eq!(r.level.get(), 360 * BATTERY_DIVIDER_SCALE);

        let transport = r.app.service().transport();
        assert_eq!(transport.sent_on(Channel::Temperature).len(), 1);
        assert_eq!(transport.sent_on(Channel::Battery).len(), 1);

        assert!(r.executor.timers_mut().deadline(Work::SampleTemperature).is_some());
        assert!(r.executor.timers_mut().deadline(Work::MeasureBattery).is_some());
    }

    #[test]
    fn warm_reading_turns_on_acquisition_leds() {
        let mut bus = healthy_bus();
        let raw = (120i16 << 4).to_le_bytes(); // 32.5 C
        bus.set_register(ACC, lis2dtw12::reg::OUT_T_L, raw[0]);
        bus.set_register(ACC, lis2dtw12::reg::OUT_T_L + 1, raw[1]);

        let mut r = rig(bus);
        r.app.start(r.executor.timers_mut());
        r.executor.run_once(&mut r.app, Instant::now());

        assert_eq!(r.app.state(), DeviceState::Worn);
        assert_eq!(r.app.bus.register(PPG, maxm86161::reg::LED3_PA), LED_PA_RED);
        assert_eq!(r.app.bus.register(PPG, maxm86161::reg::LED2_PA), LED_PA_IR);
    }

    #[test]
    fn charge_interrupt_lights_indicator() {
        let mut r = rig(healthy_bus());
        r.app.start(r.executor.timers_mut());

        r.charging.store(true, Ordering::SeqCst);
        r.queue.submit(Work::ChargeChanged);
        r.executor.run_once(&mut r.app, Instant::now());

        assert_eq!(r.app.state(), DeviceState::ChargingIdle);
        assert_eq!(r.app.bus.register(PPG, maxm86161::reg::LED1_PA), LED_PA_INDICATOR);
    }

    #[test]
    fn register_command_round_trip() {
        let mut r = rig(healthy_bus());
        r.app.start(r.executor.timers_mut());
        r.executor.run_once(&mut r.app, Instant::now());

        r.inbox.on_write(CommandKind::Read, 0, &[maxm86161::reg::PART_ID]).unwrap();
        assert_eq!(r.executor.run_once(&mut r.app, Instant::now()), 1);

        assert_eq!(
            r.app.service().transport().sent_on(Channel::RegisterRead),
            vec![vec![0x36]]
        );
    }

    #[test]
    fn missing_sensor_leaves_others_running() {
        let mut bus = FakeBus::new();
        bus.set_register(ACC, lis2dtw12::reg::WHO_AM_I, 0x44);

        let mut r = rig(bus);
        r.app.start(r.executor.timers_mut());

        assert_eq!(r.app.bus.register(PPG, maxm86161::reg::SYSTEM_CONTROL), 0x00);
        assert_eq!(r.app.bus.register(ACC, lis2dtw12::reg::CTRL1), 0b0100_0011);

        r.queue.submit(Work::ReadMotion);
        r.executor.run_once(&mut r.app, Instant::now());
        assert_eq!(r.app.service().transport().sent_on(Channel::Motion).len(), 1);
    }

    #[test]
    fn failed_temperature_read_still_rearms() {
        let mut bus = healthy_bus();
        bus.fail_register(ACC, lis2dtw12::reg::OUT_T_L);

        let mut r = rig(bus);
        r.app.start(r.executor.timers_mut());
        let leds_before = led_writes(&r.app.bus);

        let now = Instant::now();
        r.executor.run_once(&mut r.app, now);

        assert_eq!(
            r.executor.timers_mut().deadline(Work::SampleTemperature),
            Some(now + TEMPERATURE_INTERVAL)
        );
        assert_eq!(r.app.state(), DeviceState::Idle);
        assert_eq!(led_writes(&r.app.bus), leds_before);
        assert!(r.app.service().transport().sent_on(Channel::Temperature).is_empty());
    }

    #[test]
    fn battery_divider_failure_retries_after_a_second() {
        let mut r = rig_with(healthy_bus(), FixedAdc(None));
        r.app.start(r.executor.timers_mut());

        let now = Instant::now();
        r.executor.run_once(&mut r.app, now);

        assert_eq!(
            r.executor.timers_mut().deadline(Work::MeasureBattery),
            Some(now + BATTERY_RETRY_INTERVAL)
        );
        assert_eq!(r.level.get(), 0);
        assert!(r.app.service().transport().sent_on(Channel::Battery).is_empty());

        // Only the battery retry is due one second later.
        assert_eq!(r.executor.run_once(&mut r.app, now + BATTERY_RETRY_INTERVAL), 1);
        assert_eq!(
            r.executor.timers_mut().deadline(Work::MeasureBattery),
            Some(now + BATTERY_RETRY_INTERVAL + BATTERY_RETRY_INTERVAL)
        );
    }
}
