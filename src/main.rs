// TGM Wearable — Firmware Entry Point
//
// Boot sequence:
//   1. Power the optical module and bring up the I2C bus.
//   2. Spawn the work queue thread and wait for its submission handle.
//   3. Start Bluetooth and register the TGM GATT service.
//   4. Route the sensor and charger interrupts to the work queue.
//   5. Hand the application context to the work queue thread, which starts
//      both sensors and the periodic temperature and battery tasks.
//
// All sensor I/O happens on the work queue thread from then on.

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    device::main()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("tgm-firmware only runs on ESP-IDF targets; the host build exists for unit tests");
}

#[cfg(target_os = "espidf")]
mod device {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use esp_idf_hal::gpio::{InputPin, PinDriver};
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::prelude::*;
    use esp_idf_hal::task::notification::Notification;
    use esp_idf_svc::bt::BtDriver;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    use tgm::config::*;
    use tgm::platform::adc::OneshotBatteryAdc;
    use tgm::platform::ble::{BleTransport, TgmServer};
    use tgm::platform::bus::I2cBus;
    use tgm::platform::irq::{self, ChargePin, NotificationWaiter, NotifierDoorbell};
    use tgm::service::{NotificationService, PullAttributes, Subscriptions};
    use tgm::tasks::acquisition::InterruptLine;
    use tgm::tasks::command::CommandInbox;
    use tgm::tasks::power::{BatteryLevel, BatteryMonitor};
    use tgm::tasks::App;
    use tgm::workqueue::{Executor, Work, WorkQueue};

    type DeviceApp = App<I2cBus, BleTransport, ChargePin, OneshotBatteryAdc>;

    pub fn main() -> anyhow::Result<()> {
        // Link esp-idf-sys runtime patches and initialise logging.
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
        log::info!("TGM firmware {} starting…", FIRMWARE_VERSION);

        // ---- Peripherals ------------------------------------------------------
        let peripherals = Peripherals::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        // ---- Optical module supply --------------------------------------------
        let mut ppg_supply = PinDriver::output(peripherals.pins.gpio10)?;
        ppg_supply.set_high()?;
        // Dropping the driver would release the pin; the supply stays on for good.
        Box::leak(Box::new(ppg_supply));
        thread::sleep(PPG_POWER_UP);

        // ---- I2C bus (MAXM86161 + LIS2DTW12) ----------------------------------
        let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio6, // SDA
            peripherals.pins.gpio7, // SCL
            &i2c_config,
        )?;
        let bus = I2cBus::new(i2c);

        // ---- Work queue thread ------------------------------------------------
        // The doorbell is a task notification, so the queue has to be created
        // on the thread that waits on it.
        let (queue_tx, queue_rx) = mpsc::sync_channel::<Arc<WorkQueue>>(1);
        let (app_tx, app_rx) = mpsc::sync_channel::<DeviceApp>(1);
        thread::Builder::new()
            .name("workq".into())
            .stack_size(STACK_WORKQ)
            .spawn(move || {
                let notification = Notification::new();
                let doorbell = NotifierDoorbell::new(notification.notifier());
                let queue = Arc::new(WorkQueue::new(doorbell));
                if queue_tx.send(queue.clone()).is_err() {
                    return;
                }
                let Ok(mut app) = app_rx.recv() else {
                    log::error!("Boot aborted before the work queue started");
                    return;
                };

                let mut executor = Executor::new(queue, NotificationWaiter::new(notification));
                app.start(executor.timers_mut());
                executor.run(&mut app)
            })?;
        let queue = queue_rx.recv()?;

        // ---- Bluetooth --------------------------------------------------------
        let subscriptions = Arc::new(Subscriptions::new());
        let inbox = Arc::new(CommandInbox::new(queue.clone()));
        let battery_level = BatteryLevel::new();
        let attributes = PullAttributes::new(
            tgm::platform::device_id()?,
            FIRMWARE_VERSION,
            Arc::new(battery_level.clone()),
        );

        let bt = Arc::new(BtDriver::new(peripherals.modem, Some(nvs))?);
        let server = TgmServer::new(bt, subscriptions.clone(), attributes, inbox.clone())?;
        server.start()?;

        // ---- Interrupts -------------------------------------------------------
        irq::attach_sensor_interrupt(
            peripherals.pins.gpio3.downgrade_input(),
            InterruptLine::new(PIN_PPG_INT, Work::ReadOptical),
            true,
            queue.clone(),
        )?;
        irq::attach_sensor_interrupt(
            peripherals.pins.gpio4.downgrade_input(),
            InterruptLine::new(PIN_ACC_INT, Work::ReadMotion),
            false,
            queue.clone(),
        )?;
        let charge = ChargePin::attach(peripherals.pins.gpio5.downgrade_input(), queue)?;

        // ---- Battery ----------------------------------------------------------
        let adc = OneshotBatteryAdc::new()?;

        // ---- Hand over to the work queue --------------------------------------
        let app = App::new(
            bus,
            NotificationService::new(server.transport(), subscriptions),
            inbox,
            charge,
            BatteryMonitor::new(adc, battery_level),
        );
        app_tx
            .send(app)
            .map_err(|_| anyhow::anyhow!("work queue thread exited during boot"))?;
        log::info!("Boot complete");

        // Main thread has nothing left to do — park it forever.
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }
}
