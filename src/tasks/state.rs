// TGM Wearable — Device State Machine
//
// Two booleans drive everything the wearer can see: `worn`, from the die
// temperature with hysteresis, and `charging`, mirrored from the charger
// STAT pin. Each edge switches LEDs on the optical module; the derived label
// is what gets logged.

use crate::config::{WearThresholds, LED_PA_INDICATOR, LED_PA_IR, LED_PA_RED};
use crate::drivers::maxm86161::{Led, Maxm86161};
use crate::drivers::RegisterBus;
use crate::error::BusError;
use crate::events::{DeviceState, TempSample};

/// LED drive used by the state machine.
pub trait Illumination {
    fn set_led(&mut self, led: Led, amplitude: u8) -> Result<(), BusError>;
}

/// Drives LEDs through the optical sensor on the shared bus.
pub struct LedControl<'a, B> {
    sensor: &'a Maxm86161,
    bus: &'a mut B,
}

impl<'a, B: RegisterBus> LedControl<'a, B> {
    pub fn new(sensor: &'a Maxm86161, bus: &'a mut B) -> Self {
        Self { sensor, bus }
    }
}

impl<B: RegisterBus> Illumination for LedControl<'_, B> {
    fn set_led(&mut self, led: Led, amplitude: u8) -> Result<(), BusError> {
        self.sensor.set_led_amplitude(self.bus, led, amplitude)
    }
}

/// Interrupt level the charge pin must be armed for next. The pin is level
/// triggered, so after each interrupt it waits for the opposite level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerLevel {
    High,
    Low,
}

pub fn next_trigger(level_high: bool) -> TriggerLevel {
    if level_high {
        TriggerLevel::Low
    } else {
        TriggerLevel::High
    }
}

/// The charger pulls STAT low while charging.
pub fn is_charging_level(level_high: bool) -> bool {
    !level_high
}

#[derive(Debug)]
pub struct DeviceStateMachine {
    worn: bool,
    charging: bool,
    state: DeviceState,
    thresholds: WearThresholds,
}

impl DeviceStateMachine {
    pub fn new(thresholds: WearThresholds) -> Self {
        Self {
            worn: false,
            charging: false,
            state: DeviceState::Initializing,
            thresholds,
        }
    }

    /// Leave `initializing` with the charge level read at boot.
    pub fn start(&mut self, charging: bool, leds: &mut impl Illumination) {
        let was_charging = self.charging;
        self.charging = charging;
        if charging != was_charging {
            indicator(leds, charging);
        }
        self.relabel();
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_worn(&self) -> bool {
        self.worn
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }

    /// Feed one temperature sample. Inside the dead band `worn` keeps its
    /// previous value.
    pub fn on_temperature(&mut self, temperature: TempSample, leds: &mut impl Illumination) {
        let worn = if temperature.centi > self.thresholds.high_centi {
            true
        } else if temperature.centi < self.thresholds.low_centi {
            false
        } else {
            self.worn
        };

        if worn == self.worn {
            return;
        }

        self.worn = worn;
        log::info!(
            "Wear {} at {:.2} C",
            if worn { "detected" } else { "removed" },
            temperature.celsius()
        );
        for (led, amplitude) in [(Led::Red, LED_PA_RED), (Led::Infrared, LED_PA_IR)] {
            let amplitude = if worn { amplitude } else { 0 };
            if let Err(e) = leds.set_led(led, amplitude) {
                log::error!("Failed to set {:?} LED: {}", led, e);
            }
        }
        self.relabel();
    }

    pub fn on_charging(&mut self, charging: bool, leds: &mut impl Illumination) {
        if charging == self.charging {
            return;
        }

        self.charging = charging;
        log::info!("Charging {}", if charging { "started" } else { "stopped" });
        indicator(leds, charging);
        self.relabel();
    }

    fn relabel(&mut self) {
        let state = DeviceState::derive(self.worn, self.charging);
        if state != self.state {
            log::info!("Device state: {} -> {}", self.state.display_name(), state.display_name());
            self.state = state;
        }
    }
}

fn indicator(leds: &mut impl Illumination, on: bool) {
    let amplitude = if on { LED_PA_INDICATOR } else { 0 };
    if let Err(e) = leds.set_led(Led::Green, amplitude) {
        log::error!("Failed to set indicator LED: {}", e);
    }
}
