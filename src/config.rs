// TGM Wearable — Hardware & System Configuration
// Target: Seeed Studio Xiao ESP32-C3 (RISC-V) carrier with MAXM86161 + LIS2DTW12

use std::time::Duration;

// ---------------------------------------------------------------------------
// GPIO Pin Definitions (Xiao ESP32-C3 pinout)
// ---------------------------------------------------------------------------
pub const PIN_BATTERY_ADC: u32 = 2; // D0/A0 — Battery voltage (ADC1 channel 2)
pub const PIN_PPG_INT: i32 = 3;     // D1    — MAXM86161 INT (active LOW, open drain)
pub const PIN_ACC_INT: i32 = 4;     // D2    — LIS2DTW12 INT1 (active HIGH)
pub const PIN_CHARGE_STAT: i32 = 5; // D3    — Charger STAT (LOW while charging)
pub const PIN_I2C_SDA: i32 = 6;     // D4    — I2C data line
pub const PIN_I2C_SCL: i32 = 7;     // D5    — I2C clock line
pub const PIN_PPG_SENS_EN: i32 = 10; // D10  — MAXM86161 supply enable
pub const PIN_BATTERY_EN: i32 = 21; // D6    — Battery divider enable

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_ADDR_MAXM86161: u8 = 0x62;
pub const I2C_ADDR_LIS2DTW12: u8 = 0x19;
pub const I2C_BAUDRATE_KHZ: u32 = 400;
pub const I2C_TIMEOUT_TICKS: u32 = 1000; // FreeRTOS ticks

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------
pub const PPG_SAMPLES_PER_FRAME: usize = 10;
pub const ACC_SAMPLES_PER_FRAME: usize = 10;
/// Largest notification payload the service ever serializes (optical frame).
pub const MAX_PAYLOAD_LEN: usize = 4 + PPG_SAMPLES_PER_FRAME * 12;

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_WORKQ: usize = 8192;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------
pub const TEMPERATURE_INTERVAL: Duration = Duration::from_secs(10);
pub const BATTERY_INTERVAL: Duration = Duration::from_secs(60);
pub const BATTERY_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const BATTERY_SETTLE: Duration = Duration::from_millis(1);
pub const PPG_POWER_UP: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Wear detection (centi-degrees Celsius)
// ---------------------------------------------------------------------------
pub const WEAR_TEMP_HIGH_CENTI: i16 = 3050;
pub const WEAR_TEMP_LOW_CENTI: i16 = 2950;

/// Hysteresis band for wear detection. `high` must be above `low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WearThresholds {
    pub high_centi: i16,
    pub low_centi: i16,
}

impl Default for WearThresholds {
    fn default() -> Self {
        Self {
            high_centi: WEAR_TEMP_HIGH_CENTI,
            low_centi: WEAR_TEMP_LOW_CENTI,
        }
    }
}

// ---------------------------------------------------------------------------
// Illumination (MAXM86161 LED pulse amplitude, 0.12 mA/LSB at 31 mA range)
// ---------------------------------------------------------------------------
pub const LED_PA_RED: u8 = 0x20;       // ~3.8 mA
pub const LED_PA_IR: u8 = 0x20;        // ~3.8 mA
pub const LED_PA_INDICATOR: u8 = 0x08; // ~1 mA, green LED doubles as charge light

// ---------------------------------------------------------------------------
// Battery
// ---------------------------------------------------------------------------
pub const BATTERY_DIVIDER_SCALE: i32 = 11;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------
pub const DEVICE_NAME: &str = "TGM";
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Firmware version characteristic capacity.
pub const FIRMWARE_VERSION_MAX_LEN: usize = 15;
