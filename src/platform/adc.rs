// TGM Wearable — Battery ADC
//
// GPIO2 / ADC1 channel 2 behind a 1:11 divider that is only powered while a
// measurement is taken. Raw ESP-IDF oneshot + curve-fitting calibration.

use esp_idf_sys as sys;

use crate::config::{PIN_BATTERY_ADC, PIN_BATTERY_EN};
use crate::error::AdcError;
use crate::tasks::power::BatteryAdc;

pub struct OneshotBatteryAdc {
    unit: sys::adc_oneshot_unit_handle_t,
    cali: sys::adc_cali_handle_t,
    channel: sys::adc_channel_t,
}

// SAFETY: the handles are only ever used from the work queue thread, after
// being created on the main thread and moved there.
unsafe impl Send for OneshotBatteryAdc {}

fn check(ret: sys::esp_err_t, what: &str) -> Result<(), AdcError> {
    if ret != sys::ESP_OK as sys::esp_err_t {
        return Err(AdcError(format!("{} failed ({})", what, ret)));
    }
    Ok(())
}

impl OneshotBatteryAdc {
    pub fn new() -> Result<Self, AdcError> {
        let channel = PIN_BATTERY_ADC as sys::adc_channel_t; // GPIO2 is ADC1_CHANNEL_2

        unsafe {
            let mut unit: sys::adc_oneshot_unit_handle_t = core::ptr::null_mut();
            let unit_cfg = sys::adc_oneshot_unit_init_cfg_t {
                unit_id: sys::adc_unit_t_ADC_UNIT_1,
                ulp_mode: sys::adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
                ..core::mem::zeroed()
            };
            check(sys::adc_oneshot_new_unit(&unit_cfg, &mut unit), "ADC unit init")?;

            let chan_cfg = sys::adc_oneshot_chan_cfg_t {
                atten: sys::adc_atten_t_ADC_ATTEN_DB_11,
                bitwidth: sys::adc_bitwidth_t_ADC_BITWIDTH_12,
            };
            check(
                sys::adc_oneshot_config_channel(unit, channel, &chan_cfg),
                "ADC channel config",
            )?;

            let mut cali: sys::adc_cali_handle_t = core::ptr::null_mut();
            let cali_cfg = sys::adc_cali_curve_fitting_config_t {
                unit_id: sys::adc_unit_t_ADC_UNIT_1,
                chan: channel,
                atten: sys::adc_atten_t_ADC_ATTEN_DB_11,
                bitwidth: sys::adc_bitwidth_t_ADC_BITWIDTH_12,
            };
            check(
                sys::adc_cali_create_scheme_curve_fitting(&cali_cfg, &mut cali),
                "ADC calibration",
            )?;

            check(sys::gpio_reset_pin(PIN_BATTERY_EN), "divider pin reset")?;
            check(
                sys::gpio_set_direction(PIN_BATTERY_EN, sys::gpio_mode_t_GPIO_MODE_OUTPUT),
                "divider pin direction",
            )?;
            check(sys::gpio_set_level(PIN_BATTERY_EN, 0), "divider off")?;

            Ok(Self { unit, cali, channel })
        }
    }
}

impl BatteryAdc for OneshotBatteryAdc {
    fn enable_divider(&mut self, enabled: bool) -> Result<(), AdcError> {
        check(
            unsafe { sys::gpio_set_level(PIN_BATTERY_EN, u32::from(enabled)) },
            "battery divider switch",
        )
    }

    fn read_millivolts(&mut self) -> Result<i32, AdcError> {
        let mut mv: i32 = 0;
        check(
            unsafe {
                sys::adc_oneshot_get_calibrated_result(self.unit, self.cali, self.channel, &mut mv)
            },
            "ADC read",
        )?;
        Ok(mv)
    }
}
