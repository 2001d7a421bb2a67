// TGM Wearable — ESP-IDF board support
//
// Everything in here talks to ESP-IDF directly and is only built for the
// device. The rest of the crate sees it through the `RegisterBus`,
// `Transport`, `ChargeStatus`, `BatteryAdc`, `Doorbell` and `Waiter` traits.

pub mod adc;
pub mod ble;
pub mod bus;
pub mod irq;

use esp_idf_sys as sys;

/// Factory-programmed base MAC address as a little-endian integer.
pub fn device_id() -> anyhow::Result<u64> {
    let mut mac = [0u8; 8];
    sys::esp!(unsafe { sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) })?;
    Ok(u64::from_le_bytes(mac))
}
