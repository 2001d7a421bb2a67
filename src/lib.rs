// TGM Wearable — Firmware library
//
// Sensor drivers, the deferred work queue and the notification service are
// plain Rust and unit-tested on the host. `platform` binds them to ESP-IDF.

pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod service;
pub mod tasks;
pub mod workqueue;

#[cfg(target_os = "espidf")]
pub mod platform;

#[cfg(test)]
pub(crate) mod testing;
