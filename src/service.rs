// TGM Wearable — TGM GATT Service
//
// Subscription-gated delivery of frames and register replies to the client,
// plus the synchronous pull attributes (device id, firmware, battery).
//
// Client characteristic configuration writes arrive on the Bluetooth host
// task, so subscription flags are atomics shared with the transport. Frame
// counters are only touched from the work queue thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use heapless::String;

use crate::config::FIRMWARE_VERSION_MAX_LEN;
use crate::error::TransportError;
use crate::events::{Channel, Encode, FrameCounter, Payload};

// ---------------------------------------------------------------------------
// UUIDs (3a0ff0xx-98c4-46b2-94af-1aee0fd4c48e)
// ---------------------------------------------------------------------------
pub const TGM_SERVICE_UUID: u128 = 0x3a0ff000_98c4_46b2_94af_1aee0fd4c48e;
pub const TGM_PPG_UUID: u128 = 0x3a0ff001_98c4_46b2_94af_1aee0fd4c48e;
pub const TGM_ACC_UUID: u128 = 0x3a0ff002_98c4_46b2_94af_1aee0fd4c48e;
pub const TGM_TEMP_UUID: u128 = 0x3a0ff003_98c4_46b2_94af_1aee0fd4c48e;
pub const TGM_BAT_UUID: u128 = 0x3a0ff004_98c4_46b2_94af_1aee0fd4c48e;
pub const TGM_DEVICE_ID_UUID: u128 = 0x3a0ff005_98c4_46b2_94af_1aee0fd4c48e;
pub const TGM_FW_UUID: u128 = 0x3a0ff006_98c4_46b2_94af_1aee0fd4c48e;
pub const TGM_READ_REG_UUID: u128 = 0x3a0ff007_98c4_46b2_94af_1aee0fd4c48e;
pub const TGM_WRITE_REG_UUID: u128 = 0x3a0ff008_98c4_46b2_94af_1aee0fd4c48e;

/// Client characteristic configuration: notifications enabled.
pub const CCC_NOTIFY: u16 = 0x0001;

impl Channel {
    /// Characteristic carrying this channel. Register replies are notified
    /// on the command characteristic that requested them.
    pub const fn uuid(self) -> u128 {
        match self {
            Self::Battery => TGM_BAT_UUID,
            Self::Optical => TGM_PPG_UUID,
            Self::Motion => TGM_ACC_UUID,
            Self::Temperature => TGM_TEMP_UUID,
            Self::RegisterRead => TGM_READ_REG_UUID,
            Self::RegisterWrite => TGM_WRITE_REG_UUID,
        }
    }
}

/// The link a serialized notification is handed to.
pub trait Transport {
    fn notify(&mut self, channel: Channel, payload: &[u8]) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Per-channel notify flags, mirrored from the client's CCC writes.
#[derive(Debug, Default)]
pub struct Subscriptions {
    flags: [AtomicBool; Channel::COUNT],
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.flags[channel.index()].load(Ordering::Acquire)
    }

    pub fn set(&self, channel: Channel, enabled: bool) {
        self.flags[channel.index()].store(enabled, Ordering::Release);
    }

    /// Mirror a CCC descriptor write for `channel`.
    pub fn on_ccc_write(&self, channel: Channel, value: u16) {
        let enabled = value & CCC_NOTIFY != 0;
        self.set(channel, enabled);
        log::info!(
            "{} notifications for {} data",
            if enabled { "Enabled" } else { "Disabled" },
            channel.name()
        );
    }

    /// Forget every subscription, e.g. when the client disconnects.
    pub fn clear(&self) {
        for channel in Channel::ALL {
            self.set(channel, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Push path
// ---------------------------------------------------------------------------

/// What happened to a payload handed to [`NotificationService::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The client has not enabled this channel; nothing was transmitted.
    Unsubscribed,
}

pub struct NotificationService<T> {
    transport: T,
    subscriptions: Arc<Subscriptions>,
    counters: [FrameCounter; Channel::COUNT],
}

impl<T: Transport> NotificationService<T> {
    pub fn new(transport: T, subscriptions: Arc<Subscriptions>) -> Self {
        Self {
            transport,
            subscriptions,
            counters: [FrameCounter::default(); Channel::COUNT],
        }
    }

    /// Sequence number for the next frame on `channel`. Advances on every
    /// call, whether or not the frame ends up being delivered.
    pub fn next_counter(&mut self, channel: Channel) -> u32 {
        self.counters[channel.index()].next()
    }

    /// Serialize and transmit `payload` if the client subscribed to `channel`.
    pub fn send<P: Encode + ?Sized>(
        &mut self,
        channel: Channel,
        payload: &P,
    ) -> Result<Delivery, TransportError> {
        if !self.subscriptions.is_subscribed(channel) {
            return Ok(Delivery::Unsubscribed);
        }

        let mut buf = Payload::new();
        payload.encode(&mut buf)?;
        self.transport.notify(channel, &buf)?;
        Ok(Delivery::Sent)
    }

    pub fn subscriptions(&self) -> &Arc<Subscriptions> {
        &self.subscriptions
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

// ---------------------------------------------------------------------------
// Pull path
// ---------------------------------------------------------------------------

/// Source of the battery value returned to client reads.
pub trait BatteryProvider: Send + Sync {
    fn battery_mv(&self) -> i32;
}

/// Readable characteristics answered synchronously from the host task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    DeviceId,
    FirmwareVersion,
    Battery,
}

impl Attribute {
    pub const fn uuid(self) -> u128 {
        match self {
            Self::DeviceId => TGM_DEVICE_ID_UUID,
            Self::FirmwareVersion => TGM_FW_UUID,
            Self::Battery => TGM_BAT_UUID,
        }
    }
}

pub struct PullAttributes {
    device_id: u64,
    firmware: String<FIRMWARE_VERSION_MAX_LEN>,
    battery: Arc<dyn BatteryProvider>,
}

impl PullAttributes {
    /// `firmware` is truncated to the characteristic's capacity.
    pub fn new(device_id: u64, firmware: &str, battery: Arc<dyn BatteryProvider>) -> Self {
        let mut version = String::new();
        for c in firmware.chars() {
            if version.push(c).is_err() {
                log::warn!("Firmware version '{}' truncated to '{}'", firmware, version);
                break;
            }
        }

        Self {
            device_id,
            firmware: version,
            battery,
        }
    }

    /// Current value of `attribute`, battery fetched from the provider.
    pub fn read(&self, attribute: Attribute) -> Payload {
        let mut out = Payload::new();
        // Every pull value is far below the payload capacity.
        let _ = match attribute {
            Attribute::DeviceId => out.extend_from_slice(&self.device_id.to_le_bytes()),
            Attribute::FirmwareVersion => out.extend_from_slice(self.firmware.as_bytes()),
            Attribute::Battery => {
                let mv = self.battery.battery_mv();
                log::info!("Reading battery value ({} mV)", mv);
                out.extend_from_slice(&mv.to_le_bytes())
            }
        };
        out
    }
}
