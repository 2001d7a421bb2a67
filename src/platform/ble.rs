// TGM Wearable — Bluetooth LE GATT server
//
// Hosts the TGM service on the Bluedroid stack. Events arrive on the
// Bluetooth host task: CCC writes update the shared subscriptions, command
// writes go to the command inbox, and pull reads are answered in place.
// The work queue thread pushes notifications through `BleTransport`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use enumset::{enum_set, EnumSet};
use esp_idf_svc::bt::ble::gap::{AdvConfiguration, BleGapEvent, EspBleGap};
use esp_idf_svc::bt::ble::gatt::server::{ConnectionId, EspGatts, GattsEvent, TransferId};
use esp_idf_svc::bt::ble::gatt::{
    AutoResponse, GattCharacteristic, GattDescriptor, GattId, GattInterface, GattResponse,
    GattServiceId, GattStatus, Handle, Permission, Property,
};
use esp_idf_svc::bt::{BdAddr, Ble, BtDriver, BtStatus, BtUuid};
use esp_idf_svc::sys::{EspError, ESP_FAIL};

use crate::config::{DEVICE_NAME, MAX_PAYLOAD_LEN};
use crate::error::{InvalidCommand, TransportError};
use crate::events::{Channel, CommandKind};
use crate::service::{Attribute, PullAttributes, Subscriptions, Transport, TGM_SERVICE_UUID};
use crate::tasks::command::CommandInbox;

pub type TgmBtDriver = BtDriver<'static, Ble>;
type Gap = Arc<EspBleGap<'static, Ble, Arc<TgmBtDriver>>>;
type Gatts = Arc<EspGatts<'static, Ble, Arc<TgmBtDriver>>>;

const APP_ID: u16 = 0;
const CCC_UUID: u16 = 0x2902;
const DEFAULT_MTU: u16 = 23;
/// Room for a full optical frame in one notification.
const LOCAL_MTU: u16 = MAX_PAYLOAD_LEN as u16 + 3;

// ---------------------------------------------------------------------------
// Attribute table
// ---------------------------------------------------------------------------

struct CharDef {
    uuid: u128,
    read: Option<Attribute>,
    notify: Option<Channel>,
    command: Option<CommandKind>,
}

const CHARACTERISTICS: &[CharDef] = &[
    CharDef {
        uuid: Channel::Optical.uuid(),
        read: None,
        notify: Some(Channel::Optical),
        command: None,
    },
    CharDef {
        uuid: Channel::Motion.uuid(),
        read: None,
        notify: Some(Channel::Motion),
        command: None,
    },
    CharDef {
        uuid: Channel::Temperature.uuid(),
        read: None,
        notify: Some(Channel::Temperature),
        command: None,
    },
    CharDef {
        uuid: Attribute::Battery.uuid(),
        read: Some(Attribute::Battery),
        notify: Some(Channel::Battery),
        command: None,
    },
    CharDef {
        uuid: Attribute::DeviceId.uuid(),
        read: Some(Attribute::DeviceId),
        notify: None,
        command: None,
    },
    CharDef {
        uuid: Attribute::FirmwareVersion.uuid(),
        read: Some(Attribute::FirmwareVersion),
        notify: None,
        command: None,
    },
    CharDef {
        uuid: Channel::RegisterRead.uuid(),
        read: None,
        notify: Some(Channel::RegisterRead),
        command: Some(CommandKind::Read),
    },
    CharDef {
        uuid: Channel::RegisterWrite.uuid(),
        read: None,
        notify: Some(Channel::RegisterWrite),
        command: Some(CommandKind::Write),
    },
];

/// Service declaration, two handles per characteristic, one per CCC descriptor.
const NUM_HANDLES: u16 = 1 + 2 * CHARACTERISTICS.len() as u16 + 6;

impl CharDef {
    fn properties(&self) -> EnumSet<Property> {
        let mut props = EnumSet::empty();
        if self.read.is_some() {
            props |= Property::Read;
        }
        if self.notify.is_some() {
            props |= Property::Notify;
        }
        if self.command.is_some() {
            props |= Property::Write;
        }
        props
    }

    fn permissions(&self) -> EnumSet<Permission> {
        let mut perms = EnumSet::empty();
        if self.read.is_some() {
            perms |= Permission::Read;
        }
        if self.command.is_some() {
            perms |= Permission::Write;
        }
        perms
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    gatt_if: Option<GattInterface>,
    /// Index into `CHARACTERISTICS` of the characteristic being registered.
    registering: usize,
    value_handles: [Option<Handle>; CHARACTERISTICS.len()],
    ccc_handles: [Option<Handle>; CHARACTERISTICS.len()],
    conn: Option<(ConnectionId, BdAddr)>,
    mtu: u16,
}

impl State {
    fn by_value_handle(&self, handle: Handle) -> Option<&'static CharDef> {
        self.value_handles
            .iter()
            .position(|&h| h == Some(handle))
            .map(|i| &CHARACTERISTICS[i])
    }

    fn by_ccc_handle(&self, handle: Handle) -> Option<&'static CharDef> {
        self.ccc_handles
            .iter()
            .position(|&h| h == Some(handle))
            .map(|i| &CHARACTERISTICS[i])
    }

    fn notify_handle(&self, channel: Channel) -> Option<Handle> {
        CHARACTERISTICS
            .iter()
            .position(|c| c.notify == Some(channel))
            .and_then(|i| self.value_handles[i])
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TgmServer {
    gap: Gap,
    gatts: Gatts,
    state: Arc<Mutex<State>>,
    subscriptions: Arc<Subscriptions>,
    attributes: Arc<PullAttributes>,
    inbox: Arc<CommandInbox>,
}

impl TgmServer {
    pub fn new(
        driver: Arc<TgmBtDriver>,
        subscriptions: Arc<Subscriptions>,
        attributes: PullAttributes,
        inbox: Arc<CommandInbox>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            gap: Arc::new(EspBleGap::new(driver.clone())?),
            gatts: Arc::new(EspGatts::new(driver)?),
            state: Arc::new(Mutex::new(State {
                mtu: DEFAULT_MTU,
                ..Default::default()
            })),
            subscriptions,
            attributes: Arc::new(attributes),
            inbox,
        })
    }

    /// Hook into the stack and register the GATT application. Advertising
    /// starts once the service is up.
    pub fn start(&self) -> anyhow::Result<()> {
        let server = self.clone();
        self.gap.subscribe(move |event| {
            if let Err(e) = server.on_gap_event(event) {
                log::error!("GAP event failed: {}", e);
            }
        })?;

        let server = self.clone();
        self.gatts.subscribe(move |(gatt_if, event)| {
            if let Err(e) = server.on_gatts_event(gatt_if, event) {
                log::error!("GATT event failed: {}", e);
            }
        })?;

        esp_idf_svc::sys::esp!(unsafe { esp_idf_svc::sys::esp_ble_gatt_set_local_mtu(LOCAL_MTU) })?;
        self.gatts.register_app(APP_ID)?;
        log::info!("Bluetooth initialized");
        Ok(())
    }

    pub fn transport(&self) -> BleTransport {
        BleTransport {
            server: self.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_gap_event(&self, event: BleGapEvent) -> Result<(), EspError> {
        if let BleGapEvent::AdvertisingConfigured(status) = event {
            check_bt(status)?;
            self.gap.start_advertising()?;
            log::info!("Advertising started");
        }
        Ok(())
    }

    fn on_gatts_event(&self, gatt_if: GattInterface, event: GattsEvent) -> Result<(), EspError> {
        match event {
            GattsEvent::ServiceRegistered { status, app_id } => {
                check_gatt(status)?;
                if app_id == APP_ID {
                    self.create_service(gatt_if)?;
                }
            }
            GattsEvent::ServiceCreated {
                status,
                service_handle,
                ..
            } => {
                check_gatt(status)?;
                self.gatts.start_service(service_handle)?;
                self.add_next_characteristic(service_handle)?;
            }
            GattsEvent::CharacteristicAdded {
                status,
                attr_handle,
                service_handle,
                ..
            } => {
                check_gatt(status)?;
                self.on_characteristic_added(service_handle, attr_handle)?;
            }
            GattsEvent::DescriptorAdded {
                status,
                attr_handle,
                service_handle,
                ..
            } => {
                check_gatt(status)?;
                {
                    let mut state = self.state();
                    let index = state.registering;
                    state.ccc_handles[index] = Some(attr_handle);
                    state.registering += 1;
                }
                self.add_next_characteristic(service_handle)?;
            }
            GattsEvent::PeerConnected { conn_id, addr, .. } => {
                let mut state = self.state();
                state.conn = Some((conn_id, addr));
                state.mtu = DEFAULT_MTU;
                log::info!("Connected {}", addr);
            }
            GattsEvent::PeerDisconnected { addr, .. } => {
                {
                    let mut state = self.state();
                    if matches!(state.conn, Some((_, a)) if a == addr) {
                        state.conn = None;
                    }
                }
                self.subscriptions.clear();
                log::info!("Disconnected {}", addr);
                self.gap.start_advertising()?;
            }
            GattsEvent::Mtu { conn_id, mtu } => {
                let mut state = self.state();
                if matches!(state.conn, Some((c, _)) if c == conn_id) {
                    state.mtu = mtu;
                }
                log::info!("MTU exchanged: {}", mtu);
            }
            GattsEvent::Read {
                conn_id,
                trans_id,
                handle,
                offset,
                need_rsp,
                ..
            } => {
                if need_rsp {
                    self.on_read(gatt_if, conn_id, trans_id, handle, offset)?;
                }
            }
            GattsEvent::Write {
                conn_id,
                trans_id,
                handle,
                offset,
                need_rsp,
                value,
                ..
            } => {
                let status = self.on_write(handle, offset, value);
                if need_rsp {
                    self.gatts.send_response(gatt_if, conn_id, trans_id, status, None)?;
                }
            }
            _ => (),
        }
        Ok(())
    }

    fn create_service(&self, gatt_if: GattInterface) -> Result<(), EspError> {
        self.state().gatt_if = Some(gatt_if);

        self.gap.set_device_name(DEVICE_NAME)?;
        self.gap.set_adv_conf(&AdvConfiguration {
            include_name: true,
            include_txpower: false,
            flag: 2,
            service_uuid: Some(BtUuid::uuid128(TGM_SERVICE_UUID)),
            ..Default::default()
        })?;
        self.gatts.create_service(
            gatt_if,
            &GattServiceId {
                id: GattId {
                    uuid: BtUuid::uuid128(TGM_SERVICE_UUID),
                    inst_id: 0,
                },
                is_primary: true,
            },
            NUM_HANDLES,
        )?;
        Ok(())
    }

    /// Characteristics are added one at a time so each CCC descriptor lands
    /// on the characteristic it belongs to.
    fn add_next_characteristic(&self, service_handle: Handle) -> Result<(), EspError> {
        let index = self.state().registering;
        let Some(def) = CHARACTERISTICS.get(index) else {
            log::info!("TGM service ready");
            return Ok(());
        };

        self.gatts.add_characteristic(
            service_handle,
            &GattCharacteristic {
                uuid: BtUuid::uuid128(def.uuid),
                permissions: def.permissions(),
                properties: def.properties(),
                max_len: MAX_PAYLOAD_LEN,
                auto_rsp: AutoResponse::ByApp,
            },
            &[],
        )?;
        Ok(())
    }

    fn on_characteristic_added(
        &self,
        service_handle: Handle,
        attr_handle: Handle,
    ) -> Result<(), EspError> {
        let def = {
            let mut state = self.state();
            let index = state.registering;
            state.value_handles[index] = Some(attr_handle);
            let def = &CHARACTERISTICS[index];
            if def.notify.is_none() {
                state.registering += 1;
            }
            def
        };

        if def.notify.is_some() {
            self.gatts.add_descriptor(
                service_handle,
                &GattDescriptor {
                    uuid: BtUuid::uuid16(CCC_UUID),
                    permissions: enum_set!(Permission::Read | Permission::Write),
                },
            )?;
        } else {
            self.add_next_characteristic(service_handle)?;
        }
        Ok(())
    }

    fn on_read(
        &self,
        gatt_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransferId,
        handle: Handle,
        offset: u16,
    ) -> Result<(), EspError> {
        let (def, ccc) = {
            let state = self.state();
            (state.by_value_handle(handle), state.by_ccc_handle(handle))
        };

        let value = match (def.and_then(|d| d.read), ccc.and_then(|d| d.notify)) {
            (Some(attribute), _) => self.attributes.read(attribute),
            (None, Some(channel)) => {
                let mut ccc = crate::events::Payload::new();
                let bits = u16::from(self.subscriptions.is_subscribed(channel));
                let _ = ccc.extend_from_slice(&bits.to_le_bytes());
                ccc
            }
            (None, None) => {
                return self
                    .gatts
                    .send_response(gatt_if, conn_id, trans_id, GattStatus::ReadNotPermit, None);
            }
        };

        let offset_bytes = usize::from(offset);
        if offset_bytes > value.len() {
            return self
                .gatts
                .send_response(gatt_if, conn_id, trans_id, GattStatus::InvalidOffset, None);
        }

        let mut response = GattResponse::new();
        response
            .attr_handle(handle)
            .auth_req(0)
            .offset(offset)
            .value(&value[offset_bytes..])?;
        self.gatts
            .send_response(gatt_if, conn_id, trans_id, GattStatus::Ok, Some(&response))
    }

    fn on_write(&self, handle: Handle, offset: u16, value: &[u8]) -> GattStatus {
        let (def, ccc) = {
            let state = self.state();
            (state.by_value_handle(handle), state.by_ccc_handle(handle))
        };

        if let Some(channel) = ccc.and_then(|d| d.notify) {
            return match value {
                [lo, hi] if offset == 0 => {
                    self.subscriptions
                        .on_ccc_write(channel, u16::from_le_bytes([*lo, *hi]));
                    GattStatus::Ok
                }
                _ if offset != 0 => GattStatus::InvalidOffset,
                _ => GattStatus::InvalidAttrLen,
            };
        }

        match def.and_then(|d| d.command) {
            Some(kind) => match self.inbox.on_write(kind, offset, value) {
                Ok(()) => GattStatus::Ok,
                Err(e) => att_status(e),
            },
            None => GattStatus::WriteNotPermit,
        }
    }
}

/// ATT 0x07 for a bad offset, 0x0D for a bad length.
fn att_status(e: InvalidCommand) -> GattStatus {
    match e {
        InvalidCommand::InvalidOffset(_) => GattStatus::InvalidOffset,
        InvalidCommand::InvalidAttributeLength(_) => GattStatus::InvalidAttrLen,
    }
}

fn check_bt(status: BtStatus) -> Result<(), EspError> {
    if !matches!(status, BtStatus::Success) {
        log::warn!("Bluetooth status {:?}", status);
        return Err(EspError::from_infallible::<ESP_FAIL>());
    }
    Ok(())
}

fn check_gatt(status: GattStatus) -> Result<(), EspError> {
    if !matches!(status, GattStatus::Ok) {
        log::warn!("GATT status {:?}", status);
        return Err(EspError::from_infallible::<ESP_FAIL>());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Notification path used by the work queue thread.
pub struct BleTransport {
    server: TgmServer,
}

impl Transport for BleTransport {
    fn notify(&mut self, channel: Channel, payload: &[u8]) -> Result<(), TransportError> {
        let (gatt_if, conn_id, handle, mtu) = {
            let state = self.server.state();
            let (conn_id, _) = state.conn.ok_or(TransportError::NotConnected)?;
            let gatt_if = state.gatt_if.ok_or(TransportError::NotConnected)?;
            let handle = state
                .notify_handle(channel)
                .ok_or_else(|| TransportError::Link(format!("{} not registered", channel.name())))?;
            (gatt_if, conn_id, handle, state.mtu)
        };

        if payload.len() > usize::from(mtu.saturating_sub(3)) {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }

        self.server
            .gatts
            .notify(gatt_if, conn_id, handle, payload)
            .map_err(|e| TransportError::Link(e.to_string()))
    }
}
