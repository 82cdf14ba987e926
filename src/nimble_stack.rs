use std::sync::{Arc, Mutex as StdMutex};

use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{
    BLEAdvertisementData, BLECharacteristic, BLEDevice, NimbleProperties, NimbleSub,
};
use log::{debug, warn};
use uuid::Uuid;

use crate::gatt_service::{ChannelHooks, RX_CHAR_UUID, SERVICE_UUID, TX_CHAR_UUID};
use crate::radio_stack::{GapEvent, RadioStack, ServiceHandles, StackError};

// NimBLE host error codes treated as expected lifecycle races.
const BLE_HS_EALREADY: i32 = 2;
const BLE_HS_EINVAL: i32 = 3;
const BLE_HS_ENOTCONN: i32 = 7;

/// NimBLE assigns ATT handles internally and the wrapper does not expose
/// them. The channel only needs a stable identifier to match subscribe
/// events against, so this binding reports its own.
const TX_ATTR_ID: u16 = 1;

/// [`RadioStack`] over the NimBLE host via `esp32-nimble`.
///
/// Owns the `BLEDevice` singleton for the duration of a session. The
/// wrapper surfaces neither failed connection attempts nor advertising
/// completion, so those [`GapEvent`] variants never originate here and
/// disconnect events carry the re-advertising duty alone.
pub struct NimbleStack {
    inner: StdMutex<Inner>,
}

#[derive(Default)]
struct Inner {
    device: Option<&'static BLEDevice>,
    tx_char: Option<Arc<NimbleMutex<BLECharacteristic>>>,
}

impl NimbleStack {
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(Inner::default()),
        }
    }

    fn device(&self) -> Result<&'static BLEDevice, StackError> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .device
            .ok_or(StackError::Failed(BLE_HS_EINVAL))
    }
}

impl Default for NimbleStack {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioStack for NimbleStack {
    fn bring_up(
        &self,
        device_name: &str,
        hooks: Arc<ChannelHooks>,
    ) -> Result<ServiceHandles, StackError> {
        let device = BLEDevice::take();
        BLEDevice::set_device_name(device_name).map_err(classify)?;

        let server = device.get_server();
        // The channel core owns re-advertising through its GAP-event
        // handling.
        server.advertise_on_disconnect(false);
        {
            let hooks = hooks.clone();
            server.on_connect(move |server, desc| {
                hooks.gap_event(GapEvent::Connected {
                    conn: desc.conn_handle(),
                });
                if let Err(err) = server.update_conn_params(desc.conn_handle(), 24, 48, 0, 60) {
                    warn!("Connection parameter update rejected: {:?}", err);
                }
            });
        }
        {
            let hooks = hooks.clone();
            server.on_disconnect(move |desc, reason| {
                let code = match reason {
                    Ok(()) => 0,
                    Err(err) => err.code() as i32,
                };
                hooks.gap_event(GapEvent::Disconnected {
                    conn: desc.conn_handle(),
                    reason: code,
                });
            });
        }

        let service = server.create_service(ble_uuid(&SERVICE_UUID));

        let rx_char = service
            .lock()
            .create_characteristic(ble_uuid(&RX_CHAR_UUID), NimbleProperties::WRITE);
        {
            let hooks = hooks.clone();
            rx_char.lock().on_write(move |args| {
                hooks.inbound_write(args.recv_data());
            });
        }

        let tx_char = service.lock().create_characteristic(
            ble_uuid(&TX_CHAR_UUID),
            NimbleProperties::READ | NimbleProperties::NOTIFY,
        );
        {
            let hooks = hooks.clone();
            tx_char.lock().on_read(move |value, _desc| {
                if let Some(chunk) = hooks.outbound_read() {
                    value.set_value(&chunk);
                }
            });
        }
        {
            let hooks = hooks.clone();
            tx_char.lock().on_subscribe(move |_char, desc, sub| {
                hooks.gap_event(GapEvent::Subscribed {
                    conn: desc.conn_handle(),
                    attr: TX_ATTR_ID,
                    notify: sub.contains(NimbleSub::NOTIFY),
                });
            });
        }

        device
            .get_advertising()
            .lock()
            .set_data(
                BLEAdvertisementData::new()
                    .name(device_name)
                    .add_service_uuid(ble_uuid(&SERVICE_UUID)),
            )
            .map_err(classify)?;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.device = Some(device);
        inner.tx_char = Some(tx_char);
        Ok(ServiceHandles {
            tx_handle: TX_ATTR_ID,
        })
    }

    fn tear_down(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tx_char = None;
        if let Some(device) = inner.device.take() {
            let _ = device.get_advertising().lock().stop();
            debug!("Releasing NimBLE device");
            let _ = BLEDevice::deinit();
        }
    }

    fn start_advertising(&self) -> Result<(), StackError> {
        self.device()?
            .get_advertising()
            .lock()
            .start()
            .map_err(classify)
    }

    fn stop_advertising(&self) -> Result<(), StackError> {
        self.device()?
            .get_advertising()
            .lock()
            .stop()
            .map_err(classify)
    }

    fn notify_chunk(&self, _conn: u16, _attr: u16, chunk: &[u8]) -> Result<(), StackError> {
        let tx_char = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tx_char
            .clone()
            .ok_or(StackError::Failed(BLE_HS_EINVAL))?;
        let mut tx_char = tx_char.lock();
        tx_char.set_value(chunk);
        tx_char.notify();
        Ok(())
    }

    fn disconnect(&self, conn: u16) -> Result<(), StackError> {
        self.device()?.get_server().disconnect(conn).map_err(classify)
    }
}

/// NimBLE stores 128-bit UUIDs little-endian.
fn ble_uuid(uuid: &Uuid) -> BleUuid {
    let mut bytes = *uuid.as_bytes();
    bytes.reverse();
    BleUuid::Uuid128(bytes)
}

fn classify(err: esp32_nimble::BLEError) -> StackError {
    match err.code() as i32 {
        code @ (BLE_HS_EALREADY | BLE_HS_ENOTCONN) => StackError::Advisory(code),
        code => StackError::Failed(code),
    }
}
