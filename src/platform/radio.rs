//! [`Radio`] on the S140 SoftDevice.
//!
//! Scanning and outbound connections run inline in the supervisor task.
//! Advertising and inbound links are owned by their own tasks (see
//! `platform::advertiser_task` / `platform::inbound_link_task`); the radio
//! only flips the shared controls they watch.

use blesync::ble::peer::PeerRecord;
use blesync::ble::radio::{Radio, Session};
use blesync::ble::{Address, Advertisement, Characteristic};
use blesync::config::{
    BLE_CONN_INTERVAL_MAX, BLE_CONN_INTERVAL_MIN, BLE_SLAVE_LATENCY, BLE_SUP_TIMEOUT,
};
use blesync::error::BleError;
use defmt::{debug, info, warn};
use heapless::Vec;
use nrf_softdevice::ble::{central, gatt_client, AddressType, Connection};
use nrf_softdevice::{raw, Softdevice};

use super::gatt::{CounterServiceClient, Server};
use super::{AdvertisingControl, InboundLinks, OutboundWatch};

pub struct SoftdeviceRadio {
    sd: &'static Softdevice,
    server: &'static Server,
    links: &'static InboundLinks,
    adv: &'static AdvertisingControl,
    outbound: &'static OutboundWatch,
    /// Last value written to the counter characteristic, for notifications.
    counter: u32,
}

impl SoftdeviceRadio {
    pub fn new(
        sd: &'static Softdevice,
        server: &'static Server,
        links: &'static InboundLinks,
        adv: &'static AdvertisingControl,
        outbound: &'static OutboundWatch,
    ) -> Self {
        Self {
            sd,
            server,
            links,
            adv,
            outbound,
            counter: 0,
        }
    }
}

fn le_u32(value: &[u8]) -> Result<u32, BleError> {
    let raw: [u8; 4] = value.try_into().map_err(|_| BleError::WriteFailed)?;
    Ok(u32::from_le_bytes(raw))
}

impl Radio for SoftdeviceRadio {
    type Session = SoftdeviceSession;

    fn start_advertising(&mut self) -> Result<(), BleError> {
        self.adv.set(true);
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.adv.set(false);
    }

    async fn scan<F>(&mut self, window_ms: u32, mut on_report: F) -> Result<(), BleError>
    where
        F: FnMut(&Advertisement) -> bool,
    {
        let config = central::ScanConfig {
            // Active scan to get the scan response carrying the name.
            active: true,
            // 10 ms units.
            timeout: (window_ms / 10) as u16,
            ..Default::default()
        };

        let result = central::scan(self.sd, &config, |params| {
            let data = unsafe {
                core::slice::from_raw_parts(params.data.p_data, params.data.len as usize)
            };
            let adv = Advertisement::new(
                Address::from_le_bytes(params.peer_addr.addr),
                params.rssi,
                data,
            );
            if on_report(&adv) {
                Some(())
            } else {
                None
            }
        })
        .await;

        match result {
            Ok(()) | Err(central::ScanError::Timeout) => Ok(()),
            Err(e) => {
                warn!("scan failed: {:?}", e);
                Err(BleError::ScanFailed)
            }
        }
    }

    fn stop_scan(&mut self) {
        // The scan procedure ends together with the future driving it.
    }

    fn set_char_value(&mut self, ch: Characteristic, value: &[u8]) -> Result<(), BleError> {
        let service = &self.server.counter;
        let result = match ch {
            Characteristic::Counter => {
                let counter = le_u32(value)?;
                self.counter = counter;
                service.counter_set(&counter)
            }
            Characteristic::Timestamp => service.timestamp_set(&le_u32(value)?),
            Characteristic::Sync => {
                let packet = Vec::from_slice(value).map_err(|_| BleError::WriteFailed)?;
                service.sync_set(&packet)
            }
        };
        result.map_err(|_| BleError::WriteFailed)
    }

    fn notify(&mut self, ch: Characteristic) -> Result<(), BleError> {
        if ch != Characteristic::Counter {
            return Err(BleError::NotifyFailed);
        }
        let service = &self.server.counter;
        let value = self.counter;
        let mut result = Ok(());
        self.links.for_each(|conn| {
            // Fails when the peer never enabled the CCCD.
            if service.counter_notify(conn, &value).is_err() {
                result = Err(BleError::NotifyFailed);
            }
        });
        result
    }

    async fn connect(&mut self, peer: &PeerRecord) -> Result<SoftdeviceSession, BleError> {
        let address = nrf_softdevice::ble::Address::new(
            AddressType::RandomStatic,
            peer.address.to_le_bytes(),
        );
        let whitelist = [&address];
        let config = central::ConnectConfig {
            scan_config: central::ScanConfig {
                whitelist: Some(&whitelist),
                ..Default::default()
            },
            conn_params: raw::ble_gap_conn_params_t {
                min_conn_interval: BLE_CONN_INTERVAL_MIN,
                max_conn_interval: BLE_CONN_INTERVAL_MAX,
                slave_latency: BLE_SLAVE_LATENCY,
                conn_sup_timeout: BLE_SUP_TIMEOUT,
            },
            ..Default::default()
        };

        let conn = central::connect(self.sd, &config).await.map_err(|e| {
            warn!("connect error: {:?}", e);
            BleError::ConnectFailed
        })?;
        debug!("link up, discovering counter service");

        let client: CounterServiceClient = match gatt_client::discover(&conn).await {
            Ok(client) => client,
            Err(e) => {
                warn!("discovery error: {:?}", e);
                let _ = conn.disconnect();
                return Err(BleError::DiscoveryFailed);
            }
        };
        info!("counter service discovered on {}", peer.address);

        self.outbound.watch(conn.clone());
        Ok(SoftdeviceSession { conn, client })
    }

    fn disconnect_inbound(&mut self) {
        self.links.for_each(|conn| {
            let _ = conn.disconnect();
        });
    }
}

/// Outbound link plus the discovered remote characteristics.
pub struct SoftdeviceSession {
    conn: Connection,
    client: CounterServiceClient,
}

impl Session for SoftdeviceSession {
    async fn read(&mut self, ch: Characteristic, buf: &mut [u8]) -> Result<usize, BleError> {
        let value = match ch {
            Characteristic::Counter => self.client.counter_read().await,
            Characteristic::Sync => self.client.sync_read().await,
            Characteristic::Timestamp => self.client.timestamp_read().await,
        }
        .map_err(|_| BleError::ReadFailed)?;

        let len = value.len().min(buf.len());
        buf[..len].copy_from_slice(&value[..len]);
        Ok(value.len())
    }

    async fn write(&mut self, ch: Characteristic, value: &[u8]) -> Result<(), BleError> {
        if ch != Characteristic::Sync {
            return Err(BleError::WriteFailed);
        }
        let packet = Vec::from_slice(value).map_err(|_| BleError::WriteFailed)?;
        self.client
            .sync_write(&packet)
            .await
            .map_err(|_| BleError::WriteFailed)
    }

    fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    fn disconnect(&mut self) {
        let _ = self.conn.disconnect();
    }
}
