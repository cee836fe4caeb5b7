//! Radio facade - the only surface of the BLE stack the supervisor sees.
//!
//! Outbound operations (scan, connect, characteristic RPCs) are async and
//! bounded.  Inbound activity (server-side connect/disconnect, sync writes,
//! client-side disconnects) never comes through this trait: the platform
//! raises it on [`crate::event::Events`] and the supervisor loop drains it.
//!
//! The GATT table itself (service + counter/sync/timestamp characteristics,
//! CCCD on counter) is registered when the platform radio is constructed,
//! and the radio address is set there from the node identity.

#![allow(async_fn_in_trait)]

use crate::ble::peer::PeerRecord;
use crate::ble::{Advertisement, Characteristic};
use crate::error::{BleError, Error};

/// Local side of the stack: GAP roles plus our own GATT server.
pub trait Radio {
    type Session: Session;

    /// Start (or keep) connectable advertising of the counter service.
    fn start_advertising(&mut self) -> Result<(), BleError>;

    fn stop_advertising(&mut self);

    /// Active scan for up to `window_ms`.
    ///
    /// `on_report` sees every report; returning `true` stops the scan early.
    async fn scan<F>(&mut self, window_ms: u32, on_report: F) -> Result<(), BleError>
    where
        F: FnMut(&Advertisement) -> bool;

    fn stop_scan(&mut self);

    /// Replace the value of one of our own characteristics.
    fn set_char_value(&mut self, ch: Characteristic, value: &[u8]) -> Result<(), BleError>;

    /// Notify subscribed inbound peers of the current value.
    fn notify(&mut self, ch: Characteristic) -> Result<(), BleError>;

    /// Connect to `peer` and discover the counter service on it.
    ///
    /// Unbounded on its own; the supervisor races it against
    /// `CONNECTION_TIMEOUT_MS`.
    async fn connect(&mut self, peer: &PeerRecord) -> Result<Self::Session, BleError>;

    /// Force-disconnect every inbound (server-side) link.
    fn disconnect_inbound(&mut self);
}

/// An outbound GATT client session with discovered remote characteristics.
pub trait Session {
    /// Read a remote characteristic into `buf`, returning the value length.
    async fn read(&mut self, ch: Characteristic, buf: &mut [u8]) -> Result<usize, BleError>;

    async fn write(&mut self, ch: Characteristic, value: &[u8]) -> Result<(), BleError>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);
}

/// Read a 4-byte little-endian characteristic (counter or timestamp).
pub async fn read_u32<S: Session>(session: &mut S, ch: Characteristic) -> Result<u32, Error> {
    let mut buf = [0u8; 8];
    let len = session.read(ch, &mut buf).await?;
    if len != 4 {
        return Err(match ch {
            Characteristic::Timestamp => Error::MalformedTimestamp { len },
            _ => Error::Ble(BleError::ReadFailed),
        });
    }
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}
