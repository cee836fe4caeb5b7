//! Bluetooth Low Energy subsystem.
//!
//! Every node is simultaneously a GATT server (advertiser / acceptor) and
//! a GATT client (scanner / initiator):
//!
//! 1. **Radio facade** - the narrow async interface the supervisor drives
//!    (advertising, scanning, local characteristic values, outbound
//!    sessions).  The firmware implements it on the S140 SoftDevice; tests
//!    implement it on an in-memory world.
//! 2. **Advertisement parser** - recognises our service UUID and the local
//!    name in raw AD structures, and builds our own payloads.
//! 3. **Peer registry** - holds the single candidate peer between
//!    discovery and connection.

pub mod adv_parser;
pub mod peer;
pub mod radio;

use core::fmt;

use heapless::{String, Vec};

use crate::config::{
    ADV_PAYLOAD_MAX, COUNTER_CHAR_UUID, SERVICE_UUID, SYNC_CHAR_UUID, TIMESTAMP_CHAR_UUID,
};

/// 48-bit BLE device address, most significant octet first.
///
/// The derived ordering is the lexical order of the usual
/// `AA:BB:CC:DD:EE:FF` rendering, which is what the collision back-off and
/// the role tie-break compare.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 6]);

impl Address {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Build from the little-endian layout used on air and by the SoftDevice.
    pub fn from_le_bytes(mut le: [u8; 6]) -> Self {
        le.reverse();
        Self(le)
    }

    pub fn to_le_bytes(&self) -> [u8; 6] {
        let mut le = self.0;
        le.reverse();
        le
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Address {
    fn format(&self, f: defmt::Formatter) {
        let o = &self.0;
        defmt::write!(
            f,
            "{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}",
            o[0],
            o[1],
            o[2],
            o[3],
            o[4],
            o[5]
        )
    }
}

/// One advertising or scan-response report.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Advertisement {
    pub address: Address,
    /// Received Signal Strength Indicator (dBm).
    pub rssi: i8,
    /// Raw AD structures, truncated to the legacy payload size.
    pub data: Vec<u8, ADV_PAYLOAD_MAX>,
}

impl Advertisement {
    pub fn new(address: Address, rssi: i8, data: &[u8]) -> Self {
        let take = data.len().min(ADV_PAYLOAD_MAX);
        let mut payload = Vec::new();
        // Cannot fail: `take` never exceeds the capacity.
        let _ = payload.extend_from_slice(&data[..take]);
        Self {
            address,
            rssi,
            data: payload,
        }
    }

    /// True when the report lists our service UUID.
    pub fn has_service(&self) -> bool {
        adv_parser::contains_service_uuid(&self.data, SERVICE_UUID)
    }

    pub fn name(&self) -> String<32> {
        adv_parser::extract_device_name(&self.data)
    }
}

/// The three characteristics of the counter service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Characteristic {
    /// Read + notify, 4-byte LE counter.
    Counter,
    /// Read + write, 8-byte LE sync packet.
    Sync,
    /// Read, 4-byte LE uptime.
    Timestamp,
}

impl Characteristic {
    pub const fn uuid(self) -> u128 {
        match self {
            Characteristic::Counter => COUNTER_CHAR_UUID,
            Characteristic::Sync => SYNC_CHAR_UUID,
            Characteristic::Timestamp => TIMESTAMP_CHAR_UUID,
        }
    }
}
