//! Peer registry - the single candidate peer held between discovery and
//! connection.
//!
//! The registry owns the record exclusively.  It is replaced on every
//! discovery round and released on successful negotiation, on connect
//! failure and on teardown; nothing else keeps a copy around.

use heapless::String;

use crate::ble::{Address, Advertisement};

/// A discovered node advertising the counter service.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerRecord {
    pub address: Address,
    pub name: String<32>,
    /// The report that matched, kept for the connect call.
    pub advertisement: Advertisement,
}

impl PeerRecord {
    pub fn from_advertisement(adv: &Advertisement) -> Self {
        Self {
            address: adv.address,
            name: adv.name(),
            advertisement: adv.clone(),
        }
    }
}

/// Holds at most one [`PeerRecord`].
#[derive(Default)]
pub struct PeerRegistry {
    slot: Option<PeerRecord>,
}

impl PeerRegistry {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    /// Store a new candidate, dropping any previous one.
    pub fn store(&mut self, record: PeerRecord) {
        if let Some(old) = self.slot.replace(record) {
            debug!("peer registry: replaced {}", old.address);
        }
    }

    pub fn get(&self) -> Option<&PeerRecord> {
        self.slot.as_ref()
    }

    /// Release the held record, if any.
    pub fn free(&mut self) {
        self.slot = None;
    }
}
