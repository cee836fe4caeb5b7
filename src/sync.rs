//! Sync engine - the shared counter, its tick phase, and the MASTER→CLIENT
//! sync packet.
//!
//! Wire format of the sync packet (8 bytes, little-endian):
//!
//! | Offset | Field                    | Meaning                                   |
//! |--------|--------------------------|-------------------------------------------|
//! | 0      | `counter: u32`           | MASTER's counter at the time of writing   |
//! | 4      | `time_since_last_update` | ms since the MASTER's last local increment |

use crate::clock::Periodic;
use crate::config::{COUNTER_INTERVAL_MS, SYNC_INTERVAL_MS};
use crate::error::Error;

/// Size of an encoded [`SyncPacket`].
pub const SYNC_PACKET_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncPacket {
    pub counter: u32,
    pub time_since_last_update: u32,
}

impl SyncPacket {
    pub const fn new(counter: u32, time_since_last_update: u32) -> Self {
        Self {
            counter,
            time_since_last_update,
        }
    }

    pub fn encode(&self) -> [u8; SYNC_PACKET_LEN] {
        let mut out = [0u8; SYNC_PACKET_LEN];
        out[..4].copy_from_slice(&self.counter.to_le_bytes());
        out[4..].copy_from_slice(&self.time_since_last_update.to_le_bytes());
        out
    }

    /// Decode exactly [`SYNC_PACKET_LEN`] bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let raw: &[u8; SYNC_PACKET_LEN] = bytes
            .try_into()
            .map_err(|_| Error::MalformedSyncPacket { len: bytes.len() })?;
        Ok(Self {
            counter: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            time_since_last_update: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }
}

/// What ingesting a sync packet did to the local counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ingested {
    pub previous: u32,
    pub counter: u32,
    /// The MASTER's reported time since its last increment.
    pub delta: u32,
    /// `delta` exceeded the tick period and the phase was clamped.
    pub clamped: bool,
    /// Time until the next local tick.
    pub next_tick_in: u32,
}

/// Counter state plus the tick and sync timers of one node.
pub struct SyncEngine {
    counter: u32,
    tick: Periodic,
    sync: Periodic,
}

impl SyncEngine {
    pub const fn new(now: u32) -> Self {
        Self {
            counter: 0,
            tick: Periodic::new(COUNTER_INTERVAL_MS, now),
            sync: Periodic::new(SYNC_INTERVAL_MS, now),
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn tick_due(&self, now: u32) -> bool {
        self.tick.is_due(now)
    }

    /// Increment the counter and consume one tick period.
    pub fn tick(&mut self) -> u32 {
        self.counter = self.counter.wrapping_add(1);
        self.tick.advance();
        self.counter
    }

    pub fn sync_due(&self, now: u32) -> bool {
        self.sync.is_due(now)
    }

    /// Start the next sync period at `now`, whether or not a sync ran.
    pub fn sync_period_done(&mut self, now: u32) {
        self.sync.restart(now);
    }

    pub fn next_tick_in(&self, now: u32) -> u32 {
        self.tick.period().saturating_sub(self.tick.since_last(now))
    }

    /// Packet a MASTER writes at `now`.
    pub fn packet(&self, now: u32) -> SyncPacket {
        SyncPacket::new(self.counter, self.tick.since_last(now))
    }

    /// Adopt a MASTER's packet and align the tick phase with it.
    ///
    /// The next local tick lands at `now + (COUNTER_INTERVAL - delta)`.  A
    /// stale packet (`delta > COUNTER_INTERVAL`) is clamped so the next
    /// tick fires 1 ms from now.
    pub fn ingest(&mut self, packet: SyncPacket, now: u32) -> Ingested {
        let previous = self.counter;
        let delta = packet.time_since_last_update;
        let clamped = delta > COUNTER_INTERVAL_MS;
        let behind = if clamped { COUNTER_INTERVAL_MS - 1 } else { delta };

        self.counter = packet.counter;
        self.tick.set_last(now.wrapping_sub(behind));

        Ingested {
            previous,
            counter: self.counter,
            delta,
            clamped,
            next_tick_in: self.next_tick_in(now),
        }
    }

    /// Poll path: take the remote value without touching the phase.
    ///
    /// Returns `true` when the local counter changed.
    pub fn adopt(&mut self, remote: u32) -> bool {
        if remote == self.counter {
            return false;
        }
        self.counter = remote;
        true
    }
}
