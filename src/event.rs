//! Callback-to-loop handoff.
//!
//! Radio callbacks must not block and must not call back into the radio
//! facade.  They only raise bits in [`EventFlags`], bump the inbound link
//! count, or drop the raw bytes of a sync write into the [`SyncMailbox`].
//! The supervisor loop drains all of it at the top of every iteration.
//!
//! Everything here is lock-free atomics so a single `static Events` can be
//! shared between the SoftDevice event tasks and the supervisor.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::error::Error;
use crate::sync::{SyncPacket, SYNC_PACKET_LEN};

/// One callback-posted event kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Flag {
    /// An inbound link arrived; the loop must check whether a role exists.
    RoleNegotiationNeeded = 1 << 0,
    ServerConnected = 1 << 1,
    ServerDisconnected = 1 << 2,
    SyncWritten = 1 << 3,
    ClientDisconnected = 1 << 4,
}

impl Flag {
    /// Order in which the loop handles pending flags.
    pub const DRAIN_ORDER: [Flag; 5] = [
        Flag::RoleNegotiationNeeded,
        Flag::ServerConnected,
        Flag::ServerDisconnected,
        Flag::SyncWritten,
        Flag::ClientDisconnected,
    ];

    const fn bit(self) -> u32 {
        self as u32
    }
}

/// Bitfield of pending [`Flag`]s.
pub struct EventFlags(AtomicU32);

impl EventFlags {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn raise(&self, flag: Flag) {
        self.0.fetch_or(flag.bit(), Ordering::AcqRel);
    }

    /// Atomically take every pending flag.
    pub fn take(&self) -> PendingFlags {
        PendingFlags(self.0.swap(0, Ordering::AcqRel))
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot returned by [`EventFlags::take`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingFlags(u32);

impl PendingFlags {
    pub fn contains(&self, flag: Flag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Pending flags in drain order.
    pub fn iter(self) -> impl Iterator<Item = Flag> {
        Flag::DRAIN_ORDER
            .into_iter()
            .filter(move |f| self.contains(*f))
    }
}

const MAILBOX_EMPTY: u32 = u32::MAX;

/// Single-slot store for the latest sync write.
///
/// A newer write overwrites an undrained one; only the freshest phase
/// information matters.  Writes of the wrong length are stored too (with
/// their length) so the loop can log and discard them.
pub struct SyncMailbox {
    len: AtomicU32,
    lo: AtomicU32,
    hi: AtomicU32,
}

impl SyncMailbox {
    pub const fn new() -> Self {
        Self {
            len: AtomicU32::new(MAILBOX_EMPTY),
            lo: AtomicU32::new(0),
            hi: AtomicU32::new(0),
        }
    }

    pub fn post(&self, bytes: &[u8]) {
        let mut raw = [0u8; SYNC_PACKET_LEN];
        let take = bytes.len().min(SYNC_PACKET_LEN);
        raw[..take].copy_from_slice(&bytes[..take]);
        self.lo
            .store(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]), Ordering::Relaxed);
        self.hi
            .store(u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]), Ordering::Relaxed);
        let len = u32::try_from(bytes.len()).unwrap_or(MAILBOX_EMPTY - 1);
        self.len.store(len.min(MAILBOX_EMPTY - 1), Ordering::Release);
    }

    pub fn take(&self) -> Option<PendingWrite> {
        let len = self.len.swap(MAILBOX_EMPTY, Ordering::Acquire);
        if len == MAILBOX_EMPTY {
            return None;
        }
        let mut bytes = [0u8; SYNC_PACKET_LEN];
        bytes[..4].copy_from_slice(&self.lo.load(Ordering::Relaxed).to_le_bytes());
        bytes[4..].copy_from_slice(&self.hi.load(Ordering::Relaxed).to_le_bytes());
        Some(PendingWrite {
            len: len as usize,
            bytes,
        })
    }
}

impl Default for SyncMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// A sync write as it arrived from the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    pub len: usize,
    pub bytes: [u8; SYNC_PACKET_LEN],
}

impl PendingWrite {
    pub fn packet(&self) -> Result<SyncPacket, Error> {
        if self.len != SYNC_PACKET_LEN {
            return Err(Error::MalformedSyncPacket { len: self.len });
        }
        SyncPacket::decode(&self.bytes)
    }
}

/// Everything the platform hands to the supervisor loop.
pub struct Events {
    flags: EventFlags,
    inbound: AtomicU8,
    mailbox: SyncMailbox,
}

impl Events {
    pub const fn new() -> Self {
        Self {
            flags: EventFlags::new(),
            inbound: AtomicU8::new(0),
            mailbox: SyncMailbox::new(),
        }
    }

    // Platform side

    pub fn on_server_connected(&self) {
        self.inbound.fetch_add(1, Ordering::AcqRel);
        self.flags.raise(Flag::RoleNegotiationNeeded);
        self.flags.raise(Flag::ServerConnected);
    }

    pub fn on_server_disconnected(&self) {
        let _ = self
            .inbound
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        self.flags.raise(Flag::ServerDisconnected);
    }

    pub fn on_sync_written(&self, bytes: &[u8]) {
        self.mailbox.post(bytes);
        self.flags.raise(Flag::SyncWritten);
    }

    pub fn on_client_disconnected(&self) {
        self.flags.raise(Flag::ClientDisconnected);
    }

    // Loop side

    pub fn take_flags(&self) -> PendingFlags {
        self.flags.take()
    }

    pub fn take_sync_write(&self) -> Option<PendingWrite> {
        self.mailbox.take()
    }

    /// Inbound (server-side) links currently up.
    pub fn inbound_links(&self) -> u8 {
        self.inbound.load(Ordering::Acquire)
    }

    /// Forget everything pending, e.g. when a node restarts its supervisor.
    pub fn reset(&self) {
        let _ = self.flags.take();
        let _ = self.mailbox.take();
        self.inbound.store(0, Ordering::Release);
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}
