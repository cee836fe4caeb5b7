//! Shared status board.
//!
//! The supervisor owns all protocol state; this is a read-only mirror of
//! the interesting parts for other tasks (status LED, tests).  Plain
//! atomics, updated by the supervisor, read by anyone.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::role::Role;
use crate::supervisor::State;

/// Point-in-time copy of the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub state: State,
    pub role: Role,
    pub counter: u32,
    /// An inbound (server-side) link from the peer is up.
    pub inbound_link: bool,
    /// Our outbound (client-side) session is up.
    pub outbound_link: bool,
    pub syncs_ingested: u32,
    pub syncs_sent: u32,
    pub transitions: u32,
}

pub struct StatusBoard {
    state: AtomicU8,
    role: AtomicU8,
    counter: AtomicU32,
    inbound_link: AtomicBool,
    outbound_link: AtomicBool,
    syncs_ingested: AtomicU32,
    syncs_sent: AtomicU32,
    transitions: AtomicU32,
}

impl StatusBoard {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(State::IdleUnassigned as u8),
            role: AtomicU8::new(Role::Unassigned as u8),
            counter: AtomicU32::new(0),
            inbound_link: AtomicBool::new(false),
            outbound_link: AtomicBool::new(false),
            syncs_ingested: AtomicU32::new(0),
            syncs_sent: AtomicU32::new(0),
            transitions: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> Status {
        Status {
            state: State::from_u8(self.state.load(Ordering::Acquire)),
            role: Role::from_u8(self.role.load(Ordering::Acquire)),
            counter: self.counter.load(Ordering::Acquire),
            inbound_link: self.inbound_link.load(Ordering::Acquire),
            outbound_link: self.outbound_link.load(Ordering::Acquire),
            syncs_ingested: self.syncs_ingested.load(Ordering::Acquire),
            syncs_sent: self.syncs_sent.load(Ordering::Acquire),
            transitions: self.transitions.load(Ordering::Acquire),
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: State, role: Role) {
        self.state.store(state as u8, Ordering::Release);
        self.role.store(role as u8, Ordering::Release);
        self.transitions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn set_counter(&self, counter: u32) {
        self.counter.store(counter, Ordering::Release);
    }

    pub(crate) fn set_links(&self, inbound: bool, outbound: bool) {
        self.inbound_link.store(inbound, Ordering::Release);
        self.outbound_link.store(outbound, Ordering::Release);
    }

    pub(crate) fn count_ingested(&self) {
        self.syncs_ingested.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn count_sent(&self) {
        self.syncs_sent.fetch_add(1, Ordering::AcqRel);
    }

    /// Back to power-on values.
    pub fn reset(&self) {
        self.set_counter(0);
        self.set_links(false, false);
        self.state
            .store(State::IdleUnassigned as u8, Ordering::Release);
        self.role.store(Role::Unassigned as u8, Ordering::Release);
        self.syncs_ingested.store(0, Ordering::Release);
        self.syncs_sent.store(0, Ordering::Release);
        self.transitions.store(0, Ordering::Release);
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
