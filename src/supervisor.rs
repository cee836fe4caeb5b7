//! Connection supervisor and supervisor loop.
//!
//! One cooperative loop owns every piece of protocol state (role, counter,
//! peer record, outbound session) in a single [`SupervisorContext`].  Each
//! iteration:
//!
//! 1. reads the uptime,
//! 2. drains callback flags in [`Flag::DRAIN_ORDER`],
//! 3. ticks the counter when due,
//! 4. runs the role's sync action once per sync period,
//! 5. fires timer-driven transitions (rescan, post-disconnect jitter),
//! 6. prints a status line every `STATUS_PRINT_INTERVAL_MS`.
//!
//! ```text
//!   IDLE_UNASSIGNED --rescan--> SCANNING --match--> CONNECTING --ok--> NEGOTIATING
//!        ^   ^                     |                    |                 |   |
//!        |   +------ no match -----+---- fail/timeout --+-- read fail ----+   |
//!        |                                                                    v
//!   NEEDS_NEGOTIATION (inbound, no role)                 STEADY_MASTER / STEADY_CLIENT
//!                                                                    |
//!   SCANNING <--jitter-- TEARDOWN <------------ link lost -----------+
//! ```
//!
//! Every node connects outbound to its peer and decides its own role on
//! that link; the peer's outbound link arrives here as an inbound one.
//! Scan, collision back-off, connect and negotiation run back to back
//! inside one dispatch step, so an inbound link that lands meanwhile is
//! only looked at once the role is known.

use embassy_futures::select::{select, Either};
use embedded_hal_async::delay::DelayNs;

use crate::ble::peer::{PeerRecord, PeerRegistry};
use crate::ble::radio::{read_u32, Radio, Session};
use crate::ble::Characteristic;
use crate::clock::{elapsed, jitter_ms, Deadline, RandomSource, Uptime};
use crate::config::{
    COLLISION_DELAY_MS, CONNECTION_TIMEOUT_MS, LOOP_PERIOD_MS, MASTER_CONTACT_TIMEOUT_MS,
    RESCAN_INTERVAL_MS, SCAN_WINDOW_MS, STATUS_PRINT_INTERVAL_MS,
};
use crate::error::BleError;
use crate::event::{Events, Flag};
use crate::identity::NodeIdentity;
use crate::role::{self, Decision, Role};
use crate::status::StatusBoard;
use crate::sync::SyncEngine;

/// Connection supervisor states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum State {
    IdleUnassigned = 0,
    Scanning = 1,
    Connecting = 2,
    Negotiating = 3,
    NeedsNegotiation = 4,
    SteadyMaster = 5,
    SteadyClient = 6,
    Teardown = 7,
}

impl State {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => State::Scanning,
            2 => State::Connecting,
            3 => State::Negotiating,
            4 => State::NeedsNegotiation,
            5 => State::SteadyMaster,
            6 => State::SteadyClient,
            7 => State::Teardown,
            _ => State::IdleUnassigned,
        }
    }

    pub fn is_steady(self) -> bool {
        matches!(self, State::SteadyMaster | State::SteadyClient)
    }
}

/// Why a transition happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cause {
    Boot,
    /// `RESCAN_INTERVAL_MS` elapsed without a role.
    RescanDue,
    /// A previous step asked for an immediate scan.
    ScanArmed,
    JitterElapsed,
    NoPeerFound,
    PeerFound,
    ConnectFailed,
    ConnectTimeout,
    DiscoveryFailed,
    Connected,
    TimestampReadFailed,
    AmbiguousRole,
    WonArbitration,
    LostArbitration,
    InboundWithoutRole,
    ForcedDisconnect,
    /// Our outbound session dropped.
    PeerDisconnected,
    /// The peer's inbound link dropped.
    InboundLinkLost,
    /// A MASTER received a sync write.
    RoleConflict,
    /// A CLIENT heard nothing from its MASTER, neither a sync write nor a
    /// counter poll answer, for `MASTER_CONTACT_TIMEOUT_MS`.
    MasterSilent,
}

/// One logged state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub from: State,
    pub to: State,
    pub cause: Cause,
}

/// Everything the supervisor loop owns.
pub struct SupervisorContext<'a, R, C, D, G>
where
    R: Radio,
{
    radio: R,
    clock: C,
    delay: D,
    rng: G,
    events: &'a Events,
    board: &'a StatusBoard,
    identity: NodeIdentity,

    state: State,
    role: Role,
    engine: SyncEngine,
    peers: PeerRegistry,
    session: Option<R::Session>,

    /// An inbound link was accepted under the current role.
    server_connected: bool,
    /// Scan on the next dispatch instead of waiting for the rescan interval.
    scan_armed: bool,
    last_scan_attempt: u32,
    jitter: Option<Deadline>,
    /// CLIENT keeps advertising until its MASTER's inbound link exists.
    defer_adv_stop: bool,
    /// Last ingested sync write or successful counter poll.
    last_master_contact: u32,
    peer_counter: Option<u32>,
    last_status: u32,
    last_transition: Option<Transition>,
}

impl<'a, R, C, D, G> SupervisorContext<'a, R, C, D, G>
where
    R: Radio,
    C: Uptime,
    D: DelayNs,
    G: RandomSource,
{
    pub fn new(
        radio: R,
        clock: C,
        delay: D,
        rng: G,
        events: &'a Events,
        board: &'a StatusBoard,
        identity: NodeIdentity,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            radio,
            clock,
            delay,
            rng,
            events,
            board,
            identity,
            state: State::IdleUnassigned,
            role: Role::Unassigned,
            engine: SyncEngine::new(now),
            peers: PeerRegistry::new(),
            session: None,
            server_connected: false,
            scan_armed: false,
            last_scan_attempt: now,
            jitter: None,
            defer_adv_stop: false,
            last_master_contact: now,
            peer_counter: None,
            last_status: now,
            last_transition: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn counter(&self) -> u32 {
        self.engine.counter()
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn last_transition(&self) -> Option<Transition> {
        self.last_transition
    }

    /// Peer counter from the last confirmation read (MASTER) or poll (CLIENT).
    pub fn peer_counter(&self) -> Option<u32> {
        self.peer_counter
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Seed the local characteristics and enter `IDLE_UNASSIGNED` with a
    /// scan armed.
    pub fn start(&mut self) {
        info!(
            "starting {} ({})",
            self.identity.name.as_str(),
            self.identity.address
        );
        self.publish_counter();
        if let Err(e) = self.radio.set_char_value(Characteristic::Sync, &[0u8; 8]) {
            warn!("could not seed sync characteristic: {:?}", e);
        }
        self.scan_armed = true;
        self.enter(State::IdleUnassigned, Cause::Boot);
    }

    /// Run the supervisor loop forever.
    pub async fn run(&mut self) -> ! {
        self.start();
        loop {
            self.poll().await;
            self.delay.delay_ms(LOOP_PERIOD_MS).await;
        }
    }

    /// One loop iteration.
    pub async fn poll(&mut self) {
        let now = self.clock.now_ms();
        self.publish_timestamp(now);

        self.drain_events(now);

        if self.engine.tick_due(now) {
            self.tick();
        }

        if self.engine.sync_due(now) {
            if self.session.is_some() {
                self.sync_action(now).await;
            }
            self.engine.sync_period_done(now);
        }

        self.dispatch(now).await;

        if elapsed(now, self.last_status) >= STATUS_PRINT_INTERVAL_MS {
            self.print_status();
            self.last_status = now;
        }

        self.board
            .set_links(self.server_connected, self.session.is_some());
    }

    // Callback flags

    fn drain_events(&mut self, now: u32) {
        for flag in self.events.take_flags().iter() {
            match flag {
                Flag::RoleNegotiationNeeded => self.on_negotiation_needed(),
                Flag::ServerConnected => self.on_server_connected(now),
                Flag::ServerDisconnected => self.on_server_disconnected(now),
                Flag::SyncWritten => self.on_sync_written(now),
                Flag::ClientDisconnected => self.on_client_disconnected(now),
            }
        }
    }

    fn on_negotiation_needed(&mut self) {
        if self.role != Role::Unassigned || self.events.inbound_links() == 0 {
            return;
        }
        // Only the outbound path can read the peer's timestamp, so the
        // inbound link is dropped and this node goes looking itself.
        self.enter(State::NeedsNegotiation, Cause::InboundWithoutRole);
        info!("inbound link without a role, forcing disconnect");
        self.radio.disconnect_inbound();
        self.server_connected = false;
        self.jitter = None;
        self.scan_armed = true;
        self.enter(State::IdleUnassigned, Cause::ForcedDisconnect);
    }

    fn on_server_connected(&mut self, now: u32) {
        self.publish_timestamp(now);
        if self.role == Role::Unassigned {
            return;
        }
        info!("inbound link up ({})", self.role.label());
        self.server_connected = true;
        if self.defer_adv_stop {
            self.defer_adv_stop = false;
            self.radio.stop_advertising();
            info!("client: master link up, advertising stopped");
        }
    }

    fn on_server_disconnected(&mut self, now: u32) {
        let was_connected = self.server_connected;
        self.server_connected = self.events.inbound_links() > 0;
        if was_connected && !self.server_connected && self.state.is_steady() {
            warn!("inbound link from peer lost");
            self.teardown(now, Cause::InboundLinkLost);
        } else if was_connected && !self.server_connected {
            info!("inbound link from peer closed");
        } else {
            debug!("inbound link down");
        }
    }

    fn on_sync_written(&mut self, now: u32) {
        let Some(write) = self.events.take_sync_write() else {
            return;
        };
        let packet = match write.packet() {
            Ok(packet) => packet,
            Err(e) => {
                warn!("discarding sync write: {:?}", e);
                return;
            }
        };
        match self.role {
            Role::Client => {
                let out = self.engine.ingest(packet, now);
                self.last_master_contact = now;
                self.board.count_ingested();
                if out.clamped {
                    warn!(
                        "sync: stale phase ({} ms > {} ms), clamped",
                        out.delta,
                        crate::config::COUNTER_INTERVAL_MS
                    );
                }
                info!(
                    "sync: counter {} -> {}, master {} ms past tick, next tick in {} ms",
                    out.previous,
                    out.counter,
                    out.delta,
                    out.next_tick_in
                );
                self.publish_counter();
            }
            Role::Master => {
                warn!("sync write received while MASTER, role conflict");
                self.teardown(now, Cause::RoleConflict);
            }
            Role::Unassigned => {
                info!("ignoring sync write without a role");
            }
        }
    }

    fn on_client_disconnected(&mut self, now: u32) {
        let dropped = self
            .session
            .as_ref()
            .map_or(false, |session| !session.is_connected());
        if dropped {
            info!("outbound session to peer closed");
            self.teardown(now, Cause::PeerDisconnected);
        }
    }

    // Counter & sync

    fn tick(&mut self) {
        let value = self.engine.tick();
        match (self.role, self.session.is_some()) {
            (Role::Unassigned, _) => info!("standalone counter: {}", value),
            (Role::Master, _) => info!("master counter: {}", value),
            (Role::Client, true) => info!("client counter (connected): {}", value),
            (Role::Client, false) => info!("client counter (standalone): {}", value),
        }
        self.publish_counter();
    }

    async fn sync_action(&mut self, now: u32) {
        match self.role {
            Role::Master => self.push_sync(now).await,
            Role::Client => self.poll_counter(now).await,
            Role::Unassigned => {}
        }
    }

    async fn push_sync(&mut self, now: u32) {
        let packet = self.engine.packet(now);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let written = session.write(Characteristic::Sync, &packet.encode()).await;
        if let Err(e) = written {
            warn!("sync write failed ({:?}), retrying next period", e);
            return;
        }
        // The peer applies the write on its next loop iteration, so this read
        // may still show the previous value.
        let confirmed = read_u32(session, Characteristic::Counter).await;

        self.board.count_sent();
        info!(
            "master: sent sync counter {} ({} ms since tick)",
            packet.counter,
            packet.time_since_last_update
        );
        match confirmed {
            Ok(remote) => {
                self.peer_counter = Some(remote);
                debug!("master: peer reports counter {}", remote);
            }
            Err(e) => warn!("master: confirmation read failed: {:?}", e),
        }
    }

    /// A successful read counts as contact with the MASTER.
    async fn poll_counter(&mut self, now: u32) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let remote = match read_u32(session, Characteristic::Counter).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("client: counter poll failed: {:?}", e);
                return;
            }
        };
        self.peer_counter = Some(remote);
        self.last_master_contact = now;
        info!(
            "client: master counter {}, local counter {}",
            remote,
            self.engine.counter()
        );
        if self.engine.adopt(remote) {
            info!("client: synchronized to master counter {}", remote);
            self.publish_counter();
        }
    }

    // Timer-driven transitions

    async fn dispatch(&mut self, now: u32) {
        match self.state {
            State::IdleUnassigned => {
                if self.scan_armed {
                    self.discover_and_pair(now, Cause::ScanArmed).await;
                } else if elapsed(now, self.last_scan_attempt) >= RESCAN_INTERVAL_MS {
                    info!("no role, starting periodic scan");
                    self.discover_and_pair(now, Cause::RescanDue).await;
                }
            }
            State::Teardown => {
                if self.jitter.map_or(true, |j| j.expired(now)) {
                    self.jitter = None;
                    self.discover_and_pair(now, Cause::JitterElapsed).await;
                }
            }
            State::SteadyClient => {
                if elapsed(now, self.last_master_contact) >= MASTER_CONTACT_TIMEOUT_MS {
                    warn!("client: no word from master in {} ms", MASTER_CONTACT_TIMEOUT_MS);
                    self.teardown(now, Cause::MasterSilent);
                }
            }
            _ => {}
        }
    }

    /// SCANNING -> (collision back-off) -> CONNECTING -> NEGOTIATING.
    async fn discover_and_pair(&mut self, now: u32, cause: Cause) {
        self.scan_armed = false;
        self.last_scan_attempt = now;
        self.enter(State::Scanning, cause);

        let Some(peer) = self.scan_for_peer().await else {
            self.enter(State::IdleUnassigned, Cause::NoPeerFound);
            return;
        };

        if self.identity.address < peer.address {
            info!(
                "delaying connect by {} ms to avoid collision (smaller address)",
                COLLISION_DELAY_MS
            );
            self.delay.delay_ms(COLLISION_DELAY_MS).await;
        }
        self.peers.store(peer);
        self.connect_and_negotiate().await;
    }

    async fn scan_for_peer(&mut self) -> Option<PeerRecord> {
        info!("scan starting ({} ms window)", SCAN_WINDOW_MS);
        self.publish_timestamp(self.clock.now_ms());

        let mut reports: u32 = 0;
        let mut found: Option<PeerRecord> = None;
        let result = self
            .radio
            .scan(SCAN_WINDOW_MS, |adv| {
                reports += 1;
                if !adv.has_service() {
                    return false;
                }
                let peer = PeerRecord::from_advertisement(adv);
                info!(
                    "found {} ({}) rssi {}",
                    peer.name.as_str(),
                    peer.address,
                    adv.rssi
                );
                found = Some(peer);
                true
            })
            .await;
        if let Err(e) = result {
            warn!("scan ended with error: {:?}", e);
        }
        info!("scan complete: {} reports", reports);

        if found.is_some() {
            self.radio.stop_scan();
        }
        found
    }

    async fn connect_and_negotiate(&mut self) {
        self.enter(State::Connecting, Cause::PeerFound);
        self.publish_timestamp(self.clock.now_ms());

        let Some(peer) = self.peers.get() else {
            self.enter(State::IdleUnassigned, Cause::ConnectFailed);
            return;
        };
        let remote_address = peer.address;
        info!("connecting to {}", remote_address);

        let attempt = select(
            self.radio.connect(peer),
            self.delay.delay_ms(CONNECTION_TIMEOUT_MS),
        )
        .await;
        let mut session = match attempt {
            Either::First(Ok(session)) => session,
            Either::First(Err(BleError::DiscoveryFailed)) => {
                warn!("counter service not found on {}", remote_address);
                self.abandon_peer(Cause::DiscoveryFailed, true);
                return;
            }
            Either::First(Err(e)) => {
                warn!("connect to {} failed: {:?}", remote_address, e);
                self.abandon_peer(Cause::ConnectFailed, false);
                return;
            }
            Either::Second(()) => {
                warn!("connect to {} timed out", remote_address);
                self.abandon_peer(Cause::ConnectTimeout, false);
                return;
            }
        };

        self.enter(State::Negotiating, Cause::Connected);
        let remote_uptime = match read_u32(&mut session, Characteristic::Timestamp).await {
            Ok(uptime) => uptime,
            Err(e) => {
                warn!("timestamp read failed: {:?}", e);
                session.disconnect();
                self.abandon_peer(Cause::TimestampReadFailed, true);
                return;
            }
        };
        let local_uptime = self.clock.now_ms();
        info!(
            "local uptime {} ms, remote uptime {} ms",
            local_uptime,
            remote_uptime
        );

        match role::decide(
            local_uptime,
            remote_uptime,
            self.identity.address,
            remote_address,
        ) {
            Ok(decision) => self.assume_role(decision, session, local_uptime),
            Err(e) => {
                warn!("role decision rejected: {:?}", e);
                session.disconnect();
                self.abandon_peer(Cause::AmbiguousRole, true);
            }
        }
    }

    fn abandon_peer(&mut self, cause: Cause, rescan: bool) {
        self.peers.free();
        self.scan_armed = rescan;
        self.enter(State::IdleUnassigned, cause);
    }

    fn assume_role(&mut self, decision: Decision, session: R::Session, now: u32) {
        self.peers.free();
        self.radio.stop_scan();
        self.session = Some(session);
        self.role = decision.role;
        self.peer_counter = None;

        match decision.role {
            Role::Master => {
                info!("role: MASTER ({:?})", decision.reason);
                if let Err(e) = self.radio.start_advertising() {
                    warn!("master: advertising restart failed: {:?}", e);
                }
                self.enter(State::SteadyMaster, Cause::WonArbitration);
            }
            Role::Client => {
                info!("role: CLIENT ({:?})", decision.reason);
                if self.events.inbound_links() > 0 {
                    self.radio.stop_advertising();
                    info!("client: advertising stopped");
                } else {
                    self.defer_adv_stop = true;
                }
                self.last_master_contact = now;
                self.enter(State::SteadyClient, Cause::LostArbitration);
            }
            Role::Unassigned => {}
        }
    }

    /// Close the session, drop the peer and role, and schedule a rescan
    /// after a random back-off.
    fn teardown(&mut self, now: u32, cause: Cause) {
        if let Some(mut session) = self.session.take() {
            session.disconnect();
        }
        self.peers.free();
        if self.role != Role::Unassigned {
            info!("resetting role {}", self.role.label());
        }
        self.role = Role::Unassigned;
        self.defer_adv_stop = false;
        self.peer_counter = None;
        // The peer's inbound link stays up until it tears down its own
        // session; keep notifying it meanwhile.
        self.server_connected = self.events.inbound_links() > 0;

        if let Err(e) = self.radio.start_advertising() {
            warn!("advertising restart failed: {:?}", e);
        }
        let jitter = jitter_ms(&mut self.rng);
        self.jitter = Some(Deadline::after(now, jitter));
        self.enter(State::Teardown, cause);
        info!("rescan in {} ms", jitter);
    }

    // Local characteristics

    fn publish_counter(&mut self) {
        let value = self.engine.counter();
        self.board.set_counter(value);
        if let Err(e) = self
            .radio
            .set_char_value(Characteristic::Counter, &value.to_le_bytes())
        {
            warn!("counter update failed: {:?}", e);
            return;
        }
        if self.server_connected {
            if let Err(e) = self.radio.notify(Characteristic::Counter) {
                debug!("counter notify skipped: {:?}", e);
            }
        }
    }

    fn publish_timestamp(&mut self, now: u32) {
        if let Err(e) = self
            .radio
            .set_char_value(Characteristic::Timestamp, &now.to_le_bytes())
        {
            debug!("timestamp update failed: {:?}", e);
        }
    }

    fn enter(&mut self, to: State, cause: Cause) {
        let transition = Transition {
            from: self.state,
            to,
            cause,
        };
        info!("state {:?} -> {:?} ({:?})", transition.from, to, cause);
        self.state = to;
        self.last_transition = Some(transition);
        self.board.set_state(to, self.role);

        if to == State::IdleUnassigned {
            self.publish_timestamp(self.clock.now_ms());
            if let Err(e) = self.radio.start_advertising() {
                warn!("advertising start failed: {:?}", e);
            }
        }
    }

    fn print_status(&self) {
        info!(
            "status - role: {}, client link: {}, server link: {}, counter: {}, state: {:?}, scan armed: {}",
            self.role.label(),
            yes_no(self.session.is_some()),
            yes_no(self.server_connected),
            self.engine.counter(),
            self.state,
            yes_no(self.scan_armed)
        );
        if let Some(peer) = self.peer_counter {
            debug!("status - last peer counter: {}", peer);
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}
