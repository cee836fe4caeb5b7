//! Discrete-event BLE world for end-to-end tests.
//!
//! Every node runs the real [`SupervisorContext`] against a [`SimRadio`].
//! Time is virtual: the driver polls every node future, then jumps the
//! clock to the earliest deadline any of them registered.  Nothing here
//! sleeps for real, so a minute of protocol time runs in milliseconds.

#![allow(dead_code)]

use std::cell::RefCell;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use blesync::ble::adv_parser::build_adv_payload;
use blesync::ble::peer::PeerRecord;
use blesync::ble::radio::{Radio, Session};
use blesync::ble::{Address, Advertisement, Characteristic};
use blesync::clock::{Uptime, XorShift32};
use blesync::config::{MAX_INBOUND_LINKS, SERVICE_UUID};
use blesync::error::BleError;
use blesync::event::Events;
use blesync::identity::{device_name, NodeIdentity};
use blesync::status::{Status, StatusBoard};
use blesync::supervisor::SupervisorContext;
use embedded_hal_async::delay::DelayNs;

/// Scan reports are offered in steps of this size.
pub const SCAN_STEP_MS: u32 = 100;
/// Link establishment latency.
const CONNECT_LATENCY_MS: u32 = 20;
/// One GATT read or write round trip.
const RPC_LATENCY_MS: u32 = 15;

#[derive(Clone, Copy, Debug)]
struct Link {
    id: u32,
    /// Initiator (GATT client).
    from: usize,
    /// Acceptor (GATT server).
    to: usize,
}

struct NodeSlot {
    address: Address,
    boot_at: u32,
    advertising: bool,
    counter: [u8; 4],
    sync: [u8; 8],
    fail_writes: bool,
    connects: u32,
    /// World time at which each connect attempt started.
    connect_log: Vec<u32>,
    events: &'static Events,
    board: &'static StatusBoard,
}

#[derive(Default)]
pub struct World {
    now: u32,
    nodes: Vec<NodeSlot>,
    links: Vec<Link>,
    next_link: u32,
    wakeups: Vec<u32>,
}

impl World {
    fn has_link(&self, id: u32) -> bool {
        self.links.iter().any(|l| l.id == id)
    }

    fn inbound_count(&self, node: usize) -> usize {
        self.links.iter().filter(|l| l.to == node).count()
    }

    fn remove_links(&mut self, mut drop_if: impl FnMut(&Link) -> bool) -> Vec<Link> {
        let (gone, kept): (Vec<Link>, Vec<Link>) =
            self.links.iter().partition(|l: &&Link| drop_if(*l));
        self.links = kept;
        gone
    }
}

type Shared = Rc<RefCell<World>>;

async fn sleep_until(world: &Shared, deadline: u32) {
    poll_fn(|_cx| {
        let mut w = world.borrow_mut();
        if w.now >= deadline {
            Poll::Ready(())
        } else {
            w.wakeups.push(deadline);
            Poll::Pending
        }
    })
    .await
}

async fn sleep_ms(world: &Shared, ms: u32) {
    let deadline = world.borrow().now + ms;
    sleep_until(world, deadline).await
}

// ═══════════════════════════════════════════════════════════════════════════
// Clock, delay, radio
// ═══════════════════════════════════════════════════════════════════════════

pub struct SimClock {
    world: Shared,
    node: usize,
}

impl Uptime for SimClock {
    fn now_ms(&self) -> u32 {
        let w = self.world.borrow();
        w.now - w.nodes[self.node].boot_at
    }
}

pub struct SimDelay {
    world: Shared,
}

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        sleep_ms(&self.world, ns.div_ceil(1_000_000)).await
    }

    async fn delay_us(&mut self, us: u32) {
        sleep_ms(&self.world, us.div_ceil(1_000)).await
    }

    async fn delay_ms(&mut self, ms: u32) {
        sleep_ms(&self.world, ms).await
    }
}

pub struct SimRadio {
    world: Shared,
    node: usize,
}

impl SimRadio {
    fn try_link(&self, address: Address) -> Option<SimSession> {
        let (events, id, to) = {
            let mut w = self.world.borrow_mut();
            let to = w.nodes.iter().position(|n| n.address == address)?;
            if !w.nodes[to].advertising || w.inbound_count(to) >= MAX_INBOUND_LINKS {
                return None;
            }
            let id = w.next_link;
            w.next_link += 1;
            w.links.push(Link {
                id,
                from: self.node,
                to,
            });
            (w.nodes[to].events, id, to)
        };
        events.on_server_connected();
        Some(SimSession {
            world: self.world.clone(),
            link: id,
            from: self.node,
            to,
        })
    }
}

impl Radio for SimRadio {
    type Session = SimSession;

    fn start_advertising(&mut self) -> Result<(), BleError> {
        self.world.borrow_mut().nodes[self.node].advertising = true;
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.world.borrow_mut().nodes[self.node].advertising = false;
    }

    async fn scan<F>(&mut self, window_ms: u32, mut on_report: F) -> Result<(), BleError>
    where
        F: FnMut(&Advertisement) -> bool,
    {
        let payload = build_adv_payload(SERVICE_UUID);
        let end = self.world.borrow().now + window_ms;
        loop {
            let reports: Vec<Advertisement> = {
                let w = self.world.borrow();
                w.nodes
                    .iter()
                    .enumerate()
                    .filter(|(i, n)| *i != self.node && n.advertising)
                    .map(|(_, n)| Advertisement::new(n.address, -50, &payload))
                    .collect()
            };
            for adv in &reports {
                if on_report(adv) {
                    return Ok(());
                }
            }
            let now = self.world.borrow().now;
            if now >= end {
                return Ok(());
            }
            sleep_until(&self.world, (now + SCAN_STEP_MS).min(end)).await;
        }
    }

    fn stop_scan(&mut self) {}

    fn set_char_value(&mut self, ch: Characteristic, value: &[u8]) -> Result<(), BleError> {
        let mut w = self.world.borrow_mut();
        let slot = &mut w.nodes[self.node];
        match ch {
            Characteristic::Counter if value.len() == 4 => slot.counter.copy_from_slice(value),
            Characteristic::Sync if value.len() == 8 => slot.sync.copy_from_slice(value),
            // Served live from the world clock.
            Characteristic::Timestamp => {}
            _ => return Err(BleError::WriteFailed),
        }
        Ok(())
    }

    fn notify(&mut self, _ch: Characteristic) -> Result<(), BleError> {
        Ok(())
    }

    async fn connect(&mut self, peer: &PeerRecord) -> Result<SimSession, BleError> {
        {
            let mut w = self.world.borrow_mut();
            let now = w.now;
            let slot = &mut w.nodes[self.node];
            slot.connects += 1;
            slot.connect_log.push(now);
        }
        sleep_ms(&self.world, CONNECT_LATENCY_MS).await;
        // Keeps trying until the supervisor's timeout drops this future.
        loop {
            if let Some(session) = self.try_link(peer.address) {
                return Ok(session);
            }
            sleep_ms(&self.world, 10).await;
        }
    }

    fn disconnect_inbound(&mut self) {
        let (gone, initiators, own) = {
            let mut w = self.world.borrow_mut();
            let me = self.node;
            let gone = w.remove_links(|l| l.to == me);
            let initiators: Vec<&'static Events> =
                gone.iter().map(|l| w.nodes[l.from].events).collect();
            (gone, initiators, w.nodes[me].events)
        };
        for events in initiators {
            events.on_client_disconnected();
        }
        for _ in &gone {
            own.on_server_disconnected();
        }
    }
}

pub struct SimSession {
    world: Shared,
    link: u32,
    from: usize,
    to: usize,
}

impl Session for SimSession {
    async fn read(&mut self, ch: Characteristic, buf: &mut [u8]) -> Result<usize, BleError> {
        sleep_ms(&self.world, RPC_LATENCY_MS).await;
        let w = self.world.borrow();
        if !w.has_link(self.link) {
            return Err(BleError::Disconnected);
        }
        let peer = &w.nodes[self.to];
        match ch {
            Characteristic::Counter => {
                buf[..4].copy_from_slice(&peer.counter);
                Ok(4)
            }
            Characteristic::Timestamp => {
                let uptime = w.now - peer.boot_at;
                buf[..4].copy_from_slice(&uptime.to_le_bytes());
                Ok(4)
            }
            Characteristic::Sync => {
                buf[..8].copy_from_slice(&peer.sync);
                Ok(8)
            }
        }
    }

    async fn write(&mut self, ch: Characteristic, value: &[u8]) -> Result<(), BleError> {
        sleep_ms(&self.world, RPC_LATENCY_MS).await;
        let events = {
            let mut w = self.world.borrow_mut();
            if !w.has_link(self.link) {
                return Err(BleError::Disconnected);
            }
            if ch != Characteristic::Sync || w.nodes[self.from].fail_writes {
                return Err(BleError::WriteFailed);
            }
            let peer = &mut w.nodes[self.to];
            if value.len() == 8 {
                peer.sync.copy_from_slice(value);
            }
            peer.events
        };
        events.on_sync_written(value);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.world.borrow().has_link(self.link)
    }

    fn disconnect(&mut self) {
        let events = {
            let mut w = self.world.borrow_mut();
            let id = self.link;
            let gone = w.remove_links(|l| l.id == id);
            if gone.is_empty() {
                return;
            }
            w.nodes[self.to].events
        };
        events.on_server_disconnected();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Driver
// ═══════════════════════════════════════════════════════════════════════════

type NodeFuture = Pin<Box<dyn Future<Output = ()>>>;

pub struct Sim {
    world: Shared,
    tasks: Vec<NodeFuture>,
}

fn noop_waker() -> Waker {
    fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    fn noop(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    // SAFETY: the vtable functions ignore the data pointer.
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

impl Sim {
    pub fn new() -> Self {
        Self {
            world: Rc::new(RefCell::new(World::default())),
            tasks: Vec::new(),
        }
    }

    pub fn now(&self) -> u32 {
        self.world.borrow().now
    }

    /// Power up a node at the current time; returns its index.
    pub fn boot(&mut self, address: Address) -> usize {
        let node = {
            let mut w = self.world.borrow_mut();
            let boot_at = w.now;
            w.nodes.push(NodeSlot {
                address,
                boot_at,
                advertising: false,
                counter: [0; 4],
                sync: [0; 8],
                fail_writes: false,
                connects: 0,
                connect_log: Vec::new(),
                events: Box::leak(Box::new(Events::new())),
                board: Box::leak(Box::new(StatusBoard::new())),
            });
            w.nodes.len() - 1
        };
        let task = self.node_task(node);
        self.tasks.push(task);
        node
    }

    /// Power-cycle a node: its links drop, its state starts from scratch.
    pub fn reboot(&mut self, node: usize) {
        let notify = {
            let mut w = self.world.borrow_mut();
            let gone = w.remove_links(|l| l.from == node || l.to == node);
            let notify: Vec<(bool, &'static Events)> = gone
                .iter()
                .map(|l| {
                    if l.from == node {
                        (true, w.nodes[l.to].events)
                    } else {
                        (false, w.nodes[l.from].events)
                    }
                })
                .collect();

            let now = w.now;
            let slot = &mut w.nodes[node];
            slot.boot_at = now;
            slot.advertising = false;
            slot.counter = [0; 4];
            slot.sync = [0; 8];
            slot.connects = 0;
            slot.connect_log.clear();
            slot.events.reset();
            slot.board.reset();
            notify
        };
        for (peer_was_server, events) in notify {
            if peer_was_server {
                events.on_server_disconnected();
            } else {
                events.on_client_disconnected();
            }
        }
        self.tasks[node] = self.node_task(node);
    }

    fn node_task(&self, node: usize) -> NodeFuture {
        let (address, events, board) = {
            let w = self.world.borrow();
            let slot = &w.nodes[node];
            (slot.address, slot.events, slot.board)
        };
        let octets = address.octets();
        let seed = u32::from_le_bytes([octets[2], octets[3], octets[4], octets[5]]);
        let identity = NodeIdentity {
            name: device_name(u64::from(octets[5]) << 32),
            address,
        };
        let ctx = SupervisorContext::new(
            SimRadio {
                world: self.world.clone(),
                node,
            },
            SimClock {
                world: self.world.clone(),
                node,
            },
            SimDelay {
                world: self.world.clone(),
            },
            XorShift32::new(seed),
            events,
            board,
            identity,
        );
        Box::pin(async move {
            let mut ctx = ctx;
            ctx.run().await;
        })
    }

    /// Advance virtual time to `t`, running every node along the way.
    pub fn run_until(&mut self, t: u32) {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            for task in self.tasks.iter_mut() {
                let _ = task.as_mut().poll(&mut cx);
            }
            let mut w = self.world.borrow_mut();
            let next = w.wakeups.drain(..).min();
            match next {
                Some(next) if next <= t => w.now = next,
                _ => {
                    w.now = t;
                    return;
                }
            }
        }
    }

    pub fn status(&self, node: usize) -> Status {
        self.world.borrow().nodes[node].board.snapshot()
    }

    pub fn uptime(&self, node: usize) -> u32 {
        let w = self.world.borrow();
        w.now - w.nodes[node].boot_at
    }

    pub fn connects(&self, node: usize) -> u32 {
        self.world.borrow().nodes[node].connects
    }

    /// World times at which the node started its connect attempts.
    pub fn connect_times(&self, node: usize) -> Vec<u32> {
        self.world.borrow().nodes[node].connect_log.clone()
    }

    pub fn set_fail_writes(&mut self, node: usize, fail: bool) {
        self.world.borrow_mut().nodes[node].fail_writes = fail;
    }

    /// Links currently up, as `(initiator, acceptor)` pairs.
    pub fn links(&self) -> Vec<(usize, usize)> {
        self.world
            .borrow()
            .links
            .iter()
            .map(|l| (l.from, l.to))
            .collect()
    }
}
