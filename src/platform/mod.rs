//! nRF52840 + S140 glue: SoftDevice setup, the tasks that own advertising
//! and inbound links, and the shared controls between them and the radio.
//!
//! Task layout:
//!
//! ```text
//!   supervisor_task ── SoftdeviceRadio ──┬─ AdvertisingControl ──> advertiser_task
//!                                        │                             │ Connection
//!                                        │                             v
//!                                        ├─ InboundLinks <──── inbound_link_task (x2)
//!                                        │                             │ Events
//!                                        └─ OutboundWatch ──> outbound_watch_task
//! ```

pub mod gatt;
pub mod radio;

use core::cell::RefCell;
use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};

use blesync::ble::adv_parser::{build_adv_payload, build_scan_response};
use blesync::clock::{RandomSource, Uptime};
use blesync::config::{MAX_INBOUND_LINKS, SERVICE_UUID, UPTIME_REFRESH_MS};
use blesync::event::Events;
use blesync::status::StatusBoard;
use defmt::{debug, info, warn};
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::Output;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use heapless::{String, Vec};
use nrf_softdevice::ble::{gatt_server, peripheral, Connection};
use nrf_softdevice::{raw, Softdevice};

use self::gatt::{CounterServiceEvent, Server, ServerEvent};

// ═══════════════════════════════════════════════════════════════════════════
// Shared controls
// ═══════════════════════════════════════════════════════════════════════════

/// Connectable advertising on/off, flipped by the radio.
pub struct AdvertisingControl {
    enabled: AtomicBool,
    changed: Signal<CriticalSectionRawMutex, ()>,
}

impl AdvertisingControl {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            changed: Signal::new(),
        }
    }

    pub fn set(&self, on: bool) {
        if self.enabled.swap(on, Ordering::AcqRel) != on {
            self.changed.signal(());
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Wake the advertiser so it re-reads the control and the link count.
    pub fn poke(&self) {
        self.changed.signal(());
    }

    async fn changed(&self) {
        self.changed.wait().await
    }
}

/// Inbound (peripheral-role) connections currently served.
pub struct InboundLinks {
    conns: Mutex<CriticalSectionRawMutex, RefCell<Vec<Connection, MAX_INBOUND_LINKS>>>,
}

impl InboundLinks {
    pub const fn new() -> Self {
        Self {
            conns: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    fn add(&self, conn: &Connection) -> bool {
        self.conns
            .lock(|c| c.borrow_mut().push(conn.clone()).is_ok())
    }

    fn prune(&self) {
        self.conns
            .lock(|c| c.borrow_mut().retain(|conn| conn.is_connected()));
    }

    pub fn len(&self) -> usize {
        self.conns.lock(|c| c.borrow().len())
    }

    pub fn for_each(&self, mut f: impl FnMut(&Connection)) {
        self.conns.lock(|c| c.borrow().iter().for_each(&mut f));
    }
}

/// Hands each new outbound link to [`outbound_watch_task`].
pub struct OutboundWatch(Signal<CriticalSectionRawMutex, Connection>);

impl OutboundWatch {
    pub const fn new() -> Self {
        Self(Signal::new())
    }

    pub fn watch(&self, conn: Connection) {
        self.0.signal(conn);
    }

    async fn next(&self) -> Connection {
        self.0.wait().await
    }
}

/// Accepted connections waiting for a free inbound link task.
pub static ACCEPTED: Channel<CriticalSectionRawMutex, Connection, 1> = Channel::new();

// ═══════════════════════════════════════════════════════════════════════════
// Clock & randomness
// ═══════════════════════════════════════════════════════════════════════════

/// Uptime from the embassy time driver (RTC1).
pub struct EmbassyClock;

impl Uptime for EmbassyClock {
    fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }
}

pub fn uptime_ms() -> u32 {
    EmbassyClock.now_ms()
}

/// 64-bit device id from FICR.
pub fn chip_id() -> u64 {
    let ficr = embassy_nrf::pac::FICR;
    let lo = ficr.deviceid(0).read() as u64;
    let hi = ficr.deviceid(1).read() as u64;
    (hi << 32) | lo
}

/// Jitter source backed by the SoftDevice's hardware RNG, falling back to
/// xorshift while the RNG pool is empty.
pub struct SoftdeviceRng {
    sd: &'static Softdevice,
    fallback: blesync::clock::XorShift32,
}

impl SoftdeviceRng {
    pub fn new(sd: &'static Softdevice, seed: u32) -> Self {
        Self {
            sd,
            fallback: blesync::clock::XorShift32::new(seed),
        }
    }
}

impl RandomSource for SoftdeviceRng {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        match nrf_softdevice::random_bytes(self.sd, &mut bytes) {
            Ok(()) => u32::from_le_bytes(bytes),
            Err(_) => self.fallback.next_u32(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SoftDevice
// ═══════════════════════════════════════════════════════════════════════════

/// Enable S140 with room for one outbound and `MAX_INBOUND_LINKS` inbound
/// links.
pub fn enable_softdevice(name: &'static str) -> &'static mut Softdevice {
    let config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: (MAX_INBOUND_LINKS + 1) as u8,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: MAX_INBOUND_LINKS as u8,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: name.as_ptr() as *const u8 as _,
            current_len: name.len() as u16,
            max_len: name.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    };
    Softdevice::enable(&config)
}

#[embassy_executor::task]
pub async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

// ═══════════════════════════════════════════════════════════════════════════
// Tasks
// ═══════════════════════════════════════════════════════════════════════════

/// Connectable advertising whenever it is enabled and an inbound slot is free.
#[embassy_executor::task]
pub async fn advertiser_task(
    sd: &'static Softdevice,
    adv: &'static AdvertisingControl,
    links: &'static InboundLinks,
    name: &'static String<32>,
) -> ! {
    let adv_data = build_adv_payload(SERVICE_UUID);
    let scan_data = build_scan_response(name.as_str());
    let config = peripheral::Config::default();

    loop {
        if !adv.is_enabled() || links.len() >= MAX_INBOUND_LINKS {
            adv.changed().await;
            continue;
        }

        let advertisement = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &adv_data,
            scan_data: &scan_data,
        };
        debug!("advertising");
        match select(
            peripheral::advertise_connectable(sd, advertisement, &config),
            adv.changed(),
        )
        .await
        {
            Either::First(Ok(conn)) => {
                if links.add(&conn) {
                    ACCEPTED.send(conn).await;
                } else {
                    warn!("no free inbound slot, dropping link");
                    let _ = conn.disconnect();
                }
            }
            Either::First(Err(e)) => {
                warn!("advertising failed: {:?}", e);
                Timer::after(Duration::from_secs(1)).await;
            }
            // Control changed: re-evaluate.
            Either::Second(()) => {}
        }
    }
}

/// Serves GATT on one inbound link at a time and reports its lifecycle.
#[embassy_executor::task(pool_size = MAX_INBOUND_LINKS)]
pub async fn inbound_link_task(
    server: &'static Server,
    links: &'static InboundLinks,
    adv: &'static AdvertisingControl,
    events: &'static Events,
) -> ! {
    loop {
        let conn = ACCEPTED.receive().await;
        // The peer reads the timestamp right after discovery.
        let _ = server.counter.timestamp_set(&uptime_ms());
        events.on_server_connected();
        info!("inbound link up ({} total)", links.len());

        let reason = gatt_server::run(&conn, server, |e| match e {
            ServerEvent::Counter(CounterServiceEvent::SyncWrite(packet)) => {
                events.on_sync_written(&packet);
            }
            ServerEvent::Counter(CounterServiceEvent::CounterCccdWrite { notifications }) => {
                debug!("counter notifications: {}", notifications);
            }
        })
        .await;
        debug!("inbound link closed: {:?}", reason);

        links.prune();
        events.on_server_disconnected();
        adv.poke();
    }
}

/// Raises `on_client_disconnected` when the watched outbound link drops.
#[embassy_executor::task]
pub async fn outbound_watch_task(
    outbound: &'static OutboundWatch,
    events: &'static Events,
) -> ! {
    let mut watched: Option<Connection> = None;
    loop {
        let Some(conn) = watched.take() else {
            watched = Some(outbound.next().await);
            continue;
        };
        match select(
            outbound.next(),
            Timer::after(Duration::from_millis(UPTIME_REFRESH_MS)),
        )
        .await
        {
            Either::First(next) => watched = Some(next),
            Either::Second(()) if conn.is_connected() => watched = Some(conn),
            Either::Second(()) => {
                debug!("outbound link dropped");
                events.on_client_disconnected();
            }
        }
    }
}

/// Keeps the timestamp characteristic close to the real uptime even while
/// the supervisor is blocked in a scan or connect.
#[embassy_executor::task]
pub async fn uptime_task(server: &'static Server) -> ! {
    loop {
        let _ = server.counter.timestamp_set(&uptime_ms());
        Timer::after(Duration::from_millis(UPTIME_REFRESH_MS)).await;
    }
}

/// LED on while the counter is odd; a quick blink on every role change.
#[embassy_executor::task]
pub async fn status_led_task(board: &'static StatusBoard, mut led: Output<'static>) -> ! {
    let mut role = board.snapshot().role;
    loop {
        let status = board.snapshot();
        if status.role != role {
            role = status.role;
            for _ in 0..3 {
                led.set_low();
                Timer::after(Duration::from_millis(60)).await;
                led.set_high();
                Timer::after(Duration::from_millis(60)).await;
            }
        }
        // Active low.
        if status.counter % 2 == 1 {
            led.set_low();
        } else {
            led.set_high();
        }
        Timer::after(Duration::from_millis(50)).await;
    }
}
