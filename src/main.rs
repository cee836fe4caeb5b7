//! blesync firmware - nRF52840 + S140.
//!
//! Boots the SoftDevice, derives the node identity from the chip id,
//! registers the counter service and hands everything to the supervisor
//! loop.  See `blesync::supervisor` for the protocol itself.

#![no_std]
#![no_main]

mod platform;

use blesync::event::Events;
use blesync::identity::NodeIdentity;
use blesync::status::StatusBoard;
use blesync::supervisor::SupervisorContext;
use defmt::{info, unwrap};
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::interrupt::Priority;
use embassy_time::Delay;
use heapless::String;
use nrf_softdevice::ble::{set_address, AddressType};
use static_cell::StaticCell;

use platform::gatt::Server;
use platform::radio::SoftdeviceRadio;
use platform::{AdvertisingControl, EmbassyClock, InboundLinks, OutboundWatch, SoftdeviceRng};

use {defmt_rtt as _, panic_probe as _};

static EVENTS: Events = Events::new();
static BOARD: StatusBoard = StatusBoard::new();
static ADVERTISING: AdvertisingControl = AdvertisingControl::new();
static INBOUND: InboundLinks = InboundLinks::new();
static OUTBOUND: OutboundWatch = OutboundWatch::new();

type Supervisor =
    SupervisorContext<'static, SoftdeviceRadio, EmbassyClock, Delay, SoftdeviceRng>;

#[embassy_executor::task]
async fn supervisor_task(ctx: &'static mut Supervisor) -> ! {
    ctx.run().await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    let chip_id = platform::chip_id();
    static NAME: StaticCell<String<32>> = StaticCell::new();
    let identity = NodeIdentity::from_chip_id(chip_id);
    let name: &'static String<32> = NAME.init(identity.name.clone());
    info!("blesync starting as {} ({})", name.as_str(), identity.address);

    let sd = platform::enable_softdevice(name.as_str());
    set_address(
        sd,
        &nrf_softdevice::ble::Address::new(AddressType::RandomStatic, identity.address.to_le_bytes()),
    );

    static SERVER: StaticCell<Server> = StaticCell::new();
    let server: &'static Server = SERVER.init(unwrap!(Server::new(sd)));
    let sd: &'static nrf_softdevice::Softdevice = sd;

    unwrap!(spawner.spawn(platform::softdevice_task(sd)));
    unwrap!(spawner.spawn(platform::advertiser_task(sd, &ADVERTISING, &INBOUND, name)));
    for _ in 0..blesync::config::MAX_INBOUND_LINKS {
        unwrap!(spawner.spawn(platform::inbound_link_task(
            server,
            &INBOUND,
            &ADVERTISING,
            &EVENTS
        )));
    }
    unwrap!(spawner.spawn(platform::outbound_watch_task(&OUTBOUND, &EVENTS)));
    unwrap!(spawner.spawn(platform::uptime_task(server)));

    // Status LED (LED1 on the nRF52840-DK, active low).
    let led = Output::new(p.P0_13, Level::High, OutputDrive::Standard);
    unwrap!(spawner.spawn(platform::status_led_task(&BOARD, led)));

    let radio = SoftdeviceRadio::new(sd, server, &INBOUND, &ADVERTISING, &OUTBOUND);
    let seed = (chip_id as u32) ^ ((chip_id >> 32) as u32);
    let rng = SoftdeviceRng::new(sd, seed);

    static SUPERVISOR: StaticCell<Supervisor> = StaticCell::new();
    let ctx = SUPERVISOR.init(SupervisorContext::new(
        radio,
        EmbassyClock,
        Delay,
        rng,
        &EVENTS,
        &BOARD,
        identity,
    ));
    unwrap!(spawner.spawn(supervisor_task(ctx)));
}
