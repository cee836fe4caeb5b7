//! GATT table of the counter service, server and client side.
//!
//! UUIDs must match `blesync::config`; the macros need string literals.

use heapless::Vec;

/// Local counter service.
#[nrf_softdevice::gatt_service(uuid = "21e862dc-87da-4130-9991-2a5a49b4d949")]
pub struct CounterService {
    /// Current counter, 4-byte LE.
    #[characteristic(uuid = "4027ce63-bdf0-4158-9426-6c8203185e00", read, notify)]
    pub counter: u32,

    /// Sync packet written by the peer while it is MASTER.
    ///
    /// Variable length so that a short write still reaches the supervisor
    /// and is rejected there with a proper error.
    #[characteristic(uuid = "e0368f9c-d3d2-4588-b033-1355ac7dc562", read, write)]
    pub sync: Vec<u8, 8>,

    /// Uptime in ms, 4-byte LE.
    #[characteristic(uuid = "f0368f9c-d3d2-4588-b033-1355ac7dc563", read)]
    pub timestamp: u32,
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub counter: CounterService,
}

/// Peer's counter service, seen from an outbound link.
///
/// Values are read as raw byte vectors so a peer with a wrong-length value
/// yields an error instead of a decode panic.
#[nrf_softdevice::gatt_client(uuid = "21e862dc-87da-4130-9991-2a5a49b4d949")]
pub struct CounterServiceClient {
    #[characteristic(uuid = "4027ce63-bdf0-4158-9426-6c8203185e00", read, notify)]
    pub counter: Vec<u8, 8>,

    #[characteristic(uuid = "e0368f9c-d3d2-4588-b033-1355ac7dc562", read, write)]
    pub sync: Vec<u8, 8>,

    #[characteristic(uuid = "f0368f9c-d3d2-4588-b033-1355ac7dc563", read)]
    pub timestamp: Vec<u8, 8>,
}
