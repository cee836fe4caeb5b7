//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, GATT identifiers and radio settings live here
//! so they can be tuned in one place.

// Counter & sync timing

/// Interval between local counter increments (ms).
pub const COUNTER_INTERVAL_MS: u32 = 3_000;

/// Interval at which the MASTER pushes, or the CLIENT polls (ms).
pub const SYNC_INTERVAL_MS: u32 = 10_000;

/// A CLIENT that gets neither a sync write nor a counter poll answer from
/// its MASTER for this long tears the pairing down (ms).
pub const MASTER_CONTACT_TIMEOUT_MS: u32 = 3 * SYNC_INTERVAL_MS;

// Discovery & connection

/// Duration of one scan window (ms).
pub const SCAN_WINDOW_MS: u32 = 3_000;

/// Period between scans while no role is assigned (ms).
pub const RESCAN_INTERVAL_MS: u32 = 10_000;

/// Upper bound on an outbound connect attempt, discovery included (ms).
pub const CONNECTION_TIMEOUT_MS: u32 = 10_000;

/// Back-off applied by the node with the lexically smaller address when
/// both nodes find each other in the same scan round (ms).
pub const COLLISION_DELAY_MS: u32 = 1_000;

/// Post-disconnect jitter range, `[min, max)` (ms).
pub const JITTER_MIN_MS: u32 = 200;
pub const JITTER_MAX_MS: u32 = 1_200;

// Supervisor loop

/// Sleep between supervisor loop iterations (ms).
pub const LOOP_PERIOD_MS: u32 = 10;

/// Interval between status lines (ms).
pub const STATUS_PRINT_INTERVAL_MS: u32 = 20_000;

/// How often the firmware refreshes the timestamp characteristic
/// independently of the supervisor loop (ms).
pub const UPTIME_REFRESH_MS: u64 = 100;

// GATT

/// Primary service carrying the counter, sync and timestamp characteristics.
pub const SERVICE_UUID: u128 = 0x21e862dc_87da_4130_9991_2a5a49b4d949;

/// Counter characteristic (read + notify), 4-byte LE `u32`.
pub const COUNTER_CHAR_UUID: u128 = 0x4027ce63_bdf0_4158_9426_6c8203185e00;

/// Sync characteristic (read + write), 8-byte LE sync packet.
pub const SYNC_CHAR_UUID: u128 = 0xe0368f9c_d3d2_4588_b033_1355ac7dc562;

/// Timestamp characteristic (read), 4-byte LE uptime in ms.
pub const TIMESTAMP_CHAR_UUID: u128 = 0xf0368f9c_d3d2_4588_b033_1355ac7dc563;

// BLE

/// Device names are `<prefix>_<hex4 of chip id>`.
pub const DEVICE_NAME_PREFIX: &str = "SyncCounter";

/// Maximum advertising / scan-response payload (legacy advertising).
pub const ADV_PAYLOAD_MAX: usize = 31;

/// BLE connection interval range (in 1.25 ms units).
/// 0x06 = 7.5 ms, 0x12 = 22.5 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 0x06;
pub const BLE_CONN_INTERVAL_MAX: u16 = 0x12;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// Maximum simultaneous inbound (peripheral-role) links.
pub const MAX_INBOUND_LINKS: usize = 2;
