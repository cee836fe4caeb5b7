//! Unified error type for blesync.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

/// Top-level error type used across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // BLE
    /// The radio facade reported a BLE-level error.
    Ble(BleError),

    /// The outbound connect did not complete within `CONNECTION_TIMEOUT_MS`.
    ConnectTimeout,

    // Protocol
    /// A sync write was not exactly 8 bytes.
    MalformedSyncPacket { len: usize },

    /// The remote timestamp characteristic was not exactly 4 bytes.
    MalformedTimestamp { len: usize },

    /// Equal uptimes and equal addresses: no rule can order the two nodes.
    AmbiguousRole,

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,
}

/// Subset of BLE errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// GAP / GATT raw error code from the stack.
    Raw(u32),
    /// Scan was cancelled or could not start.
    ScanFailed,
    /// Advertising could not be started.
    AdvertisingFailed,
    /// Connection attempt failed.
    ConnectFailed,
    /// GATT discovery did not find the service or one of its characteristics.
    DiscoveryFailed,
    /// Characteristic read failed.
    ReadFailed,
    /// Characteristic write failed.
    WriteFailed,
    /// Local characteristic update or notification failed.
    NotifyFailed,
    /// The link dropped while an operation was in flight.
    Disconnected,
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ble_error_converts_into_top_level_error() {
        let err: Error = BleError::ReadFailed.into();
        assert_eq!(err, Error::Ble(BleError::ReadFailed));
    }
}
