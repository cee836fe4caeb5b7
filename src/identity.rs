//! Node identity derived from the chip's unique hardware identifier.

use core::fmt::Write;

use heapless::String;

use crate::ble::Address;
use crate::config::DEVICE_NAME_PREFIX;

/// Stable name and radio address of this node.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeIdentity {
    pub name: String<32>,
    pub address: Address,
}

impl NodeIdentity {
    pub fn from_chip_id(chip_id: u64) -> Self {
        Self {
            name: device_name(chip_id),
            address: address_from_chip_id(chip_id),
        }
    }
}

/// `<prefix>_<hex4>`, where the four hex digits are bits 32..48 of the id.
pub fn device_name(chip_id: u64) -> String<32> {
    let mut name = String::new();
    let tag = (chip_id >> 32) as u16;
    // Prefix is short enough that this cannot overflow 32 bytes.
    let _ = write!(name, "{}_{:04X}", DEVICE_NAME_PREFIX, tag);
    name
}

/// Static random address built from the low 48 bits of the id.
///
/// The two most significant bits are forced to `11`, as the static random
/// address type requires.
pub fn address_from_chip_id(chip_id: u64) -> Address {
    let b = chip_id.to_be_bytes();
    Address::new([b[2] | 0xC0, b[3], b[4], b[5], b[6], b[7]])
}
