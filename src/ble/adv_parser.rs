//! Advertising-data helpers: recognise our service in scan reports, pull
//! out the peer's name, and build our own advertising payloads.

use heapless::{String, Vec};

use crate::config::ADV_PAYLOAD_MAX;

const AD_FLAGS: u8 = 0x01;
const AD_INCOMPLETE_UUID128: u8 = 0x06;
const AD_COMPLETE_UUID128: u8 = 0x07;
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;

/// LE General Discoverable, BR/EDR not supported.
const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Walk the `[len, type, payload...]` structures of an advertising report.
///
/// Stops at the first zero length or at a structure that would run past the
/// end of the buffer.
pub fn ad_structures(data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut i = 0;
    core::iter::from_fn(move || {
        let len = *data.get(i)? as usize;
        if len == 0 || i + len >= data.len() {
            return None;
        }
        let ad_type = data[i + 1];
        let payload = &data[i + 2..i + 1 + len];
        i += len + 1;
        Some((ad_type, payload))
    })
}

/// Check if raw advertisement data lists the given 128-bit service UUID.
pub fn contains_service_uuid(data: &[u8], uuid: u128) -> bool {
    let wanted = uuid.to_le_bytes();
    ad_structures(data)
        .filter(|(ad_type, _)| matches!(*ad_type, AD_INCOMPLETE_UUID128 | AD_COMPLETE_UUID128))
        .any(|(_, uuids)| uuids.chunks_exact(16).any(|chunk| chunk == wanted))
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    let mut name = String::new();
    match ad_structures(data).find(|(t, _)| matches!(*t, AD_SHORT_NAME | AD_COMPLETE_NAME)) {
        Some((_, bytes)) => {
            for &b in bytes {
                if name.push(b as char).is_err() {
                    break;
                }
            }
        }
        None => {
            let _ = name.push_str("Unknown");
        }
    }
    name
}

/// Advertising payload: flags plus the complete 128-bit service UUID list.
pub fn build_adv_payload(service_uuid: u128) -> Vec<u8, ADV_PAYLOAD_MAX> {
    let mut out = Vec::new();
    // 3 + 18 bytes always fits in 31.
    let _ = out.extend_from_slice(&[2, AD_FLAGS, FLAGS_GENERAL_DISCOVERABLE]);
    let _ = out.extend_from_slice(&[17, AD_COMPLETE_UUID128]);
    let _ = out.extend_from_slice(&service_uuid.to_le_bytes());
    out
}

/// Scan-response payload: the complete local name, truncated to fit.
pub fn build_scan_response(name: &str) -> Vec<u8, ADV_PAYLOAD_MAX> {
    let bytes = name.as_bytes();
    let take = bytes.len().min(ADV_PAYLOAD_MAX - 2);
    let mut out = Vec::new();
    let _ = out.push(take as u8 + 1);
    let _ = out.push(AD_COMPLETE_NAME);
    let _ = out.extend_from_slice(&bytes[..take]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SERVICE_UUID;

    #[test]
    fn detects_service_in_own_payload() {
        let adv = build_adv_payload(SERVICE_UUID);
        assert_eq!(adv.len(), 21);
        assert!(contains_service_uuid(&adv, SERVICE_UUID));
    }

    #[test]
    fn other_128_bit_uuid_is_not_ours() {
        let adv = build_adv_payload(0x0000_1812_0000_1000_8000_0080_5f9b_34fb);
        assert!(!contains_service_uuid(&adv, SERVICE_UUID));
    }

    #[test]
    fn incomplete_uuid_list_is_checked() {
        let mut adv = build_adv_payload(SERVICE_UUID);
        adv[4] = AD_INCOMPLETE_UUID128;
        assert!(contains_service_uuid(&adv, SERVICE_UUID));
    }

    #[test]
    fn uuid_must_be_little_endian() {
        let mut ad = [0u8; 18];
        ad[0] = 17;
        ad[1] = AD_COMPLETE_UUID128;
        ad[2..].copy_from_slice(&SERVICE_UUID.to_be_bytes());
        assert!(!contains_service_uuid(&ad, SERVICE_UUID));
    }

    #[test]
    fn sixteen_bit_uuid_lists_are_ignored() {
        // HID service (0x1812) in a complete 16-bit list.
        let ad = [0x03, 0x03, 0x12, 0x18];
        assert!(!contains_service_uuid(&ad, SERVICE_UUID));
    }

    #[test]
    fn empty_and_zero_length_data() {
        assert!(!contains_service_uuid(&[], SERVICE_UUID));
        assert!(!contains_service_uuid(&[0x00], SERVICE_UUID));
        assert_eq!(ad_structures(&[0x00, 0x01]).count(), 0);
    }

    #[test]
    fn truncated_structure_stops_the_walk() {
        // Flags, then a UUID structure claiming 17 bytes with only 4 present.
        let ad = [0x02, 0x01, 0x06, 0x11, 0x07, 0xAA, 0xBB, 0xCC];
        assert_eq!(ad_structures(&ad).count(), 1);
        assert!(!contains_service_uuid(&ad, SERVICE_UUID));
    }

    #[test]
    fn name_round_trips_through_scan_response() {
        let rsp = build_scan_response("SyncCounter_1A2B");
        assert_eq!(extract_device_name(&rsp).as_str(), "SyncCounter_1A2B");
    }

    #[test]
    fn shortened_local_name() {
        let ad = [0x05, AD_SHORT_NAME, b'S', b'y', b'n', b'c'];
        assert_eq!(extract_device_name(&ad).as_str(), "Sync");
    }

    #[test]
    fn no_name_in_advertisement() {
        let ad = [0x02, 0x01, 0x06];
        assert_eq!(extract_device_name(&ad).as_str(), "Unknown");
    }

    #[test]
    fn scan_response_truncates_long_names() {
        let long = "SyncCounter_with_a_name_that_is_far_too_long";
        let rsp = build_scan_response(long);
        assert_eq!(rsp.len(), ADV_PAYLOAD_MAX);
        assert_eq!(rsp[0] as usize, ADV_PAYLOAD_MAX - 1);
        // Name buffer caps at 32, payload at 29: the payload wins.
        assert_eq!(extract_device_name(&rsp).len(), ADV_PAYLOAD_MAX - 2);
    }
}
