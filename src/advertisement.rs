//! Raw advertisement events delivered by a scan backend.

use crate::mac_address::MacAddress;
use std::collections::HashMap;
use uuid::Uuid;

/// Environmental Sensing service UUID (`0x181A`) used by PVVX firmware.
pub const ATC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000181a_0000_1000_8000_00805f9b34fb);

/// Bluetooth base UUID; 16-bit service ids are spliced into bits 96..112.
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit service UUID to its full 128-bit form.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// One BLE broadcast as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: MacAddress,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Signal strength in dBm, when the backend reports it
    pub rssi: Option<i16>,
    pub local_name: Option<String>,
}

impl Advertisement {
    /// Service data published under the ATC service UUID, if any.
    pub fn atc_payload(&self) -> Option<&[u8]> {
        self.service_data.get(&ATC_SERVICE_UUID).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_MAC;

    #[test]
    fn test_uuid_from_u16_matches_atc_service() {
        assert_eq!(uuid_from_u16(0x181A), ATC_SERVICE_UUID);
        assert_eq!(
            ATC_SERVICE_UUID.to_string(),
            "0000181a-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_atc_payload_filters_other_services() {
        let mut adv = Advertisement {
            address: TEST_MAC,
            service_data: HashMap::from([(uuid_from_u16(0xFE95), vec![1, 2, 3])]),
            rssi: None,
            local_name: None,
        };
        assert_eq!(adv.atc_payload(), None);

        adv.service_data.insert(ATC_SERVICE_UUID, vec![4, 5, 6]);
        assert_eq!(adv.atc_payload(), Some(&[4u8, 5, 6][..]));
    }
}
