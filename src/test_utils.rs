use crate::advertisement::{ATC_SERVICE_UUID, Advertisement};
use crate::decoder::Reading;
use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B]);

/// Build ATC service data for the given fields.
pub fn atc_payload(temperature_centi: i16, humidity_centi: i16, battery_mv: u16, battery_pct: u8, sequence: u8) -> Vec<u8> {
    let mut data = vec![0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B];
    data.extend_from_slice(&temperature_centi.to_le_bytes());
    data.extend_from_slice(&humidity_centi.to_le_bytes());
    data.extend_from_slice(&battery_mv.to_le_bytes());
    data.push(battery_pct);
    data.push(sequence);
    data
}

/// A plausible reading; tests override just the sequence.
pub fn reading_with_sequence(sequence: u8) -> Reading {
    Reading {
        temperature_centi: 2150,
        humidity_centi: 4520,
        battery_millivolts: 2980,
        temperature: 21.5,
        humidity: 45.2,
        battery_voltage: 2.98,
        battery_percent: 87,
        sequence,
    }
}

/// An advertisement carrying `payload` under the ATC service UUID.
pub fn advertisement(address: MacAddress, payload: Vec<u8>) -> Advertisement {
    Advertisement {
        address,
        service_data: HashMap::from([(ATC_SERVICE_UUID, payload)]),
        rssi: Some(-67),
        local_name: None,
    }
}

/// In-memory writer that can be inspected after being moved into a sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
