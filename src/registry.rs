//! Per-device state tracking.
//!
//! Sensors rebroadcast the same sample many times between measurements.
//! The registry remembers the last sequence counter seen for each address
//! so that only genuinely new samples reach the dashboard, and it hands out
//! the display slot that decides where a device's panel lives.

use crate::decoder::Reading;
use crate::mac_address::MacAddress;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;

/// Format used for the `time now` line of a panel.
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// Everything the registry knows about one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub address: MacAddress,
    /// Display name fixed at registration
    pub name: String,
    /// Panel slot, assigned in registration order starting at 0
    pub slot: usize,
    pub last_sequence: Option<u8>,
    pub last_seen: Option<DateTime<Local>>,
}

/// A reading that carried a new sequence counter.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub reading: Reading,
    /// Time since the previous new reading, rounded to whole seconds
    pub elapsed: Option<Duration>,
    /// Wall clock time of this update as `HH:MM:SS`
    pub timestamp: String,
}

/// Outcome of [`DeviceRegistry::update_on_sequence_change`].
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceUpdate {
    /// Same sequence counter as last time; a rebroadcast.
    NoChange,
    Updated(UpdateResult),
}

/// Name shown for a sensor that never advertised a local name.
pub fn synthetic_name(address: &MacAddress) -> String {
    format!("ATC-{}", address.short_id())
}

/// Render an elapsed duration as `H:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Whole seconds, halves to even. Negative deltas (clock steps) are zero.
fn round_to_seconds(delta: chrono::TimeDelta) -> Duration {
    let exact = delta.to_std().unwrap_or_default();
    Duration::from_secs(exact.as_secs_f64().round_ties_even() as u64)
}

/// Owner of all per-device state for the lifetime of the process.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<MacAddress, DeviceState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` if it has not been seen before and return its slot.
    ///
    /// A new device takes the next free slot and is named `observed_name`,
    /// or `ATC-<last two octets>` when no name was observed. Calling this for
    /// a known device returns its slot and leaves the stored name alone.
    pub fn register_if_new(&mut self, address: MacAddress, observed_name: Option<&str>) -> usize {
        let next_slot = self.devices.len();
        self.devices
            .entry(address)
            .or_insert_with(|| DeviceState {
                address,
                name: observed_name
                    .filter(|name| !name.is_empty())
                    .map_or_else(|| synthetic_name(&address), str::to_string),
                slot: next_slot,
                last_sequence: None,
                last_seen: None,
            })
            .slot
    }

    /// Record `reading` if its sequence counter differs from the stored one.
    ///
    /// Wrap-around (255 -> 0) is just another change. An unknown address is
    /// registered on the spot with its synthetic name.
    pub fn update_on_sequence_change(
        &mut self,
        address: MacAddress,
        reading: &Reading,
        now: DateTime<Local>,
    ) -> SequenceUpdate {
        self.register_if_new(address, None);
        let Some(state) = self.devices.get_mut(&address) else {
            return SequenceUpdate::NoChange;
        };

        if state.last_sequence == Some(reading.sequence) {
            return SequenceUpdate::NoChange;
        }

        let elapsed = state.last_seen.map(|prev| round_to_seconds(now - prev));
        state.last_sequence = Some(reading.sequence);
        state.last_seen = Some(now);

        SequenceUpdate::Updated(UpdateResult {
            reading: *reading,
            elapsed,
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
        })
    }

    pub fn get(&self, address: &MacAddress) -> Option<&DeviceState> {
        self.devices.get(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceState> {
        let mut devices: Vec<&DeviceState> = self.devices.values().collect();
        devices.sort_by_key(|d| d.slot);
        devices.into_iter()
    }
}
