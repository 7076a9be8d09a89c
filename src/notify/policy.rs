//! Threshold alerts for decoded readings.
//!
//! Alerts are edge triggered: a device raises an alert once when a value
//! crosses its threshold and again only after the value has returned
//! inside the threshold.

use super::Alert;
use crate::decoder::Reading;
use crate::mac_address::MacAddress;
use std::collections::HashSet;

/// Configured limits; `None` disables a check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlertThresholds {
    pub battery_below: Option<u8>,
    pub temperature_above: Option<f64>,
    pub temperature_below: Option<f64>,
    pub humidity_above: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    LowBattery,
    HighTemperature,
    LowTemperature,
    HighHumidity,
}

impl AlertKind {
    fn title(self) -> &'static str {
        match self {
            AlertKind::LowBattery => "Low battery",
            AlertKind::HighTemperature => "High temperature",
            AlertKind::LowTemperature => "Low temperature",
            AlertKind::HighHumidity => "High humidity",
        }
    }
}

#[derive(Debug, Default)]
pub struct AlertPolicy {
    thresholds: AlertThresholds,
    active: HashSet<(MacAddress, AlertKind)>,
}

impl AlertPolicy {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            active: HashSet::new(),
        }
    }

    /// True when at least one threshold is configured.
    pub fn is_enabled(&self) -> bool {
        self.thresholds != AlertThresholds::default()
    }

    fn breaches(&self, reading: &Reading) -> [(AlertKind, Option<String>); 4] {
        let t = &self.thresholds;
        [
            (
                AlertKind::LowBattery,
                t.battery_below
                    .filter(|limit| reading.battery_percent < *limit)
                    .map(|limit| format!("battery at {} % (below {limit} %)", reading.battery_percent)),
            ),
            (
                AlertKind::HighTemperature,
                t.temperature_above
                    .filter(|limit| reading.temperature > *limit)
                    .map(|limit| format!("temperature {:.2} °C (above {limit} °C)", reading.temperature)),
            ),
            (
                AlertKind::LowTemperature,
                t.temperature_below
                    .filter(|limit| reading.temperature < *limit)
                    .map(|limit| format!("temperature {:.2} °C (below {limit} °C)", reading.temperature)),
            ),
            (
                AlertKind::HighHumidity,
                t.humidity_above
                    .filter(|limit| reading.humidity > *limit)
                    .map(|limit| format!("humidity {:.2} % (above {limit} %)", reading.humidity)),
            ),
        ]
    }

    /// Alerts newly raised by `reading` for the device at `address`.
    pub fn evaluate(&mut self, address: MacAddress, name: &str, reading: &Reading) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for (kind, breach) in self.breaches(reading) {
            match breach {
                Some(detail) => {
                    if self.active.insert((address, kind)) {
                        alerts.push(Alert::new(kind.title(), format!("{name} ({address}): {detail}")));
                    }
                }
                None => {
                    self.active.remove(&(address, kind));
                }
            }
        }
        alerts
    }
}
