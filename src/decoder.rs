//! Decoder for the ATC_MiThermometer (PVVX) custom advertising format.
//!
//! The sensor broadcasts service data under the Environmental Sensing
//! UUID `0x181A`. Only bytes `6..14` carry measurements:
//!
//! | offset | type   | field                          |
//! |--------|--------|--------------------------------|
//! | 6..8   | i16 LE | temperature, 0.01 °C           |
//! | 8..10  | i16 LE | humidity, 0.01 %               |
//! | 10..12 | u16 LE | battery, mV                    |
//! | 12     | u8     | battery, %                     |
//! | 13     | u8     | measurement sequence counter   |
//!
//! Bytes `0..6` hold the sensor MAC and trailing bytes hold flags; neither
//! is interpreted.

use thiserror::Error;

/// Minimum service data length that holds every decoded field.
pub const ATC_PAYLOAD_LENGTH: usize = 14;

/// Errors returned by [`decode`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload does not reach the end of the sequence counter.
    #[error("ATC payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// One decoded sample from a sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Temperature in hundredths of a degree Celsius, as broadcast
    pub temperature_centi: i16,
    /// Relative humidity in hundredths of a percent, as broadcast
    pub humidity_centi: i16,
    /// Battery voltage in millivolts, as broadcast
    pub battery_millivolts: u16,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Battery voltage in Volts
    pub battery_voltage: f64,
    /// Battery level in percent
    pub battery_percent: u8,
    /// Rolling counter bumped by the sensor on every new measurement
    pub sequence: u8,
}

/// Decode ATC service data into a [`Reading`].
///
/// Any payload of at least [`ATC_PAYLOAD_LENGTH`] bytes decodes; values are
/// not range checked because the firmware does not mark invalid readings.
///
/// # Example
/// ```
/// use atc_dashboard::decoder::decode;
///
/// let data = [0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B, 0x64, 0x00, 0x80, 0x19, 0xE4, 0x0B, 0x3C, 0x01];
/// let reading = decode(&data).unwrap();
/// assert_eq!(reading.temperature, 1.0);
/// assert_eq!(reading.sequence, 1);
/// ```
///
/// # Errors
/// Returns [`DecodeError::TooShort`] for payloads under 14 bytes.
pub fn decode(service_data: &[u8]) -> Result<Reading, DecodeError> {
    if service_data.len() < ATC_PAYLOAD_LENGTH {
        return Err(DecodeError::TooShort {
            expected: ATC_PAYLOAD_LENGTH,
            actual: service_data.len(),
        });
    }

    let temperature_centi = i16::from_le_bytes([service_data[6], service_data[7]]);
    let humidity_centi = i16::from_le_bytes([service_data[8], service_data[9]]);
    let battery_millivolts = u16::from_le_bytes([service_data[10], service_data[11]]);

    Ok(Reading {
        temperature_centi,
        humidity_centi,
        battery_millivolts,
        temperature: f64::from(temperature_centi) / 100.0,
        humidity: f64::from(humidity_centi) / 100.0,
        battery_voltage: f64::from(battery_millivolts) / 1000.0,
        battery_percent: service_data[12],
        sequence: service_data[13],
    })
}
