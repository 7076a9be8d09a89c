//! Human-readable names for sensors.
//!
//! An alias overrides whatever name a sensor advertises, which is handy for
//! telling apart rooms on the dashboard.

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// MAC-to-name mappings.
pub type AliasMap = BTreeMap<MacAddress, String>;

/// A parsed alias mapping a MAC address to a display name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub address: MacAddress,
    pub name: String,
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// # Example
/// ```
/// use atc_dashboard::alias::parse_alias;
///
/// let alias = parse_alias("A4:C1:38:00:99:5B=Kitchen").unwrap();
/// assert_eq!(alias.address.to_string(), "A4:C1:38:00:99:5B");
/// assert_eq!(alias.name, "Kitchen");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format MAC=NAME".to_string())?;
    let address = address
        .parse::<MacAddress>()
        .map_err(|e| format!("invalid alias: {e}"))?;
    if name.trim().is_empty() {
        return Err("invalid alias: name is empty".to_string());
    }

    Ok(Alias {
        address,
        name: name.to_string(),
    })
}

/// Collect aliases into a lookup map. Later entries win.
pub fn to_map(aliases: &[Alias]) -> AliasMap {
    aliases
        .iter()
        .map(|a| (a.address, a.name.clone()))
        .collect()
}
