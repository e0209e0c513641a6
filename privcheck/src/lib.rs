#[cfg(test)]
mod tests;

pub mod reconcile;
pub mod report;
pub mod trusted;

pub use reconcile::{reconcile, Discrepancy, Observed, PresencePolicy, Severity, Subject};
pub use trusted::{trusted_snapshot, Attribute, AttributeSource, AttributeTree};

use std::num::ParseIntError;

/// Parses an address or offset given either in hex with a `0x` prefix or
/// in decimal.
pub fn parse_addr(s: &str) -> Result<u64, ParseIntError> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}
