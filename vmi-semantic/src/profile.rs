
use crate::offsets::OffsetTable;
use crate::{Error, Result};

use std::collections::HashMap;

use regex::Regex;

use serde::Deserialize;

use log::debug;

/// Kernel debug metadata for one build.
///
/// The JSON layout follows Rekall profiles: `$CONSTANTS` maps symbol names to
/// their (unrandomized) virtual addresses, `$STRUCTS` maps structure names to
/// field offsets, and `$OFFSETS` is the offset table used by the task walker.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(rename = "$CONSTANTS", default)]
    symbols: HashMap<String, u64>,
    #[serde(rename = "$STRUCTS", default)]
    structs: HashMap<String, HashMap<String, u64>>,
    #[serde(rename = "$OFFSETS")]
    offsets: OffsetTable,
}

impl Profile {
    pub fn from_json(s: &str) -> Result<Self> {
        let profile = serde_json::from_str(s)?;
        Ok(profile)
    }

    pub fn get_symbol(&self, name: &str) -> Result<u64> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| Error::Symbol(name.to_string()))
    }

    pub fn get_struct_field_offset(&self, struct_name: &str, field: &str) -> Result<u64> {
        self.structs
            .get(struct_name)
            .and_then(|s| s.get(field))
            .copied()
            .ok_or_else(|| Error::Profile(format!("missing field {}.{}", struct_name, field)))
    }

    pub fn get_offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    /// Adds the symbols of a `System.map` (or `/proc/kallsyms` dump).
    ///
    /// Symbols already present in `$CONSTANTS` are kept. Returns the number of
    /// symbols added.
    pub fn load_system_map(&mut self, map: &str) -> usize {
        lazy_static! {
            static ref LINE: Regex =
                Regex::new(r"^([0-9a-fA-F]{1,16})[ \t]+([a-zA-Z])[ \t]+([^ \t\r]+)").unwrap();
        }

        let mut added = 0;
        for caps in map.lines().filter_map(|l| LINE.captures(l)) {
            let addr = match u64::from_str_radix(&caps[1], 16) {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            if !self.symbols.contains_key(&caps[3]) {
                self.symbols.insert(caps[3].to_string(), addr);
                added += 1;
            }
        }
        debug!("{} symbols added from system map", added);
        added
    }
}
