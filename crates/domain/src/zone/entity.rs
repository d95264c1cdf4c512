use serde::{Deserialize, Serialize};

use crate::common::entity::{Address, Family};

/// Index of a zone inside the [`ZoneRegistry`]. Stable for the
/// lifetime of a policy run.
pub type ZoneId = usize;

/// Per-zone chains a compiled ruleset must contain. Flags are set
/// while records are validated and only ever accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChainKind {
    Accept = 0,
    Dnat = 1,
    Snat = 2,
    Helper = 3,
}

impl ChainKind {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub family: Family,
    pub masq: bool,
    pub addresses: Vec<Address>,
    /// Required-chain bitmask per concrete family (v4, v6).
    required: [u8; 2],
}

fn family_slot(family: Family) -> Option<usize> {
    match family {
        Family::V4 => Some(0),
        Family::V6 => Some(1),
        Family::Any => None,
    }
}

impl Zone {
    pub fn new(name: impl Into<String>, family: Family, masq: bool, addresses: Vec<Address>) -> Self {
        Self {
            name: name.into(),
            family,
            masq,
            addresses,
            required: [0; 2],
        }
    }

    /// Record that the compiled ruleset needs the given per-zone chain
    /// for `family`. Monotonic, flags are never cleared.
    pub fn require_chain(&mut self, family: Family, kind: ChainKind) {
        if let Some(slot) = family_slot(family) {
            self.required[slot] |= kind.bit();
        }
    }

    pub fn requires_chain(&self, family: Family, kind: ChainKind) -> bool {
        family_slot(family).is_some_and(|slot| self.required[slot] & kind.bit() != 0)
    }

    /// Name of a per-zone chain, e.g. `zone_wan_prerouting`.
    pub fn chain(&self, suffix: &str) -> String {
        format!("zone_{}_{}", self.name, suffix)
    }
}

/// Zones in declaration order. Lookups that scan (destination zone
/// inference) honor insertion order, first match wins.
#[derive(Debug, Default, Clone)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, zone: Zone) -> ZoneId {
        self.zones.push(zone);
        self.zones.len() - 1
    }

    pub fn lookup(&self, name: &str) -> Option<ZoneId> {
        self.zones.iter().position(|z| z.name == name)
    }

    pub fn get(&self, id: ZoneId) -> &Zone {
        &self.zones[id]
    }

    pub fn get_mut(&mut self, id: ZoneId) -> &mut Zone {
        &mut self.zones[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ZoneId, &Zone)> {
        self.zones.iter().enumerate()
    }

    /// Addresses a rule should cover for this zone: the explicit
    /// `scope` override when given, otherwise every address attached
    /// to the zone.
    pub fn resolve_addresses(&self, id: ZoneId, scope: Option<&Address>) -> Vec<Address> {
        match scope {
            Some(addr) => vec![*addr],
            None => self.zones[id].addresses.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
