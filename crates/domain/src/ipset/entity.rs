use serde::{Deserialize, Serialize};

use crate::common::entity::Family;

pub type IpsetId = usize;

/// A named ipset a redirect may match against. `external` points at a
/// set maintained outside this policy; such sets are referenced under
/// their external name and must already exist in the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipset {
    pub name: String,
    pub family: Family,
    pub external: Option<String>,
    /// Whether the set exists in the live ruleset. Externally
    /// maintained sets may be declared but absent.
    pub present: bool,
    /// Set once a rule referencing the set was emitted, per family.
    materialized: [bool; 2],
}

impl Ipset {
    pub fn new(name: impl Into<String>, family: Family, external: Option<String>) -> Self {
        Self {
            name: name.into(),
            family,
            external,
            present: true,
            materialized: [false; 2],
        }
    }

    /// Name used in the generated match, preferring the external name.
    pub fn effective_name(&self) -> &str {
        self.external.as_deref().unwrap_or(&self.name)
    }

    pub fn mark_materialized(&mut self, family: Family) {
        if let Some(slot) = slot(family) {
            self.materialized[slot] = true;
        }
    }

    pub fn is_materialized(&self, family: Family) -> bool {
        slot(family).is_some_and(|s| self.materialized[s])
    }
}

fn slot(family: Family) -> Option<usize> {
    match family {
        Family::V4 => Some(0),
        Family::V6 => Some(1),
        Family::Any => None,
    }
}

#[derive(Debug, Default, Clone)]
pub struct IpsetRegistry {
    sets: Vec<Ipset>,
}

impl IpsetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, set: Ipset) -> IpsetId {
        self.sets.push(set);
        self.sets.len() - 1
    }

    pub fn lookup(&self, name: &str) -> Option<IpsetId> {
        self.sets.iter().position(|s| s.name == name)
    }

    pub fn get(&self, id: IpsetId) -> &Ipset {
        &self.sets[id]
    }

    pub fn get_mut(&mut self, id: IpsetId) -> &mut Ipset {
        &mut self.sets[id]
    }
}
