use serde::{Deserialize, Serialize};

use crate::common::entity::{Family, PortRange, Protocol};

pub type HelperId = usize;

/// A conntrack helper definition: which protocols it can track and the
/// control port (range) it attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtHelper {
    pub name: String,
    pub family: Family,
    pub proto: Vec<Protocol>,
    pub port: Option<PortRange>,
}

impl CtHelper {
    pub fn new(
        name: impl Into<String>,
        family: Family,
        proto: Vec<Protocol>,
        port: Option<PortRange>,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            proto,
            port,
        }
    }

    pub fn supports_proto(&self, proto: Protocol) -> bool {
        self.proto.contains(&proto)
    }

    /// Whether this helper's control port range covers the whole of
    /// `range`. A helper without a port never matches by port.
    pub fn covers_port(&self, range: &PortRange) -> bool {
        self.port.is_some_and(|p| p.contains(range))
    }
}

#[derive(Debug, Default, Clone)]
pub struct CtHelperRegistry {
    helpers: Vec<CtHelper>,
}

impl CtHelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, helper: CtHelper) -> HelperId {
        self.helpers.push(helper);
        self.helpers.len() - 1
    }

    pub fn lookup(&self, name: &str) -> Option<HelperId> {
        self.helpers
            .iter()
            .position(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, id: HelperId) -> &CtHelper {
        &self.helpers[id]
    }

    /// First helper supporting `proto` whose port range covers
    /// `range`. Declaration order decides ties.
    pub fn lookup_by_proto_port(&self, proto: Protocol, range: &PortRange) -> Option<HelperId> {
        self.helpers
            .iter()
            .position(|h| h.supports_proto(proto) && h.covers_port(range))
    }
}
