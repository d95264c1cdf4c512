use serde::{Deserialize, Serialize};

use crate::common::entity::{
    Address, Family, Limit, MacAddr, MarkMatch, PortMatch, Protocol, TimeMatch,
};
use crate::cthelper::entity::HelperId;
use crate::ipset::entity::IpsetId;
use crate::zone::entity::ZoneId;

/// NAT flavor of a redirect record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectTarget {
    Dnat,
    Snat,
}

impl RedirectTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dnat => "DNAT",
            Self::Snat => "SNAT",
        }
    }
}

/// Which address reflected (hairpin) traffic is rewritten to appear
/// from: the gateway's internal address or the external one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionSource {
    Internal,
    #[default]
    External,
}

/// A zone reference as written in a record. `any` is the `*` wildcard;
/// a spec can be set without naming a zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub set: bool,
    pub any: bool,
    pub invert: bool,
    pub name: String,
}

impl ZoneSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            set: true,
            any: false,
            invert: false,
            name: name.into(),
        }
    }

    pub fn any() -> Self {
        Self {
            set: true,
            any: true,
            invert: false,
            name: String::new(),
        }
    }

    pub fn is_named(&self) -> bool {
        self.set && !self.any
    }
}

/// Ipset reference lifecycle: written name, then resolved id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpsetRef {
    #[default]
    Unset,
    Named {
        name: String,
        invert: bool,
    },
    Resolved {
        id: IpsetId,
        invert: bool,
    },
}

impl IpsetRef {
    pub fn named(name: impl Into<String>, invert: bool) -> Self {
        Self::Named {
            name: name.into(),
            invert,
        }
    }
}

/// Conntrack helper reference. `explicit` records whether the helper
/// was configured by hand or auto-selected from the target port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelperRef {
    #[default]
    Unset,
    Named {
        name: String,
        invert: bool,
    },
    Resolved {
        id: HelperId,
        explicit: bool,
        invert: bool,
    },
}

impl HelperRef {
    pub fn named(name: impl Into<String>, invert: bool) -> Self {
        Self::Named {
            name: name.into(),
            invert,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

/// One port forwarding record. Built from configuration, then passed
/// through validation which resolves references and fills defaults
/// before the record may be expanded into rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redirect {
    /// Position in the configuration, used for anonymous labels.
    pub index: usize,
    pub name: Option<String>,
    pub enabled: bool,
    pub family: Family,
    pub target: Option<RedirectTarget>,

    pub src: ZoneSpec,
    pub dest: ZoneSpec,
    pub src_zone: Option<ZoneId>,
    pub dest_zone: Option<ZoneId>,

    pub ipset: IpsetRef,
    pub helper: HelperRef,

    pub proto: Vec<Protocol>,
    pub ip_src: Option<Address>,
    pub ip_dest: Option<Address>,
    pub ip_redir: Option<Address>,
    pub port_src: Option<PortMatch>,
    pub port_dest: Option<PortMatch>,
    pub port_redir: Option<PortMatch>,
    pub mac_src: Vec<MacAddr>,

    pub limit: Option<Limit>,
    pub time: TimeMatch,
    pub mark: Option<MarkMatch>,
    pub extra: Option<String>,

    pub reflection: bool,
    pub reflection_src: ReflectionSource,

    /// DNAT without a rewrite address redirects to the gateway itself.
    /// Derived during validation.
    pub local: bool,
}

impl Redirect {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            name: None,
            enabled: true,
            family: Family::Any,
            target: None,
            src: ZoneSpec::default(),
            dest: ZoneSpec::default(),
            src_zone: None,
            dest_zone: None,
            ipset: IpsetRef::Unset,
            helper: HelperRef::Unset,
            proto: Vec::new(),
            ip_src: None,
            ip_dest: None,
            ip_redir: None,
            port_src: None,
            port_dest: None,
            port_redir: None,
            mac_src: Vec::new(),
            limit: None,
            time: TimeMatch::default(),
            mark: None,
            extra: None,
            reflection: true,
            reflection_src: ReflectionSource::default(),
            local: false,
        }
    }

    /// Human label for diagnostics: the configured name or a positional
    /// `@redirect[N]` fallback.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("@redirect[{}]", self.index),
        }
    }

    /// Rule comment, optionally suffixed, e.g. `fwd-http (reflection)`.
    pub fn comment(&self, suffix: Option<&str>) -> String {
        match suffix {
            Some(s) => format!("{} ({s})", self.label()),
            None => self.label(),
        }
    }
}
