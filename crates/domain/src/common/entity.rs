use serde::{Deserialize, Serialize};

/// Address family a record or object applies to. `Any` matches both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    #[default]
    Any,
    V4,
    V6,
}

impl Family {
    /// Two families conflict only when both are concrete and differ.
    pub fn conflicts_with(self, other: Family) -> bool {
        self != Family::Any && other != Family::Any && self != other
    }

    /// Whether an object with this family is applicable when emitting
    /// for `family`. Wildcard objects apply everywhere.
    pub fn applies_to(self, family: Family) -> bool {
        self == Family::Any || self == family
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
    Other(u8),
}

impl Protocol {
    /// IP protocol number. Returns 0 for Any (wildcard).
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Icmp => 1,
            Self::Any => 0,
            Self::Other(n) => n,
        }
    }

    pub fn from_u8(n: u8) -> Self {
        match n {
            0 => Self::Any,
            1 => Self::Icmp,
            6 => Self::Tcp,
            17 => Self::Udp,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Icmp => f.write_str("icmp"),
            Self::Any => f.write_str("all"),
            Self::Other(n) => write!(f, "{n}"),
        }
    }
}

/// Inclusive port range. A single port is `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, other: &PortRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// iptables `--sport`/`--dport` argument, colon separated.
    pub fn match_arg(&self) -> String {
        if self.is_single() {
            format!("{}", self.start)
        } else {
            format!("{}:{}", self.start, self.end)
        }
    }
}

/// Renders in NAT target notation, dash separated: `80` or `8000-8010`.
impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A port range match, optionally negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMatch {
    pub range: PortRange,
    pub invert: bool,
}

impl PortMatch {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            range: PortRange { start, end },
            invert: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpNetwork {
    V4 { addr: u32, prefix_len: u8 },
    V6 { addr: [u8; 16], prefix_len: u8 },
}

impl IpNetwork {
    pub fn family(&self) -> Family {
        match self {
            Self::V4 { .. } => Family::V4,
            Self::V6 { .. } => Family::V6,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        match self {
            Self::V4 { prefix_len, .. } | Self::V6 { prefix_len, .. } => *prefix_len,
        }
    }

    /// Address of a v4 network, in host byte order.
    pub fn v4_addr(&self) -> Option<u32> {
        match self {
            Self::V4 { addr, .. } => Some(*addr),
            Self::V6 { .. } => None,
        }
    }

    fn v4_mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len.min(32)))
        }
    }
}

impl std::fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4 { addr, prefix_len } => {
                write!(f, "{}", std::net::Ipv4Addr::from(*addr))?;
                if *prefix_len < 32 {
                    write!(f, "/{prefix_len}")?;
                }
                Ok(())
            }
            Self::V6 { addr, prefix_len } => {
                write!(f, "{}", std::net::Ipv6Addr::from(*addr))?;
                if *prefix_len < 128 {
                    write!(f, "/{prefix_len}")?;
                }
                Ok(())
            }
        }
    }
}

/// An address match. `resolved` distinguishes literal addresses from
/// symbolic ones that could not be resolved against the running system;
/// unresolved addresses suppress family-mismatch diagnostics at
/// emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub net: IpNetwork,
    pub invert: bool,
    pub resolved: bool,
}

impl Address {
    pub fn v4(addr: u32, prefix_len: u8) -> Self {
        Self {
            net: IpNetwork::V4 { addr, prefix_len },
            invert: false,
            resolved: true,
        }
    }

    pub fn family(&self) -> Family {
        self.net.family()
    }

    /// Whether `host` falls inside this network, using this network's
    /// own mask. Only defined for v4 on both sides.
    pub fn contains_masked(&self, host: &Address) -> bool {
        match (&self.net, &host.net) {
            (
                IpNetwork::V4 { addr, prefix_len },
                IpNetwork::V4 { addr: other, .. },
            ) => {
                let mask = IpNetwork::v4_mask(*prefix_len);
                addr & mask == other & mask
            }
            _ => false,
        }
    }

    /// The same address narrowed to a host match.
    pub fn as_host(&self) -> Address {
        let net = match self.net {
            IpNetwork::V4 { addr, .. } => IpNetwork::V4 {
                addr,
                prefix_len: 32,
            },
            IpNetwork::V6 { addr, .. } => IpNetwork::V6 {
                addr,
                prefix_len: 128,
            },
        };
        Address {
            net,
            invert: false,
            resolved: self.resolved,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.net)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl std::str::FromStr for MacAddr {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or("expected 6 colon-separated octets")?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| "invalid hex octet")?;
        }
        if parts.next().is_some() {
            return Err("expected 6 colon-separated octets");
        }
        Ok(MacAddr(bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl LimitUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

/// Rate limit match, e.g. `10/minute` with an optional burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub rate: u32,
    pub unit: LimitUnit,
    pub burst: Option<u32>,
}

/// Time window constraints for a rule. All fields optional; an empty
/// match emits nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeMatch {
    pub utc: bool,
    pub start_date: Option<String>,
    pub stop_date: Option<String>,
    pub start_time: Option<String>,
    pub stop_time: Option<String>,
    pub weekdays: Vec<u8>,
    pub monthdays: Vec<u8>,
}

impl TimeMatch {
    pub fn is_set(&self) -> bool {
        self.start_date.is_some()
            || self.stop_date.is_some()
            || self.start_time.is_some()
            || self.stop_time.is_some()
            || !self.weekdays.is_empty()
            || !self.monthdays.is_empty()
    }
}

/// Firewall mark match, `value` with an optional `mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkMatch {
    pub mark: u32,
    pub mask: Option<u32>,
    pub invert: bool,
}
