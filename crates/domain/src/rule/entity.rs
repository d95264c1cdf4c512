use serde::{Deserialize, Serialize};

use crate::common::entity::{
    Address, Limit, MacAddr, MarkMatch, PortMatch, PortRange, Protocol, TimeMatch,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Table {
    Filter,
    Nat,
    Raw,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Nat => "nat",
            Self::Raw => "raw",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule lands in its chain. `Replace` rules occupy a fixed slot
/// so repeated compilation does not grow the chain; `Append` rules are
/// added at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    Append,
    Replace,
}

/// One packet match in iptables argument form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Match {
    Proto(Protocol),
    SrcAddr(Address),
    DestAddr(Address),
    SrcPort(PortMatch),
    DestPort(PortMatch),
    SrcMac(MacAddr),
    Ipset { name: String, invert: bool },
    Helper { name: String, invert: bool },
    Limit(Limit),
    Time(TimeMatch),
    Mark(MarkMatch),
    CtStateDnat,
    Extra(String),
}

/// Rewrite destination of a NAT target: address, port range, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatAddr {
    /// v4 address in host byte order.
    pub addr: Option<u32>,
    pub port: Option<PortRange>,
}

impl std::fmt::Display for NatAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(addr) = self.addr {
            write!(f, "{}", std::net::Ipv4Addr::from(addr))?;
        }
        if let Some(port) = &self.port {
            if self.addr.is_some() {
                write!(f, ":")?;
            }
            write!(f, "{port}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleTarget {
    /// REDIRECT to a local port, keeping the original address.
    Redirect { ports: Option<PortRange> },
    Dnat { to: NatAddr },
    Snat { to: NatAddr },
    CtHelper { name: String },
}

/// A fully rendered rule, one line of a compiled ruleset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub table: Table,
    pub chain: String,
    pub placement: Placement,
    pub matches: Vec<Match>,
    pub target: RuleTarget,
    pub comment: String,
}

/// Sink receiving compiled rules. `Vec<Rule>` collects; other sinks
/// may stream.
pub trait RuleSink {
    fn emit(&mut self, rule: Rule);
}

impl RuleSink for Vec<Rule> {
    fn emit(&mut self, rule: Rule) {
        self.push(rule);
    }
}

fn invert_prefix(invert: bool) -> &'static str {
    if invert { "! " } else { "" }
}

impl std::fmt::Display for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proto(Protocol::Any) => Ok(()),
            Self::Proto(p) => write!(f, "-p {p}"),
            Self::SrcAddr(a) => write!(f, "{}-s {a}", invert_prefix(a.invert)),
            Self::DestAddr(a) => write!(f, "{}-d {a}", invert_prefix(a.invert)),
            Self::SrcPort(p) => write!(
                f,
                "{}--sport {}",
                invert_prefix(p.invert),
                p.range.match_arg()
            ),
            Self::DestPort(p) => write!(
                f,
                "{}--dport {}",
                invert_prefix(p.invert),
                p.range.match_arg()
            ),
            Self::SrcMac(mac) => write!(f, "-m mac --mac-source {mac}"),
            Self::Ipset { name, invert } => {
                write!(f, "-m set {}--match-set {name} dst", invert_prefix(*invert))
            }
            Self::Helper { name, invert } => {
                write!(f, "-m helper {}--helper {name}", invert_prefix(*invert))
            }
            Self::Limit(limit) => {
                write!(f, "-m limit --limit {}/{}", limit.rate, limit.unit.as_str())?;
                if let Some(burst) = limit.burst {
                    write!(f, " --limit-burst {burst}")?;
                }
                Ok(())
            }
            Self::Time(tm) => {
                write!(f, "-m time")?;
                if let Some(d) = &tm.start_date {
                    write!(f, " --datestart {d}")?;
                }
                if let Some(d) = &tm.stop_date {
                    write!(f, " --datestop {d}")?;
                }
                if let Some(t) = &tm.start_time {
                    write!(f, " --timestart {t}")?;
                }
                if let Some(t) = &tm.stop_time {
                    write!(f, " --timestop {t}")?;
                }
                if !tm.weekdays.is_empty() {
                    let days: Vec<String> = tm.weekdays.iter().map(u8::to_string).collect();
                    write!(f, " --weekdays {}", days.join(","))?;
                }
                if !tm.monthdays.is_empty() {
                    let days: Vec<String> = tm.monthdays.iter().map(u8::to_string).collect();
                    write!(f, " --monthdays {}", days.join(","))?;
                }
                if tm.utc {
                    write!(f, " --utc")?;
                }
                Ok(())
            }
            Self::Mark(m) => {
                write!(f, "-m mark {}--mark 0x{:x}", invert_prefix(m.invert), m.mark)?;
                if let Some(mask) = m.mask {
                    write!(f, "/0x{mask:x}")?;
                }
                Ok(())
            }
            Self::CtStateDnat => write!(f, "-m conntrack --ctstate DNAT"),
            Self::Extra(s) => f.write_str(s),
        }
    }
}

impl std::fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redirect { ports } => {
                write!(f, "-j REDIRECT")?;
                if let Some(p) = ports {
                    write!(f, " --to-ports {p}")?;
                }
                Ok(())
            }
            Self::Dnat { to } => write!(f, "-j DNAT --to-destination {to}"),
            Self::Snat { to } => write!(f, "-j SNAT --to-source {to}"),
            Self::CtHelper { name } => write!(f, "-j CT --helper {name}"),
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.placement {
            Placement::Append => write!(f, "-A {}", self.chain)?,
            Placement::Replace => write!(f, "-R {}", self.chain)?,
        }
        for m in &self.matches {
            let rendered = m.to_string();
            if !rendered.is_empty() {
                write!(f, " {rendered}")?;
            }
        }
        write!(f, " {}", self.target)?;
        write!(f, " -m comment --comment \"{}\"", self.comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: [u8; 4], len: u8) -> Address {
        Address::v4(u32::from_be_bytes(a), len)
    }

    #[test]
    fn nat_addr_rendering() {
        let both = NatAddr {
            addr: Some(u32::from_be_bytes([10, 0, 0, 5])),
            port: Some(PortRange::single(8080)),
        };
        assert_eq!(format!("{both}"), "10.0.0.5:8080");

        let addr_only = NatAddr {
            addr: Some(u32::from_be_bytes([10, 0, 0, 5])),
            port: None,
        };
        assert_eq!(format!("{addr_only}"), "10.0.0.5");

        let port_only = NatAddr {
            addr: None,
            port: Some(PortRange {
                start: 8000,
                end: 8010,
            }),
        };
        assert_eq!(format!("{port_only}"), "8000-8010");
    }

    #[test]
    fn match_rendering() {
        assert_eq!(Match::Proto(Protocol::Tcp).to_string(), "-p tcp");
        assert_eq!(Match::Proto(Protocol::Any).to_string(), "");
        assert_eq!(
            Match::SrcAddr(addr([10, 0, 0, 0], 24)).to_string(),
            "-s 10.0.0.0/24"
        );
        assert_eq!(
            Match::DestPort(PortMatch {
                range: PortRange::single(80),
                invert: true,
            })
            .to_string(),
            "! --dport 80"
        );
        assert_eq!(
            Match::Ipset {
                name: "blocklist".into(),
                invert: false,
            }
            .to_string(),
            "-m set --match-set blocklist dst"
        );
        assert_eq!(
            Match::CtStateDnat.to_string(),
            "-m conntrack --ctstate DNAT"
        );
    }

    #[test]
    fn rule_rendering() {
        let rule = Rule {
            table: Table::Nat,
            chain: "zone_wan_prerouting".into(),
            placement: Placement::Append,
            matches: vec![
                Match::Proto(Protocol::Tcp),
                Match::DestPort(PortMatch::new(80, 80)),
            ],
            target: RuleTarget::Dnat {
                to: NatAddr {
                    addr: Some(u32::from_be_bytes([10, 0, 0, 5])),
                    port: Some(PortRange::single(8080)),
                },
            },
            comment: "@redirect[0]".into(),
        };
        assert_eq!(
            rule.to_string(),
            "-A zone_wan_prerouting -p tcp --dport 80 \
             -j DNAT --to-destination 10.0.0.5:8080 \
             -m comment --comment \"@redirect[0]\""
        );
    }

    #[test]
    fn wildcard_proto_leaves_no_gap() {
        let rule = Rule {
            table: Table::Nat,
            chain: "zone_wan_prerouting".into(),
            placement: Placement::Replace,
            matches: vec![Match::Proto(Protocol::Any)],
            target: RuleTarget::Redirect { ports: None },
            comment: "loopback".into(),
        };
        assert_eq!(
            rule.to_string(),
            "-R zone_wan_prerouting -j REDIRECT -m comment --comment \"loopback\""
        );
    }
}
