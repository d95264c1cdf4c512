//! Shared parsing helpers and error types used across all config modules.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use domain::common::entity::{
    Address, Family, IpNetwork, Limit, LimitUnit, MacAddr, MarkMatch, PortMatch, PortRange,
    Protocol,
};

// ── Security limits ────────────────────────────────────────────────
//
// Maximum counts per section to prevent OOM from excessive config.

pub(super) const MAX_ZONES: usize = 512;
pub(super) const MAX_IPSETS: usize = 1_024;
pub(super) const MAX_HELPERS: usize = 256;
pub(super) const MAX_REDIRECTS: usize = 4_096;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid CIDR notation '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("invalid port range '{value}': {reason}")]
    InvalidPortRange { value: String, reason: String },

    #[error("invalid value '{value}' for field '{field}': expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

// ── Shared serde defaults ──────────────────────────────────────────

pub(super) fn default_true() -> bool {
    true
}

// ── Parsing helpers ────────────────────────────────────────────────

/// Strip a leading `!` negation marker, returning the remainder and
/// whether the value was negated.
fn strip_invert(s: &str) -> (&str, bool) {
    match s.strip_prefix('!') {
        Some(rest) => (rest.trim_start(), true),
        None => (s, false),
    }
}

/// Parse a CIDR string into an `IpNetwork`.
///
/// Supports both IPv4 (`"192.168.1.0/24"`, `"10.0.0.1"`) and
/// IPv6 (`"2001:db8::/32"`, `"::1"`).
pub fn parse_cidr(s: &str) -> Result<IpNetwork, ConfigError> {
    if s.contains(':') {
        parse_cidr_v6(s)
    } else {
        parse_cidr_v4(s)
    }
}

fn parse_cidr_v4(s: &str) -> Result<IpNetwork, ConfigError> {
    let (ip_str, prefix_len) = match s.split_once('/') {
        Some((ip, prefix)) => {
            let len = prefix.parse::<u8>().map_err(|_| ConfigError::InvalidCidr {
                value: s.to_string(),
                reason: format!("invalid prefix length: '{prefix}'"),
            })?;
            if len > 32 {
                return Err(ConfigError::InvalidCidr {
                    value: s.to_string(),
                    reason: format!("prefix length {len} must be 0-32"),
                });
            }
            (ip, len)
        }
        None => (s, 32),
    };

    let addr: std::net::Ipv4Addr = ip_str.parse().map_err(|_| ConfigError::InvalidCidr {
        value: s.to_string(),
        reason: format!("invalid IPv4 address: '{ip_str}'"),
    })?;

    Ok(IpNetwork::V4 {
        addr: u32::from(addr),
        prefix_len,
    })
}

fn parse_cidr_v6(s: &str) -> Result<IpNetwork, ConfigError> {
    let (ip_str, prefix_len) = match s.split_once('/') {
        Some((ip, prefix)) => {
            let len = prefix.parse::<u8>().map_err(|_| ConfigError::InvalidCidr {
                value: s.to_string(),
                reason: format!("invalid prefix length: '{prefix}'"),
            })?;
            if len > 128 {
                return Err(ConfigError::InvalidCidr {
                    value: s.to_string(),
                    reason: format!("prefix length {len} must be 0-128"),
                });
            }
            (ip, len)
        }
        None => (s, 128),
    };

    let addr: std::net::Ipv6Addr = ip_str.parse().map_err(|e| ConfigError::InvalidCidr {
        value: s.to_string(),
        reason: format!("invalid IPv6 address: {e}"),
    })?;

    Ok(IpNetwork::V6 {
        addr: addr.octets(),
        prefix_len,
    })
}

/// Parse an address match, honoring a leading `!` negation.
pub fn parse_address(s: &str) -> Result<Address, ConfigError> {
    let (rest, invert) = strip_invert(s);
    Ok(Address {
        net: parse_cidr(rest)?,
        invert,
        resolved: true,
    })
}

/// Parse a port match: `"80"`, `"8000-8010"`, or negated `"!22"`.
pub fn parse_port(s: &str) -> Result<PortMatch, ConfigError> {
    let (rest, invert) = strip_invert(s);
    let err = |reason: String| ConfigError::InvalidPortRange {
        value: s.to_string(),
        reason,
    };

    let range = match rest.split_once('-') {
        Some((lo, hi)) => {
            let start = lo
                .trim()
                .parse::<u16>()
                .map_err(|_| err(format!("invalid port: '{lo}'")))?;
            let end = hi
                .trim()
                .parse::<u16>()
                .map_err(|_| err(format!("invalid port: '{hi}'")))?;
            if start > end {
                return Err(err(format!("start {start} exceeds end {end}")));
            }
            PortRange { start, end }
        }
        None => PortRange::single(
            rest.trim()
                .parse::<u16>()
                .map_err(|_| err(format!("invalid port: '{rest}'")))?,
        ),
    };

    Ok(PortMatch { range, invert })
}

/// Parse one protocol token into the protocols it stands for. The
/// `tcpudp` shorthand expands to both.
pub fn parse_protocols(s: &str) -> Result<Vec<Protocol>, ConfigError> {
    match s.to_lowercase().as_str() {
        "tcp" => Ok(vec![Protocol::Tcp]),
        "udp" => Ok(vec![Protocol::Udp]),
        "tcpudp" => Ok(vec![Protocol::Tcp, Protocol::Udp]),
        "icmp" => Ok(vec![Protocol::Icmp]),
        "all" | "any" | "*" => Ok(vec![Protocol::Any]),
        other => match other.parse::<u8>() {
            Ok(n) => Ok(vec![Protocol::from_u8(n)]),
            Err(_) => Err(ConfigError::InvalidValue {
                field: "proto".to_string(),
                value: s.to_string(),
                expected: "tcp, udp, tcpudp, icmp, all, or a protocol number".to_string(),
            }),
        },
    }
}

pub(super) fn parse_family(s: &str, field: &str) -> Result<Family, ConfigError> {
    match s.to_lowercase().as_str() {
        "any" | "*" => Ok(Family::Any),
        "ipv4" | "inet" => Ok(Family::V4),
        "ipv6" | "inet6" => Ok(Family::V6),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: s.to_string(),
            expected: "any, ipv4 or ipv6".to_string(),
        }),
    }
}

pub fn parse_mac(s: &str) -> Result<MacAddr, ConfigError> {
    s.parse::<MacAddr>().map_err(|e| ConfigError::InvalidValue {
        field: "src_mac".to_string(),
        value: s.to_string(),
        expected: e.to_string(),
    })
}

/// Parse a rate limit like `"10/second"` or `"3/minute"`.
pub fn parse_limit(s: &str, burst: Option<u32>) -> Result<Limit, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        field: "limit".to_string(),
        value: s.to_string(),
        expected: "N/second, N/minute, N/hour or N/day".to_string(),
    };

    let (rate, unit) = s.split_once('/').ok_or_else(invalid)?;
    let rate = rate.trim().parse::<u32>().map_err(|_| invalid())?;
    let unit = match unit.trim().to_lowercase().as_str() {
        "second" | "sec" | "s" => LimitUnit::Second,
        "minute" | "min" | "m" => LimitUnit::Minute,
        "hour" | "h" => LimitUnit::Hour,
        "day" | "d" => LimitUnit::Day,
        _ => return Err(invalid()),
    };

    Ok(Limit { rate, unit, burst })
}

/// Parse a firewall mark: `"0x1"`, `"255/0xff"`, optionally negated.
pub fn parse_mark(s: &str) -> Result<MarkMatch, ConfigError> {
    let (rest, invert) = strip_invert(s);
    let invalid = || ConfigError::InvalidValue {
        field: "mark".to_string(),
        value: s.to_string(),
        expected: "value[/mask], decimal or 0x-prefixed hex".to_string(),
    };

    let parse_u32 = |v: &str| -> Result<u32, ConfigError> {
        let v = v.trim();
        if let Some(hex) = v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16).map_err(|_| invalid())
        } else {
            v.parse::<u32>().map_err(|_| invalid())
        }
    };

    let (mark, mask) = match rest.split_once('/') {
        Some((value, mask)) => (parse_u32(value)?, Some(parse_u32(mask)?)),
        None => (parse_u32(rest)?, None),
    };

    Ok(MarkMatch { mark, mask, invert })
}

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d(:[0-5]\d)?$").unwrap());

/// Validate an ISO date (`YYYY-MM-DD`) for a time match option.
pub(super) fn validate_date(value: &str, field: &str) -> Result<(), ConfigError> {
    if DATE_RE.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "YYYY-MM-DD".to_string(),
        })
    }
}

/// Validate a time of day (`HH:MM` or `HH:MM:SS`).
pub(super) fn validate_time(value: &str, field: &str) -> Result<(), ConfigError> {
    if TIME_RE.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "HH:MM or HH:MM:SS".to_string(),
        })
    }
}

/// Log a warning if a file is world-readable (Unix only).
#[cfg(unix)]
pub(super) fn warn_if_world_readable(path: &Path, label: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o004 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:04o}"),
                "{label} is world-readable, consider chmod 640 or stricter",
            );
        }
    }
}

#[cfg(not(unix))]
pub(super) fn warn_if_world_readable(_path: &Path, _label: &str) {
    // File permission checks not available on non-Unix platforms.
}

/// Enforce a maximum count on a config collection.
pub(super) fn check_limit(field: &str, count: usize, max: usize) -> Result<(), ConfigError> {
    if count > max {
        return Err(ConfigError::Validation {
            field: field.to_string(),
            message: format!("count {count} exceeds maximum {max}"),
        });
    }
    Ok(())
}
