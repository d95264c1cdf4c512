use serde::{Deserialize, Serialize};

use domain::common::entity::{Family, TimeMatch};
use domain::redirect::entity::{
    HelperRef, IpsetRef, Redirect, RedirectTarget, ReflectionSource, ZoneSpec,
};

use super::common::{
    ConfigError, default_true, parse_address, parse_family, parse_limit, parse_mac, parse_mark,
    parse_port, parse_protocols, validate_date, validate_time,
};

/// One port forwarding record as written in the config file. All
/// values are strings in the option syntax; `to_domain` parses them
/// into the typed record handed to validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub family: Option<String>,

    /// `dnat` (default) or `snat`.
    #[serde(default)]
    pub target: Option<String>,

    /// Source zone name, `*` for any, `!` prefix to negate.
    #[serde(default)]
    pub src: Option<String>,

    #[serde(default)]
    pub dest: Option<String>,

    /// Ipset name, `!` prefix to negate the match.
    #[serde(default)]
    pub ipset: Option<String>,

    /// Conntrack helper name, `!` prefix to negate the match.
    #[serde(default)]
    pub helper: Option<String>,

    #[serde(default)]
    pub proto: Vec<String>,

    #[serde(default)]
    pub src_ip: Option<String>,

    #[serde(default)]
    pub src_mac: Vec<String>,

    #[serde(default)]
    pub src_port: Option<String>,

    /// Original destination address (DNAT) or rewrite source (SNAT).
    #[serde(default)]
    pub src_dip: Option<String>,

    #[serde(default)]
    pub src_dport: Option<String>,

    /// Rewrite destination address.
    #[serde(default)]
    pub dest_ip: Option<String>,

    #[serde(default)]
    pub dest_port: Option<String>,

    #[serde(default)]
    pub limit: Option<String>,

    #[serde(default)]
    pub limit_burst: Option<u32>,

    #[serde(default)]
    pub utc_time: bool,

    #[serde(default)]
    pub start_date: Option<String>,

    #[serde(default)]
    pub stop_date: Option<String>,

    #[serde(default)]
    pub start_time: Option<String>,

    #[serde(default)]
    pub stop_time: Option<String>,

    /// ISO weekday numbers, 1 (Monday) to 7 (Sunday).
    #[serde(default)]
    pub weekdays: Vec<u8>,

    #[serde(default)]
    pub monthdays: Vec<u8>,

    #[serde(default)]
    pub mark: Option<String>,

    /// Extra raw match arguments appended verbatim.
    #[serde(default)]
    pub extra: Option<String>,

    #[serde(default = "default_true")]
    pub reflection: bool,

    /// `internal` or `external` (default).
    #[serde(default)]
    pub reflection_src: Option<String>,
}

fn parse_zone_spec(s: &str) -> ZoneSpec {
    match s {
        "*" | "any" => ZoneSpec::any(),
        _ => match s.strip_prefix('!') {
            Some(rest) => ZoneSpec {
                invert: true,
                ..ZoneSpec::named(rest.trim_start())
            },
            None => ZoneSpec::named(s),
        },
    }
}

fn split_invert(s: &str) -> (&str, bool) {
    match s.strip_prefix('!') {
        Some(rest) => (rest.trim_start(), true),
        None => (s, false),
    }
}

impl RedirectConfig {
    /// Parse into a domain record. Any malformed option rejects the
    /// whole record; the caller decides whether that aborts the load
    /// or just drops the record.
    pub fn to_domain(&self, idx: usize) -> Result<Redirect, ConfigError> {
        let field = |name: &str| format!("redirects[{idx}].{name}");
        let wrap = |name: &str, e: ConfigError| ConfigError::Validation {
            field: field(name),
            message: e.to_string(),
        };

        let mut redir = Redirect::new(idx);
        redir.name = self.name.clone();
        redir.enabled = self.enabled;
        redir.reflection = self.reflection;
        redir.extra = self.extra.clone();

        if let Some(family) = &self.family {
            redir.family = parse_family(family, &field("family"))?;
        } else {
            redir.family = Family::Any;
        }

        if let Some(target) = &self.target {
            redir.target = Some(match target.to_lowercase().as_str() {
                "dnat" => RedirectTarget::Dnat,
                "snat" => RedirectTarget::Snat,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: field("target"),
                        value: target.clone(),
                        expected: "dnat or snat".to_string(),
                    });
                }
            });
        }

        if let Some(src) = &self.src {
            redir.src = parse_zone_spec(src);
        }
        if let Some(dest) = &self.dest {
            redir.dest = parse_zone_spec(dest);
        }

        if let Some(ipset) = &self.ipset {
            let (name, invert) = split_invert(ipset);
            redir.ipset = IpsetRef::named(name, invert);
        }
        if let Some(helper) = &self.helper {
            let (name, invert) = split_invert(helper);
            redir.helper = HelperRef::named(name, invert);
        }

        for token in &self.proto {
            redir.proto.extend(parse_protocols(token)?);
        }

        if let Some(v) = &self.src_ip {
            redir.ip_src = Some(parse_address(v).map_err(|e| wrap("src_ip", e))?);
        }
        if let Some(v) = &self.src_dip {
            redir.ip_dest = Some(parse_address(v).map_err(|e| wrap("src_dip", e))?);
        }
        if let Some(v) = &self.dest_ip {
            redir.ip_redir = Some(parse_address(v).map_err(|e| wrap("dest_ip", e))?);
        }
        if let Some(v) = &self.src_port {
            redir.port_src = Some(parse_port(v).map_err(|e| wrap("src_port", e))?);
        }
        if let Some(v) = &self.src_dport {
            redir.port_dest = Some(parse_port(v).map_err(|e| wrap("src_dport", e))?);
        }
        if let Some(v) = &self.dest_port {
            redir.port_redir = Some(parse_port(v).map_err(|e| wrap("dest_port", e))?);
        }
        for mac in &self.src_mac {
            redir.mac_src.push(parse_mac(mac).map_err(|e| wrap("src_mac", e))?);
        }

        if let Some(v) = &self.limit {
            redir.limit = Some(parse_limit(v, self.limit_burst).map_err(|e| wrap("limit", e))?);
        }
        if let Some(v) = &self.mark {
            redir.mark = Some(parse_mark(v).map_err(|e| wrap("mark", e))?);
        }

        redir.time = self.parse_time(idx)?;

        if let Some(src) = &self.reflection_src {
            redir.reflection_src = match src.to_lowercase().as_str() {
                "internal" => ReflectionSource::Internal,
                "external" => ReflectionSource::External,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: field("reflection_src"),
                        value: src.clone(),
                        expected: "internal or external".to_string(),
                    });
                }
            };
        }

        Ok(redir)
    }

    fn parse_time(&self, idx: usize) -> Result<TimeMatch, ConfigError> {
        let field = |name: &str| format!("redirects[{idx}].{name}");

        if let Some(v) = &self.start_date {
            validate_date(v, &field("start_date"))?;
        }
        if let Some(v) = &self.stop_date {
            validate_date(v, &field("stop_date"))?;
        }
        if let Some(v) = &self.start_time {
            validate_time(v, &field("start_time"))?;
        }
        if let Some(v) = &self.stop_time {
            validate_time(v, &field("stop_time"))?;
        }
        for day in &self.weekdays {
            if !(1..=7).contains(day) {
                return Err(ConfigError::Validation {
                    field: field("weekdays"),
                    message: format!("weekday {day} outside 1-7"),
                });
            }
        }
        for day in &self.monthdays {
            if !(1..=31).contains(day) {
                return Err(ConfigError::Validation {
                    field: field("monthdays"),
                    message: format!("monthday {day} outside 1-31"),
                });
            }
        }

        Ok(TimeMatch {
            utc: self.utc_time,
            start_date: self.start_date.clone(),
            stop_date: self.stop_date.clone(),
            start_time: self.start_time.clone(),
            stop_time: self.stop_time.clone(),
            weekdays: self.weekdays.clone(),
            monthdays: self.monthdays.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::common::entity::Protocol;

    fn minimal() -> RedirectConfig {
        serde_yaml_ng::from_str(
            r#"
            name: fwd-http
            src: wan
            proto: [tcp]
            src_dport: "80"
            dest_ip: 10.0.0.5
            dest_port: "8080"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn minimal_record_parses() {
        let redir = minimal().to_domain(0).unwrap();
        assert_eq!(redir.name.as_deref(), Some("fwd-http"));
        assert!(redir.enabled);
        assert!(redir.reflection);
        assert_eq!(redir.src.name, "wan");
        assert_eq!(redir.proto, vec![Protocol::Tcp]);
        assert_eq!(redir.target, None);
        assert!(redir.ip_redir.is_some());
    }

    #[test]
    fn wildcard_and_negated_zones() {
        let mut cfg = minimal();
        cfg.src = Some("*".to_string());
        cfg.dest = Some("!lan".to_string());
        let redir = cfg.to_domain(0).unwrap();
        assert!(redir.src.any);
        assert!(redir.dest.invert);
        assert_eq!(redir.dest.name, "lan");
    }

    #[test]
    fn negated_ipset_and_helper() {
        let mut cfg = minimal();
        cfg.ipset = Some("!blocklist".to_string());
        cfg.helper = Some("ftp".to_string());
        let redir = cfg.to_domain(0).unwrap();
        assert_eq!(redir.ipset, IpsetRef::named("blocklist", true));
        assert_eq!(redir.helper, HelperRef::named("ftp", false));
    }

    #[test]
    fn tcpudp_shorthand_expands() {
        let mut cfg = minimal();
        cfg.proto = vec!["tcpudp".to_string()];
        let redir = cfg.to_domain(0).unwrap();
        assert_eq!(redir.proto, vec![Protocol::Tcp, Protocol::Udp]);
    }

    #[test]
    fn invalid_target_is_rejected() {
        let mut cfg = minimal();
        cfg.target = Some("masq".to_string());
        assert!(cfg.to_domain(0).is_err());
    }

    #[test]
    fn invalid_address_is_rejected() {
        let mut cfg = minimal();
        cfg.dest_ip = Some("10.0.0.999".to_string());
        assert!(cfg.to_domain(0).is_err());
    }

    #[test]
    fn invalid_weekday_is_rejected() {
        let mut cfg = minimal();
        cfg.weekdays = vec![0];
        assert!(cfg.to_domain(0).is_err());
        cfg.weekdays = vec![1, 7];
        assert!(cfg.to_domain(0).is_ok());
    }

    #[test]
    fn time_window_round_trips() {
        let mut cfg = minimal();
        cfg.start_time = Some("09:00".to_string());
        cfg.stop_time = Some("17:30".to_string());
        cfg.utc_time = true;
        let redir = cfg.to_domain(0).unwrap();
        assert!(redir.time.is_set());
        assert!(redir.time.utc);
    }

    #[test]
    fn reflection_source_parses() {
        let mut cfg = minimal();
        cfg.reflection_src = Some("internal".to_string());
        let redir = cfg.to_domain(0).unwrap();
        assert_eq!(redir.reflection_src, ReflectionSource::Internal);

        cfg.reflection_src = Some("sideways".to_string());
        assert!(cfg.to_domain(0).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let parsed: Result<RedirectConfig, _> = serde_yaml_ng::from_str(
            r#"
            src: wan
            bogus_option: 1
            "#,
        );
        assert!(parsed.is_err());
    }
}
