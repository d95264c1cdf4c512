use serde::{Deserialize, Serialize};

use domain::common::entity::Family;
use domain::cthelper::entity::CtHelper;

use super::common::{ConfigError, parse_family, parse_port, parse_protocols};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CtHelperConfig {
    pub name: String,

    #[serde(default)]
    pub family: Option<String>,

    /// Protocols the helper can track.
    pub proto: Vec<String>,

    /// Control port (range) the helper attaches to, used for
    /// auto-selection.
    #[serde(default)]
    pub port: Option<String>,
}

impl CtHelperConfig {
    pub fn validate(&self, idx: usize) -> Result<(), ConfigError> {
        let field = |name: &str| format!("helpers[{idx}].{name}");

        if self.name.is_empty() {
            return Err(ConfigError::Validation {
                field: field("name"),
                message: "helper name must not be empty".to_string(),
            });
        }
        if self.proto.is_empty() {
            return Err(ConfigError::Validation {
                field: field("proto"),
                message: "at least one protocol is required".to_string(),
            });
        }
        for proto in &self.proto {
            parse_protocols(proto)?;
        }
        if let Some(port) = &self.port {
            parse_port(port).map_err(|e| ConfigError::Validation {
                field: field("port"),
                message: e.to_string(),
            })?;
        }
        if let Some(family) = &self.family {
            parse_family(family, &field("family"))?;
        }
        Ok(())
    }

    pub fn to_domain(&self) -> Result<CtHelper, ConfigError> {
        let family = match &self.family {
            Some(f) => parse_family(f, "family")?,
            None => Family::Any,
        };
        let mut protos = Vec::new();
        for token in &self.proto {
            protos.extend(parse_protocols(token)?);
        }
        let port = match &self.port {
            Some(p) => Some(parse_port(p)?.range),
            None => None,
        };
        Ok(CtHelper::new(self.name.clone(), family, protos, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::common::entity::{PortRange, Protocol};

    fn make_helper() -> CtHelperConfig {
        CtHelperConfig {
            name: "ftp".to_string(),
            family: None,
            proto: vec!["tcp".to_string()],
            port: Some("21".to_string()),
        }
    }

    #[test]
    fn valid_helper_passes() {
        assert!(make_helper().validate(0).is_ok());
    }

    #[test]
    fn to_domain_carries_fields() {
        let helper = make_helper().to_domain().unwrap();
        assert_eq!(helper.name, "ftp");
        assert_eq!(helper.proto, vec![Protocol::Tcp]);
        assert_eq!(helper.port, Some(PortRange::single(21)));
    }

    #[test]
    fn tcpudp_shorthand_expands() {
        let mut cfg = make_helper();
        cfg.proto = vec!["tcpudp".to_string()];
        let helper = cfg.to_domain().unwrap();
        assert_eq!(helper.proto, vec![Protocol::Tcp, Protocol::Udp]);
    }

    #[test]
    fn missing_proto_fails() {
        let mut cfg = make_helper();
        cfg.proto = vec![];
        assert!(cfg.validate(0).is_err());
    }

    #[test]
    fn bad_port_fails() {
        let mut cfg = make_helper();
        cfg.port = Some("ftp-data".to_string());
        assert!(cfg.validate(0).is_err());
    }
}
