use serde::{Deserialize, Serialize};

use domain::common::entity::Family;
use domain::ipset::entity::Ipset;

use super::common::{ConfigError, default_true, parse_family};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpsetConfig {
    pub name: String,

    #[serde(default)]
    pub family: Option<String>,

    /// Kernel set name when the set is maintained by another program.
    #[serde(default)]
    pub external: Option<String>,

    /// Whether the set exists in the kernel. The compiler does not
    /// create sets itself; declared-but-absent sets make referencing
    /// records emit nothing.
    #[serde(default = "default_true")]
    pub present: bool,
}

impl IpsetConfig {
    pub fn validate(&self, idx: usize) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation {
                field: format!("ipsets[{idx}].name"),
                message: "ipset name must not be empty".to_string(),
            });
        }
        if let Some(family) = &self.family {
            parse_family(family, &format!("ipsets[{idx}].family"))?;
        }
        Ok(())
    }

    pub fn to_domain(&self) -> Result<Ipset, ConfigError> {
        let family = match &self.family {
            Some(f) => parse_family(f, "family")?,
            None => Family::Any,
        };
        let mut set = Ipset::new(self.name.clone(), family, self.external.clone());
        set.present = self.present;
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_domain_defaults() {
        let cfg = IpsetConfig {
            name: "blocklist".to_string(),
            family: None,
            external: None,
            present: true,
        };
        assert!(cfg.validate(0).is_ok());
        let set = cfg.to_domain().unwrap();
        assert_eq!(set.family, Family::Any);
        assert!(set.present);
        assert_eq!(set.effective_name(), "blocklist");
    }

    #[test]
    fn external_name_is_kept() {
        let cfg = IpsetConfig {
            name: "blocklist".to_string(),
            family: Some("ipv4".to_string()),
            external: Some("dnsmasq_block".to_string()),
            present: false,
        };
        let set = cfg.to_domain().unwrap();
        assert_eq!(set.effective_name(), "dnsmasq_block");
        assert!(!set.present);
    }

    #[test]
    fn empty_name_fails() {
        let cfg = IpsetConfig {
            name: String::new(),
            family: None,
            external: None,
            present: true,
        };
        assert!(cfg.validate(0).is_err());
    }
}
