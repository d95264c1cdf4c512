use serde::{Deserialize, Serialize};

use domain::common::entity::Family;
use domain::zone::entity::Zone;

use super::common::{ConfigError, parse_address, parse_family};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub name: String,

    #[serde(default)]
    pub family: Option<String>,

    /// Whether traffic leaving through this zone is masqueraded.
    /// Hairpin rules are only generated for masquerading source zones.
    #[serde(default)]
    pub masq: bool,

    /// Networks attached to the zone, CIDR notation.
    #[serde(default)]
    pub subnets: Vec<String>,
}

impl ZoneConfig {
    pub fn validate(&self, idx: usize) -> Result<(), ConfigError> {
        let field = |name: &str| format!("zones[{idx}].{name}");

        if self.name.is_empty() {
            return Err(ConfigError::Validation {
                field: field("name"),
                message: "zone name must not be empty".to_string(),
            });
        }
        if self.name == "*" {
            return Err(ConfigError::Validation {
                field: field("name"),
                message: "'*' is reserved for wildcard zone references".to_string(),
            });
        }
        if let Some(family) = &self.family {
            parse_family(family, &field("family"))?;
        }
        for (sub_idx, subnet) in self.subnets.iter().enumerate() {
            parse_address(subnet).map_err(|e| ConfigError::Validation {
                field: format!("zones[{idx}].subnets[{sub_idx}]"),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn to_domain(&self) -> Result<Zone, ConfigError> {
        let family = match &self.family {
            Some(f) => parse_family(f, "family")?,
            None => Family::Any,
        };
        let addresses = self
            .subnets
            .iter()
            .map(|s| parse_address(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Zone::new(self.name.clone(), family, self.masq, addresses))
    }
}
