use anyhow::Result;

use domain::common::entity::Family;
use domain::rule::entity::{Rule, Table};
use infrastructure::config::PolicyConfig;

const ALL_TABLES: [Table; 3] = [Table::Filter, Table::Nat, Table::Raw];

/// Validate the whole config and report what survived.
pub fn cmd_check(config: &PolicyConfig) -> Result<()> {
    let state = config.build_state()?;
    println!(
        "configuration ok: {} zones, {} ipsets, {} helpers, {} of {} redirects admitted",
        config.zones.len(),
        config.ipsets.len(),
        config.helpers.len(),
        state.redirects().len(),
        config.redirects.len(),
    );
    Ok(())
}

/// Compile the policy and print one iptables invocation per rule.
pub fn cmd_compile(config: &PolicyConfig, table: Option<Table>) -> Result<()> {
    let mut state = config.build_state()?;

    let tables: &[Table] = match &table {
        Some(t) => std::slice::from_ref(t),
        None => &ALL_TABLES,
    };

    for table in tables {
        let mut rules: Vec<Rule> = Vec::new();
        state.compile(*table, Family::V4, &mut rules);
        for rule in &rules {
            println!("iptables -t {table} {rule}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
zones:
  - name: wan
    masq: true
    subnets: ["203.0.113.1/24"]
  - name: lan
    subnets: ["10.0.0.1/24"]

redirects:
  - name: fwd-http
    src: wan
    proto: [tcp]
    src_dport: "80"
    dest_ip: 10.0.0.5
    dest_port: "8080"
"#;

    #[test]
    fn check_accepts_sample() {
        let config = PolicyConfig::from_yaml(SAMPLE).unwrap();
        assert!(cmd_check(&config).is_ok());
    }

    #[test]
    fn compile_emits_rules_for_sample() {
        let config = PolicyConfig::from_yaml(SAMPLE).unwrap();
        let mut state = config.build_state().unwrap();
        let mut rules: Vec<Rule> = Vec::new();
        state.compile(Table::Nat, Family::V4, &mut rules);
        // forward rule plus the hairpin pair
        assert_eq!(rules.len(), 3);
    }
}
