pub const DEFAULT_CONFIG_PATH: &str = "/etc/natgate/config.yaml";
