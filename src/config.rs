use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

use crate::types::AttachMode;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub interfaces: Option<HashMap<String, InterfaceConfig>>,
    #[serde(default = "default_log_level")]
    pub log_level: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interfaces: None,
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InterfaceConfig {
    pub xdp_mode: XdpMode,
}

fn default_log_level() -> u32 {
    3
}

#[derive(Debug, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum XdpMode {
    Skb,
    Drv,
    Hw,
}

impl XdpMode {
    pub(crate) fn as_attach_mode(&self) -> AttachMode {
        match self {
            XdpMode::Skb => AttachMode::XdpSkb,
            XdpMode::Drv => AttachMode::XdpDrv,
            XdpMode::Hw => AttachMode::XdpHw,
        }
    }
}

impl ToString for XdpMode {
    fn to_string(&self) -> String {
        match self {
            XdpMode::Skb => "skb".to_string(),
            XdpMode::Drv => "drv".to_string(),
            XdpMode::Hw => "hw".to_string(),
        }
    }
}

/// Loads a `Config` from a TOML file. A missing or malformed file degrades
/// to the default configuration rather than failing startup.
pub fn config_from_file<P: AsRef<Path>>(path: P) -> Config {
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            log::warn!(
                "could not read config file {}: {e}, using defaults",
                path.as_ref().display()
            );
            return Config::default();
        }
    };
    toml::from_str(&contents).unwrap_or_else(|e| {
        log::warn!("could not parse config file: {e}, using defaults");
        Config::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_invalid_path_returns_default() {
        let config = config_from_file("/tmp/dechainy_nonexistent_config.toml");
        assert!(config.interfaces.is_none());
        assert_eq!(config.log_level, 3);
    }

    #[test]
    fn single_iface() {
        let input = r#"
        [interfaces]
          [interfaces.eth0]
          xdp_mode = "drv"
        "#;
        let config: Config = toml::from_str(input).expect("error parsing toml input");
        let ifaces = config.interfaces.expect("expected interfaces to be present");
        assert!(ifaces.contains_key("eth0"));
        assert_eq!(ifaces.get("eth0").unwrap().xdp_mode, XdpMode::Drv);
    }

    #[test]
    fn multiple_iface() {
        let input = r#"
        [interfaces]
          [interfaces.eth0]
          xdp_mode = "drv"
          [interfaces.eth1]
          xdp_mode = "hw"
          [interfaces.eth2]
          xdp_mode = "skb"
        "#;
        let config: Config = toml::from_str(input).expect("error parsing toml input");
        let ifaces = config.interfaces.expect("expected interfaces to be present");
        assert_eq!(ifaces.len(), 3);
        assert_eq!(ifaces.get("eth0").unwrap().xdp_mode, XdpMode::Drv);
        assert_eq!(ifaces.get("eth1").unwrap().xdp_mode, XdpMode::Hw);
        assert_eq!(ifaces.get("eth2").unwrap().xdp_mode, XdpMode::Skb);
    }

    #[test]
    fn default_log_level_applies() {
        let input = "";
        let config: Config = toml::from_str(input).expect("error parsing toml input");
        assert_eq!(config.log_level, 3);
    }
}
