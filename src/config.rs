use std::net::Ipv4Addr;

use mac_address::MacAddress;
use serde_derive::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// MAC addresses of the machines to track. Duplicates are tolerated;
    /// registration is idempotent.
    #[serde(default)]
    pub devices: Vec<MacAddress>,
    /// When false, no "on" belief is maintained and the reachability
    /// poller never runs; devices are wake-only.
    #[serde(default = "default_check_ping")]
    pub check_ping: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default)]
    pub wol: WolConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WolConfig {
    #[serde(default = "default_broadcast")]
    pub broadcast: Ipv4Addr,
    #[serde(default = "default_wol_port")]
    pub port: u16,
}

impl Default for WolConfig {
    fn default() -> Self {
        WolConfig {
            broadcast: default_broadcast(),
            port: default_wol_port(),
        }
    }
}

fn default_check_ping() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    30
}

fn default_broadcast() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_wol_port() -> u16 {
    9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            devices = ["AA:BB:CC:DD:EE:01", "aa:bb:cc:dd:ee:02"]
            check_ping = false
            poll_interval_seconds = 10

            [wol]
            broadcast = "192.168.1.255"
            port = 7
        "#;
        let config: AppConfig = toml::de::from_str(&config_str).unwrap();
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].bytes(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]);
        assert!(!config.check_ping);
        assert_eq!(config.poll_interval_seconds, 10);
        assert_eq!(config.wol.broadcast, "192.168.1.255".parse::<Ipv4Addr>().unwrap());
        assert_eq!(config.wol.port, 7);
    }

    #[test]
    fn test_config_defaults() {
        let config: AppConfig = toml::de::from_str(r#"devices = ["AA:BB:CC:DD:EE:01"]"#).unwrap();
        assert!(config.check_ping);
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.wol.broadcast, Ipv4Addr::BROADCAST);
        assert_eq!(config.wol.port, 9);
    }
}
