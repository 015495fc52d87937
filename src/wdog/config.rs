use std::net::SocketAddr;
use std::time::Duration;

use serde_json;
use serde_yaml;

use backend::BackendConfig;
use super::super::ConfigError;

/// The router's default tick; the watchdog runs at 1.5x this.
const DEFAULT_INTERVAL_NS: u64 = 1_000_000_000;

/// Holds the configuration for a watchdog instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct WdogConfig {
    /// Selects the probe backend, as `<name>[:<spec>]`. An empty name
    /// selects the null backend, which probes nothing and leaves every
    /// destination at weight zero.
    pub watchdog: Option<String>,

    /// The router's tick interval in nanoseconds. The watchdog
    /// aggregates at 1.5x this, giving probes a slight overhang.
    pub interval_ns: Option<u64>,

    /// Destinations watched from startup, all as explicit.
    pub dsts: Option<Vec<DstConfig>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DstConfig {
    pub addr: SocketAddr,
    pub weight: f64,
}

impl ::std::str::FromStr for WdogConfig {
    type Err = ConfigError;

    /// Parses a JSON- or YAML-formatted configuration file.
    fn from_str(txt: &str) -> Result<WdogConfig, ConfigError> {
        let txt = txt.trim_start();
        if txt.starts_with('{') {
            serde_json::from_str(txt).map_err(|e| format!("{}", e).into())
        } else {
            serde_yaml::from_str(txt).map_err(|e| format!("{}", e).into())
        }
    }
}

impl WdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns.unwrap_or(DEFAULT_INTERVAL_NS))
    }

    pub fn backend(&self) -> Result<BackendConfig, ConfigError> {
        let token = self.watchdog.as_ref().map(|s| s.as_str()).unwrap_or("");
        BackendConfig::parse(token)
    }

    pub fn dsts(&self) -> &[DstConfig] {
        self.dsts.as_ref().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[test]
fn parse_simple_yaml() {
    let yaml = "
watchdog: \"exec:mysql-probe --timeout 1\"
intervalNs: 500000000
dsts:
  - addr: 10.0.0.1:3306
    weight: 1.0
  - addr: 10.0.0.2:3306
    weight: 2.5
";
    let config = yaml.parse::<WdogConfig>().unwrap();
    assert_eq!(config.interval(), Duration::from_millis(500));
    assert_eq!(config.dsts().len(), 2);
    assert_eq!(config.dsts()[1].weight, 2.5);
}

#[test]
fn parse_simple_json() {
    let json = "{\"watchdog\": \"\", \"dsts\": [{\"addr\": \"10.0.0.1:3306\", \"weight\": 1.0}]}";
    let config = json.parse::<WdogConfig>().unwrap();
    assert_eq!(config.backend().unwrap(), BackendConfig::Null);
    assert_eq!(config.interval(), Duration::from_secs(1));
    assert_eq!(config.dsts().len(), 1);
}

#[test]
fn parse_rejects_unknown_fields() {
    assert!("bufferSize: 1234".parse::<WdogConfig>().is_err());
}

#[test]
fn empty_config_defaults() {
    let config = "{}".parse::<WdogConfig>().unwrap();
    assert_eq!(config.backend().unwrap(), BackendConfig::Null);
    assert_eq!(config.interval(), Duration::from_secs(1));
    assert!(config.dsts().is_empty());
}
