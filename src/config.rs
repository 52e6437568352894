// MIT License - Copyright (c) 2026 Peter Wright
// Bridge configuration

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tokio::time::Duration;

use crate::devices::{DeviceGroup, DeviceKind, SensorClass};
use crate::error::{BridgeError, Result};

fn default_bootstrap_timeout() -> u64 {
    100
}
fn default_initial_status_wait() -> u64 {
    1000
}

/// Zone as configured by the installer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub class: SensorClass,
    /// Monitor the zone's mask and mask memory bits.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub mask: bool,
}

/// Monitored output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub class: SensorClass,
}

/// Expander module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExpanderConfig {
    pub name: String,
    /// Expander has its own power supply (AC and battery troubles).
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub battery: bool,
}

/// Device that only carries a name (switchable outputs, keypads, trouble inputs).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamedConfig {
    pub name: String,
}

/// Everything needed to start a bridge, usually loaded from TOML.
///
/// Device tables are keyed by ordinal:
///
/// ```toml
/// code = "1234"
///
/// [zones.1]
/// name = "Hall"
/// type = "motion"
///
/// [expanders.5]
/// name = "Garage"
/// battery = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// User code sent with control commands.
    #[serde(default)]
    pub code: Option<String>,
    /// How long an observer waits for its category's snapshot on startup.
    #[serde(default = "default_bootstrap_timeout")]
    pub bootstrap_timeout_ms: u64,
    /// Settle time after the initial status requests.
    #[serde(default = "default_initial_status_wait")]
    pub initial_status_wait_ms: u64,
    #[serde(default, deserialize_with = "deserialize_ordinal_map")]
    pub zones: BTreeMap<u32, ZoneConfig>,
    #[serde(default, deserialize_with = "deserialize_ordinal_map")]
    pub outputs: BTreeMap<u32, OutputConfig>,
    #[serde(default, deserialize_with = "deserialize_ordinal_map")]
    pub switchable_outputs: BTreeMap<u32, NamedConfig>,
    #[serde(default, deserialize_with = "deserialize_ordinal_map")]
    pub expanders: BTreeMap<u32, ExpanderConfig>,
    #[serde(default, deserialize_with = "deserialize_ordinal_map")]
    pub keypads: BTreeMap<u32, NamedConfig>,
    #[serde(default, deserialize_with = "deserialize_ordinal_map")]
    pub troubles: BTreeMap<u32, NamedConfig>,
}

fn deserialize_ordinal_map<'de, D, T>(deserializer: D) -> std::result::Result<BTreeMap<u32, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let string_map: HashMap<String, T> = HashMap::deserialize(deserializer)?;
    string_map
        .into_iter()
        .map(|(k, v)| {
            k.parse::<u32>()
                .map(|id| (id, v))
                .map_err(|_| serde::de::Error::custom(format!("invalid ordinal: {k}")))
        })
        .collect()
}

/// Accepts `true`/`false` as well as the installer-style `"yes"`/`"no"`.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" => Ok(true),
            "no" | "false" | "off" => Ok(false),
            other => Err(serde::de::Error::custom(format!("expected yes or no, got {other:?}"))),
        },
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            code: None,
            bootstrap_timeout_ms: default_bootstrap_timeout(),
            initial_status_wait_ms: default_initial_status_wait(),
            zones: BTreeMap::new(),
            outputs: BTreeMap::new(),
            switchable_outputs: BTreeMap::new(),
            expanders: BTreeMap::new(),
            keypads: BTreeMap::new(),
            troubles: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check settings that do not depend on channel mapping.
    pub fn validate(&self) -> Result<()> {
        let has_code = self.code.as_deref().is_some_and(|c| !c.is_empty());
        if !self.switchable_outputs.is_empty() && !has_code {
            return Err(BridgeError::MissingAlarmCode);
        }
        Ok(())
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn initial_status_wait(&self) -> Duration {
        Duration::from_millis(self.initial_status_wait_ms)
    }

    /// The code to send with control commands, if one is configured.
    pub fn alarm_code(&self) -> Option<&str> {
        self.code.as_deref().filter(|c| !c.is_empty())
    }

    /// All configured devices, grouped by kind and ordered by ordinal.
    pub fn devices(&self) -> Vec<DeviceGroup> {
        let mut devices = Vec::new();
        devices.extend(self.zones.iter().map(|(n, z)| {
            DeviceGroup::new(
                *n,
                z.name.clone(),
                DeviceKind::Zone {
                    class: z.class.clone(),
                    mask_monitored: z.mask,
                },
            )
        }));
        devices.extend(
            self.outputs
                .iter()
                .map(|(n, o)| DeviceGroup::output(*n, o.name.clone(), o.class.clone())),
        );
        devices.extend(
            self.switchable_outputs
                .iter()
                .map(|(n, o)| DeviceGroup::switchable_output(*n, o.name.clone())),
        );
        devices.extend(
            self.expanders
                .iter()
                .map(|(n, e)| DeviceGroup::expander(*n, e.name.clone(), e.battery)),
        );
        devices.extend(self.keypads.iter().map(|(n, k)| DeviceGroup::keypad(*n, k.name.clone())));
        devices.extend(
            self.troubles
                .iter()
                .map(|(n, t)| DeviceGroup::trouble_input(*n, t.name.clone())),
        );
        devices
    }
}

/// Builder for BridgeConfig.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.config.code = Some(code.into());
        self
    }

    pub fn bootstrap_timeout_ms(mut self, ms: u64) -> Self {
        self.config.bootstrap_timeout_ms = ms;
        self
    }

    pub fn initial_status_wait_ms(mut self, ms: u64) -> Self {
        self.config.initial_status_wait_ms = ms;
        self
    }

    pub fn zone(mut self, ordinal: u32, name: impl Into<String>, class: SensorClass) -> Self {
        self.config.zones.insert(
            ordinal,
            ZoneConfig {
                name: name.into(),
                class,
                mask: false,
            },
        );
        self
    }

    /// Zone with mask monitoring enabled.
    pub fn masked_zone(mut self, ordinal: u32, name: impl Into<String>, class: SensorClass) -> Self {
        self.config.zones.insert(
            ordinal,
            ZoneConfig {
                name: name.into(),
                class,
                mask: true,
            },
        );
        self
    }

    pub fn output(mut self, ordinal: u32, name: impl Into<String>, class: SensorClass) -> Self {
        self.config.outputs.insert(
            ordinal,
            OutputConfig {
                name: name.into(),
                class,
            },
        );
        self
    }

    pub fn switchable_output(mut self, ordinal: u32, name: impl Into<String>) -> Self {
        self.config
            .switchable_outputs
            .insert(ordinal, NamedConfig { name: name.into() });
        self
    }

    pub fn expander(mut self, ordinal: u32, name: impl Into<String>, battery: bool) -> Self {
        self.config.expanders.insert(
            ordinal,
            ExpanderConfig {
                name: name.into(),
                battery,
            },
        );
        self
    }

    pub fn keypad(mut self, ordinal: u32, name: impl Into<String>) -> Self {
        self.config.keypads.insert(ordinal, NamedConfig { name: name.into() });
        self
    }

    pub fn trouble(mut self, ordinal: u32, name: impl Into<String>) -> Self {
        self.config.troubles.insert(ordinal, NamedConfig { name: name.into() });
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
code = "1234"
bootstrap_timeout_ms = 250

[zones.1]
name = "Hall"
type = "motion"

[zones.2]
name = "Kitchen"
type = "smoke"
mask = "yes"

[outputs.3]
name = "Siren"
type = "safety"

[switchable_outputs.4]
name = "Gate"

[expanders.5]
name = "Garage"
battery = "yes"

[keypads.1]
name = "Entry"

[troubles.2]
name = "Phone line"
"#;

    #[test]
    fn test_parse_sample() {
        let config = BridgeConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.alarm_code(), Some("1234"));
        assert_eq!(config.bootstrap_timeout(), Duration::from_millis(250));
        assert_eq!(config.initial_status_wait_ms, 1000);
        assert_eq!(config.zones[&2].class, SensorClass::Smoke);
        assert!(config.zones[&2].mask);
        assert!(!config.zones[&1].mask);
        assert!(config.expanders[&5].battery);
        assert_eq!(config.devices().len(), 7);
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config.bootstrap_timeout_ms, 100);
        assert_eq!(config.initial_status_wait_ms, 1000);
        assert!(config.devices().is_empty());
        assert_eq!(config.alarm_code(), None);
    }

    #[test]
    fn test_zone_type_defaults_to_motion() {
        let config = BridgeConfig::from_toml_str("[zones.9]\nname = \"Hall\"\n").unwrap();
        assert_eq!(config.zones[&9].class, SensorClass::Motion);
    }

    #[test]
    fn test_invalid_ordinal_key() {
        let err = BridgeConfig::from_toml_str("[zones.abc]\nname = \"Hall\"\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_invalid_flag() {
        let err = BridgeConfig::from_toml_str("[expanders.1]\nname = \"A\"\nbattery = \"maybe\"\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_switchable_outputs_need_code() {
        let config = BridgeConfig::builder().switchable_output(1, "Gate").build();
        assert!(matches!(config.validate(), Err(BridgeError::MissingAlarmCode)));

        let config = BridgeConfig::builder().switchable_output(1, "Gate").code("").build();
        assert!(matches!(config.validate(), Err(BridgeError::MissingAlarmCode)));

        let config = BridgeConfig::builder().switchable_output(1, "Gate").code("1234").build();
        config.validate().unwrap();
    }

    #[test]
    fn test_builder_devices_in_kind_order() {
        let config = BridgeConfig::builder()
            .keypad(1, "Entry")
            .masked_zone(3, "Window", SensorClass::Window)
            .zone(1, "Hall", SensorClass::Motion)
            .build();
        let devices = config.devices();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Hall", "Window", "Entry"]);
        assert!(matches!(
            devices[1].kind,
            DeviceKind::Zone { mask_monitored: true, .. }
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load("/nonexistent/satel.toml").unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
