// MIT License - Copyright (c) 2026 Peter Wright
// Entity sensor classes

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Device class reported to the host for a binary entity.
///
/// Zones take their class from configuration (`type = "door"` etc.); tamper
/// conditions are always `Tamper`, expander/keypad/trouble conditions `Problem`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum SensorClass {
    #[default]
    Motion,
    Door,
    Window,
    Opening,
    Smoke,
    Heat,
    Gas,
    Moisture,
    Vibration,
    Safety,
    Tamper,
    Problem,
    Battery,
    Power,
    /// Any other class name, passed through to the host verbatim.
    Other(String),
}

const CLASS_NAMES: [(&str, SensorClass); 14] = [
    ("motion", SensorClass::Motion),
    ("door", SensorClass::Door),
    ("window", SensorClass::Window),
    ("opening", SensorClass::Opening),
    ("smoke", SensorClass::Smoke),
    ("heat", SensorClass::Heat),
    ("gas", SensorClass::Gas),
    ("moisture", SensorClass::Moisture),
    ("vibration", SensorClass::Vibration),
    ("safety", SensorClass::Safety),
    ("tamper", SensorClass::Tamper),
    ("problem", SensorClass::Problem),
    ("battery", SensorClass::Battery),
    ("power", SensorClass::Power),
];

impl SensorClass {
    pub fn from_name(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();
        CLASS_NAMES
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, class)| class.clone())
            .unwrap_or(Self::Other(lower))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Other(name) => name,
            known => CLASS_NAMES
                .iter()
                .find(|(_, class)| class == known)
                .map(|(n, _)| *n)
                .unwrap_or("problem"),
        }
    }

    /// Icon hint for the host. Only fire detectors get a dedicated icon.
    pub fn icon(&self) -> Option<&'static str> {
        match self {
            Self::Smoke => Some("mdi:fire"),
            _ => None,
        }
    }
}

impl fmt::Display for SensorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SensorClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SensorClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}
