// MIT License - Copyright (c) 2026 Peter Wright
// Configured device groups

pub mod zone;

use std::fmt;

pub use zone::SensorClass;

/// Kind-specific attributes of a configured device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// Detection zone. `mask_monitored` enables the mask/mem-mask conditions.
    Zone { class: SensorClass, mask_monitored: bool },
    /// Output monitored for its active state only.
    Output { class: SensorClass },
    /// Output that can also be switched from the host.
    SwitchableOutput,
    /// Bus expander module.
    Expander { battery: bool },
    /// Keypad module.
    Keypad,
    /// Generic trouble input.
    TroubleInput,
}

impl DeviceKind {
    /// Type tag used in unique ids.
    pub fn device_type(&self) -> &'static str {
        match self {
            Self::Zone { .. } => "zone",
            Self::Output { .. } => "output",
            Self::SwitchableOutput => "switchable_output",
            Self::Expander { .. } => "expander",
            Self::Keypad => "keypad",
            Self::TroubleInput => "trouble",
        }
    }
}

/// One configured physical unit, addressed by its installer-assigned ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub ordinal: u32,
    pub name: String,
    pub kind: DeviceKind,
}

impl DeviceGroup {
    pub fn new(ordinal: u32, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            ordinal,
            name: name.into(),
            kind,
        }
    }

    pub fn zone(ordinal: u32, name: impl Into<String>, class: SensorClass) -> Self {
        Self::new(
            ordinal,
            name,
            DeviceKind::Zone {
                class,
                mask_monitored: false,
            },
        )
    }

    pub fn output(ordinal: u32, name: impl Into<String>, class: SensorClass) -> Self {
        Self::new(ordinal, name, DeviceKind::Output { class })
    }

    pub fn switchable_output(ordinal: u32, name: impl Into<String>) -> Self {
        Self::new(ordinal, name, DeviceKind::SwitchableOutput)
    }

    pub fn expander(ordinal: u32, name: impl Into<String>, battery: bool) -> Self {
        Self::new(ordinal, name, DeviceKind::Expander { battery })
    }

    pub fn keypad(ordinal: u32, name: impl Into<String>) -> Self {
        Self::new(ordinal, name, DeviceKind::Keypad)
    }

    pub fn trouble_input(ordinal: u32, name: impl Into<String>) -> Self {
        Self::new(ordinal, name, DeviceKind::TroubleInput)
    }

    pub fn device_type(&self) -> &'static str {
        self.kind.device_type()
    }
}

impl fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.device_type(), self.ordinal, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        let zone = DeviceGroup::zone(3, "Hall", SensorClass::Motion);
        assert_eq!(zone.to_string(), "zone 3 (Hall)");
        let exp = DeviceGroup::expander(2, "Garage", true);
        assert_eq!(exp.to_string(), "expander 2 (Garage)");
    }

    #[test]
    fn test_device_types() {
        assert_eq!(DeviceGroup::switchable_output(1, "Gate").device_type(), "switchable_output");
        assert_eq!(DeviceGroup::trouble_input(1, "Phone line").device_type(), "trouble");
        assert_eq!(DeviceGroup::keypad(1, "Entry").device_type(), "keypad");
    }
}
