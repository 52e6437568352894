// MIT License - Copyright (c) 2026 Peter Wright
// Device group -> (category, channel) address mapping

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::category::{Category, CategorySet, ChannelId};
use crate::devices::{DeviceGroup, DeviceKind, SensorClass};
use crate::error::{BridgeError, Result};

// Offsets into the trouble/trouble2 namespaces. The panel lays these out as
// consecutive blocks of 64 (expanders) and 8 (keypads).
const EXPANDER_CHANGED: u32 = 64;
const EXPANDER_TAMPER: u32 = 64 + 64 + 8 + 8 + 8;
const EXPANDER_AC_FAILURE: u32 = 128 + 1;
const EXPANDER_BATTERY_FAILURE: u32 = 128 + 64 + 1;
const EXPANDER_BATTERY_MISSING: u32 = 128 + 64 + 64 + 1;
const KEYPAD_NO_COMM: u32 = 64 + 64;
const KEYPAD_CHANGED: u32 = 64 + 64 + 8;
const KEYPAD_TAMPER: u32 = 64 + 64 + 8 + 8 + 64;
const KEYPAD_INIT_FAILED: u32 = 64 + 64 + 8 + 8 + 64 + 8;
const TROUBLE_INPUT: u32 = 320;

/// Expanders at or above this ordinal have no power-supply trouble bits.
const EXPANDER_POWER_LIMIT: u32 = 64;

/// The physical condition a mapped channel stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Violation,
    Alarm,
    AlarmMemory,
    Tamper,
    TamperMemory,
    Bypass,
    Masked,
    MaskedMemory,
    OutputActive,
    NoComm,
    Changed,
    ModuleTamper,
    AcFailure,
    BatteryFailure,
    BatteryDisconnected,
    InitFailed,
    Trouble,
}

/// Control operation an entity can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    SetOutput,
    SetBypass,
}

#[derive(Debug, Clone, Copy)]
enum ClassRule {
    /// Use the class configured for the device.
    Device,
    Tamper,
    Problem,
}

#[derive(Debug, Clone, Copy)]
enum Guard {
    Always,
    MaskMonitored,
    PoweredExpander,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    condition: Condition,
    category: Category,
    offset: u32,
    suffix: &'static str,
    class: ClassRule,
    control: Option<Control>,
    guard: Guard,
}

const fn rule(condition: Condition, category: Category, offset: u32, suffix: &'static str, class: ClassRule) -> Rule {
    Rule {
        condition,
        category,
        offset,
        suffix,
        class,
        control: None,
        guard: Guard::Always,
    }
}

const fn guarded(mut r: Rule, guard: Guard) -> Rule {
    r.guard = guard;
    r
}

const fn controlled(mut r: Rule, control: Control) -> Rule {
    r.control = Some(control);
    r
}

const ZONE_RULES: [Rule; 8] = [
    rule(Condition::Violation, Category::Violation, 0, "", ClassRule::Device),
    rule(Condition::Alarm, Category::Alarm, 0, " (alarm)", ClassRule::Device),
    rule(Condition::AlarmMemory, Category::MemAlarm, 0, " (mem alarm)", ClassRule::Device),
    rule(Condition::Tamper, Category::Tamper, 0, " (tamper)", ClassRule::Tamper),
    rule(Condition::TamperMemory, Category::MemTamper, 0, " (mem tamper)", ClassRule::Tamper),
    controlled(
        rule(Condition::Bypass, Category::Bypass, 0, " (bypass)", ClassRule::Device),
        Control::SetBypass,
    ),
    guarded(
        rule(Condition::Masked, Category::Mask, 0, " (masked)", ClassRule::Problem),
        Guard::MaskMonitored,
    ),
    guarded(
        rule(Condition::MaskedMemory, Category::MemMask, 0, " (mem masked)", ClassRule::Problem),
        Guard::MaskMonitored,
    ),
];

const OUTPUT_RULES: [Rule; 1] = [rule(Condition::OutputActive, Category::OutputActive, 0, "", ClassRule::Device)];

const SWITCHABLE_OUTPUT_RULES: [Rule; 1] = [controlled(
    rule(Condition::OutputActive, Category::OutputActive, 0, "", ClassRule::Device),
    Control::SetOutput,
)];

const EXPANDER_RULES: [Rule; 6] = [
    rule(Condition::NoComm, Category::Trouble2, 0, " (no comm)", ClassRule::Problem),
    rule(Condition::Changed, Category::Trouble2, EXPANDER_CHANGED, " (changed)", ClassRule::Problem),
    rule(Condition::ModuleTamper, Category::Trouble2, EXPANDER_TAMPER, " (tamper)", ClassRule::Problem),
    guarded(
        rule(Condition::AcFailure, Category::Trouble, EXPANDER_AC_FAILURE, " (AC KO)", ClassRule::Problem),
        Guard::PoweredExpander,
    ),
    guarded(
        rule(Condition::BatteryFailure, Category::Trouble, EXPANDER_BATTERY_FAILURE, " (battery KO)", ClassRule::Problem),
        Guard::PoweredExpander,
    ),
    guarded(
        rule(
            Condition::BatteryDisconnected,
            Category::Trouble,
            EXPANDER_BATTERY_MISSING,
            " (battery NOT connected)",
            ClassRule::Problem,
        ),
        Guard::PoweredExpander,
    ),
];

const KEYPAD_RULES: [Rule; 4] = [
    rule(Condition::NoComm, Category::Trouble2, KEYPAD_NO_COMM, " (no comm)", ClassRule::Problem),
    rule(Condition::Changed, Category::Trouble2, KEYPAD_CHANGED, " (changed)", ClassRule::Problem),
    rule(Condition::ModuleTamper, Category::Trouble2, KEYPAD_TAMPER, " (tamper)", ClassRule::Problem),
    rule(Condition::InitFailed, Category::Trouble2, KEYPAD_INIT_FAILED, " (init ko)", ClassRule::Problem),
];

const TROUBLE_INPUT_RULES: [Rule; 1] = [rule(Condition::Trouble, Category::Trouble, TROUBLE_INPUT, "", ClassRule::Problem)];

fn rules_for(kind: &DeviceKind) -> &'static [Rule] {
    match kind {
        DeviceKind::Zone { .. } => &ZONE_RULES,
        DeviceKind::Output { .. } => &OUTPUT_RULES,
        DeviceKind::SwitchableOutput => &SWITCHABLE_OUTPUT_RULES,
        DeviceKind::Expander { .. } => &EXPANDER_RULES,
        DeviceKind::Keypad => &KEYPAD_RULES,
        DeviceKind::TroubleInput => &TROUBLE_INPUT_RULES,
    }
}

impl Guard {
    fn applies(&self, device: &DeviceGroup) -> bool {
        match (self, &device.kind) {
            (Guard::Always, _) => true,
            (Guard::MaskMonitored, DeviceKind::Zone { mask_monitored, .. }) => *mask_monitored,
            (Guard::PoweredExpander, DeviceKind::Expander { battery }) => {
                *battery && device.ordinal < EXPANDER_POWER_LIMIT
            }
            _ => false,
        }
    }
}

impl ClassRule {
    fn resolve(&self, kind: &DeviceKind) -> SensorClass {
        match (self, kind) {
            (ClassRule::Device, DeviceKind::Zone { class, .. }) => class.clone(),
            (ClassRule::Device, DeviceKind::Output { class }) => class.clone(),
            (ClassRule::Device, DeviceKind::SwitchableOutput) => SensorClass::Power,
            (ClassRule::Tamper, _) => SensorClass::Tamper,
            _ => SensorClass::Problem,
        }
    }
}

/// One `(category, channel)` pair derived from a configured device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedChannel {
    pub category: Category,
    pub channel: ChannelId,
    pub condition: Condition,
    pub device_type: &'static str,
    pub ordinal: u32,
    /// Device name plus condition suffix, e.g. "Hall (tamper)".
    pub label: String,
    pub class: SensorClass,
    pub control: Option<Control>,
}

impl MappedChannel {
    /// Stable identifier built from device type, category and channel.
    pub fn unique_id(&self) -> String {
        format!(
            "satel_{}_{}_{}",
            self.device_type,
            self.category.as_str().replace('-', "_"),
            self.channel
        )
    }
}

/// Channels the connector should track, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedChannels {
    by_category: BTreeMap<Category, BTreeSet<ChannelId>>,
}

impl TrackedChannels {
    pub fn get(&self, category: Category) -> Option<&BTreeSet<ChannelId>> {
        self.by_category.get(&category)
    }

    pub fn contains(&self, category: Category, channel: ChannelId) -> bool {
        self.get(category).is_some_and(|set| set.contains(&channel))
    }

    /// Categories with at least one tracked channel.
    pub fn categories(&self) -> CategorySet {
        self.by_category.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &BTreeSet<ChannelId>)> {
        self.by_category.iter().map(|(c, set)| (*c, set))
    }
}

/// Result of mapping a device configuration.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    entries: Vec<MappedChannel>,
    tracked: TrackedChannels,
}

impl ChannelMap {
    pub fn entries(&self) -> &[MappedChannel] {
        &self.entries
    }

    pub fn tracked(&self) -> &TrackedChannels {
        &self.tracked
    }

    pub fn find(&self, unique_id: &str) -> Option<&MappedChannel> {
        self.entries.iter().find(|e| e.unique_id() == unique_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map every configured device onto its `(category, channel)` pairs.
///
/// Fails on the first ordinal of 0 or on any two conditions sharing a
/// channel within one category.
pub fn map_devices(devices: &[DeviceGroup]) -> Result<ChannelMap> {
    let mut owners: HashMap<(Category, ChannelId), String> = HashMap::new();
    let mut map = ChannelMap::default();

    for device in devices {
        if device.ordinal == 0 {
            return Err(BridgeError::InvalidOrdinal {
                device: device.to_string(),
                ordinal: device.ordinal,
            });
        }

        for rule in rules_for(&device.kind) {
            if !rule.guard.applies(device) {
                continue;
            }
            let channel = device
                .ordinal
                .checked_add(rule.offset)
                .and_then(ChannelId::new)
                .ok_or_else(|| BridgeError::InvalidOrdinal {
                    device: device.to_string(),
                    ordinal: device.ordinal,
                })?;

            let owner = format!("{device}{}", rule.suffix);
            match owners.entry((rule.category, channel)) {
                Entry::Occupied(existing) => {
                    return Err(BridgeError::ChannelCollision {
                        category: rule.category,
                        channel,
                        first: existing.get().clone(),
                        second: owner,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(owner);
                }
            }

            map.tracked
                .by_category
                .entry(rule.category)
                .or_default()
                .insert(channel);
            map.entries.push(MappedChannel {
                category: rule.category,
                channel,
                condition: rule.condition,
                device_type: device.device_type(),
                ordinal: device.ordinal,
                label: format!("{}{}", device.name, rule.suffix),
                class: rule.class.resolve(&device.kind),
                control: rule.control,
            });
        }
    }

    debug!(
        "Mapped {} devices onto {} channels in {} categories",
        devices.len(),
        map.entries.len(),
        map.tracked.by_category.len()
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(map: &ChannelMap, category: Category) -> Vec<u32> {
        map.tracked()
            .get(category)
            .map(|set| set.iter().map(|c| c.get()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_zone_maps_to_zone_categories() {
        let map = map_devices(&[DeviceGroup::zone(7, "Hall", SensorClass::Motion)]).unwrap();
        for category in [
            Category::Violation,
            Category::Alarm,
            Category::MemAlarm,
            Category::Tamper,
            Category::MemTamper,
            Category::Bypass,
        ] {
            assert_eq!(channels(&map, category), vec![7], "{category}");
        }
        assert!(channels(&map, Category::Mask).is_empty());
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_masked_zone_adds_mask_categories() {
        let zone = DeviceGroup::new(
            2,
            "Window",
            DeviceKind::Zone {
                class: SensorClass::Window,
                mask_monitored: true,
            },
        );
        let map = map_devices(&[zone]).unwrap();
        assert_eq!(channels(&map, Category::Mask), vec![2]);
        assert_eq!(channels(&map, Category::MemMask), vec![2]);
        let masked = map.entries().iter().find(|e| e.condition == Condition::Masked).unwrap();
        assert_eq!(masked.label, "Window (masked)");
        assert_eq!(masked.class, SensorClass::Problem);
    }

    #[test]
    fn test_expander_with_battery() {
        let map = map_devices(&[DeviceGroup::expander(5, "Garage", true)]).unwrap();
        assert_eq!(channels(&map, Category::Trouble2), vec![5, 69, 157]);
        assert_eq!(channels(&map, Category::Trouble), vec![134, 198, 262]);
    }

    #[test]
    fn test_expander_without_battery() {
        let map = map_devices(&[DeviceGroup::expander(5, "Garage", false)]).unwrap();
        assert_eq!(channels(&map, Category::Trouble2), vec![5, 69, 157]);
        assert!(channels(&map, Category::Trouble).is_empty());
    }

    #[test]
    fn test_high_expander_has_no_power_troubles() {
        let map = map_devices(&[DeviceGroup::expander(64, "Far", true)]).unwrap();
        assert_eq!(channels(&map, Category::Trouble2), vec![64, 128, 216]);
        assert!(channels(&map, Category::Trouble).is_empty());
    }

    #[test]
    fn test_keypad_channels() {
        let map = map_devices(&[DeviceGroup::keypad(3, "Entry")]).unwrap();
        assert_eq!(channels(&map, Category::Trouble2), vec![131, 139, 203, 211]);
        let labels: Vec<_> = map.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Entry (no comm)", "Entry (changed)", "Entry (tamper)", "Entry (init ko)"]
        );
    }

    #[test]
    fn test_trouble_input_channel() {
        let map = map_devices(&[DeviceGroup::trouble_input(2, "Phone line")]).unwrap();
        assert_eq!(channels(&map, Category::Trouble), vec![322]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_outputs_map_one_to_one() {
        let map = map_devices(&[
            DeviceGroup::output(1, "Siren", SensorClass::Safety),
            DeviceGroup::switchable_output(2, "Gate"),
        ])
        .unwrap();
        assert_eq!(channels(&map, Category::OutputActive), vec![1, 2]);
        let gate = map.find("satel_switchable_output_output_active_2").unwrap();
        assert_eq!(gate.control, Some(Control::SetOutput));
        let siren = map.find("satel_output_output_active_1").unwrap();
        assert_eq!(siren.control, None);
        assert_eq!(siren.class, SensorClass::Safety);
    }

    #[test]
    fn test_zone_bypass_is_controllable() {
        let map = map_devices(&[DeviceGroup::zone(4, "Door", SensorClass::Door)]).unwrap();
        let bypass = map.find("satel_zone_bypass_4").unwrap();
        assert_eq!(bypass.control, Some(Control::SetBypass));
        assert_eq!(bypass.label, "Door (bypass)");
        let tamper = map.find("satel_zone_tamper_4").unwrap();
        assert_eq!(tamper.class, SensorClass::Tamper);
    }

    #[test]
    fn test_output_and_switchable_output_collide() {
        let err = map_devices(&[
            DeviceGroup::output(1, "Siren", SensorClass::Safety),
            DeviceGroup::switchable_output(1, "Gate"),
        ])
        .unwrap_err();
        match err {
            BridgeError::ChannelCollision { category, channel, first, second } => {
                assert_eq!(category, Category::OutputActive);
                assert_eq!(channel.get(), 1);
                assert!(first.contains("Siren"));
                assert!(second.contains("Gate"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_expander_and_keypad_collide_in_trouble2() {
        // expander 65 "changed" lands on 129, keypad 1 "no comm" too
        let err = map_devices(&[
            DeviceGroup::expander(65, "Far", false),
            DeviceGroup::keypad(1, "Entry"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ChannelCollision { category: Category::Trouble2, .. }
        ));
    }

    #[test]
    fn test_same_number_in_different_categories_is_fine() {
        // expander 5 uses trouble2/5, zone 5 uses violation/5 etc.
        let map = map_devices(&[
            DeviceGroup::expander(5, "Garage", true),
            DeviceGroup::zone(5, "Hall", SensorClass::Motion),
            DeviceGroup::trouble_input(1, "Phone"),
        ])
        .unwrap();
        assert_eq!(map.len(), 6 + 6 + 1);
    }

    #[test]
    fn test_zero_ordinal_rejected() {
        let err = map_devices(&[DeviceGroup::keypad(0, "Bad")]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidOrdinal { ordinal: 0, .. }));
    }

    #[test]
    fn test_overflowing_ordinal_rejected() {
        let err = map_devices(&[DeviceGroup::trouble_input(u32::MAX, "Bad")]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidOrdinal { .. }));
    }

    #[test]
    fn test_tracked_categories() {
        let map = map_devices(&[DeviceGroup::keypad(1, "Entry"), DeviceGroup::switchable_output(1, "Gate")])
            .unwrap();
        let cats = map.tracked().categories();
        assert!(cats.has(Category::Trouble2));
        assert!(cats.has(Category::OutputActive));
        assert!(!cats.has(Category::Violation));
        assert!(map.tracked().contains(Category::Trouble2, ChannelId::new(129).unwrap()));
    }
}
