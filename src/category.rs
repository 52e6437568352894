// MIT License - Copyright (c) 2026 Peter Wright
// Status categories and channel addressing

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Condition class reported by the panel.
///
/// Each category has its own channel namespace and its own notification topic:
/// channel 5 in `Trouble` and channel 5 in `Trouble2` are unrelated conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Zone violated (input active)
    Violation,
    /// Zone in alarm
    Alarm,
    /// Zone alarm memory
    MemAlarm,
    /// Zone tamper
    Tamper,
    /// Zone tamper memory
    MemTamper,
    /// Zone bypassed
    Bypass,
    /// Zone masked
    Mask,
    /// Zone mask memory
    MemMask,
    /// Output active
    OutputActive,
    /// Trouble bits, part 1 (expander power, generic trouble inputs)
    Trouble,
    /// Trouble bits, part 2 (expander and keypad communication/tamper)
    Trouble2,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Violation,
        Category::Alarm,
        Category::MemAlarm,
        Category::Tamper,
        Category::MemTamper,
        Category::Bypass,
        Category::Mask,
        Category::MemMask,
        Category::OutputActive,
        Category::Trouble,
        Category::Trouble2,
    ];

    /// The topic name used in logs, payloads and unique ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Violation => "violation",
            Self::Alarm => "alarm",
            Self::MemAlarm => "mem-alarm",
            Self::Tamper => "tamper",
            Self::MemTamper => "mem-tamper",
            Self::Bypass => "bypass",
            Self::Mask => "mask",
            Self::MemMask => "mem-mask",
            Self::OutputActive => "output-active",
            Self::Trouble => "trouble",
            Self::Trouble2 => "trouble2",
        }
    }

    /// Parse a category name. Accepts `_` as well as `-` separators.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }

    /// The single-bit set for this category.
    pub fn flag(&self) -> CategorySet {
        match self {
            Self::Violation => CategorySet::VIOLATION,
            Self::Alarm => CategorySet::ALARM,
            Self::MemAlarm => CategorySet::MEM_ALARM,
            Self::Tamper => CategorySet::TAMPER,
            Self::MemTamper => CategorySet::MEM_TAMPER,
            Self::Bypass => CategorySet::BYPASS,
            Self::Mask => CategorySet::MASK,
            Self::MemMask => CategorySet::MEM_MASK,
            Self::OutputActive => CategorySet::OUTPUT_ACTIVE,
            Self::Trouble => CategorySet::TROUBLE,
            Self::Trouble2 => CategorySet::TROUBLE2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown category: {s}"))
    }
}

bitflags! {
    /// A set of categories, used by connectors to declare what they support.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CategorySet: u16 {
        const VIOLATION     = 1 << 0;
        const ALARM         = 1 << 1;
        const MEM_ALARM     = 1 << 2;
        const TAMPER        = 1 << 3;
        const MEM_TAMPER    = 1 << 4;
        const BYPASS        = 1 << 5;
        const MASK          = 1 << 6;
        const MEM_MASK      = 1 << 7;
        const OUTPUT_ACTIVE = 1 << 8;
        const TROUBLE       = 1 << 9;
        const TROUBLE2      = 1 << 10;
    }
}

impl CategorySet {
    pub fn has(&self, category: Category) -> bool {
        self.contains(category.flag())
    }

    /// Iterate the member categories in declaration order.
    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        Category::ALL.into_iter().filter(|c| self.has(*c))
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, c| set | c.flag())
    }
}

/// Address of one condition within a category. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ChannelId(u32);

impl ChannelId {
    pub fn new(value: u32) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for ChannelId {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "channel id must be positive".to_string())
    }
}

impl From<ChannelId> for u32 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_name_roundtrip() {
        for category in Category::ALL {
            assert_eq!(Category::from_name(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_category_name_variants() {
        assert_eq!(Category::from_name("mem_alarm"), Some(Category::MemAlarm));
        assert_eq!(Category::from_name(" Output-Active "), Some(Category::OutputActive));
        assert_eq!(Category::from_name("trouble3"), None);
        assert!("partition".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_flags_are_distinct() {
        let all: CategorySet = Category::ALL.into_iter().collect();
        assert_eq!(all, CategorySet::all());
        assert_eq!(all.categories().count(), 11);
    }

    #[test]
    fn test_category_set_membership() {
        let set = CategorySet::VIOLATION | CategorySet::TROUBLE2;
        assert!(set.has(Category::Violation));
        assert!(set.has(Category::Trouble2));
        assert!(!set.has(Category::Trouble));
        assert_eq!(
            set.categories().collect::<Vec<_>>(),
            vec![Category::Violation, Category::Trouble2]
        );
    }

    #[test]
    fn test_channel_id_rejects_zero() {
        assert!(ChannelId::new(0).is_none());
        assert_eq!(ChannelId::new(7).map(|c| c.get()), Some(7));
        assert!(serde_json::from_str::<ChannelId>("0").is_err());
        assert_eq!(serde_json::from_str::<ChannelId>("12").unwrap().get(), 12);
    }
}
