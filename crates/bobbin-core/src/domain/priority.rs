//! Task priority.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Priority class of a task. Higher values are admitted first.
///
/// The discriminants are part of the contract (they show up in exported
/// history and in `TryFrom<u8>`), so they are spelled out explicitly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 3,
    High = 5,
    Critical = 8,
    Urgent = 10,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Critical,
        Priority::Urgent,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority: {0} (expected low|normal|high|critical|urgent or 1|3|5|8|10)")]
pub struct ParsePriorityError(String);

impl TryFrom<u8> for Priority {
    type Error = ParsePriorityError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::ALL
            .into_iter()
            .find(|p| p.value() == value)
            .ok_or_else(|| ParsePriorityError(value.to_string()))
    }
}

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        if let Some(p) = Priority::ALL.into_iter().find(|p| p.as_str() == norm) {
            return Ok(p);
        }
        norm.parse::<u8>()
            .ok()
            .and_then(|v| Priority::try_from(v).ok())
            .ok_or_else(|| ParsePriorityError(s.to_string()))
    }
}
