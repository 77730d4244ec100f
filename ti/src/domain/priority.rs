//! Dispatch priority for parse requests

use serde::{Deserialize, Serialize};

/// Priority of a parse request
///
/// Maps the external "high/normal/low" vocabulary onto the worker pool's
/// numeric queue levels, where level 0 is drained first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Number of distinct queue levels
    pub const LEVELS: usize = 3;

    /// Queue level for this priority (0 = highest)
    pub fn level(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    /// All priorities in drain order
    pub fn all() -> [Priority; Self::LEVELS] {
        [Self::High, Self::Normal, Self::Low]
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}
