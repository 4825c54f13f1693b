//! Priority ranks for task scheduling

use serde::{Deserialize, Serialize};

/// Priority rank of a task
///
/// A rank, not a weight: lower values are served earlier. Equal ranks are
/// served in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const LOW: Priority = Priority(10);
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::CRITICAL => write!(f, "critical"),
            Self::HIGH => write!(f, "high"),
            Self::NORMAL => write!(f, "normal"),
            Self::LOW => write!(f, "low"),
            Priority(n) => write!(f, "{}", n),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Self::CRITICAL),
            "high" => Ok(Self::HIGH),
            "normal" => Ok(Self::NORMAL),
            "low" => Ok(Self::LOW),
            other => other
                .parse::<i32>()
                .map(Priority)
                .map_err(|_| format!("Unknown priority: {}", s)),
        }
    }
}
