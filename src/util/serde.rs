//! Serializable value types shared by configuration and the scheduling core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Work item priority. Dequeue order is strictly by priority, FIFO within a level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Runs only when nothing else is queued.
    Lowest,
    /// Background work.
    BelowNormal,
    /// Default priority.
    #[default]
    Normal,
    /// Latency sensitive work.
    AboveNormal,
    /// Jumps ahead of everything else in the queue.
    Highest,
}

impl Priority {
    /// All priority levels, lowest first.
    pub const ALL: [Self; 5] = [
        Self::Lowest,
        Self::BelowNormal,
        Self::Normal,
        Self::AboveNormal,
        Self::Highest,
    ];

    /// Ordinal level, `0` for [`Priority::Lowest`] up to `4` for [`Priority::Highest`].
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Lowest => 0,
            Self::BelowNormal => 1,
            Self::Normal => 2,
            Self::AboveNormal => 3,
            Self::Highest => 4,
        }
    }

    /// Canonical lowercase name, as used in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lowest => "lowest",
            Self::BelowNormal => "below_normal",
            Self::Normal => "normal",
            Self::AboveNormal => "above_normal",
            Self::Highest => "highest",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown priority `{s}`"))
    }
}

/// When a work item's post-execute callback fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostExecutePolicy {
    /// Never call the post-execute callback.
    Never,
    /// Only for items canceled before they ran.
    WhenCanceled,
    /// Only for items that ran (successfully or not).
    WhenNotCanceled,
    /// For every item.
    #[default]
    Always,
}

impl PostExecutePolicy {
    /// Whether the callback fires for canceled items.
    #[must_use]
    pub const fn runs_when_canceled(self) -> bool {
        matches!(self, Self::WhenCanceled | Self::Always)
    }

    /// Whether the callback fires for items that ran.
    #[must_use]
    pub const fn runs_when_not_canceled(self) -> bool {
        matches!(self, Self::WhenNotCanceled | Self::Always)
    }
}

impl FromStr for PostExecutePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "when_canceled" => Ok(Self::WhenCanceled),
            "when_not_canceled" => Ok(Self::WhenNotCanceled),
            "always" => Ok(Self::Always),
            other => Err(format!("unknown post-execute policy `{other}`")),
        }
    }
}
