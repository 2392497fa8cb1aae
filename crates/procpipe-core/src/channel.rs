//! Standard stream identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three standard streams of a child process.
///
/// The discriminant is the conventional descriptor number, so `Channel` sorts
/// stdin, stdout, stderr in that order inside ordered collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Channel {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl Channel {
    /// All channels in descriptor order.
    pub const ALL: [Channel; 3] = [Channel::Stdin, Channel::Stdout, Channel::Stderr];

    /// The channels a parent reads from.
    pub const OUTPUTS: [Channel; 2] = [Channel::Stdout, Channel::Stderr];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_output(self) -> bool {
        !matches!(self, Self::Stdin)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
