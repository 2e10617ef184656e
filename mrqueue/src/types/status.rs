use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an active queue row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// Waiting to be claimed once its visibility time has passed
    Ready,
    /// Claimed by a consumer
    Processing,
    /// Failed or timed out; waits for the retry delay
    Retry,
}

/// Raised when a stored code or label does not name a status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown item status: {0}")]
pub struct UnknownStatus(pub String);

impl ItemStatus {
    pub const ALL: [ItemStatus; 3] = [Self::Ready, Self::Processing, Self::Retry];

    /// Integer code used by relational adapters
    pub fn as_code(self) -> i16 {
        match self {
            Self::Ready => 1,
            Self::Processing => 2,
            Self::Retry => 3,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, UnknownStatus> {
        match code {
            1 => Ok(Self::Ready),
            2 => Ok(Self::Processing),
            3 => Ok(Self::Retry),
            other => Err(UnknownStatus(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Processing => "PROCESSING",
            Self::Retry => "RETRY",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl TryFrom<i16> for ItemStatus {
    type Error = UnknownStatus;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}
