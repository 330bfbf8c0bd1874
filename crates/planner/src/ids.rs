use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{InvalidIdSnafu, PlanError, PlanResult};

/// Opaque message identifier.
///
/// Serde and the `From` conversions accept any string so that inbound batches
/// deserialize losslessly; the planner rejects blank ids before planning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn parse(raw: &str) -> PlanResult<Self> {
        if raw.trim().is_empty() {
            return InvalidIdSnafu {
                stage: "parse-message-id",
                id_type: "message-id",
                raw: raw.to_string(),
            }
            .fail();
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for MessageId {
    type Err = PlanError;

    fn from_str(raw: &str) -> PlanResult<Self> {
        Self::parse(raw)
    }
}
