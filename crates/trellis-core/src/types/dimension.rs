use crate::error::{Result, TrellisError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A property a selection can test a resource against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Id,
    Type,
    Interface,
    Group,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Id,
        Dimension::Type,
        Dimension::Interface,
        Dimension::Group,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Id => "id",
            Dimension::Type => "type",
            Dimension::Interface => "interface",
            Dimension::Group => "group",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "id" => Ok(Dimension::Id),
            "type" => Ok(Dimension::Type),
            "interface" => Ok(Dimension::Interface),
            "group" => Ok(Dimension::Group),
            other => Err(TrellisError::InvalidState(format!(
                "invalid dimension: {}",
                other
            ))),
        }
    }
}
