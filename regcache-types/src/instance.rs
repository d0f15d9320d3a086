use crate::ParseEnumError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two interchangeable Local Store instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceLabel {
    A,
    B,
}

impl InstanceLabel {
    /// The opposite instance.
    pub fn other(self) -> Self {
        match self {
            InstanceLabel::A => InstanceLabel::B,
            InstanceLabel::B => InstanceLabel::A,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceLabel::A => "A",
            InstanceLabel::B => "B",
        }
    }

    /// Physical table holding this instance's rows.
    pub fn table_name(&self) -> &'static str {
        match self {
            InstanceLabel::A => "records_a",
            InstanceLabel::B => "records_b",
        }
    }
}

impl fmt::Display for InstanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceLabel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(InstanceLabel::A),
            "B" | "b" => Ok(InstanceLabel::B),
            other => Err(ParseEnumError::new("instance label", other)),
        }
    }
}
