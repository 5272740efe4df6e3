use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered classification of an issue. `Critical < Moderate < Low` so that
/// sorting and `BTreeMap` iteration yield the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Moderate,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Moderate, Severity::Low];

    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Moderate => "moderate",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "moderate" => Ok(Severity::Moderate),
            "low" => Ok(Severity::Low),
            _ => Err(format!(
                "重要度が不正です: {s}（Critical|Moderate|Low を指定してください）"
            )),
        }
    }
}
