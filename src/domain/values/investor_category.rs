use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three major institutional investor groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestorCategory {
    Foreign,
    Trust,
    Dealer,
}

impl InvestorCategory {
    pub const ALL: [InvestorCategory; 3] = [
        InvestorCategory::Foreign,
        InvestorCategory::Trust,
        InvestorCategory::Dealer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvestorCategory::Foreign => "foreign",
            InvestorCategory::Trust => "trust",
            InvestorCategory::Dealer => "dealer",
        }
    }
}

impl fmt::Display for InvestorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvestorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "foreign" | "外資" | "外" => Ok(InvestorCategory::Foreign),
            "trust" | "投信" | "信" => Ok(InvestorCategory::Trust),
            "dealer" | "自營商" | "自營" | "自" => Ok(InvestorCategory::Dealer),
            _ => Err(format!("Unknown investor category: {s}")),
        }
    }
}
