use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Institutional flow records for one stock and trading day
    Chip,
    /// Items published by a video channel
    Video,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chip => "chip",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chip" => Ok(Self::Chip),
            "video" | "youtube" => Ok(Self::Video),
            _ => Err(format!(
                "Invalid source type: '{}'. Use 'chip' or 'video'",
                s
            )),
        }
    }
}
