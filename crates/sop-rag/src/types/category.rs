//! Product categories used to tag and filter manuals

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Product family a document belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    /// Everbridge critical event management
    Everbridge,
    /// Inner Range access control
    InnerRange,
    /// Milestone video management
    Milestone,
    /// Generic SOPs not tied to one product
    General,
    /// Detection found no convincing signature
    Unknown,
}

impl ProductCategory {
    /// Every category, in display order
    pub const ALL: [ProductCategory; 5] = [
        Self::Everbridge,
        Self::InnerRange,
        Self::Milestone,
        Self::General,
        Self::Unknown,
    ];

    /// Stored metadata value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Everbridge => "everbridge",
            Self::InnerRange => "inner_range",
            Self::Milestone => "milestone",
            Self::General => "general",
            Self::Unknown => "unknown",
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Everbridge => "Everbridge",
            Self::InnerRange => "Inner Range",
            Self::Milestone => "Milestone",
            Self::General => "General",
            Self::Unknown => "Unknown",
        }
    }

    /// Hint shown to operators about what to ask for this product
    pub fn help_text(&self) -> &'static str {
        match self {
            Self::Everbridge => "Ask about emergency notification procedures, system configuration, or incident management using Everbridge.",
            Self::InnerRange => "Ask about access control procedures, system setup, or security management using Inner Range systems.",
            Self::Milestone => "Ask about video surveillance procedures, camera configuration, or system management using Milestone.",
            Self::General => "Ask about any general procedures or SOPs from your uploaded documents.",
            Self::Unknown => "Ask about procedures related to your uploaded documents.",
        }
    }
}

impl fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ProductCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();

        match normalized.as_str() {
            "everbridge" => Ok(Self::Everbridge),
            "innerrange" => Ok(Self::InnerRange),
            "milestone" => Ok(Self::Milestone),
            "general" => Ok(Self::General),
            "unknown" => Ok(Self::Unknown),
            _ => Err(Error::Config(format!("Unknown product category: {}", s))),
        }
    }
}

/// Result of category detection with its confidence (0.0-1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryMatch {
    pub category: ProductCategory,
    pub confidence: f32,
}

impl CategoryMatch {
    /// Caller-supplied category, taken as certain
    pub fn supplied(category: ProductCategory) -> Self {
        Self {
            category,
            confidence: 1.0,
        }
    }

    /// Nothing matched
    pub fn unknown() -> Self {
        Self {
            category: ProductCategory::Unknown,
            confidence: 0.0,
        }
    }
}
