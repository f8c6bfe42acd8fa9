//! Shared domain enumerations.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

const HOUR: u64 = 60 * 60;

/// One named dashboard component, persisted as its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Overview,
    Sparklines,
    KeywordOverview,
    RankingDistribution,
    CompetitorSummary,
    ContentAudit,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Overview,
        DataType::Sparklines,
        DataType::KeywordOverview,
        DataType::RankingDistribution,
        DataType::CompetitorSummary,
        DataType::ContentAudit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Overview => "overview",
            DataType::Sparklines => "sparklines",
            DataType::KeywordOverview => "keyword_overview",
            DataType::RankingDistribution => "ranking_distribution",
            DataType::CompetitorSummary => "competitor_summary",
            DataType::ContentAudit => "content_audit",
        }
    }

    /// Freshness applied when no override is configured.
    pub fn default_freshness(self) -> Duration {
        let hours = match self {
            DataType::Overview | DataType::Sparklines => 4,
            DataType::KeywordOverview | DataType::RankingDistribution => 6,
            DataType::CompetitorSummary => 8,
            DataType::ContentAudit => 12,
        };
        Duration::from_secs(hours * HOUR)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        DataType::ALL
            .into_iter()
            .find(|data_type| data_type.as_str() == normalized)
            .ok_or_else(|| DomainError::validation(format!("unknown data type `{value}`")))
    }
}

/// Resource kind segment of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// One dashboard component of an entity.
    Dashboard,
    /// All components of an entity for one run.
    Bundle,
    /// Lists derived from an entity, or the global entity listing.
    Listing,
    /// The entity itself.
    Entity,
    Keyword,
    Competitor,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Dashboard,
        ResourceKind::Bundle,
        ResourceKind::Listing,
        ResourceKind::Entity,
        ResourceKind::Keyword,
        ResourceKind::Competitor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::Bundle => "bundle",
            ResourceKind::Listing => "listing",
            ResourceKind::Entity => "entity",
            ResourceKind::Keyword => "keyword",
            ResourceKind::Competitor => "competitor",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| DomainError::validation(format!("unknown resource kind `{value}`")))
    }
}
