use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// How a block's `pages` text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Show on every page except the listed ones.
    #[serde(alias = "except")]
    Exclude,
    /// Show only on the listed pages.
    #[serde(alias = "only")]
    Include,
    /// `pages` names a registered predicate.
    #[serde(alias = "php")]
    Custom,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Exclude => "exclude",
            Visibility::Include => "include",
            Visibility::Custom => "custom",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown visibility '{0}'")]
pub struct UnknownVisibility(pub String);

impl FromStr for Visibility {
    type Err = UnknownVisibility;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exclude" | "except" => Ok(Visibility::Exclude),
            "include" | "only" => Ok(Visibility::Include),
            "custom" | "php" => Ok(Visibility::Custom),
            other => Err(UnknownVisibility(other.to_string())),
        }
    }
}

/// Placement of a block inside one region of one theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionAssignment {
    pub theme: String,
    pub region: String,
    pub ordering: i32,
}

/// A placeable unit of content. Owned by the catalog; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    pub title: String,
    pub handler: String,
    pub status: bool,
    pub visibility: Visibility,
    pub pages: String,
    /// Allowed locale codes. Empty means every locale.
    #[serde(default)]
    pub locale: BTreeSet<String>,
    /// Allowed role ids. Empty means every role, anonymous included.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub regions: Vec<RegionAssignment>,
}

impl Block {
    /// Returns the assignment of this block to (theme, region), if any.
    pub fn assignment(&self, theme: &str, region: &str) -> Option<&RegionAssignment> {
        self.regions
            .iter()
            .find(|a| a.theme == theme && a.region == region)
    }

    /// Ordering rank within (theme, region). Unassigned blocks sort last.
    pub fn ordering_in(&self, theme: &str, region: &str) -> i32 {
        self.assignment(theme, region)
            .map(|a| a.ordering)
            .unwrap_or(i32::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BlockRow {
    pub id: Uuid,
    pub title: String,
    pub handler: String,
    pub status: bool,
    pub visibility: String,
    pub pages: Option<String>,
    pub locale: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BlockRegionRow {
    pub block_id: Uuid,
    pub theme: String,
    pub region: String,
    pub ordering: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BlockRoleRow {
    pub block_id: Uuid,
    pub role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_accepts_legacy_names() {
        assert_eq!("except".parse::<Visibility>(), Ok(Visibility::Exclude));
        assert_eq!("only".parse::<Visibility>(), Ok(Visibility::Include));
        assert_eq!("php".parse::<Visibility>(), Ok(Visibility::Custom));
        assert!("sometimes".parse::<Visibility>().is_err());
    }

    #[test]
    fn test_unknown_visibility_error() {
        let err = "sometimes".parse::<Visibility>().unwrap_err();
        assert_eq!(err, UnknownVisibility("sometimes".into()));
        assert_eq!(err.to_string(), "unknown visibility 'sometimes'");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_visibility_serde_alias() {
        let v: Visibility = serde_json::from_str("\"only\"").unwrap();
        assert_eq!(v, Visibility::Include);
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"include\"");
    }

    #[test]
    fn test_unassigned_block_sorts_last() {
        let block = Block {
            id: Uuid::new_v4(),
            title: "Menu".into(),
            handler: "core".into(),
            status: true,
            visibility: Visibility::Exclude,
            pages: String::new(),
            locale: BTreeSet::new(),
            roles: BTreeSet::new(),
            regions: vec![RegionAssignment {
                theme: "default".into(),
                region: "sidebar".into(),
                ordering: 3,
            }],
        };
        assert_eq!(block.ordering_in("default", "sidebar"), 3);
        assert_eq!(block.ordering_in("default", "footer"), i32::MAX);
    }
}
