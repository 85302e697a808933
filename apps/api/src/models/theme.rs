use serde::{Deserialize, Serialize};

/// A theme and the region slugs its layout declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub id: String,
    pub regions: Vec<String>,
}

impl Theme {
    pub fn new<I, S>(id: impl Into<String>, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            regions: regions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r == region)
    }
}

/// The front-end and back-end themes of a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSet {
    pub front: Theme,
    pub back: Theme,
}

impl ThemeSet {
    pub fn iter(&self) -> impl Iterator<Item = &Theme> {
        [&self.front, &self.back].into_iter()
    }

    pub fn get(&self, id: &str) -> Option<&Theme> {
        self.iter().find(|t| t.id == id)
    }
}
