use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Per-request inputs to block resolution. Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub path: String,
    pub locale: String,
    pub theme: String,
    /// Role ids of the current user. Empty for anonymous visitors.
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>, locale: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            locale: locale.into(),
            theme: theme.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Same request, resolved against another theme.
    pub fn for_theme(&self, theme: &str) -> Self {
        Self {
            theme: theme.to_string(),
            ..self.clone()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.roles.is_empty()
    }

    /// Stable key over every field that can change a visibility outcome.
    ///
    /// Encoded as a JSON array so that no field value can run into its
    /// neighbour. Roles are a `BTreeSet`, so their order is canonical.
    pub fn fingerprint(&self) -> String {
        json!([self.theme, self.locale, self.roles, self.path]).to_string()
    }
}
