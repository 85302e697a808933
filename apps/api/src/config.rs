use anyhow::{Context, Result};

use crate::blocks::pattern::PatternSettings;
use crate::models::theme::{Theme, ThemeSet};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Redis result cache. `None` keeps the cache in process memory.
    pub redis_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub front_page: String,
    pub url_locale_prefix: bool,
    pub languages: Vec<String>,
    pub default_locale: String,
    pub front_theme: Theme,
    pub back_theme: Theme,
    pub block_cache_ttl_secs: u64,
    /// Entries per group kept by the in-process cache.
    pub block_cache_max_entries: usize,
    /// Initial `Block.<Handler>.<event>` listener keys.
    pub active_listeners: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable lookup.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
        };
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let languages = split_list(&or_default("LANGUAGES", "en"));
        let default_locale = match var("DEFAULT_LOCALE") {
            Some(locale) => locale,
            None => languages
                .first()
                .cloned()
                .context("LANGUAGES must name at least one locale")?,
        };

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            redis_url: var("REDIS_URL").filter(|url| !url.is_empty()),
            port: or_default("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: or_default("RUST_LOG", "info"),
            front_page: or_default("FRONT_PAGE", "/"),
            url_locale_prefix: parse_flag(&or_default("URL_LOCALE_PREFIX", "false"))
                .context("URL_LOCALE_PREFIX must be true or false")?,
            languages,
            default_locale,
            front_theme: Theme::new(
                or_default("FRONT_THEME", "frontend"),
                split_list(&or_default("FRONT_THEME_REGIONS", "header,main,sidebar,footer")),
            ),
            back_theme: Theme::new(
                or_default("BACK_THEME", "backend"),
                split_list(&or_default("BACK_THEME_REGIONS", "toolbar,main,sidebar")),
            ),
            block_cache_ttl_secs: or_default("BLOCK_CACHE_TTL_SECS", "3600")
                .parse::<u64>()
                .context("BLOCK_CACHE_TTL_SECS must be a number of seconds")?,
            block_cache_max_entries: or_default("BLOCK_CACHE_MAX_ENTRIES", "10000")
                .parse::<usize>()
                .context("BLOCK_CACHE_MAX_ENTRIES must be a number")?,
            active_listeners: split_list(&or_default("ACTIVE_LISTENERS", "")),
        })
    }

    pub fn pattern_settings(&self) -> PatternSettings {
        PatternSettings {
            front_page: self.front_page.clone(),
            url_locale_prefix: self.url_locale_prefix,
            languages: self.languages.clone(),
        }
    }

    pub fn themes(&self) -> ThemeSet {
        ThemeSet {
            front: self.front_theme.clone(),
            back: self.back_theme.clone(),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(lookup(&[("DATABASE_URL", "postgres://localhost/blocks")]))
            .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url, None);
        assert_eq!(config.front_page, "/");
        assert!(!config.url_locale_prefix);
        assert_eq!(config.default_locale, "en");
        assert_eq!(config.front_theme.id, "frontend");
        assert!(config.front_theme.has_region("sidebar"));
        assert_eq!(config.back_theme.regions, ["toolbar", "main", "sidebar"]);
        assert!(config.active_listeners.is_empty());
        assert_eq!(config.block_cache_max_entries, 10_000);
    }

    #[test]
    fn test_missing_database_url() {
        let err = Config::from_vars(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_locale_settings() {
        let config = Config::from_vars(lookup(&[
            ("DATABASE_URL", "postgres://localhost/blocks"),
            ("LANGUAGES", "es, en"),
            ("URL_LOCALE_PREFIX", "yes"),
            ("ACTIVE_LISTENERS", "Block.Menu.display,Block.Poll.display"),
        ]))
        .unwrap();
        assert_eq!(config.languages, ["es", "en"]);
        assert_eq!(config.default_locale, "es");
        assert!(config.pattern_settings().url_locale_prefix);
        assert_eq!(config.active_listeners.len(), 2);
    }

    #[test]
    fn test_bad_flag_rejected() {
        let result = Config::from_vars(lookup(&[
            ("DATABASE_URL", "postgres://localhost/blocks"),
            ("URL_LOCALE_PREFIX", "maybe"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_size_must_be_numeric() {
        let err = Config::from_vars(lookup(&[
            ("DATABASE_URL", "postgres://localhost/blocks"),
            ("BLOCK_CACHE_MAX_ENTRIES", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BLOCK_CACHE_MAX_ENTRIES"));
    }
}
