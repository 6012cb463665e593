//! Evaluated build settings.
//!
//! Macro expansion happens elsewhere. By the time settings reach this crate
//! every value is a plain string, and tool specs only ever read them through
//! [`SettingsScope`].

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

pub trait SettingsScope: Sync {
    fn lookup(&self, name: &str) -> Option<&str>;

    fn string(&self, name: &str) -> String {
        self.lookup(name).unwrap_or_default().to_owned()
    }

    /// Whitespace-separated list, honoring double quotes around items.
    fn list(&self, name: &str) -> Vec<String> {
        self.lookup(name).map(split_list).unwrap_or_default()
    }

    fn boolean(&self, name: &str) -> bool {
        matches!(self.lookup(name), Some("YES" | "yes" | "true" | "1"))
    }

    fn path(&self, name: &str) -> Option<Utf8PathBuf> {
        self.lookup(name)
            .filter(|value| !value.is_empty())
            .map(Utf8PathBuf::from)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// `overrides` win over `base`.
    pub fn layered(base: &Settings, overrides: &Settings) -> Settings {
        let mut merged = base.clone();
        for (name, value) in &overrides.0 {
            merged.0.insert(name.clone(), value.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl SettingsScope for Settings {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Settings(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut has_item = false;

    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                has_item = true;
            }
            c if c.is_whitespace() && !quoted => {
                if has_item {
                    items.push(std::mem::take(&mut current));
                    has_item = false;
                }
            }
            c => {
                current.push(c);
                has_item = true;
            }
        }
    }

    if has_item {
        items.push(current);
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let settings = Settings::new()
            .set("ARCHS", "arm64  x86_64")
            .set("HEADER_SEARCH_PATHS", "\"/a b/include\" /c/**")
            .set("ENABLE_X", "YES")
            .set("EMPTY", "");

        assert_eq!(settings.list("ARCHS"), vec!["arm64", "x86_64"]);
        assert_eq!(settings.list("HEADER_SEARCH_PATHS"), vec!["/a b/include", "/c/**"]);
        assert!(settings.boolean("ENABLE_X"));
        assert!(!settings.boolean("MISSING"));
        assert_eq!(settings.path("EMPTY"), None);
        assert_eq!(settings.string("MISSING"), "");
    }

    #[test]
    fn test_layered() {
        let base = Settings::new().set("A", "1").set("B", "1");
        let overrides = Settings::new().set("B", "2");
        let merged = Settings::layered(&base, &overrides);
        assert_eq!(merged.lookup("A"), Some("1"));
        assert_eq!(merged.lookup("B"), Some("2"));
    }
}
