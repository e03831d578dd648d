//! The subset of `package.json` that module resolution cares about.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

/// Parsed package manifest.
///
/// Unknown fields are ignored; main-like fields are kept as raw JSON so that
/// resolution can look them up by the configured field names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub browser: Option<BrowserField>,
    #[serde(default)]
    pub dependencies: FxHashMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: FxHashMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: FxHashMap<String, String>,
    #[serde(flatten)]
    pub fields: FxHashMap<String, Value>,
}

/// The `browser` field: either a replacement main file or an override map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BrowserField {
    Main(String),
    Overrides(FxHashMap<String, BrowserOverride>),
}

/// Right-hand side of a `browser` override entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BrowserOverride {
    /// `false`: the module is replaced by nothing and must not be bundled.
    Disabled(bool),
    Replace(String),
}

impl PackageManifest {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// String value of a main-like field such as `module` or `main`.
    ///
    /// `browser` is answered from the typed field when it holds a string.
    pub fn main_field(&self, field: &str) -> Option<&str> {
        if field == "browser" {
            return match &self.browser {
                Some(BrowserField::Main(main)) => Some(main.as_str()),
                _ => None,
            };
        }
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Version range this package declares for `name`.
    pub fn dependency_range(&self, name: &str) -> Option<&str> {
        self.dependencies
            .get(name)
            .or_else(|| self.peer_dependencies.get(name))
            .or_else(|| self.dev_dependencies.get(name))
            .map(String::as_str)
    }

    /// Look up `key` in the `browser` override map.
    ///
    /// Keys are compared without a leading `./`; relative keys may also omit
    /// one of `extensions`.
    pub fn browser_override(&self, key: &str, extensions: &[String]) -> Option<&BrowserOverride> {
        let Some(BrowserField::Overrides(map)) = &self.browser else {
            return None;
        };
        let lookup = |key: &str| map.get(key).or_else(|| map.get(&format!("./{key}")));

        let wanted = key.strip_prefix("./").unwrap_or(key);
        lookup(wanted).or_else(|| {
            extensions
                .iter()
                .filter_map(|ext| wanted.strip_suffix(ext.as_str()))
                .find_map(lookup)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec![".js".into(), ".ts".into()]
    }

    #[test]
    fn parses_main_fields_and_dependencies() {
        let manifest = PackageManifest::from_slice(
            br#"{
                "name": "demo",
                "version": "1.2.3",
                "main": "lib/index.js",
                "module": "esm/index.js",
                "dependencies": { "a": "^1.0.0" },
                "peerDependencies": { "b": ">=2" }
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.main_field("module"), Some("esm/index.js"));
        assert_eq!(manifest.main_field("main"), Some("lib/index.js"));
        assert_eq!(manifest.main_field("browser"), None);
        assert_eq!(manifest.dependency_range("a"), Some("^1.0.0"));
        assert_eq!(manifest.dependency_range("b"), Some(">=2"));
        assert_eq!(manifest.dependency_range("c"), None);
    }

    #[test]
    fn browser_string_acts_as_main_field() {
        let manifest =
            PackageManifest::from_slice(br#"{ "browser": "dist/browser.js" }"#).unwrap();
        assert_eq!(manifest.main_field("browser"), Some("dist/browser.js"));
        assert!(manifest.browser_override("./x.js", &exts()).is_none());
    }

    #[test]
    fn browser_overrides_match_with_and_without_extension() {
        let manifest = PackageManifest::from_slice(
            br#"{ "browser": { "./lib/node.js": "./lib/web.js", "./lib/fs": false, "crypto": false } }"#,
        )
        .unwrap();
        assert_eq!(
            manifest.browser_override("lib/node.js", &exts()),
            Some(&BrowserOverride::Replace("./lib/web.js".into()))
        );
        assert_eq!(
            manifest.browser_override("./lib/fs.js", &exts()),
            Some(&BrowserOverride::Disabled(false))
        );
        assert_eq!(
            manifest.browser_override("crypto", &exts()),
            Some(&BrowserOverride::Disabled(false))
        );
        assert!(manifest.browser_override("lib/other.js", &exts()).is_none());
    }
}
