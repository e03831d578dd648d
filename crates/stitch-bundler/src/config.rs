//! Bundler configuration.
//!
//! Sources are layered with figment, lowest priority first:
//! built-in defaults, an optional `stitch.toml`/`stitch.json` file, then
//! `STITCH_*` environment variables (`STITCH_CDN__BASE_URL`,
//! `STITCH_BUILD__MINIFY`, …).

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Complete configuration for a [`BundlerService`](crate::BundlerService).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlerConfig {
    pub resolve: ResolveConfig,
    pub cdn: CdnConfig,
    pub build: BuildConfig,
}

/// Module resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Extensions probed, in order, for extensionless specifiers.
    pub extensions: Vec<String>,
    /// Manifest fields consulted, in order, for a package's entry file.
    pub package_main: Vec<String>,
    /// Specifier prefixes that are never bundled.
    pub external_prefixes: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".js".into(), ".ts".into(), ".tsx".into()],
            package_main: vec!["module".into(), "main".into()],
            external_prefixes: vec!["data:".into(), "http:".into(), "https:".into()],
        }
    }
}

/// CDN endpoints and HTTP client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnConfig {
    /// Base for file reads: `{base_url}/{name}@{version}/{path}`.
    pub base_url: String,
    /// Base for flat directory listings: `{listing_url}/{name}@{version}/flat`.
    pub listing_url: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            base_url: "https://cdn.jsdelivr.net/npm".into(),
            listing_url: "https://data.jsdelivr.com/v1/package/npm".into(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_redirects: 10,
            user_agent: format!("stitch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Defaults for every build; requests may override the first three.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub minify: bool,
    pub sourcemap: bool,
    pub splitting: bool,
    /// Directory the engine believes it writes to. Never touched on disk.
    pub output_dir: String,
    /// Private namespace tagging modules owned by the bridge.
    pub namespace: String,
    /// File name of the metadata graph inside the output directory.
    pub metafile: String,
    pub max_concurrent_builds: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            minify: true,
            sourcemap: true,
            splitting: true,
            output_dir: "/stitch-out".into(),
            namespace: "stitch".into(),
            metafile: "meta.json".into(),
            max_concurrent_builds: 4,
        }
    }
}

impl BundlerConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(Error::InvalidConfig(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }

        figment = figment.merge(Env::prefixed("STITCH_").split("__"));
        Self::extract(figment)
    }

    /// Build a configuration from a JSON value, filling gaps with defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Serialized::defaults(value));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for ext in &self.resolve.extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(Error::InvalidConfig(format!(
                    "extension '{ext}' must start with '.'"
                )));
            }
        }
        if self.resolve.package_main.is_empty() {
            return Err(Error::InvalidConfig(
                "resolve.package_main must name at least one field".into(),
            ));
        }
        if !self.build.output_dir.starts_with('/') || self.build.output_dir.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "build.output_dir '{}' must be an absolute path below '/'",
                self.build.output_dir
            )));
        }
        if self.build.namespace.is_empty() || self.build.namespace.contains(':') {
            return Err(Error::InvalidConfig(format!(
                "build.namespace '{}' must be non-empty and contain no ':'",
                self.build.namespace
            )));
        }
        if self.build.metafile.is_empty() || self.build.metafile.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "build.metafile '{}' must be a plain file name",
                self.build.metafile
            )));
        }
        if self.build.max_concurrent_builds == 0 {
            return Err(Error::InvalidConfig(
                "build.max_concurrent_builds must be at least 1".into(),
            ));
        }
        for (field, value) in [
            ("cdn.base_url", &self.cdn.base_url),
            ("cdn.listing_url", &self.cdn.listing_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::InvalidConfig(format!("{field} '{value}': {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_follow_jsdelivr_conventions() {
        let config = BundlerConfig::default();
        assert_eq!(config.resolve.extensions, [".js", ".ts", ".tsx"]);
        assert_eq!(config.resolve.package_main, ["module", "main"]);
        assert_eq!(config.cdn.base_url, "https://cdn.jsdelivr.net/npm");
        assert!(config.build.minify && config.build.sourcemap && config.build.splitting);
        config.validate().unwrap();
    }

    #[test]
    fn from_value_merges_partial_sections() {
        let config = BundlerConfig::from_value(serde_json::json!({
            "build": { "minify": false },
            "resolve": { "extensions": [".mjs", ".js"] }
        }))
        .unwrap();
        assert!(!config.build.minify);
        assert!(config.build.sourcemap);
        assert_eq!(config.resolve.extensions, [".mjs", ".js"]);
        assert_eq!(config.resolve.package_main, ["module", "main"]);
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[cdn]\nbase_url = \"https://unpkg.example\"\n\n[build]\nsplitting = false"
        )
        .unwrap();
        let config = BundlerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.cdn.base_url, "https://unpkg.example");
        assert!(!config.build.splitting);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad = [
            serde_json::json!({ "resolve": { "extensions": ["js"] } }),
            serde_json::json!({ "build": { "namespace": "a:b" } }),
            serde_json::json!({ "build": { "output_dir": "relative" } }),
            serde_json::json!({ "build": { "max_concurrent_builds": 0 } }),
            serde_json::json!({ "cdn": { "base_url": "not a url" } }),
        ];
        for value in bad {
            assert!(
                matches!(BundlerConfig::from_value(value.clone()), Err(Error::InvalidConfig(_))),
                "accepted {value}"
            );
        }
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = BundlerConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
