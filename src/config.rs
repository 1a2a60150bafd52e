// src/config.rs

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};
use url::Url;

use crate::{
    process::{filter::FilterSpec, select::ColumnMapping},
    retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS},
};

pub const DEFAULT_SOURCE_URL: &str =
    "https://www.vermontsales.co.za/exports_v2/manufacturers.csv.gz";

/// Everything a run needs. Every field has a default so a config file only
/// has to name what it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub source_url: String,
    pub download_root: PathBuf,
    pub extract_root: PathBuf,
    pub output_root: PathBuf,
    pub output_file_name: String,
    pub max_download_attempts: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub cleanup_intermediates: bool,
    pub filter: FilterSpec,
    pub columns: Vec<ColumnMapping>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            download_root: PathBuf::from("downloads"),
            extract_root: PathBuf::from("unzipped"),
            output_root: PathBuf::from("filtered_data"),
            output_file_name: "filtered_data.csv".to_string(),
            max_download_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: 500,
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
            cleanup_intermediates: false,
            filter: FilterSpec::equals("manufacturer", "TORK CRAFT"),
            columns: Vec::new(),
        }
    }
}

impl Config {
    /// Load a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config {:?}", path))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.source_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("source_url must be http(s), got {}", url.scheme());
        }
        let name = &self.output_file_name;
        if name.is_empty() || name.contains(|c: char| c == '/' || c == '\\') {
            bail!(
                "output_file_name must be a bare file name, got {:?}",
                self.output_file_name
            );
        }
        Ok(())
    }

    pub fn source_url(&self) -> Result<Url> {
        Url::parse(&self.source_url)
            .with_context(|| format!("parsing source_url {}", self.source_url))
    }

    /// Last path segment of the source URL, e.g. `manufacturers.csv.gz`.
    pub fn download_file_name(&self) -> String {
        Url::parse(&self.source_url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(str::to_string))
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "download.csv.gz".to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_download_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::from_yaml_str("{}").unwrap();
        assert_eq!(cfg.max_download_attempts, 3);
        assert_eq!(cfg.download_file_name(), "manufacturers.csv.gz");
        assert_eq!(cfg.output_file_name, "filtered_data.csv");
        assert!(matches!(cfg.filter, FilterSpec::Equals { .. }));
    }

    #[test]
    fn test_full_file() {
        let cfg = Config::from_yaml_str(
            r#"
source_url: https://example.com/exports/products.csv.gz
download_root: /tmp/dl
max_download_attempts: 5
retry_backoff_ms: 0
filter:
  kind: one_of
  column: model
  values: [A23BP2, X1]
columns:
  - { from: model, to: Model Number }
  - { from: price, to: Price }
"#,
        )
        .unwrap();
        assert_eq!(cfg.download_file_name(), "products.csv.gz");
        assert_eq!(cfg.download_root, PathBuf::from("/tmp/dl"));
        assert_eq!(cfg.retry_policy(), RetryPolicy::immediate(5));
        assert_eq!(cfg.columns.len(), 2);
        assert_eq!(cfg.filter.to_string(), r#"model in ["A23BP2", "X1"]"#);
    }

    #[test]
    fn test_example_file_parses() {
        let cfg = Config::from_yaml_str(include_str!("../catalog.example.yaml")).unwrap();
        assert_eq!(cfg.source_url, DEFAULT_SOURCE_URL);
        assert_eq!(cfg.columns.len(), 3);
        assert_eq!(cfg.filter.to_string(), r#"manufacturer == "TORK CRAFT""#);
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(Config::from_yaml_str("source_url: not a url\n").is_err());
        assert!(Config::from_yaml_str("source_url: ftp://example.com/a.gz\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_field() {
        assert!(Config::from_yaml_str("sourceUrl: https://example.com/a.gz\n").is_err());
    }

    #[test]
    fn test_rejects_nested_output_name() {
        assert!(Config::from_yaml_str("output_file_name: a/b.csv\n").is_err());
    }
}
