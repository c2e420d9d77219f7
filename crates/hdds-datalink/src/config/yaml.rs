// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML transport configuration loader.
//!
//! # Example YAML
//!
//! ```yaml
//! # transport.yaml
//! release_delay_ms: 2500
//! keep_idle_links: false
//! cleanup_queue_capacity: 64
//! ```
//!
//! Missing keys keep their defaults.

use super::TransportConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Transport configuration in YAML form.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlTransportConfig {
    /// Release delay in milliseconds (0 = immediate teardown)
    pub release_delay_ms: Option<u64>,

    /// Keep empty links cached for reuse
    pub keep_idle_links: Option<bool>,

    /// Cleanup task queue capacity
    pub cleanup_queue_capacity: Option<usize>,
}

impl YamlTransportConfig {
    /// Overlay the YAML values on the defaults.
    pub fn into_config(self) -> TransportConfig {
        let defaults = TransportConfig::default();
        TransportConfig {
            release_delay: self
                .release_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.release_delay),
            keep_idle_links: self.keep_idle_links.unwrap_or(defaults.keep_idle_links),
            cleanup_queue_capacity: self
                .cleanup_queue_capacity
                .unwrap_or(defaults.cleanup_queue_capacity),
        }
    }
}

impl TransportConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml_content: &str) -> Result<Self> {
        let doc: YamlTransportConfig = serde_yaml::from_str(yaml_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {}", e)))?;
        let config = doc.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read YAML file {}: {}", path.display(), e))
        })?;
        log::debug!("[TransportConfig::from_yaml_file] loading {}", path.display());
        Self::from_yaml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_document() {
        let yaml = r"
release_delay_ms: 2500
keep_idle_links: true
cleanup_queue_capacity: 8
";
        let config = TransportConfig::from_yaml_str(yaml).expect("valid yaml");
        assert_eq!(config.release_delay, Duration::from_millis(2500));
        assert!(config.keep_idle_links);
        assert_eq!(config.cleanup_queue_capacity, 8);
    }

    #[test]
    fn test_missing_keys_keep_defaults() {
        let config = TransportConfig::from_yaml_str("keep_idle_links: true\n").expect("valid yaml");
        assert_eq!(config.release_delay, super::super::DEFAULT_RELEASE_DELAY);
        assert!(config.keep_idle_links);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = TransportConfig::from_yaml_str("release_dely_ms: 5\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_value_rejected() {
        let err = TransportConfig::from_yaml_str("cleanup_queue_capacity: 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "release_delay_ms: 0").expect("write yaml");

        let config = TransportConfig::from_yaml_file(file.path()).expect("load yaml");
        assert_eq!(config.release_delay, Duration::ZERO);

        let missing = TransportConfig::from_yaml_file("/nonexistent/transport.yaml");
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
