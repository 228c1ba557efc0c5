//! Settings loader.
//!
//! This module loads [`Settings`] from JSON files in the usual locations
//! and parses ad-hoc candidate lists given on the command line.

use crate::config::settings::Settings;
use crate::error::{Error, Result};
use crate::probe::types::Candidate;
use std::path::{Path, PathBuf};

/// File name looked up in the config directory.
const CONFIG_FILE: &str = "config.json";

/// File name looked up in the current directory.
const LOCAL_CONFIG_FILE: &str = "hostpin.json";

/// Settings loader.
///
/// Provides various methods to load settings and candidate lists
/// from different sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load settings from a JSON file.
    ///
    /// Missing fields keep their defaults. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let settings = ConfigLoader::load_from_file("hostpin.json")?;
    /// for domain in &settings.domains {
    ///     println!("{}", domain.name);
    /// }
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from an explicit path or the default locations.
    ///
    /// Searches in the following order:
    /// 1. `path`, when given (errors are returned)
    /// 2. `$CONFIG_DIR/hostpin/config.json`
    /// 3. `hostpin.json` in the current directory
    /// 4. built-in defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but is invalid.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        for candidate in [Self::config_dir().join(CONFIG_FILE), PathBuf::from(LOCAL_CONFIG_FILE)] {
            if candidate.is_file() {
                tracing::debug!("loading settings from {}", candidate.display());
                return Self::load_from_file(candidate);
            }
        }

        tracing::debug!("no settings file found, using defaults");
        Ok(Settings::default())
    }

    /// Get the config directory path.
    #[must_use]
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hostpin")
    }

    /// Write settings as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn export<P: AsRef<Path>>(settings: &Settings, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Create a candidate list from command-line arguments.
    ///
    /// # Arguments
    ///
    /// * `args` - Strings in format "IP" or "IP#label"
    ///
    /// # Errors
    ///
    /// Returns an error if any IP address is invalid.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let args = vec!["140.82.112.3#us-east".to_string()];
    /// let candidates = ConfigLoader::from_args(args)?;
    /// ```
    pub fn from_args(args: Vec<String>) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::with_capacity(args.len());
        for s in args {
            let (ip, label) = match s.split_once('#') {
                Some((ip, label)) => (ip.trim(), Some(label.trim())),
                None => (s.trim(), None),
            };

            let address = ip
                .parse()
                .map_err(|_| Error::Parse(format!("Invalid IP address: {ip}")))?;

            let candidate = Candidate::new(address, "manual");
            candidates.push(match label {
                Some(label) if !label.is_empty() => candidate.with_region(label),
                _ => candidate,
            });
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::FallbackPolicy;
    use std::io::Write;

    #[test]
    fn test_config_from_args() {
        let args = vec![
            "140.82.112.3#us-east".to_string(),
            "20.205.243.166".to_string(),
        ];
        let candidates = ConfigLoader::from_args(args).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].region.as_deref(), Some("us-east"));
        assert_eq!(candidates[0].source, "manual");
        assert!(candidates[1].region.is_none());
    }

    #[test]
    fn test_config_from_args_invalid_ip() {
        let args = vec!["invalid_ip#Test".to_string()];
        let result = ConfigLoader::from_args(args);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "domains": [{{ "name": "example.org" }}], "fallback": "skip" }}"#
        )
        .unwrap();

        let settings = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(settings.domain_names(), vec!["example.org".to_string()]);
        assert_eq!(settings.domains[0].probe_path, "/");
        assert_eq!(settings.fallback, FallbackPolicy::Skip);
    }

    #[test]
    fn test_load_rejects_invalid_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "probe": {{ "max_concurrency": 0 }} }}"#).unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_export_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let settings = Settings::default();

        ConfigLoader::export(&settings, &path).unwrap();
        assert_eq!(ConfigLoader::load(Some(path.as_path())).unwrap(), settings);
    }
}
