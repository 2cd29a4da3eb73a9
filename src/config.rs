//! Application settings.
//!
//! Settings come from an optional TOML file; every key has a default, so an empty file
//! (or no file) is valid. Command-line flags are applied on top by the binary.
//!
//! ```toml
//! [reference]
//! surnames = "surnames/Names_2010Census.csv"
//! first_names = "first_names"
//!
//! [impute]
//! first_name_column = "applicant_first_name"
//! last_name_column = "applicant_last_name"
//! dob_column = "applicant_dob"
//! batch_size = 10000
//! fallback = "uniform"       # or "miss-flag"
//! default_birth_year = 1990
//! ```

use crate::dates::DEFAULT_BIRTH_YEAR;
use crate::impute::{DEFAULT_BATCH_SIZE, FallbackPolicy, ImputeOptions};
use crate::reference::ReferenceSources;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML settings file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReferenceSettings {
    pub surnames: PathBuf,
    pub first_names: PathBuf,
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            surnames: Path::new("surnames").join("Names_2010Census.csv"),
            first_names: PathBuf::from("first_names"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImputeSettings {
    pub first_name_column: String,
    pub last_name_column: String,
    pub dob_column: String,
    pub batch_size: usize,
    pub fallback: FallbackPolicy,
    pub default_birth_year: i32,
}

impl Default for ImputeSettings {
    fn default() -> Self {
        let options = ImputeOptions::default();
        Self {
            first_name_column: options.first_name_column,
            last_name_column: options.last_name_column,
            dob_column: options.dob_column,
            batch_size: DEFAULT_BATCH_SIZE,
            fallback: options.fallback,
            default_birth_year: DEFAULT_BIRTH_YEAR,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub reference: ReferenceSettings,
    pub impute: ImputeSettings,
}

impl Settings {
    /// Loads settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.impute.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "impute.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        let columns = [
            ("impute.first_name_column", &self.impute.first_name_column),
            ("impute.last_name_column", &self.impute.last_name_column),
        ];
        for (key, value) in columns {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "column name must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn reference_sources(&self) -> ReferenceSources {
        ReferenceSources {
            surnames: self.reference.surnames.clone(),
            first_names: self.reference.first_names.clone(),
        }
    }

    pub fn impute_options(&self) -> ImputeOptions {
        ImputeOptions {
            first_name_column: self.impute.first_name_column.clone(),
            last_name_column: self.impute.last_name_column.clone(),
            dob_column: self.impute.dob_column.clone(),
            batch_size: self.impute.batch_size,
            fallback: self.impute.fallback,
            default_birth_year: self.impute.default_birth_year,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.impute.batch_size, 10_000);
        assert_eq!(settings.impute.fallback, FallbackPolicy::Uniform);
        assert_eq!(settings.impute_options(), ImputeOptions::default());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let text = r#"
            [reference]
            first_names = "/data/ssa"

            [impute]
            fallback = "miss-flag"
            batch_size = 500
        "#;
        let settings = Settings::from_toml_str(text).unwrap();
        assert_eq!(settings.reference.first_names, PathBuf::from("/data/ssa"));
        assert_eq!(
            settings.reference.surnames,
            ReferenceSettings::default().surnames
        );
        let options = settings.impute_options();
        assert_eq!(options.fallback, FallbackPolicy::MissFlag);
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.dob_column, "applicant_dob");
    }

    #[test]
    fn unknown_keys_and_zero_batches_are_rejected() {
        assert!(matches!(
            Settings::from_toml_str("[impute]\nbatchsize = 3\n"),
            Err(ConfigError::TomlParseError(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("[impute]\nbatch_size = 0\n"),
            Err(ConfigError::Invalid {
                key: "impute.batch_size",
                ..
            })
        ));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[impute]\ndefault_birth_year = 1975").unwrap();
        file.flush().unwrap();
        let settings = Settings::load_or_default(Some(file.path())).unwrap();
        assert_eq!(settings.impute.default_birth_year, 1975);
        assert_eq!(
            Settings::load_or_default(None).unwrap(),
            Settings::default()
        );
    }
}
