#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("config error: {message}")]
#[diagnostic(code(verity::config))]
pub struct ConfigError {
    pub message: String,
}

/// Knobs of the VC generator, read from the `[vcgen]` table of a TOML file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VcGenConfig {
    /// Emit VCs that are already discharged by the trivial checker.
    pub keep_trivial: bool,
    /// Generate the procedures of a module on the rayon pool.
    pub parallel: bool,
    /// One VC per top-level conjunct of a consequent.
    pub split_conjuncts: bool,
}

impl Default for VcGenConfig {
    fn default() -> Self {
        Self {
            keep_trivial: true,
            parallel: false,
            split_conjuncts: false,
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct ConfigFile {
    #[serde(default)]
    vcgen: VcGenConfig,
}

impl VcGenConfig {
    /// Parses TOML text; a missing `[vcgen]` table yields the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let parsed: ConfigFile = toml::from_str(raw).map_err(|e| ConfigError {
            message: format!("failed to parse config: {e}"),
        })?;
        Ok(parsed.vcgen)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&raw).map_err(|e| ConfigError {
            message: format!("{}: {}", path.display(), e.message),
        })?;
        tracing::debug!(path = %path.display(), ?config, "loaded vcgen config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let c = VcGenConfig::from_toml_str("").unwrap();
        assert_eq!(c, VcGenConfig::default());
        assert!(c.keep_trivial);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let c = VcGenConfig::from_toml_str("[vcgen]\nparallel = true\n").unwrap();
        assert!(c.parallel);
        assert!(c.keep_trivial);
        assert!(!c.split_conjuncts);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = VcGenConfig::from_toml_str("[vcgen]\nfast = true\n").unwrap_err();
        assert!(err.message.contains("failed to parse config"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = VcGenConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.message.contains("failed to read"));
    }
}
