use serde::Deserialize;

use crate::error::ConsolidateError;

/// Upper bound on the worker pool; more readers than this just fight over
/// the disk.
pub const MAX_WORKERS: usize = 32;

/// Tunables for a consolidation run. All fields have serde defaults so a
/// TOML file can set only what it cares about; `Default` matches an empty
/// file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidateSettings {
    /// Average percentage cells over non-zero reporters only, instead of
    /// over every source file.
    #[serde(default)]
    pub exclude_zero_percent: bool,
    /// Fail fast when a source's used range differs in size from the
    /// template's.
    #[serde(default)]
    pub strict_structure: bool,
    /// Replace template formulas at consolidated coordinates with the
    /// aggregated value. When false those coordinates are left alone.
    #[serde(default = "default_true")]
    pub overwrite_output_formulas: bool,
    /// Source-reading worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Also pick up `*.xls` files during discovery.
    #[serde(default)]
    pub include_xls: bool,
    /// Hyperlink each consolidated cell to its Contributions group.
    #[serde(default = "default_true")]
    pub link_contributions: bool,
    /// Promote per-file read errors and per-cell coercion failures to
    /// aborts instead of skip-and-continue.
    #[serde(default)]
    pub strict: bool,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

impl Default for ConsolidateSettings {
    fn default() -> Self {
        Self {
            exclude_zero_percent: false,
            strict_structure: false,
            overwrite_output_formulas: true,
            workers: default_workers(),
            include_xls: false,
            link_contributions: true,
            strict: false,
        }
    }
}

impl ConsolidateSettings {
    pub fn from_toml(input: &str) -> Result<Self, ConsolidateError> {
        let settings: ConsolidateSettings =
            toml::from_str(input).map_err(|e| ConsolidateError::SettingsParse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConsolidateError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConsolidateError::SettingsParse(format!(
                "workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_empty_toml() {
        let parsed = ConsolidateSettings::from_toml("").unwrap();
        let defaults = ConsolidateSettings::default();
        assert_eq!(parsed.exclude_zero_percent, defaults.exclude_zero_percent);
        assert_eq!(parsed.strict_structure, defaults.strict_structure);
        assert_eq!(parsed.overwrite_output_formulas, defaults.overwrite_output_formulas);
        assert_eq!(parsed.workers, defaults.workers);
        assert_eq!(parsed.include_xls, defaults.include_xls);
        assert_eq!(parsed.link_contributions, defaults.link_contributions);
        assert_eq!(parsed.strict, defaults.strict);
        assert_eq!(defaults.workers, 4);
        assert!(defaults.overwrite_output_formulas);
        assert!(!defaults.exclude_zero_percent);
    }

    #[test]
    fn parse_partial_toml() {
        let settings = ConsolidateSettings::from_toml(
            r#"
exclude_zero_percent = true
workers = 8
"#,
        )
        .unwrap();
        assert!(settings.exclude_zero_percent);
        assert_eq!(settings.workers, 8);
        assert!(settings.link_contributions);
    }

    #[test]
    fn reject_zero_workers() {
        let err = ConsolidateSettings::from_toml("workers = 0").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn reject_absurd_worker_count() {
        let err = ConsolidateSettings::from_toml("workers = 500").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }
}
