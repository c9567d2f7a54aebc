//! Run configuration
//!
//! Plain data, validated once up front so every later phase can assume a
//! consistent set of options.

use crate::error::{CheckifyError, Result};
use crate::rewrite::OutputMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckifyConfig {
    /// Input translation units.
    pub files: Vec<PathBuf>,
    /// All files must live under this directory when set.
    pub base_dir: Option<PathBuf>,
    /// Rewrite `Arr` and `NtArr` sites, not just `Ptr`.
    pub all_levels: bool,
    /// Wrap safe statement runs in `_Checked { }`. Requires `all_levels`.
    pub add_checked_regions: bool,
    /// Let constraints flow through annotated external interfaces.
    pub propagate_through_itypes: bool,
    /// Match printf-family variadic calls structurally instead of tainting.
    pub handle_varargs: bool,
    /// Extra interface annotations, merged over the built-in libc table.
    pub interface_profile: Option<PathBuf>,
    pub output: OutputMode,
    /// Dump the constraint store as JSON before solving.
    pub constraint_output: Option<PathBuf>,
    /// Write per-level statistics after solving.
    pub stats_output: Option<PathBuf>,
    /// Write the Wild root-cause report after solving.
    pub wild_stats_output: Option<PathBuf>,
}

impl Default for CheckifyConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            base_dir: None,
            all_levels: false,
            add_checked_regions: false,
            propagate_through_itypes: false,
            handle_varargs: false,
            interface_profile: None,
            output: OutputMode::Postfix("checked".to_string()),
            constraint_output: None,
            stats_output: None,
            wild_stats_output: None,
        }
    }
}

impl CheckifyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(CheckifyError::Config("no input files".into()));
        }
        if let OutputMode::Postfix(postfix) = &self.output {
            if postfix.is_empty() {
                return Err(CheckifyError::Config("output postfix is empty".into()));
            }
        }
        if self.add_checked_regions && !self.all_levels {
            return Err(CheckifyError::Config(
                "checked regions require rewriting all pointer levels".into(),
            ));
        }
        if let Some(base) = &self.base_dir {
            for file in &self.files {
                if !file.starts_with(base) {
                    return Err(CheckifyError::Config(format!(
                        "{} is outside the base directory {}",
                        file.display(),
                        base.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_files() -> CheckifyConfig {
        CheckifyConfig {
            files: vec![PathBuf::from("a.c")],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_needs_files() {
        assert!(CheckifyConfig::default().validate().is_err());
        assert!(with_files().validate().is_ok());
    }

    #[test]
    fn test_empty_postfix_rejected() {
        let config = CheckifyConfig {
            output: OutputMode::Postfix(String::new()),
            ..with_files()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_regions_require_all_levels() {
        let config = CheckifyConfig {
            add_checked_regions: true,
            ..with_files()
        };
        assert!(config.validate().is_err());
        let config = CheckifyConfig {
            add_checked_regions: true,
            all_levels: true,
            ..with_files()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_dir_prefix_enforced() {
        let config = CheckifyConfig {
            files: vec![PathBuf::from("/src/a.c"), PathBuf::from("/other/b.c")],
            base_dir: Some(PathBuf::from("/src")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
