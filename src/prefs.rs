//! User preferences, persisted as a small json file.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::field::Operator;

pub const DEFAULT_PREFERENCES_FILE: &str = "saje-preferences.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Preferences {
    /// How per-field outcomes combine when a query names no operator.
    pub operator: Operator,
    pub accept_missing: bool,
    pub case_sensitive: bool,
    /// Printed between rendered results.
    pub separator: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            operator: Operator::And,
            accept_missing: true,
            case_sensitive: false,
            separator: "\n\n".to_owned(),
        }
    }
}

impl Preferences {
    pub fn load(path: &Path) -> Result<Preferences> {
        let source = std::fs::read_to_string(path)?;
        crate::path_de::from_str_with_path(&source)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let source = serde_json::to_string_pretty(self)?;
        std::fs::write(path, source)?;
        Ok(())
    }

    /// Read the preference file, writing the defaults to it when it doesn't
    /// exist yet. Failures are logged and the defaults are used.
    pub fn load_or_create(path: &Path) -> Preferences {
        if !path.exists() {
            let prefs = Preferences::default();
            match prefs.save(path) {
                Ok(()) => log::info!("created preference file {}", path.display()),
                Err(err) => log::error!("couldn't create preference file {}: {err}", path.display()),
            }
            return prefs;
        }
        match Preferences::load(path) {
            Ok(prefs) => {
                log::debug!("loaded preferences from {}", path.display());
                prefs
            }
            Err(err) => {
                log::error!("couldn't read preference file {}: {err}; using defaults", path.display());
                Preferences::default()
            }
        }
    }
}
