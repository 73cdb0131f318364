//! File-based settings for the store.
//!
//! ```toml
//! db_path = "cookies.db"
//! foreign_keys = true
//! log_level = "info"
//! ```
//!
//! Every key is optional; missing keys take the [`Settings::default`] value.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::Schema;
use crate::sqlite::SqliteConfig;

pub const DEFAULT_DB_PATH: &str = "cookies.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// SQLite file to open, or `:memory:`.
    pub db_path: String,
    /// Enforce foreign keys on the connection.
    pub foreign_keys: bool,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: DEFAULT_DB_PATH.to_string(),
            foreign_keys: true,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn into_sqlite_config(self, schema: Schema) -> SqliteConfig {
        SqliteConfig::new(self.db_path, schema).with_foreign_keys(self.foreign_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn empty_file_uses_defaults() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn partial_file_overrides_given_keys() {
        let settings = Settings::from_toml_str("foreign_keys = false\n").unwrap();
        assert!(!settings.foreign_keys);
        assert_eq!(settings.db_path, DEFAULT_DB_PATH);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Settings::from_toml_str("db = \"x.db\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        fs::write(&path, "db_path = \"shop.db\"\nlog_level = \"debug\"\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.db_path, "shop.db");
        assert_eq!(settings.log_level, "debug");

        let config = settings.into_sqlite_config(Schema::new());
        assert_eq!(config.db_path, "shop.db");
        assert!(config.foreign_keys);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Settings::load(Path::new("/nonexistent/store.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
