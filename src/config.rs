use std::{
    collections::HashMap,
    fs::{self, File},
    io::prelude::*,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

/// Top-level configuration for the application, loaded from a TOML file.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FathomConfig {
    /// Unique instance name or identifier.
    #[serde(default = "default_inst")]
    pub inst: String,

    /// Socket address to bind to, e.g. "0.0.0.0:8080".
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Maximum concurrent measurement connections.
    #[serde(default = "default_max_conn")]
    pub max_conn: u32,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

fn default_inst() -> String {
    "main".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_conn() -> u32 {
    65535
}

impl Default for FathomConfig {
    fn default() -> Self {
        Self {
            inst: default_inst(),
            bind: default_bind(),
            max_conn: default_max_conn(),
            other_fields: HashMap::new(),
        }
    }
}

impl FathomConfig {
    pub fn load(path: &PathBuf) -> anyhow::Result<Self, FathomConfigLoadError> {
        let raw = fs::read_to_string(path).map_err(FathomConfigLoadError::Io)?;
        let config: Self = toml::from_str(&raw).map_err(FathomConfigLoadError::Parse)?;

        for field in &config.other_fields {
            println!(
                "Unknown configuration '{}' with value {:?}",
                field.0, field.1
            );
        }

        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> anyhow::Result<()> {
        let config_str = toml::to_string(&self)?;
        let mut file = File::create(path)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FathomConfigLoadError {
    #[error("Could not open config")]
    Io(#[from] std::io::Error),
    #[error("Could not parse")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: FathomConfig = toml::from_str("").unwrap();
        assert_eq!(config.inst, "main");
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.max_conn, 65535);
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let config: FathomConfig = toml::from_str("bind = \"127.0.0.1:9000\"\nextra = 1\n").unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert!(config.other_fields.contains_key("extra"));
    }
}
