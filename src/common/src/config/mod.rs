use std::path::Path;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Whether a selector rule keeps or drops what it matches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Keep,
    #[default]
    Drop,
}

impl Polarity {
    pub fn keeps(self) -> bool {
        matches!(self, Polarity::Keep)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SelectEventsConfig {
    /// Path expressions; an event is written if any of them accepts it
    #[serde(default)]
    pub select_events: Vec<String>,
    /// Write every event regardless of trigger results
    #[serde(default)]
    pub process_all: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputModuleConfig {
    /// Label of the output module, used in logs and file metadata
    pub module_label: String,
    /// Ordered keep/drop rules; the last matching rule wins
    pub output_commands: Vec<String>,
    /// Decision for products no rule matches
    #[serde(default)]
    pub default_polarity: Polarity,
    #[serde(default)]
    pub select_events: SelectEventsConfig,
    /// Maximum number of events to write; unset means unlimited
    #[serde(default)]
    pub max_events: Option<u64>,
}

impl Default for OutputModuleConfig {
    fn default() -> Self {
        Self {
            module_label: "out".to_string(),
            output_commands: vec!["keep *".to_string()],
            default_polarity: Polarity::Drop,
            select_events: SelectEventsConfig::default(),
            max_events: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory output files are written to
    pub dir: String,
    /// File name prefix; files are named `<prefix>-<sequence>.evo`
    pub file_prefix: String,
    /// Rotate after this many events in one file
    #[serde(default)]
    pub max_events_per_file: Option<u64>,
    /// Rotate once a file grows past this many bytes
    #[serde(default)]
    pub max_file_size: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: ".data/output".to_string(),
            file_prefix: "output".to_string(),
            max_events_per_file: None,
            max_file_size: Some(2 * 1024 * 1024 * 1024), // 2GB
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    /// Name of the process this output stage runs in
    pub process_name: String,
    pub output: OutputModuleConfig,
    pub storage: StorageConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            process_name: "PROD".to_string(),
            output: OutputModuleConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("eventout.toml"))
            .merge(Env::prefixed("EVENTOUT__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("EVENTOUT__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Check the values rules and selectors do not already validate
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.process_name.is_empty() {
            anyhow::bail!("Process name cannot be empty");
        }
        if self.output.module_label.is_empty() {
            anyhow::bail!("Output module label cannot be empty");
        }
        if self.storage.dir.is_empty() {
            anyhow::bail!("Storage directory cannot be empty");
        }
        if self.storage.max_events_per_file == Some(0) {
            anyhow::bail!("storage.max_events_per_file must be positive when set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration_keeps_everything() {
        let config = Configuration::default();

        assert_eq!(config.process_name, "PROD");
        assert_eq!(config.output.output_commands, vec!["keep *".to_string()]);
        assert_eq!(config.output.default_polarity, Polarity::Drop);
        assert!(config.output.select_events.select_events.is_empty());
        assert!(config.output.max_events.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.storage.file_prefix, "output");
        assert_eq!(config.storage.max_file_size, Some(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_toml_and_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "eventout.toml",
                r#"
                process_name = "RECO"

                [output]
                module_label = "photonOut"
                output_commands = ["drop *", "keep recoPhotons_*_*_*"]
                max_events = 10

                [output.select_events]
                select_events = ["p_photon", "!p_veto"]
                "#,
            )?;
            jail.set_env("EVENTOUT__STORAGE__MAX_EVENTS_PER_FILE", "250");

            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.process_name, "RECO");
            assert_eq!(config.output.module_label, "photonOut");
            assert_eq!(config.output.output_commands.len(), 2);
            assert_eq!(config.output.max_events, Some(10));
            assert_eq!(config.output.select_events.select_events.len(), 2);
            assert!(!config.output.select_events.process_all);
            assert_eq!(config.storage.max_events_per_file, Some(250));
            Ok(())
        });
    }

    #[test]
    fn test_polarity_parses_lowercase() {
        Jail::expect_with(|jail| {
            jail.set_env("EVENTOUT__OUTPUT__DEFAULT_POLARITY", "keep");
            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.output.default_polarity, Polarity::Keep);
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_zero_events_per_file() {
        let mut config = Configuration::default();
        config.storage.max_events_per_file = Some(0);
        assert!(config.validate().is_err());

        let mut config = Configuration::default();
        config.process_name.clear();
        assert!(config.validate().is_err());
    }
}
