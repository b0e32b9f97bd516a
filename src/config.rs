use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::context::{ContextAggregator, ContextSettings};
use crate::logging::LogConfig;
use crate::prescription::{PrescriptionSettings, SessionPrescriber};
use crate::readiness::{ReadinessCalculator, ReadinessSettings};
use crate::training_plan::{PlanGenerator, PlannerSettings};

/// Engine configuration, stored as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Readiness thresholds and penalties
    pub readiness: ReadinessSettings,

    /// Session prescription defaults
    pub prescription: PrescriptionSettings,

    /// History aggregation limits
    pub context: ContextSettings,

    /// Plan generation defaults
    pub planner: PlannerSettings,

    /// Logging output
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        ConfigMetadata {
            version: "1.0".to_string(),
            updated_at: Utc::now(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            metadata: ConfigMetadata::default(),
            readiness: ReadinessSettings::default(),
            prescription: PrescriptionSettings::default(),
            context: ContextSettings::default(),
            planner: PlannerSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: EngineConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        debug!(path = %path.as_ref().display(), "Loaded engine configuration");
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".liftrx")
            .join("config.toml")
    }

    /// Load from `path`, or the default location, falling back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    path = %config_path.display(),
                    error = %err,
                    "Config not loaded, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Save configuration to default location
    pub fn save_default(&mut self) -> Result<PathBuf> {
        let config_path = Self::default_config_path();
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }

    pub fn readiness_calculator(&self) -> ReadinessCalculator {
        ReadinessCalculator::with_config(self.readiness.clone())
    }

    pub fn session_prescriber(&self) -> SessionPrescriber {
        SessionPrescriber::with_config(self.prescription.clone(), &self.readiness)
    }

    pub fn context_aggregator(&self) -> ContextAggregator {
        ContextAggregator::with_config(self.context.clone())
    }

    pub fn plan_generator(&self) -> PlanGenerator {
        PlanGenerator::with_config(self.planner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, deserialized);
        assert_eq!(deserialized.readiness.unsafe_threshold, 0.35);
        assert_eq!(deserialized.context.session_batch_size, 20);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml_str = r#"
            [prescription]
            default_increment_kg = 1.25

            [planner]
            default_goal = "hypertrophy"
        "#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.prescription.default_increment_kg, 1.25);
        assert_eq!(config.prescription.max_history_sessions, 2);
        assert_eq!(config.planner.default_goal, "hypertrophy");
        assert_eq!(config.planner.default_sessions_per_week, 3);
        assert_eq!(config.readiness, ReadinessSettings::default());
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = EngineConfig::default();
        original.readiness.strain_penalty = 0.1;
        original.logging.level = LogLevel::Debug;

        original.save_to_file(&config_path).unwrap();
        let loaded = EngineConfig::load_from_file(&config_path).unwrap();

        assert_eq!(loaded.readiness.strain_penalty, 0.1);
        assert_eq!(loaded.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("absent.toml");

        let config = EngineConfig::load_or_default(Some(&missing));
        assert_eq!(config.planner, PlannerSettings::default());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "readiness = [").unwrap();

        assert!(EngineConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn test_default_config_path() {
        let path = EngineConfig::default_config_path();
        assert!(path.ends_with(".liftrx/config.toml"));
    }
}
