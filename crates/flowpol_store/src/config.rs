use std::{path::Path, time::Duration};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigLoadError;

/// Settings of an [UpdateCoordinator](crate::UpdateCoordinator).
///
/// ```toml
/// install_timeout_ms = 5000
/// kill_capacity = 16
/// event_capacity = 64
/// ```
/// Missing keys take their default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Upper bound on every single transport call.
    #[serde(rename = "install_timeout_ms", with = "millis")]
    pub install_timeout: Duration,
    /// Buffer of the cancellation broadcast.
    pub kill_capacity: usize,
    /// Buffer of the device event broadcast.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            install_timeout: Duration::from_secs(5),
            kill_capacity: 16,
            event_capacity: 64,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        let config: CoordinatorConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        debug!("loading coordinator config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    fn check(&self) -> Result<(), ConfigLoadError> {
        if self.install_timeout.is_zero() {
            return Err(ConfigLoadError::Invalid("install_timeout_ms"));
        }
        // broadcast channels cannot be empty
        if self.kill_capacity == 0 {
            return Err(ConfigLoadError::Invalid("kill_capacity"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigLoadError::Invalid("event_capacity"));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.install_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file() {
        let config = CoordinatorConfig::from_toml_str("install_timeout_ms = 250\n").unwrap();
        assert_eq!(config.install_timeout, Duration::from_millis(250));
        assert_eq!(config.kill_capacity, 16);
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("install_timeout_ms = 250"));
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            CoordinatorConfig::from_toml_str("kill_capacity = 0"),
            Err(ConfigLoadError::Invalid("kill_capacity"))
        ));
        assert!(matches!(
            CoordinatorConfig::from_toml_str("install_timeout_ms = \"soon\""),
            Err(ConfigLoadError::Toml(_))
        ));
        assert!(matches!(
            CoordinatorConfig::load("/nonexistent/flowpol.toml"),
            Err(ConfigLoadError::Io { .. })
        ));
    }
}
