//! Mapping configuration.

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ALL_DAY_DURATION_DAYS, DEFAULT_TIMED_DURATION_MINUTES, DEFAULT_ZONE,
    TASKS_OPERATIONS_PER_YIELD_POINT,
};
use crate::error::{CalBridgeError, CalBridgeResult};

fn default_zone() -> String {
    DEFAULT_ZONE.to_string()
}

fn is_default_zone(zone: &String) -> bool {
    zone == DEFAULT_ZONE
}

fn default_timed_duration_minutes() -> i64 {
    DEFAULT_TIMED_DURATION_MINUTES
}

fn default_all_day_duration_days() -> i64 {
    DEFAULT_ALL_DAY_DURATION_DAYS
}

/// Settings that the mappers would otherwise read from ambient global state.
///
/// Example TOML:
///
/// ```toml
/// default_zone = "Europe/Vienna"
/// default_timed_duration_minutes = 30
/// max_operations_per_yield_point = 499
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Zone used for floating times and as fallback for unknown zone IDs.
    #[serde(default = "default_zone", skip_serializing_if = "is_default_zone")]
    pub default_zone: String,

    /// Assumed duration of timed items that have neither end nor duration.
    #[serde(default = "default_timed_duration_minutes")]
    pub default_timed_duration_minutes: i64,

    /// Assumed duration of all-day items that have neither end nor duration.
    #[serde(default = "default_all_day_duration_days")]
    pub default_all_day_duration_days: i64,

    /// Allow the backend to yield every N operations of a batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_operations_per_yield_point: Option<usize>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        MappingConfig {
            default_zone: default_zone(),
            default_timed_duration_minutes: default_timed_duration_minutes(),
            default_all_day_duration_days: default_all_day_duration_days(),
            max_operations_per_yield_point: None,
        }
    }
}

impl MappingConfig {
    /// Defaults for a task backend (yield points enabled).
    pub fn for_tasks() -> Self {
        MappingConfig {
            max_operations_per_yield_point: Some(TASKS_OPERATIONS_PER_YIELD_POINT),
            ..Self::default()
        }
    }

    /// Same as [`MappingConfig::default`], but with the host's current time zone as default zone.
    pub fn with_system_zone() -> CalBridgeResult<Self> {
        let zone = iana_time_zone::get_timezone()
            .map_err(|e| CalBridgeError::Config(format!("Could not determine system time zone: {e}")))?;

        Ok(MappingConfig {
            default_zone: zone,
            ..Self::default()
        })
    }

    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> CalBridgeResult<Self> {
        let config: MappingConfig =
            toml::from_str(content).map_err(|e| CalBridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CalBridgeResult<String> {
        toml::to_string_pretty(self).map_err(|e| CalBridgeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> CalBridgeResult<()> {
        self.zone()?;

        if self.default_timed_duration_minutes <= 0
            || Duration::try_minutes(self.default_timed_duration_minutes).is_none()
        {
            return Err(CalBridgeError::Config(format!(
                "default_timed_duration_minutes must be positive and in range (is {})",
                self.default_timed_duration_minutes
            )));
        }
        if self.default_all_day_duration_days <= 0
            || Duration::try_days(self.default_all_day_duration_days).is_none()
        {
            return Err(CalBridgeError::Config(format!(
                "default_all_day_duration_days must be positive and in range (is {})",
                self.default_all_day_duration_days
            )));
        }
        if self.max_operations_per_yield_point == Some(0) {
            return Err(CalBridgeError::Config(
                "max_operations_per_yield_point must not be 0".into(),
            ));
        }
        Ok(())
    }

    /// The default zone as [`Tz`].
    pub fn zone(&self) -> CalBridgeResult<Tz> {
        self.default_zone.parse::<Tz>().map_err(|_| {
            CalBridgeError::Config(format!("Unknown default zone '{}'", self.default_zone))
        })
    }

    /// Falls back to the built-in default when the configured value is out of range.
    pub fn default_timed_duration(&self) -> Duration {
        Duration::try_minutes(self.default_timed_duration_minutes)
            .unwrap_or_else(|| Duration::minutes(DEFAULT_TIMED_DURATION_MINUTES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = MappingConfig::from_toml_str("").unwrap();
        assert_eq!(config, MappingConfig::default());
        assert_eq!(config.zone().unwrap(), Tz::UTC);
        assert_eq!(config.default_timed_duration(), Duration::hours(1));
    }

    #[test]
    fn test_parse_toml() {
        let config = MappingConfig::from_toml_str(
            r#"
default_zone = "Europe/Vienna"
default_timed_duration_minutes = 30
max_operations_per_yield_point = 499
"#,
        )
        .unwrap();

        assert_eq!(config.zone().unwrap(), chrono_tz::Europe::Vienna);
        assert_eq!(config.default_timed_duration(), Duration::minutes(30));
        assert_eq!(config.default_all_day_duration_days, 1);
        assert_eq!(config.max_operations_per_yield_point, Some(499));
    }

    #[test]
    fn test_rejects_unknown_zone() {
        let err = MappingConfig::from_toml_str("default_zone = \"Mars/Olympus\"").unwrap_err();
        assert!(matches!(err, CalBridgeError::Config(_)));
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        let err = MappingConfig::from_toml_str("default_timed_duration_minutes = 0").unwrap_err();
        assert!(matches!(err, CalBridgeError::Config(_)));
    }

    #[test]
    fn test_rejects_out_of_range_duration() {
        let err = MappingConfig::from_toml_str("default_timed_duration_minutes = 9223372036854775807")
            .unwrap_err();
        assert!(matches!(err, CalBridgeError::Config(_)));

        let err = MappingConfig::from_toml_str("default_all_day_duration_days = 9223372036854775807")
            .unwrap_err();
        assert!(matches!(err, CalBridgeError::Config(_)));
    }

    #[test]
    fn test_unvalidated_duration_falls_back() {
        let config = MappingConfig {
            default_timed_duration_minutes: i64::MAX,
            ..MappingConfig::default()
        };
        assert_eq!(config.default_timed_duration(), Duration::hours(1));
    }

    #[test]
    fn test_toml_roundtrip_skips_defaults() {
        let config = MappingConfig::for_tasks();
        let toml = config.to_toml_string().unwrap();
        assert!(!toml.contains("default_zone"));
        assert_eq!(MappingConfig::from_toml_str(&toml).unwrap(), config);
    }
}
