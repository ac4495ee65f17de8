use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid topology: {0}")]
    Topology(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The two conflicting lane groups. Both must be non-empty and the
    /// lane sets must partition the intersection with no overlap.
    pub group_a: GroupConfig,
    pub group_b: GroupConfig,
    /// Signal timing parameters
    #[serde(default)]
    pub timing: TimingConfig,
    /// Emergency vehicle preemption parameters
    #[serde(default)]
    pub evp: EvpConfig,
    /// Hardware signal controller connection
    #[serde(default)]
    pub actuator: ActuatorConfig,
    /// Shared secret for mutating endpoints. Unset means all callers
    /// are trusted.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// SQLite database URL for the cycle log
    #[serde(default = "Config::default_database_url")]
    pub database_url: String,
    /// HTTP listen address
    #[serde(default = "Config::default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    /// Display label, e.g. "NorthSouth"
    pub label: String,
    /// Two-character actuator group code, e.g. "L1"
    pub code: String,
    /// Lanes belonging to this group, e.g. ["North", "South"]
    pub lanes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "TimingConfig::default_min_green")]
    pub min_green_secs: u32,
    #[serde(default = "TimingConfig::default_max_green")]
    pub max_green_secs: u32,
    #[serde(default = "TimingConfig::default_yellow")]
    pub yellow_secs: u32,
    #[serde(default = "TimingConfig::default_all_red")]
    pub all_red_secs: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_green_secs: Self::default_min_green(),
            max_green_secs: Self::default_max_green(),
            yellow_secs: Self::default_yellow(),
            all_red_secs: Self::default_all_red(),
        }
    }
}

impl TimingConfig {
    fn default_min_green() -> u32 {
        10
    }
    fn default_max_green() -> u32 {
        40
    }
    fn default_yellow() -> u32 {
        4
    }
    fn default_all_red() -> u32 {
        2
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvpConfig {
    /// ETA below which the requesting lane's group must already be green
    #[serde(default = "EvpConfig::default_mandatory_green_threshold")]
    pub mandatory_green_threshold_secs: u32,
    /// Extra green time granted past the expected arrival
    #[serde(default = "EvpConfig::default_green_buffer")]
    pub green_buffer_secs: u32,
    /// Accepted range for eta_seconds on activation requests
    #[serde(default = "EvpConfig::default_min_eta")]
    pub min_eta_secs: u32,
    #[serde(default = "EvpConfig::default_max_eta")]
    pub max_eta_secs: u32,
}

impl Default for EvpConfig {
    fn default() -> Self {
        Self {
            mandatory_green_threshold_secs: Self::default_mandatory_green_threshold(),
            green_buffer_secs: Self::default_green_buffer(),
            min_eta_secs: Self::default_min_eta(),
            max_eta_secs: Self::default_max_eta(),
        }
    }
}

impl EvpConfig {
    fn default_mandatory_green_threshold() -> u32 {
        10
    }
    fn default_green_buffer() -> u32 {
        5
    }
    fn default_min_eta() -> u32 {
        10
    }
    fn default_max_eta() -> u32 {
        300
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorConfig {
    /// Whether to connect to the hardware controller at all
    #[serde(default)]
    pub enabled: bool,
    /// TCP endpoint of the signal controller (serial bridge), e.g.
    /// "192.168.1.50:7777"
    #[serde(default = "ActuatorConfig::default_addr")]
    pub addr: String,
    /// Settle delay after a reconnect, milliseconds
    #[serde(default = "ActuatorConfig::default_reconnect_settle_ms")]
    pub reconnect_settle_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: Self::default_addr(),
            reconnect_settle_ms: Self::default_reconnect_settle_ms(),
        }
    }
}

impl ActuatorConfig {
    fn default_addr() -> String {
        "127.0.0.1:7777".to_string()
    }
    fn default_reconnect_settle_ms() -> u64 {
        500
    }
}

impl Config {
    fn default_database_url() -> String {
        "sqlite:database/crossflow.db?mode=rwc".to_string()
    }

    fn default_listen_addr() -> String {
        "0.0.0.0:3000".to_string()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Topology errors are fatal: the scheduler must never run with an
    /// undefined lane partition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_a.lanes.is_empty() || self.group_b.lanes.is_empty() {
            return Err(ConfigError::Topology(
                "both lane groups must contain at least one lane".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for lane in self.group_a.lanes.iter().chain(&self.group_b.lanes) {
            if lane.trim().is_empty() {
                return Err(ConfigError::Topology("empty lane name".to_string()));
            }
            if !seen.insert(lane.as_str()) {
                return Err(ConfigError::Topology(format!(
                    "lane '{lane}' appears in more than one group"
                )));
            }
        }

        if self.group_a.code == self.group_b.code {
            return Err(ConfigError::Topology(format!(
                "groups share actuator code '{}'",
                self.group_a.code
            )));
        }

        if self.timing.min_green_secs > self.timing.max_green_secs {
            return Err(ConfigError::Topology(format!(
                "min green ({}) exceeds max green ({})",
                self.timing.min_green_secs, self.timing.max_green_secs
            )));
        }

        if self.evp.min_eta_secs > self.evp.max_eta_secs {
            return Err(ConfigError::Topology(
                "EVP minimum ETA exceeds maximum ETA".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml() -> &'static str {
        r#"
group_a:
  label: NorthSouth
  code: L1
  lanes: [North, South]
group_b:
  label: EastWest
  code: L2
  lanes: [East, West]
"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = serde_yaml::from_str(base_yaml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.timing.min_green_secs, 10);
        assert_eq!(config.timing.max_green_secs, 40);
        assert_eq!(config.timing.yellow_secs, 4);
        assert_eq!(config.timing.all_red_secs, 2);
        assert_eq!(config.evp.mandatory_green_threshold_secs, 10);
        assert!(config.auth_token.is_none());
        assert!(!config.actuator.enabled);
    }

    #[test]
    fn rejects_empty_group() {
        let yaml = r#"
group_a:
  label: NorthSouth
  code: L1
  lanes: []
group_b:
  label: EastWest
  code: L2
  lanes: [East]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Topology(_))
        ));
    }

    #[test]
    fn rejects_lane_in_both_groups() {
        let yaml = r#"
group_a:
  label: NorthSouth
  code: L1
  lanes: [North, East]
group_b:
  label: EastWest
  code: L2
  lanes: [East]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Topology(_))
        ));
    }

    #[test]
    fn rejects_inverted_green_bounds() {
        let yaml = format!(
            "{}timing:\n  min_green_secs: 50\n  max_green_secs: 40\n",
            base_yaml()
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
