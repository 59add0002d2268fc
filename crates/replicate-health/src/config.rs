//! Check configuration, in the dd-agent `conf.d` layout.
//!
//! ```yaml
//! init_config:
//!   consul_address: 127.0.0.1:8500
//!   timeout: 5s
//! instances:
//!   - master_dc_path: service/consul-replicate/master_dc
//!     check_paths: [app/config, app/secret]
//! ```
//!
//! YAML is used for `.yaml`/`.yml` files, TOML for everything else.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CONSUL_ADDRESS: &str = "127.0.0.1:8500";
pub const DEFAULT_PROCESS_NAME: &str = "consul-replicate";
pub const DEFAULT_PS_PATH: &str = "/bin/ps";
pub const DEFAULT_METRIC_PREFIX: &str = "consul-replicate.";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A whole check config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckFile {
    /// Shared settings. `init_config:` with no body is accepted.
    #[serde(default)]
    pub init_config: Option<InitConfig>,
    #[serde(default)]
    pub instances: Vec<CheckConfig>,
}

/// Settings shared by every instance in a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitConfig {
    pub consul_address: Option<String>,
    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
    pub timeout: Option<String>,
    pub process_name: Option<String>,
    pub ps_path: Option<String>,
    pub metric_prefix: Option<String>,
}

/// Per-instance input to a single check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// KV path whose value names the authoritative datacenter.
    pub master_dc_path: String,
    /// Key paths compared between the local and master datacenters, in order.
    #[serde(default)]
    pub check_paths: Vec<String>,
    /// Extra `key:value` tags appended to every observation.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Resolved shared settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub consul_address: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub process_name: String,
    pub ps_path: String,
    pub metric_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            consul_address: DEFAULT_CONSUL_ADDRESS.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            ps_path: DEFAULT_PS_PATH.to_string(),
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
        }
    }
}

impl CheckFile {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let file = if is_yaml {
            Self::from_yaml_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        file.validate()?;
        Ok(file)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check structural requirements that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::Invalid("no instances configured".into()));
        }
        for (i, instance) in self.instances.iter().enumerate() {
            if instance.master_dc_path.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "instance {i}: master_dc_path is empty"
                )));
            }
            if let Some(pos) = instance.check_paths.iter().position(|p| p.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "instance {i}: check_paths[{pos}] is empty"
                )));
            }
        }
        self.settings().map(|_| ())
    }

    /// Apply defaults to `init_config`.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let defaults = Settings::default();
        let Some(init) = &self.init_config else {
            return Ok(defaults);
        };

        let timeout = match &init.timeout {
            Some(raw) => parse_duration(raw)
                .filter(|d| !d.is_zero())
                .ok_or_else(|| ConfigError::Invalid(format!("bad timeout '{raw}'")))?,
            None => defaults.timeout,
        };

        Ok(Settings {
            consul_address: init
                .consul_address
                .clone()
                .unwrap_or(defaults.consul_address),
            token: init.token.clone().filter(|t| !t.is_empty()),
            timeout,
            process_name: init.process_name.clone().unwrap_or(defaults.process_name),
            ps_path: init.ps_path.clone().unwrap_or(defaults.ps_path),
            metric_prefix: init.metric_prefix.clone().unwrap_or(defaults.metric_prefix),
        })
    }
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
init_config:
  consul_address: 10.0.0.5:8500
  token: secret
  timeout: 750ms

instances:
  - master_dc_path: service/consul-replicate/master_dc
    check_paths:
      - app/config
      - app/secret
    tags: ["env:prod"]
"#;

    #[test]
    fn parse_yaml_instances() {
        let file = CheckFile::from_yaml_str(YAML).unwrap();
        file.validate().unwrap();
        assert_eq!(file.instances.len(), 1);
        let inst = &file.instances[0];
        assert_eq!(inst.master_dc_path, "service/consul-replicate/master_dc");
        assert_eq!(inst.check_paths, ["app/config", "app/secret"]);
        assert_eq!(inst.tags, ["env:prod"]);
    }

    #[test]
    fn settings_apply_overrides() {
        let settings = CheckFile::from_yaml_str(YAML).unwrap().settings().unwrap();
        assert_eq!(settings.consul_address, "10.0.0.5:8500");
        assert_eq!(settings.token.as_deref(), Some("secret"));
        assert_eq!(settings.timeout, Duration::from_millis(750));
        assert_eq!(settings.process_name, DEFAULT_PROCESS_NAME);
        assert_eq!(settings.metric_prefix, DEFAULT_METRIC_PREFIX);
    }

    #[test]
    fn empty_init_config_uses_defaults() {
        let yaml = "init_config:\n\ninstances:\n  - master_dc_path: x\n";
        let file = CheckFile::from_yaml_str(yaml).unwrap();
        assert!(file.init_config.is_none());
        assert_eq!(file.settings().unwrap(), Settings::default());
        assert!(file.instances[0].check_paths.is_empty());
    }

    #[test]
    fn parse_toml_instances() {
        let toml_str = r#"
[init_config]
process_name = "replicate"

[[instances]]
master_dc_path = "dc/master"
check_paths = ["a/b"]
"#;
        let file = CheckFile::from_toml_str(toml_str).unwrap();
        file.validate().unwrap();
        assert_eq!(file.settings().unwrap().process_name, "replicate");
        assert_eq!(file.instances[0].check_paths, ["a/b"]);
    }

    #[test]
    fn validate_rejects_no_instances() {
        let file = CheckFile::from_yaml_str("instances: []").unwrap();
        assert!(matches!(file.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_empty_paths() {
        let file =
            CheckFile::from_yaml_str("instances:\n  - master_dc_path: x\n    check_paths: ['']\n")
                .unwrap();
        let err = file.validate().unwrap_err();
        assert!(err.to_string().contains("check_paths[0]"));

        let file = CheckFile::from_yaml_str("instances:\n  - master_dc_path: ' '\n").unwrap();
        assert!(file.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_timeout() {
        let yaml = "init_config:\n  timeout: soon\ninstances:\n  - master_dc_path: x\n";
        let file = CheckFile::from_yaml_str(yaml).unwrap();
        assert!(file.validate().is_err());

        let yaml = "init_config:\n  timeout: 0s\ninstances:\n  - master_dc_path: x\n";
        assert!(CheckFile::from_yaml_str(yaml).unwrap().validate().is_err());
    }

    #[test]
    fn missing_master_path_is_parse_error() {
        let err = CheckFile::from_yaml_str("instances:\n  - check_paths: [a]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("later"), None);
    }

    #[test]
    fn parse_duration_minutes_overflow_is_rejected() {
        assert_eq!(parse_duration("307445734561825861m"), None);
        assert_eq!(
            parse_duration("307445734561825860m"),
            Some(Duration::from_secs(307445734561825860 * 60))
        );
    }

    #[test]
    fn validate_rejects_overflowing_timeout() {
        let yaml =
            "init_config:\n  timeout: 307445734561825861m\ninstances:\n  - master_dc_path: x\n";
        let file = CheckFile::from_yaml_str(yaml).unwrap();
        assert!(matches!(file.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("consul_replicate_check.yaml");
        std::fs::write(&yaml_path, YAML).unwrap();
        assert_eq!(CheckFile::from_file(&yaml_path).unwrap().instances.len(), 1);

        let toml_path = dir.path().join("check.toml");
        std::fs::write(&toml_path, "[[instances]]\nmaster_dc_path = \"m\"\n").unwrap();
        assert_eq!(CheckFile::from_file(&toml_path).unwrap().instances.len(), 1);

        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            CheckFile::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
