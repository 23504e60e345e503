//! patrol.toml configuration parser.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::identity::sandbox_identity;
use crate::types::{CheckDefinition, CheckKind};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatrolConfig {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub name: String,
    pub kind: CheckKind,
    pub image: String,
    pub command: String,
    /// Interval string, e.g. "30s" or "5m".
    pub interval: String,
    pub unit: Option<String>,
    #[serde(default)]
    pub on_success: Vec<String>,
    #[serde(default)]
    pub on_failure: Vec<String>,
}

impl CheckConfig {
    /// Resolve this entry into a definition owned by `service`.
    pub fn to_definition(&self, service: &str) -> Result<CheckDefinition, ConfigError> {
        let missing = |field: &'static str| ConfigError::MissingField {
            service: service.to_string(),
            check: self.name.clone(),
            field,
        };
        if self.image.trim().is_empty() {
            return Err(missing("image"));
        }
        if self.command.trim().is_empty() {
            return Err(missing("command"));
        }

        let interval = parse_duration(&self.interval)
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ConfigError::InvalidInterval {
                service: service.to_string(),
                check: self.name.clone(),
                value: self.interval.clone(),
            })?;

        Ok(CheckDefinition {
            service: service.to_string(),
            name: self.name.clone(),
            kind: self.kind,
            command: self.command.clone(),
            image: self.image.trim().to_string(),
            unit: self.unit.clone(),
            interval,
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
        })
    }
}

impl PatrolConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: PatrolConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Flatten services → checks into definitions, in file order.
    ///
    /// Fails on the first invalid entry. Also rejects duplicate
    /// `(service, check)` pairs and pairs whose sandbox identities collide,
    /// since two checks must never share a sandbox.
    pub fn check_definitions(&self) -> Result<Vec<CheckDefinition>, ConfigError> {
        let mut defs = Vec::new();
        // identity → "service/check" of the first owner
        let mut owners: HashMap<String, String> = HashMap::new();

        for (index, service) in self.services.iter().enumerate() {
            if service.name.trim().is_empty() {
                return Err(ConfigError::EmptyServiceName { index });
            }
            for check in &service.checks {
                if check.name.trim().is_empty() {
                    return Err(ConfigError::EmptyCheckName {
                        service: service.name.clone(),
                    });
                }
                let def = check.to_definition(&service.name)?;
                let label = def.label();
                let identity = sandbox_identity(&def.service, &def.name);
                if let Some(first) = owners.get(&identity) {
                    if *first == label {
                        return Err(ConfigError::DuplicateCheck {
                            service: def.service,
                            check: def.name,
                        });
                    }
                    return Err(ConfigError::IdentityCollision {
                        identity,
                        first: first.clone(),
                        second: label,
                    });
                }
                owners.insert(identity, label);
                defs.push(def);
            }
        }
        Ok(defs)
    }

    /// Validate without keeping the definitions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_definitions().map(|_| ())
    }

    /// Total number of configured checks across all services.
    pub fn check_count(&self) -> usize {
        self.services.iter().map(|s| s.checks.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = r#"
[[services]]
name = "Production API"

[[services.checks]]
name = "Login latency"
kind = "metric"
image = "curlimages/curl:8.8.0"
command = "curl -o /dev/null -s -w '%{time_total}' https://api.example.com/login"
interval = "5m"
unit = "s"
on_failure = ["log"]

[[services.checks]]
name = "Homepage"
kind = "status"
image = "alpine:3.20"
command = "wget -q -O /dev/null https://example.com"
interval = "30s"

[[services]]
name = "Billing"

[[services.checks]]
name = "Queue depth"
kind = "metric"
image = "alpine:3.20"
command = "echo 3"
interval = "60"
"#;

    #[test]
    fn test_parse_sample() {
        let config = PatrolConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.check_count(), 3);

        let defs = config.check_definitions().unwrap();
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].service, "Production API");
        assert_eq!(defs[0].kind, CheckKind::Metric);
        assert_eq!(defs[0].interval, Duration::from_secs(300));
        assert_eq!(defs[0].unit.as_deref(), Some("s"));
        assert_eq!(defs[0].on_failure, vec!["log".to_string()]);
        assert!(defs[0].on_success.is_empty());
        assert_eq!(defs[1].kind, CheckKind::Status);
        assert_eq!(defs[2].service, "Billing");
        assert_eq!(defs[2].interval, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_empty() {
        let config = PatrolConfig::from_toml_str("").unwrap();
        assert!(config.check_definitions().unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = PatrolConfig::from_toml_str(SAMPLE).unwrap();
        let again = PatrolConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(again.check_count(), 3);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let toml_str = r#"
[[services]]
name = "svc"
[[services.checks]]
name = "c"
kind = "latency"
image = "alpine"
command = "true"
interval = "5s"
"#;
        assert!(PatrolConfig::from_toml_str(toml_str).is_err());
    }

    fn single(check: CheckConfig) -> PatrolConfig {
        PatrolConfig {
            services: vec![ServiceConfig {
                name: "svc".to_string(),
                checks: vec![check],
            }],
        }
    }

    fn check(name: &str) -> CheckConfig {
        CheckConfig {
            name: name.to_string(),
            kind: CheckKind::Status,
            image: "alpine".to_string(),
            command: "true".to_string(),
            interval: "10s".to_string(),
            unit: None,
            on_success: vec![],
            on_failure: vec![],
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut c = check("c");
        c.interval = "0s".to_string();
        assert!(matches!(
            single(c).validate(),
            Err(ConfigError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_missing_image_rejected() {
        let mut c = check("c");
        c.image = "  ".to_string();
        assert_eq!(
            single(c).validate(),
            Err(ConfigError::MissingField {
                service: "svc".to_string(),
                check: "c".to_string(),
                field: "image",
            })
        );
    }

    #[test]
    fn test_duplicate_check_rejected() {
        let config = PatrolConfig {
            services: vec![ServiceConfig {
                name: "svc".to_string(),
                checks: vec![check("c"), check("c")],
            }],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateCheck { .. })
        ));
    }

    #[test]
    fn test_identity_collision_rejected() {
        let config = PatrolConfig {
            services: vec![ServiceConfig {
                name: "svc".to_string(),
                checks: vec![check("Login latency"), check("login-latency")],
            }],
        };
        match config.validate() {
            Err(ConfigError::IdentityCollision { identity, .. }) => {
                assert_eq!(identity, "patrol_svc_login_latency");
            }
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let config = PatrolConfig {
            services: vec![ServiceConfig {
                name: String::new(),
                checks: vec![],
            }],
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptyServiceName { index: 0 })
        );
    }
}
